//! Two-tier check of an AS4 response carrying a non-repudiation receipt.
//!
//! The `eb:Messaging` header is validated structurally against the receipt schema
//! group, then the receipt itself goes through the conformance rules. The outcome
//! policy decides what a failure at either tier means for the caller.

use std::sync::Arc;

use roxmltree::Node;
use tracing::debug;

use crate::cache::{SchemaContextCache, ValidationContext};
use crate::collector::ValidationErrorCollector;
use crate::conformance::ConformanceRuleEngine;
use crate::document;
use crate::error::{ConformanceCode, ConformanceError, Result, ValidationError};
use crate::namespace::NamespaceRegistry;
use crate::policy::{Action, ValidationOutcomePolicy};

#[derive(Debug)]
pub enum ReceiptOutcome {
    /// Validation is disabled; the message was not looked at
    Skipped,
    /// The message carries no receipt
    NotReceipt,
    Valid,
    Failed {
        error: ValidationError,
        action: Action,
    },
}

impl ReceiptOutcome {
    pub fn action(&self) -> Action {
        match self {
            ReceiptOutcome::Failed { action, .. } => *action,
            _ => Action::Continue,
        }
    }
}

enum Inspection {
    NotReceipt,
    Valid,
}

pub struct ReceiptValidator {
    cache: Arc<SchemaContextCache>,
    namespaces: Arc<NamespaceRegistry>,
    engine: ConformanceRuleEngine,
    policy: ValidationOutcomePolicy,
}

impl ReceiptValidator {
    pub fn new(
        cache: Arc<SchemaContextCache>,
        namespaces: Arc<NamespaceRegistry>,
        policy: ValidationOutcomePolicy,
    ) -> Self {
        Self {
            cache,
            engine: ConformanceRuleEngine::new(Arc::clone(&namespaces)),
            namespaces,
            policy,
        }
    }

    pub fn policy(&self) -> ValidationOutcomePolicy {
        self.policy
    }

    /// Inspect one response message.
    ///
    /// Findings about the message become [`ReceiptOutcome::Failed`] with the decided
    /// action. `Err` is reserved for failures of the validator itself, such as a schema
    /// group that cannot be compiled.
    pub fn inspect(&self, xml: &str) -> Result<ReceiptOutcome> {
        if !self.policy.should_validate() {
            return Ok(ReceiptOutcome::Skipped);
        }

        match self.run(xml) {
            Ok(Inspection::NotReceipt) => Ok(ReceiptOutcome::NotReceipt),
            Ok(Inspection::Valid) => Ok(ReceiptOutcome::Valid),
            Err(error) if is_message_finding(&error) => {
                let action = self.policy.decide(&error);
                Ok(ReceiptOutcome::Failed { error, action })
            }
            Err(error) => Err(error),
        }
    }

    fn run(&self, xml: &str) -> Result<Inspection> {
        let doc = document::parse(xml)?;
        let eb = self.namespaces.uri_for("eb");

        let scope = self.header_scope(doc.root_element());
        let Some(scope) = scope else {
            return Ok(Inspection::NotReceipt);
        };
        if !scope
            .descendants()
            .any(|node| document::is_element(node, eb, "Receipt"))
        {
            return Ok(Inspection::NotReceipt);
        }

        let messaging = single_messaging(scope)?;
        self.validate_structure(messaging)?;

        let mut receipts = document::descendants(messaging, eb, "Receipt");
        let receipt = match (receipts.next(), receipts.next()) {
            (_, Some(_)) => {
                return Err(ConformanceError::new(
                    ConformanceCode::MultipleReceipts,
                    "Signal message contains multiple Receipt nodes",
                )
                .into());
            }
            (receipt, None) => receipt,
        };

        self.engine.validate(receipt)?;
        debug!("receipt passed structural and conformance checks");
        Ok(Inspection::Valid)
    }

    /// The SOAP header of an envelope, or the whole document when there is no envelope.
    ///
    /// `Envelope` and `Header` match by local name, so SOAP 1.1 and 1.2 are both covered.
    fn header_scope<'a, 'input>(&self, root: Node<'a, 'input>) -> Option<Node<'a, 'input>> {
        if root.tag_name().name() == "Envelope" {
            root.children()
                .find(|child| child.is_element() && child.tag_name().name() == "Header")
        } else {
            Some(root)
        }
    }

    fn validate_structure(&self, messaging: Node<'_, '_>) -> Result<()> {
        let session = self.cache.session_for(ValidationContext::NrrReceipt)?;
        let mut collector = ValidationErrorCollector::new();
        session.validate_node(messaging, &mut collector)?;

        let warnings = collector.into_result()?;
        for warning in &warnings {
            debug!(%warning, "receipt header validation warning");
        }
        Ok(())
    }
}

fn single_messaging<'a, 'input>(scope: Node<'a, 'input>) -> Result<Node<'a, 'input>> {
    let mut headers = std::iter::once(scope)
        .filter(|node| node.tag_name().name() == "Messaging")
        .chain(document::descendants_any_namespace(scope, "Messaging"));

    match (headers.next(), headers.next()) {
        (Some(messaging), None) => Ok(messaging),
        _ => Err(ConformanceError::new(
            ConformanceCode::MessagingHeader,
            "Header contains zero or multiple eb:Messaging elements, should only contain one",
        )
        .into()),
    }
}

/// Failures that describe the message rather than the validator
fn is_message_finding(error: &ValidationError) -> bool {
    matches!(
        error,
        ValidationError::StructuralValidationFailure { .. }
            | ValidationError::ReceiptAbsent
            | ValidationError::Conformance(_)
            | ValidationError::Document(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ValidationMode;
    use crate::resource::MemoryStore;

    fn validator(mode: ValidationMode) -> ReceiptValidator {
        let cache = SchemaContextCache::from_store(Arc::new(MemoryStore::new()));
        ReceiptValidator::new(
            Arc::new(cache),
            Arc::new(NamespaceRegistry::as4()),
            ValidationOutcomePolicy::new(mode),
        )
    }

    #[test]
    fn test_disabled_mode_never_parses() {
        let outcome = validator(ValidationMode::Disabled)
            .inspect("not xml at all")
            .unwrap();
        assert!(matches!(outcome, ReceiptOutcome::Skipped));
    }

    #[test]
    fn test_message_without_receipt() {
        let xml = r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope">
  <env:Header/>
  <env:Body><Receipt/></env:Body>
</env:Envelope>"#;
        let outcome = validator(ValidationMode::Enforcing).inspect(xml).unwrap();
        assert!(matches!(outcome, ReceiptOutcome::NotReceipt));
    }

    #[test]
    fn test_malformed_message_is_decided_by_policy() {
        let outcome = validator(ValidationMode::Advisory).inspect("<env:Envelope").unwrap();
        match outcome {
            ReceiptOutcome::Failed { error, action } => {
                assert!(matches!(error, ValidationError::Document(_)));
                assert_eq!(action, Action::Continue);
            }
            other => panic!("Expected Failed, got {:?}", other),
        }
    }

    #[test]
    fn test_two_messaging_headers() {
        let xml = r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope"
    xmlns:eb="http://docs.oasis-open.org/ebxml-msg/ebms/v3.0/ns/core/200704/">
  <env:Header>
    <eb:Messaging><eb:SignalMessage><eb:Receipt/></eb:SignalMessage></eb:Messaging>
    <eb:Messaging/>
  </env:Header>
</env:Envelope>"#;
        let outcome = validator(ValidationMode::Enforcing).inspect(xml).unwrap();
        match outcome {
            ReceiptOutcome::Failed { error, action } => {
                assert_eq!(action, Action::Abort);
                match error {
                    ValidationError::Conformance(err) => {
                        assert_eq!(err.code, ConformanceCode::MessagingHeader)
                    }
                    other => panic!("Expected MessagingHeader, got {:?}", other),
                }
            }
            other => panic!("Expected Failed, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_schemas_are_validator_errors() {
        let xml = r#"<eb:Messaging xmlns:eb="http://docs.oasis-open.org/ebxml-msg/ebms/v3.0/ns/core/200704/">
  <eb:SignalMessage><eb:Receipt/></eb:SignalMessage>
</eb:Messaging>"#;
        let err = validator(ValidationMode::Advisory).inspect(xml).unwrap_err();
        assert!(matches!(err, ValidationError::SchemaCompilation(_)));
    }

    #[test]
    fn test_receipt_in_soap11_body_is_ignored() {
        let xml = r#"<S:Envelope xmlns:S="http://schemas.xmlsoap.org/soap/envelope/"
    xmlns:eb="http://docs.oasis-open.org/ebxml-msg/ebms/v3.0/ns/core/200704/">
  <S:Header/>
  <S:Body><eb:Messaging><eb:SignalMessage><eb:Receipt/></eb:SignalMessage></eb:Messaging></S:Body>
</S:Envelope>"#;
        let outcome = validator(ValidationMode::Enforcing).inspect(xml).unwrap();
        assert!(matches!(outcome, ReceiptOutcome::NotReceipt));
    }

    #[test]
    fn test_soap11_header_is_searched() {
        let xml = r#"<S:Envelope xmlns:S="http://schemas.xmlsoap.org/soap/envelope/"
    xmlns:eb="http://docs.oasis-open.org/ebxml-msg/ebms/v3.0/ns/core/200704/">
  <S:Header>
    <eb:Messaging><eb:SignalMessage><eb:Receipt/></eb:SignalMessage></eb:Messaging>
  </S:Header>
  <S:Body/>
</S:Envelope>"#;
        // Reaching the structural tier proves the receipt was found
        let err = validator(ValidationMode::Advisory).inspect(xml).unwrap_err();
        assert!(matches!(err, ValidationError::SchemaCompilation(_)));
    }
}
