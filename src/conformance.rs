//! Profile conformance rules for non-repudiation receipts.
//!
//! Rules run in a fixed order and the first violation ends the check.

use std::sync::Arc;

use roxmltree::Node;
use tracing::debug;

use crate::document;
use crate::error::{ConformanceCode, ConformanceError};
use crate::namespace::NamespaceRegistry;

const NON_REPUDIATION_INFORMATION: &str = "NonRepudiationInformation";
const MESSAGE_PART_NR_INFORMATION: &str = "MessagePartNRInformation";
const MESSAGE_PART_IDENTIFIER: &str = "MessagePartIdentifier";
const REFERENCE: &str = "Reference";

pub struct ConformanceRuleEngine {
    namespaces: Arc<NamespaceRegistry>,
}

impl ConformanceRuleEngine {
    pub fn new(namespaces: Arc<NamespaceRegistry>) -> Self {
        Self { namespaces }
    }

    /// Check the receipt subtree rooted at `receipt`.
    ///
    /// `None` means the caller found no receipt, which is reported as
    /// [`ConformanceCode::ReceiptAbsent`] rather than as a rule violation.
    pub fn validate(&self, receipt: Option<Node<'_, '_>>) -> Result<(), ConformanceError> {
        let Some(receipt) = receipt else {
            return Err(ConformanceError::new(
                ConformanceCode::ReceiptAbsent,
                "Receipt not found in the response message",
            ));
        };

        let ebbp = self.namespaces.uri_for("ebbp");
        let ds = self.namespaces.uri_for("ds");

        let mut containers = document::descendants(receipt, ebbp, NON_REPUDIATION_INFORMATION);
        let nri = match (containers.next(), containers.next()) {
            (Some(nri), None) => nri,
            (None, _) => {
                return Err(ConformanceError::new(
                    ConformanceCode::MissingNonRepudiationInformation,
                    "NonRepudiationInformation element not found",
                ));
            }
            (Some(_), Some(_)) => {
                return Err(ConformanceError::new(
                    ConformanceCode::MultipleNonRepudiationInformation,
                    "Multiple NonRepudiationInformation elements found",
                ));
            }
        };

        let parts: Vec<_> = document::children(nri, ebbp, MESSAGE_PART_NR_INFORMATION).collect();
        if parts.is_empty() {
            return Err(ConformanceError::new(
                ConformanceCode::MissingMessagePartNRInformation,
                "MessagePartNRInformation element(s) not found",
            ));
        }

        for part in &parts {
            let has_reference = document::children(*part, ds, REFERENCE).next().is_some();
            let has_identifier = document::children(*part, ebbp, MESSAGE_PART_IDENTIFIER)
                .next()
                .is_some();

            if has_reference && has_identifier {
                return Err(ConformanceError::new(
                    ConformanceCode::ReferenceWithMessagePartIdentifier,
                    "Both ds:Reference and ebbpsig:MessagePartIdentifier elements are not allowed together in Peppol AS4 receipts",
                ));
            }
            if !has_reference {
                return Err(ConformanceError::new(
                    ConformanceCode::MissingDigestReference,
                    "Digest references are not found in the non-repudiation receipt",
                ));
            }
        }

        debug!(parts = parts.len(), "receipt conforms to the AS4 profile");
        Ok(())
    }
}
