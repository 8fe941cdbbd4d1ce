//! Prefix/URI mappings used by document queries.
//!
//! The registry is an immutable value built once at start-up and handed to the
//! components that need it (usually as `Arc<NamespaceRegistry>`).

use std::collections::BTreeMap;

use crate::error::{Result, ValidationError};

/// Sentinel returned for prefixes that have no mapping
pub const NULL_NS_URI: &str = "";

pub const SOAP12_ENV_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
pub const EBMS_NS: &str = "http://docs.oasis-open.org/ebxml-msg/ebms/v3.0/ns/core/200704/";
pub const EBBP_SIGNALS_NS: &str = "http://docs.oasis-open.org/ebxml-bp/ebbp-signals-2.0";
pub const XMLDSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const SBDH_NS: &str =
    "http://www.unece.org/cefact/namespaces/StandardBusinessDocumentHeader";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceRegistry {
    prefix_to_uri: BTreeMap<String, String>,
}

impl NamespaceRegistry {
    /// Build a registry from explicit `(prefix, uri)` pairs
    pub fn new<I, P, U>(mappings: I) -> Self
    where
        I: IntoIterator<Item = (P, U)>,
        P: Into<String>,
        U: Into<String>,
    {
        Self {
            prefix_to_uri: mappings
                .into_iter()
                .map(|(prefix, uri)| (prefix.into(), uri.into()))
                .collect(),
        }
    }

    /// The mapping used throughout AS4 message handling
    pub fn as4() -> Self {
        Self::new([
            ("env", SOAP12_ENV_NS),
            ("eb", EBMS_NS),
            ("ebbp", EBBP_SIGNALS_NS),
            ("ds", XMLDSIG_NS),
            ("sbdh", SBDH_NS),
        ])
    }

    /// URI bound to `prefix`, or [`NULL_NS_URI`] when the prefix is unknown
    pub fn uri_for(&self, prefix: &str) -> &str {
        self.prefix_to_uri
            .get(prefix)
            .map(String::as_str)
            .unwrap_or(NULL_NS_URI)
    }

    /// First prefix (in prefix order) bound to `uri`
    pub fn prefix_for(&self, uri: &str) -> Result<&str> {
        self.prefix_to_uri
            .iter()
            .find(|(_, bound)| bound.as_str() == uri)
            .map(|(prefix, _)| prefix.as_str())
            .ok_or_else(|| ValidationError::UnknownNamespace {
                uri: uri.to_string(),
            })
    }

    /// Every prefix bound to `uri`; empty when none is
    pub fn prefixes_for(&self, uri: &str) -> Vec<&str> {
        self.prefix_to_uri
            .iter()
            .filter(|(_, bound)| bound.as_str() == uri)
            .map(|(prefix, _)| prefix.as_str())
            .collect()
    }

    pub fn mappings(&self) -> BTreeMap<String, String> {
        self.prefix_to_uri.clone()
    }

    pub fn len(&self) -> usize {
        self.prefix_to_uri.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefix_to_uri.is_empty()
    }
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        Self::as4()
    }
}
