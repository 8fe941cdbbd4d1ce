use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::ValidationError;

/// How validation failures affect the surrounding pipeline
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Validation never runs
    Disabled,
    /// Failures are reported and processing continues
    #[default]
    Advisory,
    /// Failures are reported and processing stops
    Enforcing,
}

impl ValidationMode {
    /// Parse a configured mode, case-insensitively.
    ///
    /// Missing or unrecognized values fall back to [`ValidationMode::Advisory`].
    pub fn from_setting(setting: Option<&str>) -> Self {
        let Some(raw) = setting else {
            return ValidationMode::default();
        };

        match raw.trim().to_ascii_lowercase().as_str() {
            "disabled" | "none" => ValidationMode::Disabled,
            "advisory" | "logging" => ValidationMode::Advisory,
            "enforcing" | "strict" => ValidationMode::Enforcing,
            _ => {
                warn!("Unknown validation mode '{}', defaulting to advisory", raw);
                ValidationMode::Advisory
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Continue,
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValidationOutcomePolicy {
    mode: ValidationMode,
}

impl ValidationOutcomePolicy {
    pub fn new(mode: ValidationMode) -> Self {
        Self { mode }
    }

    pub fn from_setting(setting: Option<&str>) -> Self {
        Self::new(ValidationMode::from_setting(setting))
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    pub fn should_validate(&self) -> bool {
        self.mode != ValidationMode::Disabled
    }

    /// Decide what a failure means for the pipeline, logging it per mode
    pub fn decide(&self, failure: &ValidationError) -> Action {
        match self.mode {
            ValidationMode::Disabled => Action::Continue,
            ValidationMode::Advisory => {
                warn!(
                    ebms_code = failure.ebms_code().unwrap_or("-"),
                    "AS4 validation failed, continuing: {}", failure
                );
                Action::Continue
            }
            ValidationMode::Enforcing => {
                error!(
                    ebms_code = failure.ebms_code().unwrap_or("-"),
                    "AS4 validation failed, aborting: {}", failure
                );
                Action::Abort
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConformanceCode, ConformanceError};

    fn failure() -> ValidationError {
        ConformanceError::new(
            ConformanceCode::MissingDigestReference,
            "Digest references are not found in the non-repudiation receipt",
        )
        .into()
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(ValidationMode::from_setting(Some("ENFORCING")), ValidationMode::Enforcing);
        assert_eq!(ValidationMode::from_setting(Some(" strict ")), ValidationMode::Enforcing);
        assert_eq!(ValidationMode::from_setting(Some("Disabled")), ValidationMode::Disabled);
        assert_eq!(ValidationMode::from_setting(Some("none")), ValidationMode::Disabled);
        assert_eq!(ValidationMode::from_setting(Some("logging")), ValidationMode::Advisory);
        assert_eq!(ValidationMode::from_setting(Some("sometimes")), ValidationMode::Advisory);
        assert_eq!(ValidationMode::from_setting(None), ValidationMode::Advisory);
    }

    #[test]
    fn test_decisions_per_mode() {
        let err = failure();

        let disabled = ValidationOutcomePolicy::new(ValidationMode::Disabled);
        assert!(!disabled.should_validate());
        assert_eq!(disabled.decide(&err), Action::Continue);

        let advisory = ValidationOutcomePolicy::from_setting(Some("advisory"));
        assert!(advisory.should_validate());
        assert_eq!(advisory.decide(&err), Action::Continue);

        let enforcing = ValidationOutcomePolicy::from_setting(Some("enforcing"));
        assert_eq!(enforcing.decide(&err), Action::Abort);
        assert_eq!(enforcing.decide(&ValidationError::ReceiptAbsent), Action::Abort);
    }

    #[test]
    fn test_default_policy_is_advisory() {
        assert_eq!(ValidationOutcomePolicy::default().mode(), ValidationMode::Advisory);
    }
}
