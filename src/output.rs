//! Output and Reporting
//!
//! Human-readable and JSON rendering of validation results.

use std::io::IsTerminal;
use std::time::Duration;

use crate::cli::{OutputFormat, VerbosityLevel};
use crate::policy::Action;
use crate::validator::{FileValidationResult, ValidationResults, ValidationStatus};

pub struct Output {
    format: OutputFormat,
    verbosity: VerbosityLevel,
    show_colors: bool,
}

impl Output {
    pub fn new(format: OutputFormat, verbosity: VerbosityLevel) -> Self {
        Self {
            format,
            verbosity,
            show_colors: format == OutputFormat::Human && std::io::stdout().is_terminal(),
        }
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    pub fn format_results(&self, results: &ValidationResults) -> String {
        match self.format {
            OutputFormat::Json => format_json(results),
            OutputFormat::Human => self.format_human(results),
        }
    }

    fn format_human(&self, results: &ValidationResults) -> String {
        let mut output = String::new();

        let listed = |result: &&FileValidationResult| match self.verbosity {
            VerbosityLevel::Verbose => !result.status.is_valid(),
            VerbosityLevel::Quiet | VerbosityLevel::Normal => is_failure(result),
        };
        for file_result in results.file_results.iter().filter(listed) {
            output.push_str(&self.format_file_result(file_result));
            output.push('\n');
        }

        if self.verbosity != VerbosityLevel::Quiet {
            output.push_str(&self.format_summary(results));
        }

        output
    }

    pub fn format_file_result(&self, result: &FileValidationResult) -> String {
        let path_display = result.path.display();
        let duration_str = format_duration(result.duration);
        let action = match result.action {
            Action::Abort => " [abort]",
            Action::Continue => "",
        };

        let mut output = match &result.status {
            ValidationStatus::Valid => format!(
                "{}  {} ({})",
                self.colorize("✓ VALID", "32"),
                path_display,
                duration_str
            ),
            ValidationStatus::Invalid { error_count } => format!(
                "{}  {} ({}) - {} error{}{}",
                self.colorize("✗ INVALID", "31"),
                path_display,
                duration_str,
                error_count,
                if *error_count == 1 { "" } else { "s" },
                action
            ),
            ValidationStatus::NonConformant { ebms_code, message } => format!(
                "{}  {} ({}) - {} {}{}",
                self.colorize("✗ NONCONFORMANT", "35"),
                path_display,
                duration_str,
                ebms_code,
                message,
                action
            ),
            ValidationStatus::Error { message } => format!(
                "{}  {} ({}) - {}",
                self.colorize("⚠ ERROR", "33"),
                path_display,
                duration_str,
                message
            ),
            ValidationStatus::Skipped { reason } => format!(
                "{}  {} ({}) - {}",
                self.colorize("- SKIPPED", "36"),
                path_display,
                duration_str,
                reason
            ),
        };

        if self.verbosity >= VerbosityLevel::Verbose && result.status.is_invalid() {
            for error_detail in &result.error_details {
                output.push_str(&format!("\n    {}", error_detail));
            }
        }
        output
    }

    fn format_summary(&self, results: &ValidationResults) -> String {
        let mut output = String::new();
        output.push_str("Validation Summary:\n");
        output.push_str(&format!("  Total files: {}\n", results.total_files));
        output.push_str(&format!(
            "  {} {}\n",
            self.colorize("Valid:", "32"),
            results.valid_files
        ));

        if results.invalid_files > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Invalid:", "31"),
                results.invalid_files
            ));
        }
        if results.non_conformant_files > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Non-conformant:", "35"),
                results.non_conformant_files
            ));
        }
        if results.error_files > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Errors:", "33"),
                results.error_files
            ));
        }
        if results.skipped_files > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Skipped:", "36"),
                results.skipped_files
            ));
        }
        if results.aborted_files > 0 {
            output.push_str(&format!("  Aborted: {}\n", results.aborted_files));
        }

        output.push_str(&format!("  Success rate: {:.1}%\n", results.success_rate()));
        output.push_str(&format!(
            "  Duration: {}\n",
            format_duration(results.total_duration)
        ));

        output
    }
}

fn is_failure(result: &FileValidationResult) -> bool {
    result.status.is_invalid() || result.status.is_non_conformant() || result.status.is_error()
}

fn format_json(results: &ValidationResults) -> String {
    serde_json::to_string_pretty(results)
        .map(|json| json + "\n")
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize results: {}\"}}", e))
}

fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs_f64();
    if total_secs < 1.0 {
        format!("{:.0}ms", duration.as_millis())
    } else if total_secs < 60.0 {
        format!("{:.2}s", total_secs)
    } else {
        let mins = (total_secs / 60.0) as u64;
        let secs = total_secs % 60.0;
        format!("{}m{:.1}s", mins, secs)
    }
}
