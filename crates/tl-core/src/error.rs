use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An error raised while executing a branch. `code` is a stable machine
/// discriminator; `filename`/`line_number` point at the step or code-block
/// line the failure is attributed to. `continue_branch` mirrors the
/// `continue` attribute user code may attach to a thrown error: when set,
/// the failure does not end the branch.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct RunError {
    pub code: String,
    pub message: String,
    pub filename: Option<String>,
    pub line_number: Option<usize>,
    pub stack: Option<String>,
    pub continue_branch: bool,
}

impl RunError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            filename: None,
            line_number: None,
            stack: None,
            continue_branch: false,
        }
    }

    pub fn with_location(
        code: impl Into<String>,
        message: impl Into<String>,
        filename: impl Into<String>,
        line_number: usize,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            filename: Some(filename.into()),
            line_number: Some(line_number),
            stack: None,
            continue_branch: false,
        }
    }

    /// Fills in location fields that are still unset. Pre-set provenance
    /// (from user code or an earlier attribution pass) is never overwritten.
    pub fn fill_location(&mut self, filename: &str, line_number: usize) {
        if self.filename.is_none() {
            self.filename = Some(filename.to_string());
        }
        if self.line_number.is_none() {
            self.line_number = Some(line_number);
        }
    }

    pub fn recode(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    /// `filename:line` rendering for console banners; empty when unlocated.
    pub fn location_text(&self) -> String {
        match (&self.filename, self.line_number) {
            (Some(filename), Some(line)) => format!("{}:{}", filename, line),
            (Some(filename), None) => filename.clone(),
            (None, Some(line)) => format!("line {}", line),
            (None, None) => String::new(),
        }
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn fill_location_only_sets_unset_fields() {
        let mut error = RunError::new("CODE_BLOCK_ERROR", "boom");
        error.fill_location("a.tln", 12);
        assert_eq!(error.filename.as_deref(), Some("a.tln"));
        assert_eq!(error.line_number, Some(12));

        error.fill_location("b.tln", 99);
        assert_eq!(error.filename.as_deref(), Some("a.tln"));
        assert_eq!(error.line_number, Some(12));
    }

    #[test]
    fn fill_location_completes_partial_provenance() {
        let mut error = RunError::new("CODE_BLOCK_ERROR", "boom");
        error.line_number = Some(5);
        error.fill_location("a.tln", 12);
        assert_eq!(error.filename.as_deref(), Some("a.tln"));
        assert_eq!(error.line_number, Some(5));
    }

    #[test]
    fn display_and_location_text() {
        let error = RunError::with_location("VAR_NOT_SET", "no such var", "t.tln", 3);
        assert_eq!(error.to_string(), "VAR_NOT_SET: no such var");
        assert_eq!(error.location_text(), "t.tln:3");
        assert_eq!(RunError::new("X", "y").location_text(), "");
    }
}
