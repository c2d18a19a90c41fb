use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::error::RunError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepLocation {
    pub filename: String,
    pub line_number: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepOutcome {
    Passed,
    Failed,
    Skipped,
}

/// One `{name}='value'` (or `{{name}}='value'`) binding carried by a step.
/// `value` is the raw literal and may itself contain variable references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarBeingSet {
    pub name: String,
    pub value: String,
    pub is_local: bool,
}

/// A single unit of execution. Identity and classification fields are
/// produced by the tree builder and never change during a run; the result
/// fields are filled in by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Step {
    pub filename: String,
    pub line_number: usize,
    /// Raw source line.
    pub line: String,
    /// Canonical step text.
    pub text: String,
    pub branch_indents: usize,

    pub is_function_call: bool,
    pub is_hook: bool,
    pub is_packaged: bool,
    pub is_before_debug: bool,
    pub is_after_debug: bool,
    pub is_expected_fail: bool,

    pub code_block: Option<String>,
    pub function_declaration_text: Option<String>,
    /// Where the matched function declaration lives. Errors thrown inside a
    /// function call's code block are attributed here.
    pub function_declaration_location: Option<StepLocation>,
    pub vars_being_set: Vec<VarBeingSet>,

    pub outcome: Option<StepOutcome>,
    /// Whether the actual outcome matched `is_expected_fail`.
    pub as_expected: Option<bool>,
    pub error: Option<RunError>,
    pub log: Vec<String>,
    pub time_started: Option<SystemTime>,
    pub time_ended: Option<SystemTime>,
    pub elapsed: Option<Duration>,
}

impl Step {
    pub fn new(text: impl Into<String>, filename: impl Into<String>, line_number: usize) -> Self {
        let text = text.into();
        Self {
            filename: filename.into(),
            line_number,
            line: text.clone(),
            text,
            ..Self::default()
        }
    }

    pub fn has_code_block(&self) -> bool {
        self.code_block.is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn clear_results(&mut self) {
        self.outcome = None;
        self.as_expected = None;
        self.error = None;
        self.log.clear();
        self.time_ended = None;
        self.elapsed = None;
    }
}

/// A linearized sequence of steps plus the hook sequences scheduled around
/// it. `elapsed_ms` is `-1` when the branch was paused at any point, so the
/// measurement would be meaningless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Branch {
    pub steps: Vec<Step>,
    pub before_every_branch: Vec<Step>,
    pub after_every_branch: Vec<Step>,
    pub before_every_step: Vec<Step>,
    pub after_every_step: Vec<Step>,

    pub outcome: Option<StepOutcome>,
    pub passed_last_time: bool,
    pub error: Option<RunError>,
    pub log: Vec<String>,
    pub elapsed_ms: Option<i64>,
    pub time_started: Option<SystemTime>,
    pub time_ended: Option<SystemTime>,
}

impl Branch {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    pub fn is_complete(&self) -> bool {
        self.outcome.is_some() || self.passed_last_time
    }

    /// Marks the branch failed. The branch error is recorded at most once;
    /// the first error wins.
    pub fn mark_failed(&mut self, error: RunError) {
        self.outcome = Some(StepOutcome::Failed);
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}
