use std::sync::atomic::Ordering;

use tl_core::{Branch, RunError, Step, StepOutcome};

use super::branch::next_incomplete_step;
use super::lifecycle::{RunInstance, Tree};

fn no_current_branch() -> RunError {
    RunError::new("NO_CURRENT_BRANCH", "There is no branch to operate on.")
}

/// Debugger operations, valid only while the instance is paused. All of
/// them share the paused run's environment and cursor.
impl<T: Tree> RunInstance<T> {
    fn ensure_paused(&self) -> Result<(), RunError> {
        if !self.paused {
            return Err(RunError::new(
                "NOT_PAUSED",
                "This operation is only available while the run instance is paused.",
            ));
        }
        Ok(())
    }

    /// Runs the next incomplete step (ignoring its debug gates) and pauses
    /// again. Returns `true` when no step was left and the branch was
    /// finished off instead.
    pub fn run_one_step(&mut self) -> Result<bool, RunError> {
        self.ensure_paused()?;
        let mut branch = self.curr_branch.take().ok_or_else(no_current_branch)?;
        match next_incomplete_step(&branch, self.curr_step_index) {
            Some(index) => {
                self.curr_step_index = index;
                let run = self.run_step(&mut branch, index, true);
                self.curr_step_index = index + 1;
                self.set_pause();
                self.curr_branch = Some(branch);
                run?;
                Ok(false)
            }
            None => {
                self.complete_branch(&mut branch);
                self.curr_branch = Some(branch);
                Ok(true)
            }
        }
    }

    /// Marks the next incomplete step skipped and pauses again. Returns
    /// `true` when no step was left and the branch was finished off instead.
    pub fn skip_one_step(&mut self) -> Result<bool, RunError> {
        self.ensure_paused()?;
        let mut branch = self.curr_branch.take().ok_or_else(no_current_branch)?;
        match next_incomplete_step(&branch, self.curr_step_index) {
            Some(index) => {
                self.mark_step_skipped(&mut branch, index);
                self.curr_step_index = index + 1;
                self.set_pause();
                self.curr_branch = Some(branch);
                Ok(false)
            }
            None => {
                self.complete_branch(&mut branch);
                self.curr_branch = Some(branch);
                Ok(true)
            }
        }
    }

    /// Re-runs the step immediately before the cursor (ignoring its debug
    /// gates). The cursor does not move.
    pub fn run_last_step(&mut self) -> Result<(), RunError> {
        self.ensure_paused()?;
        let mut branch = self.curr_branch.take().ok_or_else(no_current_branch)?;
        let Some(index) = self.curr_step_index.checked_sub(1) else {
            self.curr_branch = Some(branch);
            return Err(RunError::new(
                "NO_LAST_STEP",
                "No step has run yet in this branch.",
            ));
        };
        let run = self.run_step(&mut branch, index, true);
        self.set_pause();
        self.curr_branch = Some(branch);
        run
    }

    /// Branchifies `step` against the steps that already ran (so function
    /// calls that were seen before resolve) and executes the synthesized
    /// branch until a step fails or all finish. The instance stays paused.
    pub fn inject_step(&mut self, step: Step) -> Result<Branch, RunError> {
        self.ensure_paused()?;
        let mut synthesized = self.tree.branchify(step, &self.steps_ran)?;
        for index in 0..synthesized.steps.len() {
            self.run_step(&mut synthesized, index, true)?;
            if synthesized.steps[index].outcome == Some(StepOutcome::Failed) {
                break;
            }
            if self.is_stopped() {
                break;
            }
        }
        self.set_pause();
        Ok(synthesized)
    }

    /// Cooperative terminal stop. The current branch's elapsed is finalized;
    /// no in-flight step is marked.
    pub fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(mut branch) = self.curr_branch.take() {
            self.finalize_branch_timing(&mut branch);
            self.curr_branch = Some(branch);
        }
    }
}
