use std::time::{Instant, SystemTime};

use tl_core::{Branch, RunError, StepOutcome};

use super::lifecycle::{RunInstance, Tree};

pub(crate) fn next_incomplete_step(branch: &Branch, from: usize) -> Option<usize> {
    branch
        .steps
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, step)| !step.is_complete())
        .map(|(index, _)| index)
}

/// Completes a branch based on its steps: it passes only when every step
/// ended as expected (skips count as expected). An outcome recorded earlier
/// (e.g. a failed branch hook) is preserved.
pub(crate) fn finish_off_branch(branch: &mut Branch) {
    if branch.outcome.is_some() {
        return;
    }
    let all_as_expected = branch.steps.iter().all(|step| step.as_expected == Some(true));
    branch.outcome = Some(if all_as_expected {
        StepOutcome::Passed
    } else {
        StepOutcome::Failed
    });
}

impl<T: Tree> RunInstance<T> {
    /// Drives branches from the tree until they are exhausted, the instance
    /// is stopped, or a pause is requested. A paused instance resumes from
    /// its parked branch on the next call; the first step after a resume
    /// ignores its debug gates so stepping over a marker makes progress.
    pub fn run(&mut self) -> Result<(), RunError> {
        if self.is_stopped() {
            return Err(RunError::new(
                "INSTANCE_STOPPED",
                "The run instance was stopped and cannot run again.",
            ));
        }

        let mut override_debug = false;
        let mut resumed_mid_branch = false;
        if self.paused {
            self.clear_pause();
            override_debug = true;
            resumed_mid_branch = true;
        } else {
            self.curr_branch = self.tree.next_branch();
            self.curr_step_index = 0;
        }

        while let Some(mut branch) = self.curr_branch.take() {
            if !resumed_mid_branch {
                self.begin_branch(&mut branch);
                for hook in branch.before_every_branch.clone() {
                    self.run_hook_step(&hook, &mut branch, None);
                    if self.is_stopped() {
                        self.finalize_branch_timing(&mut branch);
                        self.curr_branch = Some(branch);
                        return Ok(());
                    }
                }
            }
            resumed_mid_branch = false;

            if !branch.is_complete() {
                while let Some(index) = next_incomplete_step(&branch, self.curr_step_index) {
                    self.curr_step_index = index;
                    self.run_step(&mut branch, index, override_debug)?;
                    override_debug = false;

                    if self.is_stopped() {
                        self.finalize_branch_timing(&mut branch);
                        self.curr_branch = Some(branch);
                        return Ok(());
                    }
                    if self.paused {
                        if branch.steps[index].is_complete() {
                            self.curr_step_index = index + 1;
                        }
                        branch.elapsed_ms = Some(-1);
                        self.curr_branch = Some(branch);
                        return Ok(());
                    }

                    self.curr_step_index = index + 1;
                    if branch.is_complete() {
                        break;
                    }
                }
            }

            self.complete_branch(&mut branch);
            self.curr_branch = self.tree.next_branch();
            self.curr_step_index = 0;
        }
        Ok(())
    }

    pub(crate) fn begin_branch(&mut self, branch: &mut Branch) {
        branch.time_started = Some(SystemTime::now());
        self.branch_timer = Some(Instant::now());
        self.env
            .borrow_mut()
            .reset_for_branch(&self.runner.global_init);
    }

    pub(crate) fn finalize_branch_timing(&mut self, branch: &mut Branch) {
        branch.time_ended = Some(SystemTime::now());
        // -1 means the branch paused at some point; the measurement would be
        // meaningless, so the sentinel is preserved.
        if branch.elapsed_ms != Some(-1) {
            branch.elapsed_ms = self
                .branch_timer
                .map(|timer| timer.elapsed().as_millis() as i64);
        }
    }

    /// After-branch hooks always run, even when the branch already failed.
    pub(crate) fn complete_branch(&mut self, branch: &mut Branch) {
        for hook in branch.after_every_branch.clone() {
            self.run_hook_step(&hook, branch, None);
            if self.is_stopped() {
                break;
            }
        }
        finish_off_branch(branch);
        self.finalize_branch_timing(branch);
        self.print_branch_complete(branch);
    }
}
