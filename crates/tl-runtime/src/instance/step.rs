use std::time::{Instant, SystemTime};

use tl_core::text::{
    function_input_regex, function_param_regex, is_string_literal, is_var_reference,
    parse_var_reference, strip_quotes, unescape,
};
use tl_core::{value_to_text, Branch, RunError, Step, StepOutcome, TlValue};

use super::branch::finish_off_branch;
use super::env::VarScope;
use super::lifecycle::{RunInstance, Tree};
use super::vars::format_var_brackets;

impl<T: Tree> RunInstance<T> {
    /// Runs one step of `branch`. Returns `Err` only for engine-internal
    /// invariant violations; test failures are recorded on the step itself.
    pub(crate) fn run_step(
        &mut self,
        branch: &mut Branch,
        index: usize,
        override_debug: bool,
    ) -> Result<(), RunError> {
        let flags = branch.steps[index].clone();

        if flags.is_before_debug && !override_debug {
            self.set_pause();
            return Ok(());
        }

        let started = Instant::now();
        {
            let step = &mut branch.steps[index];
            step.clear_results();
            step.time_started = Some(SystemTime::now());
        }
        self.print_step_start(&branch.steps[index]);

        // The first failing before-step hook fails the step and ends the
        // chain.
        let mut hook_failed = false;
        for hook in branch.before_every_step.clone() {
            let passed = self.run_hook_step(&hook, branch, Some(index));
            if self.is_stopped() {
                return Ok(());
            }
            if !passed {
                hook_failed = true;
                break;
            }
        }

        let mut step_error = None;
        if !hook_failed {
            if let Err(mut error) = self.execute_step_body(branch, index) {
                error.fill_location(&flags.filename, flags.line_number);
                step_error = Some(error);
            }
        }
        if self.is_stopped() {
            return Ok(());
        }

        self.resolve_step_result(branch, index, step_error);

        // Every after-step hook runs, even when an earlier one failed.
        for hook in branch.after_every_step.clone() {
            self.run_hook_step(&hook, branch, Some(index));
            if self.is_stopped() {
                return Ok(());
            }
        }

        {
            let step = &branch.steps[index];
            let passed_as_expected =
                step.outcome == Some(StepOutcome::Passed) && step.as_expected == Some(true);
            if self.runner.pause_on_fail && !passed_as_expected {
                self.set_pause();
            }
        }

        {
            let step = &mut branch.steps[index];
            step.time_ended = Some(SystemTime::now());
            step.elapsed = Some(started.elapsed());
        }
        self.print_step_end(&branch.steps[index]);

        if flags.is_after_debug && !override_debug {
            self.set_pause();
        }

        self.steps_ran.push(branch.steps[index].clone());
        Ok(())
    }

    fn execute_step_body(&mut self, branch: &mut Branch, index: usize) -> Result<(), RunError> {
        self.transition_scopes(branch, index);

        let step = branch.steps[index].clone();
        if step.is_function_call {
            self.bind_function_inputs(branch, index)?;
        } else if !step.has_code_block() && !step.vars_being_set.is_empty() {
            self.apply_assignments(branch, index)?;
        } else if !step.has_code_block() {
            // Plain textual step: expand its text so variable references are
            // validated and the resolved text lands in the log.
            let resolved = self.replace_vars(&step.text, index, branch, 0)?;
            if resolved != step.text {
                branch.steps[index]
                    .log
                    .push(format!("Step text is \"{}\"", resolved.trim()));
            }
        }

        if let Some(code) = &step.code_block {
            if step.is_function_call {
                self.env.borrow_mut().push_local_frame();
            }

            // A function call runs its declaration's code block, so errors
            // inside it are attributed to the declaration's location.
            let (eval_filename, eval_line) =
                if step.is_function_call && !step.is_hook && !step.is_packaged {
                    step.function_declaration_location
                        .as_ref()
                        .map(|loc| (loc.filename.clone(), loc.line_number))
                        .unwrap_or_else(|| (step.filename.clone(), step.line_number))
                } else {
                    (step.filename.clone(), step.line_number)
                };

            let result = self.eval_code_block(code, &step.text, eval_line, &step.text);
            let lines = self.drain_eval_log();
            branch.steps[index].log.extend(lines);
            if self.is_stopped() {
                return Ok(());
            }

            match result {
                Ok(returned) => {
                    if step.vars_being_set.len() == 1 {
                        if let Some(value) = returned {
                            let var = &step.vars_being_set[0];
                            let scope = if var.is_local {
                                VarScope::Local
                            } else {
                                VarScope::Global
                            };
                            self.env.borrow_mut().set(scope, &var.name, value.clone());
                            branch.steps[index].log.push(format!(
                                "Setting {} to \"{}\"",
                                format_var_brackets(&var.name, var.is_local),
                                value_to_text(&value)
                            ));
                        }
                    }
                }
                Err(mut error) => {
                    error.fill_location(&eval_filename, eval_line);
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    /// Adjusts the local frame stack for the indent delta between the
    /// previous step and this one, then clears stale staged locals. The
    /// frame of a code-block function call was already pushed when its block
    /// ran, so entering (or staying level with) one skips the push (or adds
    /// the pop).
    fn transition_scopes(&mut self, branch: &Branch, index: usize) {
        let mut env = self.env.borrow_mut();
        if index > 0 {
            let prev = &branch.steps[index - 1];
            let curr = branch.steps[index].branch_indents;
            let prev_was_code_block_fn = prev.is_function_call && prev.has_code_block();
            if curr > prev.branch_indents {
                if !prev_was_code_block_fn {
                    env.push_local_frame();
                }
            } else if curr < prev.branch_indents {
                // Leaving a code-block function call also leaves the frame
                // its block pushed.
                let pops = (prev.branch_indents - curr) + usize::from(prev_was_code_block_fn);
                for _ in 0..pops {
                    env.pop_local_frame();
                }
            } else if prev_was_code_block_fn {
                env.pop_local_frame();
            }
        }
        env.clear_staged();
    }

    fn bind_function_inputs(&mut self, branch: &mut Branch, index: usize) -> Result<(), RunError> {
        let step = branch.steps[index].clone();
        let declaration = step.function_declaration_text.clone().unwrap_or_default();
        let params: Vec<String> = function_param_regex()
            .captures_iter(&declaration)
            .map(|captures| {
                captures
                    .get(1)
                    .expect("param capture group is mandatory")
                    .as_str()
                    .trim()
                    .to_string()
            })
            .collect();

        let mut inputs: Vec<String> = function_input_regex()
            .find_iter(&step.text)
            .map(|found| found.as_str().to_string())
            .collect();
        if !step.vars_being_set.is_empty() && !inputs.is_empty() {
            // The first token is the assignment target, not an argument.
            inputs.remove(0);
        }

        debug_assert_eq!(
            params.len(),
            inputs.len(),
            "function call inputs must match declaration parameters"
        );
        if params.len() != inputs.len() {
            return Err(RunError::new(
                "FUNCTION_ARGS_MISMATCH",
                format!(
                    "Function call supplies {} input(s) but the declaration takes {}.",
                    inputs.len(),
                    params.len()
                ),
            ));
        }

        for (param, input) in params.iter().zip(inputs.iter()) {
            let value = if is_string_literal(input) {
                let expanded = self.replace_vars(&strip_quotes(input), index, branch, 0)?;
                TlValue::String(unescape(&expanded))
            } else if is_var_reference(input) {
                let (name, is_local) = parse_var_reference(input);
                self.find_var_value(&name, is_local, index, branch, 0)?
            } else {
                TlValue::String(input.clone())
            };
            branch.steps[index].log.push(format!(
                "Function parameter {{{{{}}}}} is \"{}\"",
                param,
                value_to_text(&value)
            ));
            self.env.borrow_mut().stage_function_local(param, value);
        }
        Ok(())
    }

    fn apply_assignments(&mut self, branch: &mut Branch, index: usize) -> Result<(), RunError> {
        let vars = branch.steps[index].vars_being_set.clone();
        for var in &vars {
            let expanded = self.replace_vars(&strip_quotes(&var.value), index, branch, 0)?;
            let value = TlValue::String(unescape(&expanded));
            let scope = if var.is_local {
                VarScope::Local
            } else {
                VarScope::Global
            };
            self.env.borrow_mut().set(scope, &var.name, value.clone());
            branch.steps[index].log.push(format!(
                "Setting {} to \"{}\"",
                format_var_brackets(&var.name, var.is_local),
                value_to_text(&value)
            ));
        }
        Ok(())
    }

    fn resolve_step_result(
        &mut self,
        branch: &mut Branch,
        index: usize,
        step_error: Option<RunError>,
    ) {
        let step = branch.steps[index].clone();
        let mut error = step_error.or_else(|| step.error.clone());
        let passed = error.is_none();
        if step.is_expected_fail && passed {
            error = Some(RunError::with_location(
                "STEP_PASSED_BUT_EXPECTED_TO_FAIL",
                "This step passed, but it was expected to fail.",
                step.filename.clone(),
                step.line_number,
            ));
        }
        let as_expected = passed == !step.is_expected_fail;
        let finish_branch_now = error
            .as_ref()
            .map(|e| !(e.continue_branch || self.runner.pause_on_fail))
            .unwrap_or(false);
        let outcome = if passed {
            StepOutcome::Passed
        } else {
            StepOutcome::Failed
        };
        self.mark_step(branch, index, outcome, as_expected, error, finish_branch_now);
    }

    /// Records a step's outcome. With `finish_branch_now` the branch is
    /// completed immediately: it passes only when every step ended as
    /// expected.
    pub fn mark_step(
        &mut self,
        branch: &mut Branch,
        index: usize,
        outcome: StepOutcome,
        as_expected: bool,
        error: Option<RunError>,
        finish_branch_now: bool,
    ) {
        {
            let step = &mut branch.steps[index];
            step.outcome = Some(outcome);
            step.as_expected = Some(as_expected);
            step.error = error;
        }
        if finish_branch_now {
            finish_off_branch(branch);
        }
    }

    pub fn mark_step_skipped(&mut self, branch: &mut Branch, index: usize) {
        let step = &mut branch.steps[index];
        step.outcome = Some(StepOutcome::Skipped);
        step.as_expected = Some(true);
    }

    /// Runs one hook. On failure the target step (or, without one, the
    /// branch) is marked failed; an error already recorded on the target is
    /// not overwritten. Returns whether the hook passed.
    pub(crate) fn run_hook_step(
        &mut self,
        hook: &Step,
        branch: &mut Branch,
        target_step: Option<usize>,
    ) -> bool {
        let mut executed = hook.clone();
        executed.clear_results();
        executed.time_started = Some(SystemTime::now());
        let started = Instant::now();

        let mut failure = None;
        if let Some(code) = &hook.code_block {
            let result = self.eval_code_block(code, &hook.text, hook.line_number, &hook.text);
            executed.log.extend(self.drain_eval_log());
            if self.is_stopped() {
                return true;
            }
            if let Err(mut error) = result {
                error.fill_location(&hook.filename, hook.line_number);
                failure = Some(error.recode("HOOK_ERROR"));
            }
        }

        let passed = failure.is_none();
        executed.outcome = Some(if passed {
            StepOutcome::Passed
        } else {
            StepOutcome::Failed
        });
        executed.as_expected = Some(passed);
        executed.error = failure.clone();
        executed.time_ended = Some(SystemTime::now());
        executed.elapsed = Some(started.elapsed());
        self.steps_ran.push(executed);

        if let Some(error) = failure {
            match target_step {
                Some(index) => {
                    let step = &mut branch.steps[index];
                    step.outcome = Some(StepOutcome::Failed);
                    step.as_expected = Some(step.is_expected_fail);
                    if step.error.is_none() {
                        step.error = Some(error);
                    }
                }
                None => branch.mark_failed(error),
            }
            return false;
        }
        true
    }
}
