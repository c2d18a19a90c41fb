use colored::Colorize;
use tl_core::{Branch, Step, StepOutcome};

use super::lifecycle::{RunInstance, Tree};

impl<T: Tree> RunInstance<T> {
    pub(crate) fn print_step_start(&self, step: &Step) {
        if !self.runner.console_output {
            return;
        }
        let location = if step.filename.is_empty() {
            String::new()
        } else {
            format!(" [{}:{}]", step.filename, step.line_number)
        };
        println!("Start:    {}{}", step.text.trim(), location);
    }

    pub(crate) fn print_step_end(&self, step: &Step) {
        if !self.runner.console_output {
            return;
        }
        let as_expected = step.as_expected.unwrap_or(false);
        let status = match step.outcome {
            Some(StepOutcome::Passed) if as_expected => "passed",
            Some(StepOutcome::Passed) => "passed not as expected",
            Some(StepOutcome::Failed) if as_expected => "failed as expected",
            Some(StepOutcome::Failed) => "failed",
            _ => "skipped",
        };
        let elapsed = step
            .elapsed
            .map(|elapsed| format!(" ({:.3} s)", elapsed.as_secs_f64()))
            .unwrap_or_default();

        let text = step.text.trim();
        let banner = format!("{} ({})", text, status);
        let colored_banner = if as_expected {
            banner.as_str().green()
        } else {
            banner.as_str().red()
        };
        println!("End:      {}{}", colored_banner, elapsed);

        if let Some(error) = &step.error {
            if !as_expected {
                println!("{}", text.red().bold());
                let location = error.location_text();
                if !location.is_empty() {
                    println!("{}", location);
                }
                if let Some(stack) = &error.stack {
                    println!("{}", stack);
                }
            }
        }
    }

    pub(crate) fn print_branch_complete(&self, branch: &Branch) {
        if !self.runner.console_output {
            return;
        }
        println!("Branch complete");
        if let Some(error) = &branch.error {
            println!("{}", "Errors occurred in branch".red().bold());
            let location = error.location_text();
            if !location.is_empty() {
                println!("{}", location);
            }
            if let Some(stack) = &error.stack {
                println!("{}", stack);
            }
        }
    }
}
