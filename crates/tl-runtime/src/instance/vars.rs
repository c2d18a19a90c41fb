use tl_core::text::{canonical_key, parse_var_reference, strip_quotes, unescape, var_token_regex};
use tl_core::{value_to_text, Branch, RunError, TlValue};

use super::env::VarScope;
use super::lifecycle::{RunInstance, Tree};

/// Bound on recursive variable resolution. Crossing it means the variable
/// definitions reference each other in a cycle.
const MAX_VAR_DEPTH: usize = 64;

pub(crate) fn format_var_brackets(name: &str, is_local: bool) -> String {
    if is_local {
        format!("{{{{{}}}}}", name)
    } else {
        format!("{{{}}}", name)
    }
}

impl<T: Tree> RunInstance<T> {
    /// Substitutes every `{name}` and `{{name}}` occurrence in `text`.
    /// `step_index` is the position in `branch` the text belongs to; forward
    /// lookup starts there.
    pub(crate) fn replace_vars(
        &mut self,
        text: &str,
        step_index: usize,
        branch: &Branch,
        depth: usize,
    ) -> Result<String, RunError> {
        if depth > MAX_VAR_DEPTH {
            return Err(RunError::new(
                "INFINITE_VAR_LOOP",
                "Infinite loop detected amongst variable references.",
            ));
        }

        let tokens: Vec<(usize, usize, String, bool)> = var_token_regex()
            .find_iter(text)
            .map(|found| {
                let (name, is_local) = parse_var_reference(found.as_str());
                (found.start(), found.end(), name, is_local)
            })
            .collect();

        let mut out = String::with_capacity(text.len());
        let mut last_index = 0usize;
        for (start, end, name, is_local) in tokens {
            out.push_str(&text[last_index..start]);
            let value = self.find_var_value(&name, is_local, step_index, branch, depth)?;
            if !value.is_scalar() {
                return Err(RunError::new(
                    "VAR_TYPE",
                    format!(
                        "The variable {} must resolve to a string, number, or boolean (got {}).",
                        format_var_brackets(&name, is_local),
                        value.type_name()
                    ),
                ));
            }
            out.push_str(&value_to_text(&value));
            last_index = end;
        }
        out.push_str(&text[last_index..]);
        Ok(out)
    }

    /// Resolves one variable. Checks the environment first, then scans the
    /// branch forward from `step_index` for the first later step that sets
    /// it: a later step may set what an earlier one reads. Local lookups
    /// stop at the first step that leaves the origin step's scope.
    pub(crate) fn find_var_value(
        &mut self,
        name: &str,
        is_local: bool,
        step_index: usize,
        branch: &Branch,
        depth: usize,
    ) -> Result<TlValue, RunError> {
        if depth > MAX_VAR_DEPTH {
            return Err(RunError::new(
                "INFINITE_VAR_LOOP",
                "Infinite loop detected amongst variable references.",
            ));
        }

        let scope = if is_local {
            VarScope::Local
        } else {
            VarScope::Global
        };
        if let Some(value) = self.env.borrow().get(scope, name) {
            return Ok(value);
        }

        let canonical = canonical_key(name);
        let origin_indents = branch
            .steps
            .get(step_index)
            .map(|step| step.branch_indents)
            .unwrap_or(0);

        let mut setter_index = None;
        for (index, later) in branch.steps.iter().enumerate().skip(step_index) {
            if is_local && later.branch_indents < origin_indents {
                break;
            }
            let matches = later
                .vars_being_set
                .iter()
                .any(|var| var.is_local == is_local && canonical_key(&var.name) == canonical);
            if matches {
                setter_index = Some(index);
                break;
            }
        }

        let Some(setter_index) = setter_index else {
            return Err(RunError::new(
                "VAR_NOT_SET",
                format!(
                    "The variable {} is never set, but is needed for this step.",
                    format_var_brackets(name, is_local)
                ),
            ));
        };

        let setter_step = branch.steps[setter_index].clone();
        let value = if let Some(code) = &setter_step.code_block {
            self.eval_code_block(code, &setter_step.text, setter_step.line_number, &setter_step.text)?
                .ok_or_else(|| {
                    RunError::new(
                        "VAR_NOT_SET",
                        format!(
                            "The code block that sets {} produced no value.",
                            format_var_brackets(name, is_local)
                        ),
                    )
                })?
        } else {
            let var = setter_step
                .vars_being_set
                .iter()
                .find(|var| var.is_local == is_local && canonical_key(&var.name) == canonical)
                .expect("setter step was matched on this variable");
            TlValue::String(unescape(&strip_quotes(&var.value)))
        };

        // Chained definitions resolve against the original step.
        match value {
            TlValue::String(text) => Ok(TlValue::String(self.replace_vars(
                &text,
                step_index,
                branch,
                depth + 1,
            )?)),
            other => Ok(other),
        }
    }
}
