//! End-to-end scenarios driven through the public API.

use std::collections::VecDeque;

use tl_core::text::canonical_key;
use tl_core::{Branch, RunError, Step, StepLocation, StepOutcome, TlValue, VarBeingSet};
use tl_runtime::{RunInstance, RunInstanceOptions, RunnerHandle, Tree, VarScope};

struct ListTree {
    branches: VecDeque<Branch>,
    single: bool,
}

impl ListTree {
    fn new(branches: Vec<Branch>) -> Self {
        let single = branches.len() == 1;
        Self {
            branches: branches.into(),
            single,
        }
    }
}

impl Tree for ListTree {
    fn next_branch(&mut self) -> Option<Branch> {
        self.branches.pop_front()
    }

    fn has_one_branch(&self) -> bool {
        self.single
    }

    fn branchify(&self, mut step: Step, context: &[Step]) -> Result<Branch, RunError> {
        if step.is_function_call && step.function_declaration_text.is_none() {
            let canonical = canonical_key(&step.text);
            for ran in context {
                if let Some(declaration) = &ran.function_declaration_text {
                    if canonical_key(&ran.text) == canonical {
                        step.function_declaration_text = Some(declaration.clone());
                        step.function_declaration_location =
                            ran.function_declaration_location.clone();
                        step.code_block = ran.code_block.clone();
                        break;
                    }
                }
            }
        }
        Ok(Branch::new(vec![step]))
    }
}

fn step(text: &str, line: usize) -> Step {
    Step::new(text, "suite.tln", line)
}

fn assign_step(name: &str, value: &str, is_local: bool, line: usize) -> Step {
    let token = if is_local {
        format!("{{{{{}}}}}", name)
    } else {
        format!("{{{}}}", name)
    };
    let mut out = step(&format!("{}='{}'", token, value), line);
    out.vars_being_set.push(VarBeingSet {
        name: name.to_string(),
        value: format!("'{}'", value),
        is_local,
    });
    out
}

fn code_step(text: &str, line: usize, code: &str) -> Step {
    let mut out = step(text, line);
    out.code_block = Some(code.to_string());
    out
}

fn instance(branches: Vec<Branch>) -> RunInstance<ListTree> {
    instance_with_runner(branches, RunnerHandle::default())
}

fn instance_with_runner(branches: Vec<Branch>, runner: RunnerHandle) -> RunInstance<ListTree> {
    RunInstance::new(
        ListTree::new(branches),
        RunInstanceOptions {
            runner,
            package_loader: None,
        },
    )
}

#[test]
fn s1_simple_assignment_and_read() {
    let branch = Branch::new(vec![
        assign_step("x", "hi", false, 1),
        step("say {x}", 2),
    ]);
    let mut run = instance(vec![branch]);
    run.run().expect("run should pass");

    assert_eq!(run.var_value(VarScope::Global, "x"), Some(TlValue::from("hi")));
    let ran = run.steps_ran();
    assert_eq!(ran.len(), 2);
    assert!(ran.iter().all(|s| s.outcome == Some(StepOutcome::Passed)));
    assert!(ran[1].log.iter().any(|line| line.contains("say hi")));
}

#[test]
fn s2_forward_lookup_resolves_a_later_setter() {
    let branch = Branch::new(vec![
        step("say {y}", 1),
        assign_step("y", "world", false, 2),
    ]);
    let mut run = instance(vec![branch]);
    run.run().expect("run should pass");

    let ran = run.steps_ran();
    assert_eq!(ran.len(), 2);
    assert!(ran.iter().all(|s| s.outcome == Some(StepOutcome::Passed)));
    assert!(ran[0].log.iter().any(|line| line.contains("say world")));
}

#[test]
fn s3_function_call_scope_lifecycle() {
    let opener = step("open", 1);
    let mut call = step("Greet \"Ada\"", 2);
    call.branch_indents = 1;
    call.is_function_call = true;
    call.function_declaration_text = Some("Greet {{name}}".to_string());
    call.function_declaration_location = Some(StepLocation {
        filename: "suite.tln".to_string(),
        line_number: 40,
    });
    call.code_block = Some("log(name)".to_string());
    let closer = step("close", 3);

    let branch = Branch::new(vec![opener, call, closer]);
    let mut run = instance(vec![branch]);
    run.run().expect("run should pass");

    let ran = run.steps_ran();
    assert_eq!(ran.len(), 3);
    assert!(ran[1]
        .log
        .iter()
        .any(|line| line == "Function parameter {{name}} is \"Ada\""));
    assert!(ran[1].log.iter().any(|line| line == "Ada"));
    // The function scope closed with the call; its local is gone.
    assert_eq!(run.var_value(VarScope::Local, "name"), None);
}

#[test]
fn s4_expected_fail_inversion() {
    let mut failing = code_step("blow up", 5, "throw \"bang\"");
    failing.is_expected_fail = true;
    let branch = Branch::new(vec![failing]);
    let mut run = instance(vec![branch]);
    run.run().expect("run should pass");

    let ran = run.steps_ran();
    assert_eq!(ran[0].outcome, Some(StepOutcome::Failed));
    assert_eq!(ran[0].as_expected, Some(true));
}

#[test]
fn s5_pause_on_fail_then_single_step() {
    let mut runner = RunnerHandle::default();
    runner.pause_on_fail = true;
    let branch = Branch::new(vec![
        code_step("boom", 1, "throw \"down\""),
        step("second", 2),
    ]);
    let mut run = instance_with_runner(vec![branch], runner);
    run.run().expect("run should pass");

    assert!(run.is_paused());
    {
        let parked = run.curr_branch().expect("parked branch");
        assert_eq!(parked.steps[0].outcome, Some(StepOutcome::Failed));
        assert!(parked.outcome.is_none());
        assert_eq!(parked.steps[1].outcome, None);
    }

    let done = run.run_one_step().expect("step should run");
    assert!(!done);
    assert!(run.is_paused());
    assert_eq!(
        run.curr_branch().expect("branch").steps[1].outcome,
        Some(StepOutcome::Passed)
    );
}

#[test]
fn s6_inject_into_a_paused_instance() {
    let mut runner = RunnerHandle::default();
    runner.pause_on_fail = true;
    let branch = Branch::new(vec![
        step("fine", 1),
        code_step("boom", 2, "throw \"down\""),
    ]);
    let mut run = instance_with_runner(vec![branch], runner);
    run.run().expect("run should pass");
    assert!(run.is_paused());
    let ran_before = run.steps_ran().len();

    let mut injected = step("{{z}}='abc'", 1);
    injected.vars_being_set.push(VarBeingSet {
        name: "z".to_string(),
        value: "'abc'".to_string(),
        is_local: true,
    });
    let synthesized = run.inject_step(injected).expect("inject should pass");

    assert_eq!(synthesized.steps.len(), 1);
    assert_eq!(synthesized.steps[0].outcome, Some(StepOutcome::Passed));
    assert_eq!(run.var_value(VarScope::Local, "z"), Some(TlValue::from("abc")));
    assert!(run.is_paused());
    assert_eq!(run.steps_ran().len(), ran_before + 1);
}

#[test]
fn outcome_flags_are_mutually_exclusive_and_expectation_tagged() {
    let mut expected_fail = code_step("boom", 3, "throw \"x\"");
    expected_fail.is_expected_fail = true;
    let branch = Branch::new(vec![assign_step("a", "1", false, 1), expected_fail]);
    let mut run = instance(vec![branch]);
    run.run().expect("run should pass");

    for ran in run.steps_ran() {
        let outcome = ran.outcome.expect("every executed step has an outcome");
        let as_expected = ran.as_expected.expect("every executed step is tagged");
        match outcome {
            StepOutcome::Passed => assert_eq!(as_expected, !ran.is_expected_fail),
            StepOutcome::Failed => assert_eq!(as_expected, ran.is_expected_fail),
            StepOutcome::Skipped => {}
        }
    }
}

#[test]
fn persistent_survives_branches_while_global_and_local_reset() {
    let first = Branch::new(vec![code_step(
        "seed",
        1,
        "setPersistent(\"p\", \"kept\"); setGlobal(\"g\", 1); setLocal(\"l\", 2);",
    )]);
    let second = Branch::new(vec![step("idle", 1)]);
    let mut run = instance(vec![first, second]);
    run.run().expect("run should pass");

    assert_eq!(
        run.var_value(VarScope::Persistent, "p"),
        Some(TlValue::from("kept"))
    );
    assert_eq!(run.var_value(VarScope::Global, "g"), None);
    assert_eq!(run.var_value(VarScope::Local, "l"), None);
}

#[test]
fn rerunning_an_identical_branch_produces_identical_logs() {
    let build = || {
        Branch::new(vec![
            assign_step("x", "hi", false, 1),
            step("say {x}", 2),
        ])
    };
    let mut first = instance(vec![build()]);
    first.run().expect("run should pass");
    let mut second = instance(vec![build()]);
    second.run().expect("run should pass");

    let first_logs: Vec<_> = first.steps_ran().iter().map(|s| s.log.clone()).collect();
    let second_logs: Vec<_> = second.steps_ran().iter().map(|s| s.log.clone()).collect();
    assert_eq!(first_logs, second_logs);
}
