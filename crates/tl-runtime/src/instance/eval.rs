use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use rhai::{Dynamic, Engine, EvalAltResult, ImmutableString, Map, Position, Scope};
use tl_core::{RunError, TlValue};

use super::env::{Environment, EvalContext, VarScope};
use super::lifecycle::{PackageLoader, RunInstance, Tree};
use crate::helpers::rhai_bridge::{
    code_block_symbol, dynamic_to_value, package_var_name, value_to_dynamic,
};

fn runtime_error(message: impl Into<String>) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(
        Dynamic::from(message.into()),
        Position::NONE,
    ))
}

fn getter(
    env: &Rc<RefCell<Environment>>,
    scope: VarScope,
) -> impl Fn(ImmutableString) -> Dynamic + 'static {
    let env = Rc::clone(env);
    move |name: ImmutableString| {
        env.borrow()
            .get(scope, &name)
            .map(|value| value_to_dynamic(&value))
            .unwrap_or(Dynamic::UNIT)
    }
}

fn setter(
    env: &Rc<RefCell<Environment>>,
    scope: VarScope,
) -> impl Fn(ImmutableString, Dynamic) -> Result<Dynamic, Box<EvalAltResult>> + 'static {
    let env = Rc::clone(env);
    move |name: ImmutableString, value: Dynamic| {
        let converted = dynamic_to_value(value.clone())
            .map_err(|error| runtime_error(error.message))?
            .ok_or_else(|| runtime_error(format!("Cannot store an empty value in \"{}\".", name)))?;
        env.borrow_mut().set(scope, &name, converted);
        Ok(value)
    }
}

fn import_package(
    env: &Rc<RefCell<Environment>>,
    loader: &dyn PackageLoader,
    package_name: &str,
    var_name: Option<&str>,
) -> Result<Dynamic, Box<EvalAltResult>> {
    let name = var_name
        .map(str::to_string)
        .unwrap_or_else(|| package_var_name(package_name));
    if let Some(existing) = env.borrow().get(VarScope::Persistent, &name) {
        return Ok(value_to_dynamic(&existing));
    }
    let loaded = loader
        .load(package_name)
        .map_err(|error| runtime_error(error.message))?;
    env.borrow_mut().set(VarScope::Persistent, &name, loaded.clone());
    Ok(value_to_dynamic(&loaded))
}

/// Builds the engine that runs user expression blocks, with the fixed helper
/// surface closed over the instance's shared environment and eval context.
pub(crate) fn build_expression_engine(
    env: &Rc<RefCell<Environment>>,
    eval_ctx: &Rc<RefCell<EvalContext>>,
    package_loader: &Arc<dyn PackageLoader>,
) -> Engine {
    let mut engine = Engine::new();
    engine.set_strict_variables(true);

    let ctx = Rc::clone(eval_ctx);
    engine.register_fn("log", move |text: ImmutableString| {
        ctx.borrow_mut().log.push(text.to_string());
    });

    let ctx = Rc::clone(eval_ctx);
    engine.register_fn("getStepText", move || -> ImmutableString {
        ctx.borrow().step_text.clone().into()
    });

    engine.register_fn("getPersistent", getter(env, VarScope::Persistent));
    engine.register_fn("getGlobal", getter(env, VarScope::Global));
    engine.register_fn("getLocal", getter(env, VarScope::Local));
    engine.register_fn("setPersistent", setter(env, VarScope::Persistent));
    engine.register_fn("setGlobal", setter(env, VarScope::Global));
    engine.register_fn("setLocal", setter(env, VarScope::Local));

    let env_for_imp = Rc::clone(env);
    let loader = Arc::clone(package_loader);
    engine.register_fn(
        "imp",
        move |package: ImmutableString| -> Result<Dynamic, Box<EvalAltResult>> {
            import_package(&env_for_imp, loader.as_ref(), &package, None)
        },
    );

    let env_for_imp = Rc::clone(env);
    let loader = Arc::clone(package_loader);
    engine.register_fn(
        "imp",
        move |package: ImmutableString,
              var_name: ImmutableString|
              -> Result<Dynamic, Box<EvalAltResult>> {
            import_package(&env_for_imp, loader.as_ref(), &package, Some(var_name.as_str()))
        },
    );

    engine
}

fn eval_error_to_run_error(error: EvalAltResult) -> RunError {
    let position_line = error.position().line();
    let mut out = RunError::new("CODE_BLOCK_ERROR", error.to_string());
    out.stack = Some(error.to_string());

    if let EvalAltResult::ErrorRuntime(thrown, _) = &error {
        if thrown.is::<Map>() {
            let map = thrown.clone_cast::<Map>();
            if let Some(message) = map.get("message") {
                out.message = message.to_string();
            }
            if let Some(flag) = map.get("continue") {
                out.continue_branch = flag.as_bool().unwrap_or(false);
            }
            if let Some(filename) = map.get("filename") {
                out.filename = Some(filename.to_string());
            }
            if let Some(line) = map.get("lineNumber") {
                if let Ok(line) = line.as_int() {
                    out.line_number = Some(line as usize);
                }
            }
        } else if !thrown.is_unit() {
            out.message = thrown.to_string();
        }
    }

    if out.line_number.is_none() {
        out.line_number = position_line;
    }
    out
}

impl<T: Tree> RunInstance<T> {
    /// Evaluates a user expression block. `line_number` is the block's first
    /// line in its source file; the source is padded with blank lines so
    /// reported positions equal file lines. Returns the block's final value,
    /// or `None` when it produces no value.
    pub(crate) fn eval_code_block(
        &mut self,
        code: &str,
        func_name: &str,
        line_number: usize,
        step_text: &str,
    ) -> Result<Option<TlValue>, RunError> {
        self.eval_ctx.borrow_mut().step_text = step_text.to_string();

        let mut scope = Scope::new();
        for (name, value) in self.env.borrow().header_bindings() {
            scope.push_dynamic(name, value_to_dynamic(&value));
        }

        let padded = format!("{}{}", "\n".repeat(line_number.saturating_sub(1)), code);
        // Compiled against the scope so strict-variables mode accepts the
        // header aliases.
        let mut ast = self
            .expression_engine
            .compile_with_scope(&scope, &padded)
            .map_err(|error| {
                let mut out = RunError::new(
                    "CODE_BLOCK_ERROR",
                    format!("Expression block failed to parse: {}", error),
                );
                out.line_number = error.1.line();
                out.stack = Some(error.to_string());
                out
            })?;
        ast.set_source(code_block_symbol(func_name));

        match self
            .expression_engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
        {
            Ok(value) => dynamic_to_value(value),
            Err(error) => Err(eval_error_to_run_error(*error)),
        }
    }

    /// Takes the helper-emitted log lines accumulated during the last
    /// evaluation.
    pub(crate) fn drain_eval_log(&mut self) -> Vec<String> {
        std::mem::take(&mut self.eval_ctx.borrow_mut().log)
    }
}
