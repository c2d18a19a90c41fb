use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tl_core::text::{canonical_key, display_key, is_expression_identifier};
use tl_core::TlValue;

/// One stored variable. The canonical (case-folded) form is the map key;
/// `display_name` keeps the case-preserving form so the variable can be
/// materialized as an expression-block identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct VarEntry {
    pub display_name: String,
    pub value: TlValue,
}

pub type Store = BTreeMap<String, VarEntry>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarScope {
    Persistent,
    Global,
    Local,
}

/// The three variable namespaces of a run instance, plus the local frame
/// stack and the staging area for values passed into an upcoming function
/// call. `persistent` is shared with the runner; everything else is owned.
#[derive(Debug)]
pub(crate) struct Environment {
    pub(crate) persistent: Arc<RwLock<Store>>,
    pub(crate) global: Store,
    pub(crate) local: Store,
    pub(crate) local_stack: Vec<Store>,
    pub(crate) locals_passed_into_func: Store,
}

impl Environment {
    pub(crate) fn new(persistent: Arc<RwLock<Store>>) -> Self {
        Self {
            persistent,
            global: Store::new(),
            local: Store::new(),
            local_stack: Vec::new(),
            locals_passed_into_func: Store::new(),
        }
    }

    pub(crate) fn get(&self, scope: VarScope, name: &str) -> Option<TlValue> {
        let key = canonical_key(name);
        match scope {
            VarScope::Persistent => self
                .persistent
                .read()
                .expect("persistent store lock poisoned")
                .get(&key)
                .map(|entry| entry.value.clone()),
            VarScope::Global => self.global.get(&key).map(|entry| entry.value.clone()),
            VarScope::Local => self
                .locals_passed_into_func
                .get(&key)
                .or_else(|| self.local.get(&key))
                .map(|entry| entry.value.clone()),
        }
    }

    pub(crate) fn set(&mut self, scope: VarScope, name: &str, value: TlValue) {
        let key = canonical_key(name);
        let entry = VarEntry {
            display_name: display_key(name),
            value,
        };
        match scope {
            VarScope::Persistent => {
                self.persistent
                    .write()
                    .expect("persistent store lock poisoned")
                    .insert(key, entry);
            }
            VarScope::Global => {
                self.global.insert(key, entry);
            }
            VarScope::Local => {
                self.local.insert(key, entry);
            }
        }
    }

    /// Stages a local binding for the function call the engine is about to
    /// enter. Staged bindings become the new local frame on push.
    pub(crate) fn stage_function_local(&mut self, name: &str, value: TlValue) {
        self.locals_passed_into_func.insert(
            canonical_key(name),
            VarEntry {
                display_name: display_key(name),
                value,
            },
        );
    }

    pub(crate) fn clear_staged(&mut self) {
        self.locals_passed_into_func.clear();
    }

    pub(crate) fn push_local_frame(&mut self) {
        let staged = std::mem::take(&mut self.locals_passed_into_func);
        let previous = std::mem::replace(&mut self.local, staged);
        self.local_stack.push(previous);
    }

    pub(crate) fn pop_local_frame(&mut self) {
        self.local = self
            .local_stack
            .pop()
            .expect("local frame pop without a matching push");
    }

    pub(crate) fn local_depth(&self) -> usize {
        self.local_stack.len()
    }

    /// Branch entry: global is reseeded, all local state is dropped.
    /// Persistent survives untouched.
    pub(crate) fn reset_for_branch(&mut self, global_init: &BTreeMap<String, TlValue>) {
        self.global.clear();
        for (name, value) in global_init {
            self.set(VarScope::Global, name, value.clone());
        }
        self.local.clear();
        self.local_stack.clear();
        self.locals_passed_into_func.clear();
    }

    /// Bindings surfaced as identifiers inside an expression block:
    /// persistent, then global, then local (later namespaces shadow
    /// earlier ones), filtered to names usable as identifiers.
    pub(crate) fn header_bindings(&self) -> Vec<(String, TlValue)> {
        let mut merged: BTreeMap<String, (String, TlValue)> = BTreeMap::new();
        {
            let persistent = self
                .persistent
                .read()
                .expect("persistent store lock poisoned");
            for (key, entry) in persistent.iter() {
                merged.insert(key.clone(), (entry.display_name.clone(), entry.value.clone()));
            }
        }
        for (key, entry) in &self.global {
            merged.insert(key.clone(), (entry.display_name.clone(), entry.value.clone()));
        }
        for (key, entry) in &self.local {
            merged.insert(key.clone(), (entry.display_name.clone(), entry.value.clone()));
        }

        merged
            .into_values()
            .filter(|(name, _)| is_expression_identifier(name))
            .collect()
    }
}

/// Shared state the expression-block helpers read and write during one
/// evaluation.
#[derive(Debug, Default)]
pub(crate) struct EvalContext {
    pub(crate) step_text: String,
    pub(crate) log: Vec<String>,
}
