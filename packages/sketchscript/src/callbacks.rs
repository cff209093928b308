//! Typed callback bindings harvested from the scope after each execution.
//!
//! A callback slot is filled either by a function pointer stored in a scope
//! variable (`let each_frame = || { ... };`) or by a script function of the
//! same name (`fn each_frame() { ... }`). The variable wins when both exist.
//! Anything that does not match the expected arity counts as unbound.

use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, FuncArgs};

use crate::scope::EvaluationScope;

#[derive(Debug, Clone)]
pub enum ScriptCallback {
    /// Function pointer or closure bound to a scope variable.
    Pointer(FnPtr),
    /// Script function in the scope's library, called by name.
    Named(String),
}

impl ScriptCallback {
    /// Resolve `name` to a callable taking exactly `arity` arguments.
    pub fn resolve(scope: &EvaluationScope, name: &str, arity: usize) -> Option<Self> {
        if scope.contains(name) {
            // A variable shadows any function of the same name, so a
            // non-callable value (e.g. `()`) explicitly unbinds the slot.
            let fn_ptr = scope.get(name)?.try_cast::<FnPtr>()?;
            return pointer_has_arity(scope, &fn_ptr, arity).then_some(ScriptCallback::Pointer(fn_ptr));
        }

        scope
            .has_function(name, arity)
            .then(|| ScriptCallback::Named(name.to_string()))
    }

    /// Invoke the callback. Named functions see the scope's variables;
    /// closures see what they captured.
    pub fn call(
        &self,
        engine: &Engine,
        scope: &mut EvaluationScope,
        args: impl FuncArgs,
    ) -> Result<Dynamic, Box<EvalAltResult>> {
        match self {
            ScriptCallback::Pointer(fn_ptr) => fn_ptr.call::<Dynamic>(engine, scope.library(), args),
            ScriptCallback::Named(name) => {
                let (vars, library) = scope.parts_mut();
                engine.call_fn::<Dynamic>(vars, library, name, args)
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ScriptCallback::Pointer(fn_ptr) if fn_ptr.is_anonymous() => "closure".to_string(),
            ScriptCallback::Pointer(fn_ptr) => format!("Fn({})", fn_ptr.fn_name()),
            ScriptCallback::Named(name) => format!("fn {}", name),
        }
    }
}

fn pointer_has_arity(scope: &EvaluationScope, fn_ptr: &FnPtr, arity: usize) -> bool {
    let arities = scope.function_arities(fn_ptr.fn_name());
    if arities.is_empty() {
        // Native or engine-registered function: nothing to check against.
        return true;
    }
    // Captured variables are curried in as leading parameters.
    let curried = fn_ptr.curry().len();
    arities.iter().any(|&params| params == curried + arity)
}

/// The frame callback and object factory currently in effect.
#[derive(Debug, Clone, Default)]
pub struct CallbackBindings {
    pub frame: Option<ScriptCallback>,
    pub object_factory: Option<ScriptCallback>,
}

impl CallbackBindings {
    /// Read both slots from the scope. Absent or ill-shaped bindings are `None`.
    pub fn harvest(scope: &EvaluationScope, frame_name: &str, factory_name: &str) -> Self {
        Self {
            frame: ScriptCallback::resolve(scope, frame_name, 0),
            object_factory: ScriptCallback::resolve(scope, factory_name, 1),
        }
    }

    pub fn clear(&mut self) {
        self.frame = None;
        self.object_factory = None;
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_none() && self.object_factory.is_none()
    }
}
