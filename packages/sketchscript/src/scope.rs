//! The persistent evaluation scope shared by every execution.
//!
//! Rhai keeps variables in a [`Scope`] but function definitions live in the
//! compiled [`AST`]. To let a fragment call functions defined by an earlier
//! fragment, the scope also carries a function library: an AST holding only
//! function definitions, merged with each new fragment before it runs.

use rhai::{Dynamic, Engine, Scope, AST};

/// Internal helper that calls `update(target)` on an animator with `this`
/// bound to the animator, and hands back the (possibly mutated) animator.
pub const UPDATE_DISPATCH_FN: &str = "__sketch_update";

const UPDATE_DISPATCH_SOURCE: &str = r#"
fn __sketch_update(animator, target) {
    animator.update(target);
    animator
}
"#;

pub struct EvaluationScope {
    scope: Scope<'static>,
    library: AST,
}

impl EvaluationScope {
    pub fn new(engine: &Engine) -> Self {
        // The dispatch helper is a fixed string, so compiling it cannot fail
        // on a correctly configured engine; fall back to an empty library
        // rather than panicking if a sandbox limit is set absurdly low.
        let library = match engine.compile(UPDATE_DISPATCH_SOURCE) {
            Ok(ast) => ast.clone_functions_only(),
            Err(err) => {
                log::error!("Failed to compile animator dispatch helper: {}", err);
                AST::empty()
            }
        };

        Self {
            scope: Scope::new(),
            library,
        }
    }

    /// Bind `name`, replacing the newest binding of that name if it exists.
    pub fn set(&mut self, name: &str, value: Dynamic) {
        if self.scope.contains(name) && !self.scope.is_constant(name).unwrap_or(false) {
            self.scope.set_value(name, value);
        } else {
            self.scope.push_dynamic(name.to_string(), value);
        }
    }

    /// Look up the newest binding of `name`. Shared (captured) values are
    /// returned as a plain snapshot.
    pub fn get(&self, name: &str) -> Option<Dynamic> {
        self.scope.get_value::<Dynamic>(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scope.contains(name)
    }

    /// Remove every binding of `name`, including shadowed ones.
    /// Returns false if nothing was bound.
    pub fn remove(&mut self, name: &str) -> bool {
        if !self.scope.contains(name) {
            return false;
        }

        // Rebuild from the raw entries so variables captured by closures keep
        // their shared cells.
        let mut rebuilt = Scope::new();
        for (entry, is_constant, value) in self.scope.iter_raw() {
            if entry == name {
                continue;
            }
            if is_constant {
                rebuilt.push_constant_dynamic(entry.to_string(), value.clone());
            } else {
                rebuilt.push_dynamic(entry.to_string(), value.clone());
            }
        }
        self.scope = rebuilt;
        true
    }

    pub fn len(&self) -> usize {
        self.scope.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scope.is_empty()
    }

    pub fn library(&self) -> &AST {
        &self.library
    }

    /// Fold the function definitions of `ast` into the library. Later
    /// definitions with the same name and arity replace earlier ones.
    /// Returns the AST to evaluate: the full library plus the statements of `ast`.
    pub fn merge_library(&mut self, ast: &AST) -> AST {
        let merged = self.library.merge(ast);
        self.library = merged.clone_functions_only();
        merged
    }

    /// Whether the library holds a script function `name` taking `arity` parameters.
    pub fn has_function(&self, name: &str, arity: usize) -> bool {
        self.library
            .iter_functions()
            .any(|f| f.name == name && f.params.len() == arity)
    }

    /// Parameter counts of every library function called `name`.
    pub fn function_arities(&self, name: &str) -> Vec<usize> {
        self.library
            .iter_functions()
            .filter(|f| f.name == name)
            .map(|f| f.params.len())
            .collect()
    }

    /// Drop all library functions with any of the given names.
    pub fn remove_functions(&mut self, names: &[&str]) {
        self.library
            .retain_functions(|_, _, name, _| !names.contains(&name));
    }

    /// Split borrow for calling script functions that need both the variables
    /// and the function library.
    pub fn parts_mut(&mut self) -> (&mut Scope<'static>, &AST) {
        (&mut self.scope, &self.library)
    }
}
