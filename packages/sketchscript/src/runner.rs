//! Script execution against the persistent scope.
//!
//! Every fragment is compiled on its own, merged with the function library
//! so earlier definitions stay callable, then evaluated in the session scope.
//! Errors never escape: they come back as a [`ScriptDiagnostic`] inside the
//! result. After every execution the callback names are harvested from the
//! scope, whether the fragment succeeded or not.

use std::path::Path;
use std::rc::Rc;

use anyhow::{Context, Result};
use rhai::{Array, Dynamic, Engine, FnPtr, ImmutableString, Map};

use crate::callbacks::CallbackBindings;
use crate::canvas_rhai::{register_canvas_api, CanvasHandle, ShapeHandle};
use crate::config::{SandboxLimits, SessionConfig};
use crate::output::{PrintGate, SharedOutput};
use crate::scope::EvaluationScope;
use crate::script_diagnostics::{from_eval_error, from_parse_error, ScriptDiagnostic, ScriptPhase};

/// Outcome of executing one fragment.
#[derive(Debug, Clone)]
pub struct ScriptExecutionResult {
    pub source: String,
    /// File the fragment was loaded from, if any.
    pub path: Option<String>,
    /// Flattened result value; `None` when execution failed.
    pub value: Option<Dynamic>,
    /// REPL rendering of `value` (`"()"` for unit, empty on error).
    pub repr: String,
    pub error: Option<ScriptDiagnostic>,
}

impl ScriptExecutionResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

pub struct ScriptRunner {
    engine: Engine,
    frame_callback: String,
    object_factory: String,
    last_result: String,
    output: Option<SharedOutput>,
    print_gate: Rc<PrintGate>,
    /// Whether `print`/`debug` are already routed to the output.
    redirected: bool,
}

impl ScriptRunner {
    pub fn new(config: &SessionConfig) -> Self {
        let mut engine = Engine::new();
        apply_limits(&mut engine, &config.limits);
        register_canvas_api(&mut engine);

        Self {
            engine,
            frame_callback: config.frame_callback.clone(),
            object_factory: config.object_factory.clone(),
            last_result: config.last_result.clone(),
            output: None,
            print_gate: Rc::new(PrintGate::new(config.max_prints_per_tick)),
            redirected: false,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Route script output to `output`. Takes effect on the next execution.
    pub fn set_output(&mut self, output: SharedOutput) {
        self.output = Some(output);
        self.redirected = false;
    }

    pub fn print_gate(&self) -> &PrintGate {
        &self.print_gate
    }

    /// Execute one fragment and harvest the callback bindings it leaves behind.
    pub fn execute(
        &mut self,
        scope: &mut EvaluationScope,
        source: &str,
        path: Option<&str>,
    ) -> (ScriptExecutionResult, CallbackBindings) {
        self.ensure_redirected();
        self.print_gate.reset();

        let outcome = self.evaluate(scope, source, path);
        let result = match outcome {
            Ok(value) => {
                let value = value.flatten();
                scope.set(&self.last_result, value.clone());
                ScriptExecutionResult {
                    source: source.to_string(),
                    path: path.map(str::to_string),
                    repr: inspect(&value),
                    value: Some(value),
                    error: None,
                }
            }
            Err(diagnostic) => {
                log::debug!("Execution failed: {}", diagnostic);
                ScriptExecutionResult {
                    source: source.to_string(),
                    path: path.map(str::to_string),
                    value: None,
                    repr: String::new(),
                    error: Some(diagnostic),
                }
            }
        };

        let bindings = CallbackBindings::harvest(scope, &self.frame_callback, &self.object_factory);
        log::debug!(
            "Harvested bindings: frame={:?} factory={:?}",
            bindings.frame.as_ref().map(|cb| cb.describe()),
            bindings.object_factory.as_ref().map(|cb| cb.describe())
        );
        (result, bindings)
    }

    /// Read `path` and execute its contents with the path attached to diagnostics.
    pub fn execute_file(
        &mut self,
        scope: &mut EvaluationScope,
        path: &Path,
    ) -> Result<(ScriptExecutionResult, CallbackBindings)> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Reading script {}", path.display()))?;
        let label = path.display().to_string();
        Ok(self.execute(scope, &source, Some(&label)))
    }

    fn evaluate(
        &self,
        scope: &mut EvaluationScope,
        source: &str,
        path: Option<&str>,
    ) -> std::result::Result<Dynamic, ScriptDiagnostic> {
        let ast = self
            .engine
            .compile(source)
            .map_err(|err| from_parse_error(&err, path))?;

        let mut merged = scope.merge_library(&ast);
        if let Some(path) = path {
            merged.set_source(path);
        }

        let (vars, _) = scope.parts_mut();
        self.engine
            .eval_ast_with_scope::<Dynamic>(vars, &merged)
            .map_err(|err| from_eval_error(ScriptPhase::Execute, &err, path))
    }

    fn ensure_redirected(&mut self) {
        if self.redirected {
            return;
        }

        let output = self.output.clone();
        let gate = self.print_gate.clone();
        self.engine.on_print(move |text| {
            emit(output.as_ref(), &gate, &format!("{}\n", text));
        });

        let output = self.output.clone();
        let gate = self.print_gate.clone();
        self.engine.on_debug(move |text, source, pos| {
            let line = match (source, pos.line()) {
                (Some(src), Some(line)) => format!("[debug] {}:{}: {}\n", src, line, text),
                (None, Some(line)) => format!("[debug] line {}: {}\n", line, text),
                _ => format!("[debug] {}\n", text),
            };
            emit(output.as_ref(), &gate, &line);
        });

        self.redirected = true;
    }
}

fn emit(output: Option<&SharedOutput>, gate: &PrintGate, text: &str) {
    let text = match gate.admit() {
        Ok(()) => text.to_string(),
        Err(Some(warning)) => warning,
        Err(None) => return,
    };
    match output {
        Some(output) => output.write(&text),
        None => log::info!("[script] {}", text.trim_end()),
    }
}

fn apply_limits(engine: &mut Engine, limits: &SandboxLimits) {
    engine.set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth);
    engine.set_max_call_levels(limits.max_call_levels);
    engine.set_max_operations(limits.max_operations); // Watchdog for runaway loops
    engine.set_max_string_size(limits.max_string_size);
    engine.set_max_array_size(limits.max_array_size);
    engine.set_max_map_size(limits.max_map_size);
}

/// REPL representation of a value.
pub fn inspect(value: &Dynamic) -> String {
    if value.is_unit() {
        return "()".to_string();
    }
    if value.is_string() {
        let text = value.clone().cast::<ImmutableString>();
        return format!("{:?}", text.as_str());
    }
    if value.is_char() {
        return format!("{:?}", value.clone().cast::<char>());
    }
    if value.is_array() {
        let items = value.clone().cast::<Array>();
        let parts: Vec<String> = items.iter().map(inspect).collect();
        return format!("[{}]", parts.join(", "));
    }
    if value.is_map() {
        let map = value.clone().cast::<Map>();
        let parts: Vec<String> = map
            .iter()
            .map(|(key, item)| format!("{}: {}", key, inspect(item)))
            .collect();
        return format!("#{{{}}}", parts.join(", "));
    }
    if let Some(fn_ptr) = value.clone().try_cast::<FnPtr>() {
        return if fn_ptr.is_anonymous() {
            "<closure>".to_string()
        } else {
            format!("Fn({:?})", fn_ptr.fn_name())
        };
    }
    if let Some(shape) = value.clone().try_cast::<ShapeHandle>() {
        return shape.to_string();
    }
    if let Some(canvas) = value.clone().try_cast::<CanvasHandle>() {
        return canvas.to_string();
    }
    value.to_string()
}
