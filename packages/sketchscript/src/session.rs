//! The interactive session: one scope, one canvas, one scheduler.
//!
//! All script state lives here and is only touched on the thread that owns
//! the session. Other threads (the tick timer, the stdin reader) talk to it
//! through [`SessionEvent`]s.

use std::path::Path;
use std::sync::mpsc::Receiver;

use anyhow::{Context, Result};
use rhai::Dynamic;

use crate::animator_cache::AnimatorCache;
use crate::callbacks::CallbackBindings;
use crate::canvas::{SceneCanvas, ShapeId, SharedCanvas};
use crate::canvas_rhai::{CanvasHandle, ShapeHandle, CANVAS_GLOBAL};
use crate::config::SessionConfig;
use crate::console::{ConsoleCommand, HELP};
use crate::containment::{contain, ContainmentTarget};
use crate::history::SessionHistory;
use crate::output::SharedOutput;
use crate::raster;
use crate::runner::{ScriptExecutionResult, ScriptRunner};
use crate::scheduler::{FrameScheduler, SchedulerState, TickSink};
use crate::scope::{EvaluationScope, UPDATE_DISPATCH_FN};
use crate::script_diagnostics::{from_eval_error, ScriptDiagnostic, ScriptPhase};
use crate::sections::ScriptSections;

#[derive(Debug)]
pub enum TickOutcome {
    /// Scheduler not running, or a stale tick.
    Skipped,
    Completed,
    /// A callback failed and containment stopped the animation.
    Failed(ScriptDiagnostic),
}

#[derive(Debug)]
pub enum SessionEvent {
    Execute { source: String, path: Option<String> },
    ExecuteFile(std::path::PathBuf),
    Command(ConsoleCommand),
    Tick { generation: u64 },
    Quit,
}

pub struct Session {
    config: SessionConfig,
    runner: ScriptRunner,
    scope: EvaluationScope,
    canvas: SharedCanvas,
    bindings: CallbackBindings,
    animators: AnimatorCache,
    scheduler: FrameScheduler,
    history: SessionHistory,
    output: Option<SharedOutput>,
    sections: Option<ScriptSections>,
    /// Set by the first execution, which starts the scheduler.
    activated: bool,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let canvas = SceneCanvas::shared(config.canvas_width, config.canvas_height);
        Self::with_canvas(config, canvas)
    }

    pub fn with_canvas(config: SessionConfig, canvas: SharedCanvas) -> Self {
        let runner = ScriptRunner::new(&config);
        let scope = EvaluationScope::new(runner.engine());
        let scheduler = FrameScheduler::manual(config.tick_period());

        let mut session = Self {
            config,
            runner,
            scope,
            canvas,
            bindings: CallbackBindings::default(),
            animators: AnimatorCache::new(),
            scheduler,
            history: SessionHistory::new(),
            output: None,
            sections: None,
            activated: false,
        };
        session.install_globals();
        session
    }

    pub fn with_output(mut self, output: SharedOutput) -> Self {
        self.runner.set_output(output.clone());
        self.output = Some(output);
        self
    }

    /// Deliver ticks through `sink` from a timer thread instead of manually.
    pub fn with_tick_sink(mut self, sink: TickSink) -> Self {
        self.scheduler.set_sink(sink);
        self
    }

    fn install_globals(&mut self) {
        let handle = CanvasHandle::new(self.canvas.clone());
        self.scope.set(CANVAS_GLOBAL, Dynamic::from(handle));
    }

    // === Execution ===

    pub fn execute(&mut self, source: &str) -> ScriptExecutionResult {
        self.execute_with_path(source, None)
    }

    pub fn execute_with_path(&mut self, source: &str, path: Option<&str>) -> ScriptExecutionResult {
        let (result, bindings) = self.runner.execute(&mut self.scope, source, path);
        self.publish(result, bindings)
    }

    pub fn execute_file(&mut self, path: &Path) -> Result<ScriptExecutionResult> {
        let (result, bindings) = self.runner.execute_file(&mut self.scope, path)?;
        Ok(self.publish(result, bindings))
    }

    fn publish(&mut self, result: ScriptExecutionResult, bindings: CallbackBindings) -> ScriptExecutionResult {
        // The latest harvest always wins, even when it found nothing.
        self.bindings = bindings;

        match &result.error {
            Some(diagnostic) => self.write_error(&format!("{}\n", diagnostic)),
            None if result.repr != "()" => self.write(&format!("{}\n", result.repr)),
            None => {}
        }
        self.history.record(&result);
        self.evict_removed();

        if !self.activated {
            self.activated = true;
            self.scheduler.start();
        }
        result
    }

    // === Ticking ===

    /// Handle a tick posted by the timer. Stale ticks are dropped.
    pub fn handle_tick(&mut self, generation: u64) -> TickOutcome {
        if !self.scheduler.accept_tick(generation) {
            log::trace!("Dropping stale tick (generation {})", generation);
            return TickOutcome::Skipped;
        }
        self.tick()
    }

    /// Run one tick: frame callback first, then every object's animator.
    pub fn tick(&mut self) -> TickOutcome {
        if !self.scheduler.is_running() {
            return TickOutcome::Skipped;
        }
        self.runner.print_gate().reset();
        self.evict_removed();

        let outcome = self.run_callbacks();
        // Callbacks may have removed shapes during this tick.
        self.evict_removed();

        match outcome {
            Ok(()) => TickOutcome::Completed,
            Err(diagnostic) => {
                let report = contain(
                    ContainmentTarget {
                        bindings: &mut self.bindings,
                        scheduler: &mut self.scheduler,
                        activated: &mut self.activated,
                    },
                    &diagnostic,
                );
                self.write_error(&report);
                TickOutcome::Failed(diagnostic)
            }
        }
    }

    /// Drop the animators of shapes that left the canvas.
    fn evict_removed(&mut self) {
        let removed = self.canvas.borrow_mut().take_removed();
        for id in removed {
            if self.animators.evict(id) {
                log::trace!("Evicted animator for shape #{}", id.0);
            }
        }
    }

    fn run_callbacks(&mut self) -> std::result::Result<(), ScriptDiagnostic> {
        let engine = self.runner.engine();

        if let Some(frame) = self.bindings.frame.clone() {
            let _ = frame
                .call(engine, &mut self.scope, ())
                .map_err(|err| from_eval_error(ScriptPhase::Frame, &err, None))?;
        }

        // Without a factory there is nothing to create or update.
        let Some(factory) = self.bindings.object_factory.clone() else {
            return Ok(());
        };

        let ids = self.canvas.borrow().ids();
        for id in ids {
            // Removed by a callback earlier in this tick.
            if !self.canvas.borrow().contains(id) {
                continue;
            }
            let target = Dynamic::from(ShapeHandle::new(id, self.canvas.clone()));

            let scope = &mut self.scope;
            let animator = self
                .animators
                .get_or_create(id, || {
                    log::trace!("Creating animator for shape #{}", id.0);
                    factory.call(engine, scope, (target.clone(),)).map(Some)
                })
                .map_err(|err| from_eval_error(ScriptPhase::Object, &err, None))?;

            let Some(animator) = animator else {
                continue;
            };

            let (vars, library) = self.scope.parts_mut();
            let updated = engine
                .call_fn::<Dynamic>(vars, library, UPDATE_DISPATCH_FN, (animator, target))
                .map_err(|err| from_eval_error(ScriptPhase::Object, &err, None))?;
            self.animators.replace(id, updated);
        }
        Ok(())
    }

    // === Scheduler control ===

    pub fn start(&mut self) -> bool {
        self.activated = true;
        self.scheduler.start()
    }

    pub fn stop(&mut self) -> bool {
        self.scheduler.stop()
    }

    pub fn pause(&mut self) -> bool {
        self.scheduler.pause()
    }

    pub fn resume(&mut self) -> bool {
        self.scheduler.resume()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    /// Unbind both callbacks and forget every animator. The scheduler keeps
    /// its state, so a following execution that binds new callbacks animates
    /// straight away.
    pub fn clear_animations(&mut self) {
        let frame = self.config.frame_callback.clone();
        let factory = self.config.object_factory.clone();
        self.scope.remove(&frame);
        self.scope.remove(&factory);
        self.scope.remove_functions(&[frame.as_str(), factory.as_str()]);

        self.bindings.clear();
        self.animators.clear();
        log::info!("Animations cleared");
    }

    /// Discard the scope and start over with only the host globals.
    pub fn reset(&mut self) {
        self.scheduler.stop();
        self.activated = false;
        self.bindings.clear();
        self.animators.clear();
        self.scope = EvaluationScope::new(self.runner.engine());
        self.install_globals();
        log::info!("Session reset");
    }

    // === Accessors ===

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn bindings(&self) -> &CallbackBindings {
        &self.bindings
    }

    pub fn scope(&self) -> &EvaluationScope {
        &self.scope
    }

    pub fn canvas(&self) -> &SharedCanvas {
        &self.canvas
    }

    pub fn history(&self) -> &SessionHistory {
        &self.history
    }

    pub fn animators(&self) -> &AnimatorCache {
        &self.animators
    }

    pub fn animator_for(&self, id: ShapeId) -> Option<Dynamic> {
        self.animators.get(id).cloned()
    }

    // === Console ===

    /// Apply a console command. Returns false when the session should end.
    pub fn command(&mut self, command: ConsoleCommand) -> Result<bool> {
        match command {
            ConsoleCommand::Start => {
                self.start();
                self.write_status();
            }
            ConsoleCommand::Stop => {
                self.stop();
                self.write_status();
            }
            ConsoleCommand::Pause => {
                self.pause();
                self.write_status();
            }
            ConsoleCommand::Resume => {
                if !self.resume() {
                    self.write("Nothing to resume (scheduler is not paused)\n");
                }
                self.write_status();
            }
            ConsoleCommand::Clear => {
                self.clear_animations();
                self.write("Animations cleared\n");
            }
            ConsoleCommand::Reset => {
                self.reset();
                self.write("Session reset\n");
            }
            ConsoleCommand::Load(path) => {
                self.sections = Some(ScriptSections::load(&path)?);
                self.run_next_section();
            }
            ConsoleCommand::Next => self.run_next_section(),
            ConsoleCommand::History => {
                let transcript = self.history.transcript();
                self.write(&transcript);
            }
            ConsoleCommand::SaveHistory(path) => {
                let json = self.history.to_json().context("Serializing history")?;
                std::fs::write(&path, json)
                    .with_context(|| format!("Writing history {}", path.display()))?;
                self.write(&format!("Saved {} entries to {}\n", self.history.len(), path.display()));
            }
            ConsoleCommand::Snapshot(path) => {
                raster::save_png(&*self.canvas.borrow(), &path)?;
                self.write(&format!("Saved snapshot {}\n", path.display()));
            }
            ConsoleCommand::Canvas => {
                let listing = self.describe_canvas();
                self.write(&listing);
            }
            ConsoleCommand::Help => self.write(HELP),
            ConsoleCommand::Quit => return Ok(false),
        }
        Ok(true)
    }

    fn run_next_section(&mut self) {
        let next = self.sections.as_mut().and_then(|sections| {
            let path = sections.path().map(str::to_string);
            sections.next().map(|source| (source.to_string(), path))
        });
        match next {
            Some((source, path)) => {
                self.execute_with_path(&source, path.as_deref());
            }
            None => self.write("No more sections to run\n"),
        }
    }

    fn describe_canvas(&self) -> String {
        let canvas = self.canvas.borrow();
        let extent = canvas.extent();
        let mut out = format!("Canvas {}x{}, {} shapes\n", extent.x, extent.y, canvas.len());
        for id in canvas.ids() {
            if let Some(shape) = canvas.get(id) {
                let animated = if self.animators.contains(id) { " (animated)" } else { "" };
                out.push_str(&format!(
                    "  #{} {} at ({:.1}, {:.1}) size {}x{}{}\n",
                    id.0,
                    shape.kind.name(),
                    shape.position.x,
                    shape.position.y,
                    shape.size.x,
                    shape.size.y,
                    animated
                ));
            }
        }
        out
    }

    /// Owning-thread event loop. Returns when `Quit` arrives or every sender is gone.
    pub fn run(&mut self, events: Receiver<SessionEvent>) -> Result<()> {
        while let Ok(event) = events.recv() {
            match event {
                SessionEvent::Execute { source, path } => {
                    self.execute_with_path(&source, path.as_deref());
                }
                SessionEvent::ExecuteFile(path) => {
                    if let Err(err) = self.execute_file(&path) {
                        self.write_error(&format!("{:#}\n", err));
                    }
                }
                SessionEvent::Command(command) => match self.command(command) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(err) => self.write_error(&format!("{:#}\n", err)),
                },
                SessionEvent::Tick { generation } => {
                    self.handle_tick(generation);
                }
                SessionEvent::Quit => break,
            }
        }
        self.scheduler.stop();
        Ok(())
    }

    // === Output ===

    fn write_status(&self) {
        let status = match self.scheduler.state() {
            SchedulerState::Stopped => "stopped",
            SchedulerState::Running => "running",
            SchedulerState::Paused => "paused",
        };
        self.write(&format!("Animation {}\n", status));
    }

    fn write(&self, text: &str) {
        match &self.output {
            Some(output) => output.write(text),
            None => log::info!("{}", text.trim_end()),
        }
    }

    fn write_error(&self, text: &str) {
        match &self.output {
            Some(output) => output.write(text),
            None => log::error!("{}", text.trim_end()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::BufferOutput;
    use std::rc::Rc;
    use std::sync::mpsc;

    fn session() -> (Session, Rc<BufferOutput>) {
        let output = Rc::new(BufferOutput::new());
        let session = Session::new(SessionConfig::default()).with_output(output.clone());
        (session, output)
    }

    #[test]
    fn test_first_execute_starts_scheduler() {
        let (mut session, _) = session();
        assert_eq!(session.scheduler_state(), SchedulerState::Stopped);
        session.execute("1");
        assert_eq!(session.scheduler_state(), SchedulerState::Running);

        session.stop();
        session.execute("2");
        assert_eq!(session.scheduler_state(), SchedulerState::Stopped);
    }

    #[test]
    fn test_execution_echoes_result_and_errors() {
        let (mut session, output) = session();
        session.execute("let a = 3;");
        session.execute("a + 1");
        session.execute("nope()");
        let text = output.take();
        assert!(text.starts_with("4\n"));
        assert!(text.contains("execute error"));
        assert_eq!(session.history().len(), 3);
    }

    #[test]
    fn test_script_error_keeps_animation_running() {
        let (mut session, _) = session();
        session.execute("let each_frame = || 1;");
        session.execute("let = broken");
        assert!(session.bindings().frame.is_some());
        assert_eq!(session.scheduler_state(), SchedulerState::Running);
    }

    #[test]
    fn test_callback_removing_shapes_mid_tick() {
        let (mut session, _) = session();
        session.execute(
            r#"
            let a = canvas.rect();
            let b = canvas.rect();
            let each_object = |s| #{ surface: canvas, update: |t| { this.surface.clear(); } };
            "#,
        );
        // The first update empties the canvas, so the second shape is skipped
        // and the first animator is dropped before the tick returns.
        assert!(matches!(session.tick(), TickOutcome::Completed));
        assert!(session.animators().is_empty());
        assert_eq!(session.canvas().borrow().len(), 0);
    }

    #[test]
    fn test_removal_while_stopped_drops_animator() {
        let (mut session, _) = session();
        session.execute("let first = canvas.rect(); let second = canvas.rect(); let each_object = |s| #{ update: |t| {} };");
        assert!(matches!(session.tick(), TickOutcome::Completed));
        assert_eq!(session.animators().len(), 2);

        let ids = session.canvas().borrow().ids();
        session.stop();
        session.execute("canvas.remove(first);");
        assert!(session.animator_for(ids[0]).is_none());
        assert!(session.animator_for(ids[1]).is_some());

        session.start();
        session.pause();
        session.execute("canvas.remove(second);");
        assert!(session.animators().is_empty());
    }

    #[test]
    fn test_clear_animations_keeps_scheduler_state() {
        let (mut session, _) = session();
        session.execute("fn each_frame() { 1 } let each_object = |s| ();");
        assert!(!session.bindings().is_empty());

        session.clear_animations();
        assert!(session.bindings().is_empty());
        assert!(!session.scope().contains("each_object"));
        assert!(!session.scope().has_function("each_frame", 0));
        assert_eq!(session.scheduler_state(), SchedulerState::Running);

        // Nothing comes back on the next harvest.
        session.execute("1");
        assert!(session.bindings().is_empty());
    }

    #[test]
    fn test_commands() {
        let (mut session, output) = session();
        assert!(session.command(ConsoleCommand::Start).unwrap());
        assert!(session.command(ConsoleCommand::Pause).unwrap());
        assert_eq!(session.scheduler_state(), SchedulerState::Paused);
        assert!(session.command(ConsoleCommand::Resume).unwrap());
        assert_eq!(session.scheduler_state(), SchedulerState::Running);
        assert!(session.command(ConsoleCommand::Next).unwrap());
        assert!(!session.command(ConsoleCommand::Quit).unwrap());

        let text = output.take();
        assert!(text.contains("Animation paused"));
        assert!(text.contains("No more sections"));
    }

    #[test]
    fn test_load_and_next_sections() {
        let (mut session, _) = session();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.rhai");
        std::fs::write(&path, "let step = 1;\n// %pause\nlet step = step + 1;\n").unwrap();

        session.command(ConsoleCommand::Load(path)).unwrap();
        assert_eq!(session.scope().get("step").and_then(|v| v.as_int().ok()), Some(1));
        session.command(ConsoleCommand::Next).unwrap();
        assert_eq!(session.scope().get("step").and_then(|v| v.as_int().ok()), Some(2));
    }

    #[test]
    fn test_snapshot_and_save_history() {
        let (mut session, _) = session();
        session.execute("canvas.ellipse(30, 30);");
        let dir = tempfile::tempdir().unwrap();

        let png = dir.path().join("snap.png");
        session.command(ConsoleCommand::Snapshot(png.clone())).unwrap();
        assert!(png.exists());

        let json = dir.path().join("history.json");
        session.command(ConsoleCommand::SaveHistory(json.clone())).unwrap();
        let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(json).unwrap()).unwrap();
        assert_eq!(saved.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_event_loop() {
        let (mut session, output) = session();
        let (tx, rx) = mpsc::channel();
        tx.send(SessionEvent::Execute {
            source: "let k = 10; k * 2".to_string(),
            path: None,
        })
        .unwrap();
        let generation = session.scheduler().generation() + 1;
        tx.send(SessionEvent::Tick { generation }).unwrap();
        tx.send(SessionEvent::Command(ConsoleCommand::Canvas)).unwrap();
        tx.send(SessionEvent::Quit).unwrap();
        tx.send(SessionEvent::Execute {
            source: "let after_quit = 1;".to_string(),
            path: None,
        })
        .unwrap();

        session.run(rx).unwrap();
        assert!(output.contents().starts_with("20\n"));
        assert!(!session.scope().contains("after_quit"));
        assert_eq!(session.scheduler_state(), SchedulerState::Stopped);
    }
}
