//! Failure containment for errors raised during a tick.
//!
//! A failing frame callback, factory or animator `update` would fail again on
//! every tick, so the first failure unbinds both callbacks and stops the
//! scheduler. The scope and the animator cache are left as they are; the next
//! successful execution re-harvests bindings and re-activates the scheduler.

use crate::callbacks::CallbackBindings;
use crate::scheduler::FrameScheduler;
use crate::script_diagnostics::ScriptDiagnostic;

/// Session state touched by containment.
pub struct ContainmentTarget<'a> {
    pub bindings: &'a mut CallbackBindings,
    pub scheduler: &'a mut FrameScheduler,
    /// Set by the first execution; cleared so the next one restarts the scheduler.
    pub activated: &'a mut bool,
}

/// Apply containment and return the report for the output.
pub fn contain(target: ContainmentTarget<'_>, diagnostic: &ScriptDiagnostic) -> String {
    log::warn!("Callback failed, stopping animations: {}", diagnostic);

    target.bindings.clear();
    target.scheduler.stop();
    *target.activated = false;

    failure_report(diagnostic)
}

fn failure_report(diagnostic: &ScriptDiagnostic) -> String {
    format!("Error during callback: {}\n", diagnostic)
}
