use std::time::Instant;

use log::{debug, warn};
use tauri::{Manager, State, WebviewWindow};

use crate::controller::ShellController;
use crate::probe::ProbeReport;
use crate::runtime::ShellRuntime;
use crate::shell;

/// Page-state report from the probe script of a sign-in window.
#[tauri::command]
pub fn auth_relay_report(
    window: WebviewWindow,
    report: ProbeReport,
    state: State<'_, ShellRuntime>,
) -> Result<(), String> {
    let label = window.label().to_string();
    if !ShellController::is_secondary(&label) {
        warn!("[relay] rejected report from window {label}");
        return Err(format!("Window '{label}' is not a sign-in window"));
    }

    debug!("[relay] report from {label}: {}", report.url);
    let effects = state.with_controller(|controller| {
        controller.observe(&label, report.into_snapshot(), Instant::now())
    });
    shell::dispatch(window.app_handle(), effects);
    Ok(())
}
