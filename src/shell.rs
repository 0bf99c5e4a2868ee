//! Window layer: builds the shell windows and carries out controller effects.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use chrono::Utc;
use log::{debug, info, warn};
use tauri::webview::NewWindowResponse;
use tauri::{AppHandle, Emitter, Manager, Runtime, WebviewUrl, WebviewWindowBuilder};
use tauri_plugin_shell::ShellExt;
use tokio::time::MissedTickBehavior;
use url::Url;

use crate::config::ShellConfig;
use crate::controller::{cache_busted, ShellController, ShellEffect, PRIMARY_LABEL};
use crate::observer::{self, PageObserver, UrlPoller};
use crate::probe::probe_script;
use crate::relay::message::RelayMessage;
use crate::runtime::ShellRuntime;

pub const RELAY_EVENT: &str = "chat-shell:auth-relay";

/// Lock the controller if the runtime is managed; `T::default()` otherwise.
pub fn with_controller<R: Runtime, T: Default>(
    app: &AppHandle<R>,
    f: impl FnOnce(&mut ShellController) -> T,
) -> T {
    match app.try_state::<ShellRuntime>() {
        Some(runtime) => runtime.with_controller(f),
        None => T::default(),
    }
}

pub fn create_primary_window<R: Runtime>(app: &AppHandle<R>, config: &ShellConfig) -> Result<()> {
    let nav_handle = app.clone();
    let popup_handle = app.clone();

    let window = WebviewWindowBuilder::new(
        app,
        PRIMARY_LABEL,
        WebviewUrl::External(config.base_url.clone()),
    )
    .title(config.title.clone())
    .inner_size(1200.0, 800.0)
    .min_inner_size(480.0, 360.0)
    .on_navigation(move |url| {
        let (allow, effects) = with_controller(&nav_handle, |controller| {
            controller.navigation_requested(PRIMARY_LABEL, url, Instant::now())
        });
        dispatch(&nav_handle, effects);
        allow
    })
    .on_new_window(move |url, _features| {
        let effects = with_controller(&popup_handle, |controller| {
            controller.new_window_requested(url.as_str(), Instant::now())
        });
        dispatch(&popup_handle, effects);
        NewWindowResponse::Deny
    })
    .build()?;

    let _ = window.show();
    let _ = window.set_focus();
    Ok(())
}

fn create_secondary_window<R: Runtime>(app: &AppHandle<R>, label: &str, url: Url) -> Result<()> {
    let runtime = app
        .try_state::<ShellRuntime>()
        .ok_or_else(|| anyhow!("shell runtime not initialized"))?;
    let config = runtime.config();
    let poll_ms = u64::try_from(config.poll_interval.as_millis()).unwrap_or(500);
    let script = probe_script(&config.step_keywords, poll_ms);
    let title = format!("{} sign-in", config.title);

    let nav_handle = app.clone();
    let nav_label = label.to_string();
    let popup_handle = app.clone();
    let popup_label = label.to_string();

    let window = WebviewWindowBuilder::new(app, label, WebviewUrl::External(url))
        .title(title)
        .inner_size(520.0, 720.0)
        .center()
        .initialization_script(&script)
        .on_navigation(move |url| {
            let (allow, effects) = with_controller(&nav_handle, |controller| {
                controller.navigation_requested(&nav_label, url, Instant::now())
            });
            dispatch(&nav_handle, effects);
            allow
        })
        .on_new_window(move |url, _features| {
            // Provider popups stay inside the sign-in window.
            let handle = popup_handle.clone();
            let label = popup_label.clone();
            tauri::async_runtime::spawn(async move {
                if let Some(window) = handle.get_webview_window(&label) {
                    if let Err(err) = window.navigate(url) {
                        warn!("[shell] failed to follow popup in {label}: {err}");
                    }
                }
            });
            NewWindowResponse::Deny
        })
        .build()?;

    let _ = window.set_focus();
    Ok(())
}

/// Carry out effects off the calling thread. Window callbacks run on the
/// main thread and must return before window operations can complete.
pub fn dispatch<R: Runtime>(app: &AppHandle<R>, effects: Vec<ShellEffect>) {
    if effects.is_empty() {
        return;
    }
    let app = app.clone();
    tauri::async_runtime::spawn(async move {
        apply_effects(&app, effects);
    });
}

fn apply_effects<R: Runtime>(app: &AppHandle<R>, effects: Vec<ShellEffect>) {
    for effect in effects {
        apply_effect(app, effect);
    }
}

fn apply_effect<R: Runtime>(app: &AppHandle<R>, effect: ShellEffect) {
    match effect {
        ShellEffect::OpenExternal(url) => {
            info!("[shell] opening {url} in the default browser");
            #[allow(deprecated)]
            let opened = app.shell().open(&url, None);
            if let Err(err) = opened {
                warn!("[shell] failed to open {url}: {err}");
            }
        }
        ShellEffect::LoadInPrimary(url) => navigate_primary(app, url),
        ShellEffect::CreateSecondary { label, url } => {
            info!("[shell] opening sign-in window {label} at {url}");
            if let Err(err) = create_secondary_window(app, &label, url) {
                warn!("[shell] failed to create sign-in window {label}: {err}");
                let effects = with_controller(app, |controller| controller.window_destroyed(&label));
                apply_effects(app, effects);
            }
        }
        ShellEffect::CloseWindow(label) => match app.get_webview_window(&label) {
            Some(window) => {
                if let Err(err) = window.close() {
                    warn!("[shell] failed to close {label}: {err}");
                }
            }
            None => {
                let effects = with_controller(app, |controller| controller.window_destroyed(&label));
                apply_effects(app, effects);
            }
        },
        ShellEffect::RelayToPrimary(message) => relay_to_primary(app, &message),
        ShellEffect::ReloadPrimary(url) => {
            navigate_primary(app, cache_busted(&url, Utc::now().timestamp_millis()));
        }
    }
}

/// Bring a hidden or minimized primary window back to the front.
pub fn reveal_primary<R: Runtime>(app: &AppHandle<R>) {
    let Some(window) = app.get_webview_window(PRIMARY_LABEL) else {
        return;
    };
    let _ = window.unminimize();
    let _ = window.show();
    let _ = window.set_focus();
}

fn navigate_primary<R: Runtime>(app: &AppHandle<R>, url: Url) {
    let Some(window) = app.get_webview_window(PRIMARY_LABEL) else {
        return;
    };
    if let Err(err) = window.navigate(url) {
        warn!("[shell] primary navigation failed: {err}");
    }
}

/// Deliver a relay message to the primary page as both a Tauri event and a
/// DOM `CustomEvent`. A missing primary window drops the message.
pub fn relay_to_primary<R: Runtime>(app: &AppHandle<R>, message: &RelayMessage) {
    let Some(window) = app.get_webview_window(PRIMARY_LABEL) else {
        debug!("[relay] primary window gone, dropping {:?}", message.kind);
        return;
    };
    info!("[relay] delivering {:?} to primary window", message.kind);

    let _ = app.emit_to(PRIMARY_LABEL, RELAY_EVENT, message);

    let event = serde_json::to_string(RELAY_EVENT).unwrap_or_else(|_| "\"\"".into());
    let detail = serde_json::to_string(message).unwrap_or_else(|_| "null".into());
    let script = format!(
        "window.dispatchEvent(new CustomEvent({event}, {{ detail: {detail} }}));\
         window.postMessage({detail}, window.location.origin);"
    );
    let _ = window.eval(&script);
}

/// Recurring relay tick: samples the sign-in window URL, then lets the
/// controller apply timeout and quiet-period rules.
pub async fn run_relay_loop<R: Runtime>(app: AppHandle<R>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut sampler: Option<(String, Box<dyn PageObserver>)> = None;

    loop {
        interval.tick().await;

        let active = with_controller(&app, |controller| {
            controller.active_secondary().map(str::to_string)
        });

        // Sampling reads the window URL, which waits on the main thread, so
        // it happens before the controller is locked again.
        let samples = match active {
            Some(label) => {
                if sampler.as_ref().map_or(true, |(current, _)| *current != label) {
                    sampler = Some((label.clone(), Box::new(url_sampler(app.clone(), label.clone()))));
                }
                sampler
                    .as_mut()
                    .map(|(_, observer)| (label, observer::drain(observer.as_mut())))
            }
            None => {
                sampler = None;
                None
            }
        };

        let effects = with_controller(&app, |controller| {
            let now = Instant::now();
            let mut effects = Vec::new();
            if let Some((label, snapshots)) = samples {
                for snapshot in snapshots {
                    effects.extend(controller.observe(&label, snapshot, now));
                }
            }
            effects.extend(controller.tick(now));
            effects
        });
        apply_effects(&app, effects);
    }
}

fn url_sampler<R: Runtime>(
    app: AppHandle<R>,
    label: String,
) -> UrlPoller<impl FnMut() -> Option<String> + Send> {
    UrlPoller::new(move || {
        app.get_webview_window(&label)
            .and_then(|window| window.url().ok())
            .map(|url| url.to_string())
    })
}
