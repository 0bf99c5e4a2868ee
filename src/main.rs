#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use std::env;
use std::time::Instant;

use anyhow::Result;
use log::{info, warn};
use tauri::webview::PageLoadEvent;
use tauri::Manager;

use chat_shell::config::{
    conflicting_app_arg, read_settings_from_disk, settings_file_path, Overrides, Settings,
};
use chat_shell::{commands, shell, ShellConfig, ShellRuntime};

/// Resolve the configuration. A broken settings file falls back to defaults
/// and is reported once logging is up; a bad `--app` or base URL is fatal.
fn load_config() -> Result<(ShellConfig, Option<String>)> {
    let path = settings_file_path();
    let (settings, settings_error) = match read_settings_from_disk(&path) {
        Ok(settings) => (settings, None),
        Err(err) => (Settings::default(), Some(format!("{err:#}"))),
    };
    let overrides = Overrides::from_env_and_args(env::args().skip(1));
    let config = ShellConfig::resolve(&settings, &overrides)?;
    Ok((config, settings_error))
}

fn main() {
    let (config, settings_error) = match load_config() {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("chat-shell: {err:#}");
            std::process::exit(2);
        }
    };

    let log_builder = tauri_plugin_log::Builder::default()
        .level(config.log_level)
        .clear_targets()
        .targets([
            tauri_plugin_log::Target::new(tauri_plugin_log::TargetKind::Stdout),
            tauri_plugin_log::Target::new(tauri_plugin_log::TargetKind::Webview),
        ]);

    let poll_interval = config.poll_interval;
    let hide_on_close = config.hide_on_close;
    let variant = config.variant;

    let mut builder = tauri::Builder::default();
    if hide_on_close {
        // A hidden window can only come back through a second launch.
        builder = builder.plugin(tauri_plugin_single_instance::init(move |app, args, _cwd| {
            if let Some(requested) = conflicting_app_arg(variant, args) {
                warn!("[shell] {variant} is already running; ignoring --app {requested}");
            }
            info!("[shell] second launch, showing the main window");
            shell::reveal_primary(app);
        }));
    }

    let builder = builder
        .manage(ShellRuntime::new(config))
        .plugin(tauri_plugin_shell::init())
        .plugin(log_builder.build())
        .on_page_load(|webview, payload| {
            if !matches!(payload.event(), PageLoadEvent::Finished) {
                return;
            }
            let app = webview.app_handle();
            let label = webview.label().to_string();
            let effects = shell::with_controller(app, |controller| {
                controller.page_loaded(&label, payload.url(), Instant::now())
            });
            shell::dispatch(app, effects);
        })
        .on_window_event(|window, event| match event {
            tauri::WindowEvent::CloseRequested { api, .. } => {
                let app = window.app_handle();
                if shell::with_controller(app, |controller| controller.close_requested(window.label())) {
                    info!("[shell] hiding {} instead of closing", window.label());
                    api.prevent_close();
                    let _ = window.hide();
                }
            }
            tauri::WindowEvent::Destroyed => {
                let app = window.app_handle();
                let effects =
                    shell::with_controller(app, |controller| controller.window_destroyed(window.label()));
                shell::dispatch(app, effects);
            }
            _ => {}
        })
        .invoke_handler(tauri::generate_handler![commands::relay::auth_relay_report])
        .setup(move |app| {
            if let Some(err) = settings_error {
                warn!("[config] {err}; using defaults");
            }

            let handle = app.handle().clone();
            let runtime = app.state::<ShellRuntime>();
            let config = runtime.config();
            info!(
                "[shell] starting {} at {} (settings: {})",
                config.variant,
                config.base_url,
                settings_file_path().display()
            );

            shell::create_primary_window(&handle, config)?;
            tauri::async_runtime::spawn(shell::run_relay_loop(handle, poll_interval));
            Ok(())
        });

    let app = builder
        .build(tauri::generate_context!())
        .expect("failed to build Tauri application");

    app.run(|app_handle, event| match event {
        tauri::RunEvent::ExitRequested { .. } => {
            shell::with_controller(app_handle, |controller| controller.set_quitting());
        }
        #[cfg(target_os = "macos")]
        tauri::RunEvent::Reopen { .. } => shell::reveal_primary(app_handle),
        _ => {}
    });
}
