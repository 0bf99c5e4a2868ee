//! Desktop shell around a hosted chat web application.
//!
//! The core ([`gate`], [`relay`], [`controller`]) is plain Rust and knows
//! nothing about windows; [`shell`] and [`commands`] bind it to Tauri.

pub mod allowlist;
pub mod commands;
pub mod config;
pub mod controller;
pub mod gate;
pub mod observer;
pub mod probe;
pub mod relay;
pub mod runtime;
pub mod shell;
pub mod variant;

pub use config::ShellConfig;
pub use controller::{ShellController, ShellEffect};
pub use runtime::ShellRuntime;
