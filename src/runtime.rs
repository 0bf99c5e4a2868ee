use parking_lot::Mutex;

use crate::config::ShellConfig;
use crate::controller::ShellController;

/// Managed Tauri state shared by window callbacks, commands and the relay
/// loop.
pub struct ShellRuntime {
    config: ShellConfig,
    controller: Mutex<ShellController>,
}

impl ShellRuntime {
    pub fn new(config: ShellConfig) -> Self {
        let controller = ShellController::new(&config);
        Self {
            config,
            controller: Mutex::new(controller),
        }
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    /// Run `f` under the controller lock. Never touch a window from inside
    /// `f`: window calls may block on the main thread, which may itself be
    /// waiting for this lock.
    pub fn with_controller<T>(&self, f: impl FnOnce(&mut ShellController) -> T) -> T {
        let mut controller = self.controller.lock();
        f(&mut controller)
    }
}
