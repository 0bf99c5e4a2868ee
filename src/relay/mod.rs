//! Popup auth relay: lifecycle of the secondary sign-in window.
//!
//! ```text
//! Idle -> Opened -> Observing -> Completed -> Closed -> Idle
//!            \          \
//!             +----------+-> (timeout) -> Closed
//! ```
//!
//! URL-derived signals are held as a candidate until the page stops changing
//! for the configured quiet period. Explicit page confirmation completes
//! immediately. See [`detect`] for what counts as a signal.

pub mod detect;
pub mod message;

use std::time::{Duration, Instant};

use log::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::observer::{AuthStep, PageSnapshot};
use detect::{DetectionRules, Signal};
use message::{RelayMessage, RelayMessageKind};

pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(180);
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Hard limit measured from the moment the secondary window is opened.
    pub timeout: Duration,
    /// Quiet period a URL-derived signal must survive before it is final.
    pub settle: Duration,
    pub rules: DetectionRules,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_AUTH_TIMEOUT,
            settle: DEFAULT_SETTLE,
            rules: DetectionRules::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayPhase {
    Idle,
    Opened,
    Observing,
    Completed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Timeout,
    Cancelled,
    PrimaryGone,
    Superseded,
}

/// An in-progress external authentication round trip.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub id: Uuid,
    /// Label of the secondary window. The relay never owns the window.
    pub label: String,
    pub target_return_url: Option<Url>,
    pub opened_at: Instant,
}

/// What the caller must do with the windowing layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    None,
    /// Deliver `message` to the primary window, then close `label`.
    Complete {
        label: String,
        message: RelayMessage,
        return_url: Option<Url>,
    },
    /// Close `label` without relaying a result.
    Close { label: String, reason: CloseReason },
    /// Pass a non-terminal message to the primary window.
    Forward(RelayMessage),
}

#[derive(Debug)]
struct Tracking {
    session: AuthSession,
    observing: bool,
    /// Latest URL-derived signal, pending the quiet period.
    candidate: Option<Signal>,
    last_change: Instant,
    last_step: Option<AuthStep>,
    steps_seen: u32,
}

#[derive(Debug)]
enum State {
    Idle,
    Active(Box<Tracking>),
    /// Closure requested; waiting for the window to report it is gone.
    Closing { label: String, relayed: bool },
}

#[derive(Debug)]
pub struct PopupAuthRelay {
    config: RelayConfig,
    state: State,
}

impl PopupAuthRelay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            state: State::Idle,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn phase(&self) -> RelayPhase {
        match &self.state {
            State::Idle => RelayPhase::Idle,
            State::Active(tracking) if tracking.observing => RelayPhase::Observing,
            State::Active(_) => RelayPhase::Opened,
            State::Closing { relayed: true, .. } => RelayPhase::Completed,
            State::Closing { relayed: false, .. } => RelayPhase::Closed,
        }
    }

    /// True while a session is waiting for a result.
    pub fn is_active(&self) -> bool {
        matches!(self.state, State::Active(_))
    }

    pub fn session(&self) -> Option<&AuthSession> {
        match &self.state {
            State::Active(tracking) => Some(&tracking.session),
            _ => None,
        }
    }

    /// Label of the secondary window the relay is tracking or closing.
    pub fn secondary_label(&self) -> Option<&str> {
        match &self.state {
            State::Idle => None,
            State::Active(tracking) => Some(&tracking.session.label),
            State::Closing { label, .. } => Some(label),
        }
    }

    /// Start a session for a freshly created secondary window.
    ///
    /// An already active session is superseded: the returned action closes
    /// its window. A window already being closed is left alone.
    pub fn open(
        &mut self,
        label: impl Into<String>,
        target_return_url: Option<Url>,
        now: Instant,
    ) -> RelayAction {
        let previous = std::mem::replace(&mut self.state, State::Idle);
        let action = match previous {
            State::Active(tracking) => {
                warn!(
                    "[relay] session {} superseded before completion",
                    tracking.session.id
                );
                RelayAction::Close {
                    label: tracking.session.label,
                    reason: CloseReason::Superseded,
                }
            }
            _ => RelayAction::None,
        };

        let session = AuthSession {
            id: Uuid::new_v4(),
            label: label.into(),
            target_return_url,
            opened_at: now,
        };
        info!(
            "[relay] session {} opened window={}",
            session.id, session.label
        );
        self.state = State::Active(Box::new(Tracking {
            session,
            observing: false,
            candidate: None,
            last_change: now,
            last_step: None,
            steps_seen: 0,
        }));
        action
    }

    /// Feed one page-state change of the secondary window.
    pub fn observe(&mut self, label: &str, snapshot: PageSnapshot, now: Instant) -> RelayAction {
        let State::Active(tracking) = &mut self.state else {
            debug!("[relay] ignoring page change for {label}: no active session");
            return RelayAction::None;
        };
        if tracking.session.label != label {
            return RelayAction::None;
        }

        tracking.observing = true;
        tracking.last_change = now;
        if let Some(step) = snapshot.step {
            if tracking.last_step != Some(step) {
                tracking.last_step = Some(step);
                tracking.steps_seen += 1;
                debug!(
                    "[relay] session {} step {:?} ({} seen)",
                    tracking.session.id, step, tracking.steps_seen
                );
            }
        }

        match detect::detect(&snapshot, &self.config.rules) {
            Some(signal) if signal.is_confirmed() => self.finish(signal),
            Some(Signal::Message(message)) => match message.kind {
                RelayMessageKind::AuthError => {
                    warn!("[relay] session {} reported an auth error", tracking.session.id);
                    RelayAction::Forward(message)
                }
                RelayMessageKind::AuthTimeout => {
                    self.close_unrelayed(CloseReason::Timeout)
                }
                _ => RelayAction::None,
            },
            Some(signal) => {
                debug!("[relay] session {} candidate {:?}", tracking.session.id, signal);
                tracking.candidate = Some(signal);
                RelayAction::None
            }
            None => {
                if snapshot.step.is_some() && tracking.candidate.take().is_some() {
                    debug!(
                        "[relay] session {} discarded transient signal, flow continues",
                        tracking.session.id
                    );
                }
                RelayAction::None
            }
        }
    }

    /// Periodic check for timeout and settled candidates.
    pub fn tick(&mut self, now: Instant) -> RelayAction {
        let State::Active(tracking) = &mut self.state else {
            return RelayAction::None;
        };

        if now.saturating_duration_since(tracking.session.opened_at) >= self.config.timeout {
            info!("[relay] session {} timed out", tracking.session.id);
            return self.close_unrelayed(CloseReason::Timeout);
        }

        let quiet_for = now.saturating_duration_since(tracking.last_change);
        if tracking.candidate.is_none() || quiet_for < self.config.settle {
            return RelayAction::None;
        }

        match tracking.candidate.take() {
            Some(signal) => self.finish(signal),
            None => RelayAction::None,
        }
    }

    /// The secondary window is gone, whoever closed it.
    pub fn window_closed(&mut self, label: &str) -> RelayAction {
        let ours = match &self.state {
            State::Active(tracking) if tracking.session.label == label => {
                info!(
                    "[relay] session {} window closed before completion",
                    tracking.session.id
                );
                true
            }
            State::Closing { label: closing, .. } if closing == label => {
                debug!("[relay] window {label} closed");
                true
            }
            _ => false,
        };
        if ours {
            self.state = State::Idle;
        }
        RelayAction::None
    }

    /// The primary window is gone; nothing can be relayed anymore.
    pub fn primary_closed(&mut self) -> RelayAction {
        if self.is_active() {
            return self.close_unrelayed(CloseReason::PrimaryGone);
        }
        RelayAction::None
    }

    fn finish(&mut self, signal: Signal) -> RelayAction {
        let tracking = match std::mem::replace(&mut self.state, State::Idle) {
            State::Active(tracking) => tracking,
            other => {
                self.state = other;
                return RelayAction::None;
            }
        };
        let label = tracking.session.label.clone();

        match signal.into_message() {
            Some(message) => {
                info!(
                    "[relay] session {} completed with {:?}",
                    tracking.session.id, message.kind
                );
                self.state = State::Closing {
                    label: label.clone(),
                    relayed: true,
                };
                RelayAction::Complete {
                    label,
                    message,
                    return_url: tracking.session.target_return_url,
                }
            }
            None => {
                info!("[relay] session {} cancelled by provider", tracking.session.id);
                self.state = State::Closing {
                    label: label.clone(),
                    relayed: false,
                };
                RelayAction::Close {
                    label,
                    reason: CloseReason::Cancelled,
                }
            }
        }
    }

    fn close_unrelayed(&mut self, reason: CloseReason) -> RelayAction {
        let tracking = match std::mem::replace(&mut self.state, State::Idle) {
            State::Active(tracking) => tracking,
            other => {
                self.state = other;
                return RelayAction::None;
            }
        };
        let label = tracking.session.label;
        self.state = State::Closing {
            label: label.clone(),
            relayed: false,
        };
        RelayAction::Close { label, reason }
    }
}
