use std::time::Instant;

use log::{debug, info, warn};
use url::Url;

use crate::allowlist::Allowlist;
use crate::config::ShellConfig;
use crate::gate::{NavigationDecision, NavigationGate, NavigationKind};
use crate::observer::{self, PageSnapshot, SnapshotQueue};
use crate::relay::message::{RelayMessage, RelayMessageKind};
use crate::relay::{CloseReason, PopupAuthRelay, RelayAction};

pub const PRIMARY_LABEL: &str = "main";
const SECONDARY_PREFIX: &str = "auth-";

/// Window operation requested by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEffect {
    OpenExternal(String),
    LoadInPrimary(Url),
    CreateSecondary { label: String, url: Url },
    CloseWindow(String),
    RelayToPrimary(RelayMessage),
    ReloadPrimary(Url),
}

/// Owns all mutable shell state: the gate, the relay and the flags the
/// window handlers consult. Handlers lock it, collect effects, unlock, and
/// only then touch windows.
#[derive(Debug)]
pub struct ShellController {
    gate: NavigationGate,
    relay: PopupAuthRelay,
    pending: SnapshotQueue,
    hide_on_close: bool,
    quitting: bool,
    primary_alive: bool,
    secondaries_opened: u64,
}

impl ShellController {
    pub fn new(config: &ShellConfig) -> Self {
        let gate = NavigationGate::new(
            config.base_url.clone(),
            Allowlist::new(config.allowlist.clone()),
            Allowlist::new(config.identity_providers.clone()),
        );
        Self {
            gate,
            relay: PopupAuthRelay::new(config.relay.clone()),
            pending: SnapshotQueue::new(),
            hide_on_close: config.hide_on_close,
            quitting: false,
            primary_alive: true,
            secondaries_opened: 0,
        }
    }

    pub fn gate(&self) -> &NavigationGate {
        &self.gate
    }

    pub fn relay(&self) -> &PopupAuthRelay {
        &self.relay
    }

    pub fn is_auth_active(&self) -> bool {
        self.relay.is_active()
    }

    pub fn active_secondary(&self) -> Option<&str> {
        self.relay.session().map(|session| session.label.as_str())
    }

    pub fn is_secondary(label: &str) -> bool {
        label.starts_with(SECONDARY_PREFIX)
    }

    /// `window.open` from the primary page. The page never gets a window of
    /// its own; every outcome is carried out by the shell.
    pub fn new_window_requested(&mut self, raw_url: &str, now: Instant) -> Vec<ShellEffect> {
        let decision = self.gate.classify(raw_url, NavigationKind::NewWindow);
        debug!("[gate] new window {raw_url} -> {decision:?}");

        match decision {
            NavigationDecision::LoadInPrimary => match Url::parse(raw_url.trim()) {
                Ok(url) => vec![ShellEffect::LoadInPrimary(url)],
                Err(_) => Vec::new(),
            },
            NavigationDecision::OpenSecondary => match Url::parse(raw_url.trim()) {
                Ok(url) => self.open_secondary(url, now),
                Err(_) => Vec::new(),
            },
            NavigationDecision::DispatchExternal => {
                vec![ShellEffect::OpenExternal(raw_url.trim().to_string())]
            }
            NavigationDecision::Deny => {
                info!("[gate] denied new window {raw_url}");
                Vec::new()
            }
        }
    }

    /// In-place navigation in any shell window. Returns whether it may
    /// proceed, plus effects for the navigations it cancelled.
    pub fn navigation_requested(
        &mut self,
        label: &str,
        url: &Url,
        now: Instant,
    ) -> (bool, Vec<ShellEffect>) {
        if label == PRIMARY_LABEL {
            return match self.gate.classify_url(url, NavigationKind::InPlace) {
                NavigationDecision::LoadInPrimary | NavigationDecision::OpenSecondary => {
                    (true, Vec::new())
                }
                NavigationDecision::DispatchExternal => {
                    info!("[gate] external {url}");
                    (false, vec![ShellEffect::OpenExternal(url.to_string())])
                }
                NavigationDecision::Deny => {
                    info!("[gate] denied navigation to {url}");
                    (false, Vec::new())
                }
            };
        }

        if self.active_secondary() != Some(label) {
            debug!("[gate] blocking navigation in inactive window {label}");
            return (false, Vec::new());
        }

        // Providers redirect across their own domains, so the allowlist does
        // not apply inside the sign-in window. Only the scheme is checked.
        if matches!(url.scheme(), "http" | "https") {
            let effects = self.observe(label, PageSnapshot::navigated(url.as_str()), now);
            return (true, effects);
        }
        match self.gate.classify_url(url, NavigationKind::InPlace) {
            NavigationDecision::DispatchExternal => {
                (false, vec![ShellEffect::OpenExternal(url.to_string())])
            }
            NavigationDecision::LoadInPrimary => (true, Vec::new()),
            _ => (false, Vec::new()),
        }
    }

    /// Page finished loading in some window.
    pub fn page_loaded(&mut self, label: &str, url: &Url, now: Instant) -> Vec<ShellEffect> {
        if self.active_secondary() == Some(label) {
            return self.observe(label, PageSnapshot::navigated(url.as_str()), now);
        }
        Vec::new()
    }

    /// Record a page-state change for the secondary window and process it.
    pub fn observe(&mut self, label: &str, snapshot: PageSnapshot, now: Instant) -> Vec<ShellEffect> {
        if self.active_secondary() != Some(label) {
            return Vec::new();
        }
        self.pending.push(snapshot);
        self.pump(label, now)
    }

    /// Recurring check: drains queued changes, then applies timeout and
    /// quiet-period rules.
    pub fn tick(&mut self, now: Instant) -> Vec<ShellEffect> {
        let mut effects = match self.active_secondary().map(str::to_string) {
            Some(label) => self.pump(&label, now),
            None => Vec::new(),
        };
        let action = self.relay.tick(now);
        effects.extend(self.apply(action));
        effects
    }

    pub fn window_destroyed(&mut self, label: &str) -> Vec<ShellEffect> {
        if label == PRIMARY_LABEL {
            self.primary_alive = false;
            let action = self.relay.primary_closed();
            return self.apply(action);
        }
        if Self::is_secondary(label) {
            if self.active_secondary() == Some(label) {
                self.pending.clear();
            }
            self.relay.window_closed(label);
        }
        Vec::new()
    }

    /// Returns true when the close should be turned into a hide.
    pub fn close_requested(&self, label: &str) -> bool {
        label == PRIMARY_LABEL && self.hide_on_close && !self.quitting
    }

    pub fn set_quitting(&mut self) {
        self.quitting = true;
    }

    pub fn is_quitting(&self) -> bool {
        self.quitting
    }

    fn open_secondary(&mut self, url: Url, now: Instant) -> Vec<ShellEffect> {
        self.secondaries_opened += 1;
        let label = format!("{SECONDARY_PREFIX}{}", self.secondaries_opened);

        // Session goes active before the window exists.
        self.pending.clear();
        let superseded = self
            .relay
            .open(label.clone(), Some(self.gate.base_url().clone()), now);

        let mut effects = self.apply(superseded);
        effects.push(ShellEffect::CreateSecondary { label, url });
        effects
    }

    fn pump(&mut self, label: &str, now: Instant) -> Vec<ShellEffect> {
        let mut effects = Vec::new();
        for snapshot in observer::drain(&mut self.pending) {
            let action = self.relay.observe(label, snapshot, now);
            effects.extend(self.apply(action));
        }
        effects
    }

    fn apply(&mut self, action: RelayAction) -> Vec<ShellEffect> {
        match action {
            RelayAction::None => Vec::new(),
            RelayAction::Complete {
                label,
                message,
                return_url,
            } => {
                self.pending.clear();
                if !self.primary_alive {
                    return vec![ShellEffect::CloseWindow(label)];
                }
                let return_url = return_url.unwrap_or_else(|| self.gate.base_url().clone());
                vec![
                    ShellEffect::RelayToPrimary(message),
                    ShellEffect::CloseWindow(label),
                    ShellEffect::ReloadPrimary(return_url),
                ]
            }
            RelayAction::Close { label, reason } => {
                self.pending.clear();
                let mut effects = Vec::new();
                if reason == CloseReason::Timeout && self.primary_alive {
                    effects.push(ShellEffect::RelayToPrimary(RelayMessage::new(
                        RelayMessageKind::AuthTimeout,
                    )));
                }
                effects.push(ShellEffect::CloseWindow(label));
                effects
            }
            RelayAction::Forward(message) => {
                if self.primary_alive {
                    vec![ShellEffect::RelayToPrimary(message)]
                } else {
                    warn!("[relay] dropping {:?}: primary window gone", message.kind);
                    Vec::new()
                }
            }
        }
    }
}

/// Base URL with a cache-busting query so the page re-reads its session.
pub fn cache_busted(url: &Url, millis: i64) -> Url {
    let mut url = url.clone();
    url.query_pairs_mut().append_pair("_", &millis.to_string());
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Overrides, Settings};
    use crate::relay::{DEFAULT_AUTH_TIMEOUT, DEFAULT_SETTLE};
    use std::time::Duration;

    const GOOGLE_AUTH: &str = "https://accounts.google.com/o/oauth2/v2/auth?client_id=abc";

    fn controller(app: &str) -> ShellController {
        let config = ShellConfig::resolve(
            &Settings::default(),
            &Overrides {
                app: Some(app.into()),
                base_url: None,
            },
        )
        .unwrap();
        ShellController::new(&config)
    }

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    fn secondary_label(effects: &[ShellEffect]) -> String {
        effects
            .iter()
            .find_map(|effect| match effect {
                ShellEffect::CreateSecondary { label, .. } => Some(label.clone()),
                _ => None,
            })
            .expect("secondary window created")
    }

    #[test]
    fn provider_popup_activates_session_before_window_exists() {
        let mut shell = controller("claude");
        let effects = shell.new_window_requested(GOOGLE_AUTH, Instant::now());
        assert!(shell.is_auth_active());
        assert_eq!(
            effects,
            vec![ShellEffect::CreateSecondary {
                label: "auth-1".into(),
                url: url(GOOGLE_AUTH),
            }]
        );
    }

    #[test]
    fn allowlisted_popup_loads_in_primary_and_others_go_external() {
        let mut shell = controller("chatgpt");
        let now = Instant::now();
        assert_eq!(
            shell.new_window_requested("https://help.openai.com/en/", now),
            vec![ShellEffect::LoadInPrimary(url("https://help.openai.com/en/"))]
        );
        assert_eq!(
            shell.new_window_requested("https://en.wikipedia.org/wiki/GPT", now),
            vec![ShellEffect::OpenExternal(
                "https://en.wikipedia.org/wiki/GPT".into()
            )]
        );
        assert!(shell.new_window_requested("file:///etc/hosts", now).is_empty());
        assert!(!shell.is_auth_active());
    }

    #[test]
    fn provider_text_in_foreign_url_is_not_trusted() {
        let mut shell = controller("chatgpt");
        let now = Instant::now();
        let phish = "https://evil.example/phish?next=github.com/login";

        let (allow, effects) = shell.navigation_requested(PRIMARY_LABEL, &url(phish), now);
        assert!(!allow);
        assert_eq!(effects, vec![ShellEffect::OpenExternal(phish.into())]);

        assert_eq!(
            shell.new_window_requested(phish, now),
            vec![ShellEffect::OpenExternal(phish.into())]
        );
        assert!(!shell.is_auth_active());

        let github = "https://github.com/login/oauth/authorize?client_id=abc";
        assert_eq!(secondary_label(&shell.new_window_requested(github, now)), "auth-1");
        assert!(shell.is_auth_active());
    }

    #[test]
    fn primary_external_navigation_is_cancelled() {
        let mut shell = controller("grok");
        let now = Instant::now();
        let (allow, effects) =
            shell.navigation_requested(PRIMARY_LABEL, &url("https://github.com/xai-org"), now);
        assert!(!allow);
        assert_eq!(
            effects,
            vec![ShellEffect::OpenExternal("https://github.com/xai-org".into())]
        );

        let (allow, effects) =
            shell.navigation_requested(PRIMARY_LABEL, &url("https://accounts.x.ai/sign-in"), now);
        assert!(allow);
        assert!(effects.is_empty());
    }

    #[test]
    fn callback_code_round_trip() {
        let mut shell = controller("claude");
        let t0 = Instant::now();
        let label = secondary_label(&shell.new_window_requested(GOOGLE_AUTH, t0));

        let (allow, _) = shell.navigation_requested(&label, &url(GOOGLE_AUTH), t0);
        assert!(allow);

        let callback = "https://provider.example/callback?code=ABC123";
        let at = t0 + Duration::from_secs(20);
        let (allow, effects) = shell.navigation_requested(&label, &url(callback), at);
        assert!(allow);
        assert!(effects.is_empty());
        // The load event for the same URL is not a new change.
        assert!(shell.page_loaded(&label, &url(callback), at).is_empty());

        let effects = shell.tick(at + DEFAULT_SETTLE);
        assert_eq!(
            effects,
            vec![
                ShellEffect::RelayToPrimary(
                    RelayMessage::new(RelayMessageKind::AuthCodeReceived)
                        .with_code("ABC123")
                        .with_url(callback)
                ),
                ShellEffect::CloseWindow(label.clone()),
                ShellEffect::ReloadPrimary(url("https://claude.ai/new")),
            ]
        );
        assert!(!shell.is_auth_active());

        // Late duplicate confirmation from the closing page.
        let duplicate = PageSnapshot {
            message: Some(RelayMessage::new(RelayMessageKind::AuthComplete)),
            ..PageSnapshot::navigated(callback)
        };
        assert!(shell.observe(&label, duplicate, at).is_empty());
        assert!(shell.window_destroyed(&label).is_empty());
        assert!(shell.tick(at + Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn timeout_notifies_primary_and_closes_once() {
        let mut shell = controller("deepseek");
        let t0 = Instant::now();
        let label = secondary_label(&shell.new_window_requested(GOOGLE_AUTH, t0));

        let effects = shell.tick(t0 + DEFAULT_AUTH_TIMEOUT);
        assert_eq!(
            effects,
            vec![
                ShellEffect::RelayToPrimary(RelayMessage::new(RelayMessageKind::AuthTimeout)),
                ShellEffect::CloseWindow(label.clone()),
            ]
        );
        assert!(!shell.is_auth_active());
        assert!(shell.tick(t0 + DEFAULT_AUTH_TIMEOUT * 2).is_empty());
    }

    #[test]
    fn user_closing_popup_relays_nothing() {
        let mut shell = controller("qwen");
        let t0 = Instant::now();
        let label = secondary_label(&shell.new_window_requested(GOOGLE_AUTH, t0));
        shell.navigation_requested(&label, &url("https://p.example/callback?code=X"), t0);

        assert!(shell.window_destroyed(&label).is_empty());
        assert!(!shell.is_auth_active());
        assert!(shell.tick(t0 + Duration::from_secs(5)).is_empty());
    }

    #[test]
    fn primary_destroyed_closes_popup_without_relay() {
        let mut shell = controller("claude");
        let t0 = Instant::now();
        let label = secondary_label(&shell.new_window_requested(GOOGLE_AUTH, t0));
        assert_eq!(
            shell.window_destroyed(PRIMARY_LABEL),
            vec![ShellEffect::CloseWindow(label)]
        );
    }

    #[test]
    fn second_popup_supersedes_first_with_fresh_label() {
        let mut shell = controller("claude");
        let t0 = Instant::now();
        let first = secondary_label(&shell.new_window_requested(GOOGLE_AUTH, t0));
        let effects = shell.new_window_requested(GOOGLE_AUTH, t0);
        assert_eq!(effects[0], ShellEffect::CloseWindow(first.clone()));
        let second = secondary_label(&effects);
        assert_ne!(first, second);

        let (allow, _) = shell.navigation_requested(&first, &url(GOOGLE_AUTH), t0);
        assert!(!allow);
    }

    #[test]
    fn secondary_denies_local_schemes() {
        let mut shell = controller("claude");
        let t0 = Instant::now();
        let label = secondary_label(&shell.new_window_requested(GOOGLE_AUTH, t0));
        let (allow, effects) = shell.navigation_requested(&label, &url("file:///etc/passwd"), t0);
        assert!(!allow);
        assert!(effects.is_empty());
    }

    #[test]
    fn hide_on_close_until_quitting() {
        let mut shell = controller("grok");
        assert!(shell.close_requested(PRIMARY_LABEL));
        assert!(!shell.close_requested("auth-1"));
        shell.set_quitting();
        assert!(!shell.close_requested(PRIMARY_LABEL));

        let shell = controller("chatgpt");
        assert!(!shell.close_requested(PRIMARY_LABEL));
    }

    #[test]
    fn cache_buster_keeps_existing_query() {
        let busted = cache_busted(&url("https://claude.ai/new?x=1"), 42);
        assert_eq!(busted.as_str(), "https://claude.ai/new?x=1&_=42");
    }
}
