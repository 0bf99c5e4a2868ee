use log::debug;
use serde::Serialize;
use url::Url;

use crate::allowlist::{host_within, Allowlist};

/// Whether the page asked for a new window or is navigating in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationKind {
    NewWindow,
    InPlace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NavigationDecision {
    LoadInPrimary,
    OpenSecondary,
    DispatchExternal,
    Deny,
}

/// Schemes that never leave the shell and never load.
const DENIED_SCHEMES: &[&str] = &["file", "data", "javascript", "blob", "about", "view-source"];

/// Schemes used for resources bundled with the app.
const BUNDLED_SCHEMES: &[&str] = &["tauri", "asset"];

const BUNDLED_HOST: &str = "tauri.localhost";

/// Decides where a navigation attempt is allowed to go.
///
/// The gate is pure: it holds no session state and classifying the same
/// input twice yields the same decision.
#[derive(Debug)]
pub struct NavigationGate {
    base_url: Url,
    allowlist: Allowlist,
    identity_providers: Allowlist,
}

impl NavigationGate {
    pub fn new(base_url: Url, allowlist: Allowlist, identity_providers: Allowlist) -> Self {
        Self {
            base_url,
            allowlist,
            identity_providers,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Classify a raw URL string. Unparseable input fails closed.
    pub fn classify(&self, raw: &str, kind: NavigationKind) -> NavigationDecision {
        match Url::parse(raw.trim()) {
            Ok(url) => self.classify_url(&url, kind),
            Err(err) => {
                debug!("[gate] unparseable url {raw:?}: {err}");
                NavigationDecision::DispatchExternal
            }
        }
    }

    pub fn classify_url(&self, url: &Url, kind: NavigationKind) -> NavigationDecision {
        let scheme = url.scheme();

        if is_bundled(url) {
            return NavigationDecision::LoadInPrimary;
        }
        if DENIED_SCHEMES.contains(&scheme) {
            return NavigationDecision::Deny;
        }
        if scheme != "http" && scheme != "https" {
            return NavigationDecision::DispatchExternal;
        }

        let Some(host) = url.host_str().filter(|h| !h.is_empty()) else {
            return NavigationDecision::DispatchExternal;
        };

        if self.is_self_domain(host) {
            return NavigationDecision::LoadInPrimary;
        }

        if kind == NavigationKind::NewWindow && self.identity_providers.matches(url) {
            return NavigationDecision::OpenSecondary;
        }

        if self.allowlist.matches(url) {
            NavigationDecision::LoadInPrimary
        } else {
            NavigationDecision::DispatchExternal
        }
    }

    /// True for the base URL host and its subdomains.
    pub fn is_self_domain(&self, host: &str) -> bool {
        self.base_url
            .host_str()
            .map(|base| host_within(host, base))
            .unwrap_or(false)
    }

    pub fn is_identity_provider(&self, url: &Url) -> bool {
        self.identity_providers.matches(url)
    }
}

/// Bundled app resources are always trusted.
pub fn is_bundled(url: &Url) -> bool {
    BUNDLED_SCHEMES.contains(&url.scheme())
        || (matches!(url.scheme(), "http" | "https") && url.host_str() == Some(BUNDLED_HOST))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allowlist::AllowRule;

    fn gate(allow: Vec<AllowRule>) -> NavigationGate {
        NavigationGate::new(
            Url::parse("https://chat.example.com/").unwrap(),
            Allowlist::new(allow),
            Allowlist::new(vec![
                AllowRule::substring("accounts.google.com"),
                AllowRule::suffix("login.live.com"),
            ]),
        )
    }

    #[test]
    fn scenario_pattern_and_substring_allowlist() {
        let gate = gate(vec![
            AllowRule::pattern(r"^.*\.example\.com$"),
            AllowRule::substring("accounts.google.com"),
        ]);
        assert_eq!(
            gate.classify("https://sub.example.com/page", NavigationKind::InPlace),
            NavigationDecision::LoadInPrimary
        );
        assert_eq!(
            gate.classify("https://evil.com/example.com", NavigationKind::InPlace),
            NavigationDecision::DispatchExternal
        );
    }

    #[test]
    fn base_url_bypasses_allowlist() {
        let gate = gate(vec![]);
        for kind in [NavigationKind::InPlace, NavigationKind::NewWindow] {
            assert_eq!(
                gate.classify("https://chat.example.com/", kind),
                NavigationDecision::LoadInPrimary
            );
            assert_eq!(
                gate.classify("https://api.chat.example.com/c/123", kind),
                NavigationDecision::LoadInPrimary
            );
        }
        assert_eq!(
            gate.classify("https://example.com/", NavigationKind::InPlace),
            NavigationDecision::DispatchExternal
        );
    }

    #[test]
    fn identity_provider_popup_opens_secondary() {
        let gate = gate(vec![AllowRule::substring("accounts.google.com")]);
        assert_eq!(
            gate.classify(
                "https://accounts.google.com/o/oauth2/v2/auth?client_id=abc",
                NavigationKind::NewWindow
            ),
            NavigationDecision::OpenSecondary
        );
        // In place, the provider is only as trusted as the allowlist says.
        assert_eq!(
            gate.classify(
                "https://accounts.google.com/o/oauth2/v2/auth",
                NavigationKind::InPlace
            ),
            NavigationDecision::LoadInPrimary
        );
        assert_eq!(
            gate.classify("https://login.live.com/oauth20", NavigationKind::InPlace),
            NavigationDecision::DispatchExternal
        );
    }

    #[test]
    fn malformed_urls_never_load_in_primary() {
        let gate = gate(vec![AllowRule::substring("example")]);
        for raw in ["", "not a url", "https://", "http://[::1", "://example.com"] {
            let decision = gate.classify(raw, NavigationKind::InPlace);
            assert_ne!(decision, NavigationDecision::LoadInPrimary, "{raw}");
        }
    }

    #[test]
    fn local_schemes_are_denied_and_foreign_schemes_dispatched() {
        let gate = gate(vec![AllowRule::substring("example")]);
        assert_eq!(
            gate.classify("file:///etc/passwd", NavigationKind::InPlace),
            NavigationDecision::Deny
        );
        assert_eq!(
            gate.classify("javascript:alert(1)", NavigationKind::NewWindow),
            NavigationDecision::Deny
        );
        assert_eq!(
            gate.classify("mailto:help@example.com", NavigationKind::InPlace),
            NavigationDecision::DispatchExternal
        );
        assert_eq!(
            gate.classify("slack://open", NavigationKind::NewWindow),
            NavigationDecision::DispatchExternal
        );
    }

    #[test]
    fn bundled_resources_load_in_primary() {
        let gate = gate(vec![]);
        assert_eq!(
            gate.classify("tauri://localhost/index.html", NavigationKind::InPlace),
            NavigationDecision::LoadInPrimary
        );
        assert_eq!(
            gate.classify("http://tauri.localhost/", NavigationKind::InPlace),
            NavigationDecision::LoadInPrimary
        );
    }

    #[test]
    fn classification_is_deterministic() {
        let gate = gate(vec![AllowRule::suffix("openai.com")]);
        let inputs = [
            "https://auth.openai.com/log-in",
            "https://accounts.google.com/signin",
            "https://news.ycombinator.com/",
            "ftp://files.example.com",
        ];
        for raw in inputs {
            for kind in [NavigationKind::InPlace, NavigationKind::NewWindow] {
                let first = gate.classify(raw, kind);
                for _ in 0..5 {
                    assert_eq!(gate.classify(raw, kind), first);
                }
            }
        }
    }
}
