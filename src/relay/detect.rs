//! Completion signal detection for secondary auth windows.
//!
//! Everything in here is a heuristic. Identity providers change their page
//! structure and URL layout without notice, so the markers are configurable
//! and a miss simply leaves the session running until it times out.

use url::Url;

use super::message::{RelayMessage, RelayMessageKind};
use crate::observer::PageSnapshot;

/// Query or fragment parameters that carry an authorization result.
pub const DEFAULT_CODE_PARAMS: &[&str] = &["code", "token", "access_token"];

/// Path fragments that mark a finished flow.
pub const DEFAULT_COMPLETION_MARKERS: &[&str] = &["callback", "success", "done"];

/// Path fragments that mark a flow the user backed out of.
pub const DEFAULT_CANCEL_MARKERS: &[&str] = &["canceled", "cancelled", "access_denied"];

#[derive(Debug, Clone)]
pub struct DetectionRules {
    pub code_params: Vec<String>,
    pub completion_markers: Vec<String>,
    pub cancel_markers: Vec<String>,
}

impl Default for DetectionRules {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            code_params: owned(DEFAULT_CODE_PARAMS),
            completion_markers: owned(DEFAULT_COMPLETION_MARKERS),
            cancel_markers: owned(DEFAULT_CANCEL_MARKERS),
        }
    }
}

/// A completion signal found in one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// The page posted a recognized relay message.
    Message(RelayMessage),
    /// An authorization code or token appeared in the URL.
    Code { code: String, url: String },
    /// The URL looks like a terminal page without a code.
    Completed { url: String },
    /// The provider reported a denial or the user cancelled.
    Cancelled { url: String },
}

impl Signal {
    /// Message relayed to the primary window, if any.
    pub fn into_message(self) -> Option<RelayMessage> {
        match self {
            Signal::Message(message) => Some(message),
            Signal::Code { code, url } => Some(
                RelayMessage::new(RelayMessageKind::AuthCodeReceived)
                    .with_code(code)
                    .with_url(url),
            ),
            Signal::Completed { url } => {
                Some(RelayMessage::new(RelayMessageKind::AuthComplete).with_url(url))
            }
            Signal::Cancelled { .. } => None,
        }
    }

    /// Explicit page confirmation skips the quiet period.
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Signal::Message(message) if message.kind.is_success())
    }
}

/// Extract a code or token from the query string, then the fragment.
pub fn extract_auth_code(url: &Url, params: &[String]) -> Option<String> {
    let lookup = |pairs: Vec<(String, String)>| {
        params.iter().find_map(|name| {
            pairs
                .iter()
                .find(|(key, value)| key == name && !value.trim().is_empty())
                .map(|(_, value)| value.clone())
        })
    };

    let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    if let Some(code) = lookup(query) {
        return Some(code);
    }

    let fragment = url.fragment()?;
    let pairs = url::form_urlencoded::parse(fragment.as_bytes())
        .into_owned()
        .collect();
    lookup(pairs)
}

fn has_error_param(url: &Url) -> bool {
    let in_query = url.query_pairs().any(|(key, _)| key == "error");
    let in_fragment = url
        .fragment()
        .map(|f| url::form_urlencoded::parse(f.as_bytes()).any(|(key, _)| key == "error"))
        .unwrap_or(false);
    in_query || in_fragment
}

fn path_contains(url: &Url, markers: &[String]) -> bool {
    let path = url.path().to_ascii_lowercase();
    markers
        .iter()
        .any(|marker| !marker.is_empty() && path.contains(&marker.to_ascii_lowercase()))
}

/// Find the strongest signal in a snapshot.
///
/// Order: explicit page message, code/token, cancellation, completion page.
/// Markers are matched against the URL path only; provider sign-in pages
/// routinely carry `redirect_uri=.../callback` in their query.
pub fn detect(snapshot: &PageSnapshot, rules: &DetectionRules) -> Option<Signal> {
    if let Some(message) = &snapshot.message {
        return Some(Signal::Message(message.clone()));
    }

    let url = Url::parse(&snapshot.url).ok();

    if let Some(url) = &url {
        if let Some(code) = extract_auth_code(url, &rules.code_params) {
            return Some(Signal::Code {
                code,
                url: snapshot.url.clone(),
            });
        }
        if has_error_param(url) || path_contains(url, &rules.cancel_markers) {
            return Some(Signal::Cancelled {
                url: snapshot.url.clone(),
            });
        }
        if path_contains(url, &rules.completion_markers) {
            return Some(Signal::Completed {
                url: snapshot.url.clone(),
            });
        }
    }

    if snapshot.success_marker {
        return Some(Signal::Completed {
            url: snapshot.url.clone(),
        });
    }

    None
}
