use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::relay::message::RelayMessage;

/// Intermediate page of a multi-step sign-in flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStep {
    Identifier,
    Password,
    Verification,
    Consent,
}

/// What the shell currently knows about a secondary window's page.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageSnapshot {
    pub url: String,
    pub title: Option<String>,
    pub step: Option<AuthStep>,
    pub message: Option<RelayMessage>,
    pub success_marker: bool,
}

impl PageSnapshot {
    /// Snapshot carrying only a URL, as produced by navigation events.
    pub fn navigated(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

/// Source of page-state changes for one secondary window.
///
/// `poll` returns the next change, or `None` when nothing changed since the
/// last call. Implementations may be fed by window events or may sample the
/// page on a timer; consumers cannot tell the difference.
pub trait PageObserver: Send {
    fn poll(&mut self) -> Option<PageSnapshot>;
}

/// Take every pending change from an observer.
pub fn drain(observer: &mut dyn PageObserver) -> Vec<PageSnapshot> {
    let mut out = Vec::new();
    while let Some(snapshot) = observer.poll() {
        out.push(snapshot);
    }
    out
}

/// Event-fed observer. Window callbacks push, the relay tick polls.
#[derive(Debug, Default)]
pub struct SnapshotQueue {
    pending: VecDeque<PageSnapshot>,
    last: Option<PageSnapshot>,
}

impl SnapshotQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a change. Repeats of the most recent snapshot are dropped, so a
    /// page-load event following the matching navigation event is not
    /// counted twice.
    pub fn push(&mut self, snapshot: PageSnapshot) {
        if self.last.as_ref() == Some(&snapshot) {
            return;
        }
        self.last = Some(snapshot.clone());
        self.pending.push_back(snapshot);
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.last = None;
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl PageObserver for SnapshotQueue {
    fn poll(&mut self) -> Option<PageSnapshot> {
        self.pending.pop_front()
    }
}

/// Timer-driven observer sampling a window's current URL.
///
/// The reader is called once per `poll`; a snapshot is produced only when
/// the URL differs from the previous sample.
pub struct UrlPoller<F>
where
    F: FnMut() -> Option<String> + Send,
{
    read_url: F,
    last_url: Option<String>,
}

impl<F> UrlPoller<F>
where
    F: FnMut() -> Option<String> + Send,
{
    pub fn new(read_url: F) -> Self {
        Self {
            read_url,
            last_url: None,
        }
    }
}

impl<F> PageObserver for UrlPoller<F>
where
    F: FnMut() -> Option<String> + Send,
{
    fn poll(&mut self) -> Option<PageSnapshot> {
        let url = (self.read_url)()?;
        if self.last_url.as_deref() == Some(url.as_str()) {
            return None;
        }
        self.last_url = Some(url.clone());
        Some(PageSnapshot::navigated(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_drops_consecutive_duplicates() {
        let mut queue = SnapshotQueue::new();
        queue.push(PageSnapshot::navigated("https://a.example/"));
        queue.push(PageSnapshot::navigated("https://a.example/"));
        queue.push(PageSnapshot::navigated("https://b.example/"));
        queue.push(PageSnapshot::navigated("https://a.example/"));

        let urls: Vec<String> = drain(&mut queue).into_iter().map(|s| s.url).collect();
        assert_eq!(
            urls,
            vec![
                "https://a.example/".to_string(),
                "https://b.example/".to_string(),
                "https://a.example/".to_string(),
            ]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn queue_keeps_richer_snapshot_for_same_url() {
        let mut queue = SnapshotQueue::new();
        queue.push(PageSnapshot::navigated("https://a.example/"));
        queue.push(PageSnapshot {
            step: Some(AuthStep::Password),
            ..PageSnapshot::navigated("https://a.example/")
        });
        assert_eq!(drain(&mut queue).len(), 2);
    }

    #[test]
    fn url_poller_reports_only_changes() {
        let mut samples = vec![
            None,
            Some("https://b.example/".to_string()),
            Some("https://a.example/".to_string()),
            Some("https://a.example/".to_string()),
        ];
        let mut poller = UrlPoller::new(move || samples.pop().flatten());

        assert_eq!(poller.poll().unwrap().url, "https://a.example/");
        assert!(poller.poll().is_none());
        assert_eq!(poller.poll().unwrap().url, "https://b.example/");
        assert!(poller.poll().is_none());
    }

    #[test]
    fn auth_step_parses_from_probe_strings() {
        let step: AuthStep = serde_json::from_str("\"verification\"").unwrap();
        assert_eq!(step, AuthStep::Verification);
    }
}
