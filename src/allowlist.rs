use log::warn;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

/// How an allowlist rule is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// Hostname ends with the value on a label boundary.
    Suffix,
    /// Value appears anywhere in the full URL.
    Substring,
    /// Regular expression tested against the hostname.
    Pattern,
    /// `host/path` prefix: hostname matches like `Suffix`, path starts with
    /// the rest.
    Path,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowRule {
    pub kind: RuleKind,
    pub value: String,
}

impl AllowRule {
    pub fn suffix(value: impl Into<String>) -> Self {
        Self {
            kind: RuleKind::Suffix,
            value: value.into(),
        }
    }

    pub fn substring(value: impl Into<String>) -> Self {
        Self {
            kind: RuleKind::Substring,
            value: value.into(),
        }
    }

    pub fn pattern(value: impl Into<String>) -> Self {
        Self {
            kind: RuleKind::Pattern,
            value: value.into(),
        }
    }

    pub fn path(value: impl Into<String>) -> Self {
        Self {
            kind: RuleKind::Path,
            value: value.into(),
        }
    }
}

/// Returns true when `host` is `domain` or one of its subdomains.
///
/// A leading `*.` or `.` on `domain` is ignored, so `*.example.com` and
/// `example.com` behave the same.
pub fn host_within(host: &str, domain: &str) -> bool {
    let domain = domain
        .trim()
        .trim_start_matches("*.")
        .trim_start_matches('.')
        .trim_end_matches('.');
    if domain.is_empty() {
        return false;
    }
    let host = host.trim_end_matches('.');
    if host.eq_ignore_ascii_case(domain) {
        return true;
    }
    if host.len() <= domain.len() {
        return false;
    }
    let boundary = host.len() - domain.len() - 1;
    let bytes = host.as_bytes();
    bytes[boundary] == b'.' && bytes[boundary + 1..].eq_ignore_ascii_case(domain.as_bytes())
}

enum CompiledRule {
    Suffix(String),
    Substring(String),
    Pattern(Regex),
    Path { domain: String, prefix: String },
}

impl CompiledRule {
    fn path(value: &str) -> Self {
        let (domain, prefix) = match value.find('/') {
            Some(index) => value.split_at(index),
            None => (value, "/"),
        };
        CompiledRule::Path {
            domain: domain.to_ascii_lowercase(),
            prefix: prefix.to_string(),
        }
    }

    fn matches(&self, host: &str, url: &Url) -> bool {
        match self {
            CompiledRule::Suffix(domain) => host_within(host, domain),
            CompiledRule::Substring(literal) => url.as_str().contains(literal.as_str()),
            CompiledRule::Pattern(regex) => regex.is_match(host),
            CompiledRule::Path { domain, prefix } => {
                host_within(host, domain) && url.path().starts_with(prefix.as_str())
            }
        }
    }
}

/// Ordered set of rules; the first matching rule wins.
pub struct Allowlist {
    rules: Vec<AllowRule>,
    compiled: Vec<CompiledRule>,
}

impl Allowlist {
    /// Compiles `rules` in order. Empty values and invalid patterns are
    /// skipped with a warning rather than failing startup.
    pub fn new(rules: Vec<AllowRule>) -> Self {
        let mut kept = Vec::with_capacity(rules.len());
        let mut compiled = Vec::with_capacity(rules.len());

        for rule in rules {
            let value = rule.value.trim();
            if value.is_empty() {
                warn!("[gate] ignoring empty {:?} rule", rule.kind);
                continue;
            }
            let entry = match rule.kind {
                RuleKind::Suffix => CompiledRule::Suffix(value.to_ascii_lowercase()),
                RuleKind::Substring => CompiledRule::Substring(value.to_string()),
                RuleKind::Path => CompiledRule::path(value),
                RuleKind::Pattern => match Regex::new(value) {
                    Ok(regex) => CompiledRule::Pattern(regex),
                    Err(err) => {
                        warn!("[gate] ignoring invalid pattern rule {value:?}: {err}");
                        continue;
                    }
                },
            };
            compiled.push(entry);
            kept.push(rule);
        }

        Self {
            rules: kept,
            compiled,
        }
    }

    pub fn rules(&self) -> &[AllowRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First rule matching the URL's hostname, path or full text.
    pub fn first_match(&self, url: &Url) -> Option<&AllowRule> {
        let host = url.host_str().filter(|h| !h.is_empty())?;
        let host = host.to_ascii_lowercase();
        self.compiled
            .iter()
            .position(|rule| rule.matches(&host, url))
            .map(|index| &self.rules[index])
    }

    pub fn matches(&self, url: &Url) -> bool {
        self.first_match(url).is_some()
    }
}

impl std::fmt::Debug for Allowlist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.rules.iter()).finish()
    }
}
