use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use url::Url;

use crate::allowlist::AllowRule;
use crate::relay::detect::DetectionRules;
use crate::relay::{RelayConfig, DEFAULT_AUTH_TIMEOUT, DEFAULT_SETTLE};
use crate::variant::{default_identity_providers, AppVariant};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

const DEFAULT_STEP_KEYWORDS: &[&str] = &["verification", "verificación", "2-Step Verification"];

/// Per-variant overrides from the settings file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub base_url: Option<String>,
    pub extra_allowlist: Vec<AllowRule>,
    pub extra_identity_providers: Vec<AllowRule>,
    pub hide_on_close: Option<bool>,
}

/// Contents of `settings.json`. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub default_app: Option<String>,
    pub log_level: Option<String>,
    pub auth_timeout_secs: Option<u64>,
    pub settle_millis: Option<u64>,
    pub poll_interval_millis: Option<u64>,
    pub step_keywords: Option<Vec<String>>,
    pub completion_markers: Option<Vec<String>>,
    pub apps: HashMap<String, AppSettings>,
}

/// Values taken from the process environment and command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub app: Option<String>,
    pub base_url: Option<String>,
}

impl Overrides {
    /// `--app <id>` / `--app=<id>` wins over `CHAT_SHELL_APP`.
    pub fn from_env_and_args(args: impl IntoIterator<Item = String>) -> Self {
        let app = parse_app_arg(args).or_else(|| non_empty_var("CHAT_SHELL_APP"));
        Self {
            app,
            base_url: non_empty_var("CHAT_SHELL_BASE_URL"),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn parse_app_arg(args: impl IntoIterator<Item = String>) -> Option<String> {
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if let Some(value) = arg.strip_prefix("--app=") {
            return Some(value.to_string());
        }
        if arg == "--app" {
            return args.next();
        }
    }
    None
}

/// `--app` value of a second launch when it names a different variant than
/// the running one.
pub fn conflicting_app_arg(
    running: AppVariant,
    args: impl IntoIterator<Item = String>,
) -> Option<String> {
    parse_app_arg(args).filter(|requested| AppVariant::from_id(requested) != Some(running))
}

/// Fully resolved configuration of one shell process.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub variant: AppVariant,
    pub title: String,
    pub base_url: Url,
    pub allowlist: Vec<AllowRule>,
    pub identity_providers: Vec<AllowRule>,
    pub hide_on_close: bool,
    pub relay: RelayConfig,
    pub poll_interval: Duration,
    pub step_keywords: Vec<String>,
    pub log_level: log::LevelFilter,
}

impl ShellConfig {
    pub fn resolve(settings: &Settings, overrides: &Overrides) -> Result<Self> {
        let variant = match overrides.app.as_deref().or(settings.default_app.as_deref()) {
            Some(raw) => AppVariant::from_id(raw).ok_or_else(|| {
                let known: Vec<&str> = AppVariant::ALL.iter().map(|v| v.id()).collect();
                anyhow!("Unknown app '{raw}' (expected one of: {})", known.join(", "))
            })?,
            None => AppVariant::Chatgpt,
        };

        let profile = variant.profile();
        let app = settings.apps.get(variant.id()).cloned().unwrap_or_default();

        let base_url = match overrides.base_url.as_deref().or(app.base_url.as_deref()) {
            Some(raw) => normalize_base_url(raw)
                .ok_or_else(|| anyhow!("Invalid base URL '{raw}': expected http(s) URL"))?,
            None => Url::parse(profile.base_url)
                .with_context(|| format!("Built-in base URL for {variant}"))?,
        };

        let mut identity_providers = default_identity_providers();
        identity_providers.extend(app.extra_identity_providers);

        // Providers are reachable in place too, for redirect-based sign-in.
        let mut allowlist = profile.allowlist;
        allowlist.extend(app.extra_allowlist);
        allowlist.extend(identity_providers.iter().cloned());

        let mut rules = DetectionRules::default();
        if let Some(markers) = settings.completion_markers.clone() {
            rules.completion_markers = markers;
        }

        let relay = RelayConfig {
            timeout: settings
                .auth_timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_AUTH_TIMEOUT),
            settle: settings
                .settle_millis
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_SETTLE),
            rules,
        };

        let poll_interval = settings
            .poll_interval_millis
            .filter(|ms| *ms >= 50)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL);

        let step_keywords = settings
            .step_keywords
            .clone()
            .unwrap_or_else(|| DEFAULT_STEP_KEYWORDS.iter().map(|s| s.to_string()).collect());

        let log_level = settings
            .log_level
            .as_deref()
            .and_then(|raw| raw.trim().parse::<log::LevelFilter>().ok())
            .unwrap_or(log::LevelFilter::Info);

        Ok(Self {
            variant,
            title: profile.title.to_string(),
            base_url,
            allowlist,
            identity_providers,
            hide_on_close: app.hide_on_close.unwrap_or(profile.hide_on_close),
            relay,
            poll_interval,
            step_keywords,
            log_level,
        })
    }
}

/// Accept only absolute http(s) URLs with a host.
pub fn normalize_base_url(raw: &str) -> Option<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parsed = Url::parse(trimmed).ok()?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return None;
    }
    parsed.host_str().filter(|h| !h.is_empty())?;
    Some(parsed)
}

pub fn settings_file_path() -> PathBuf {
    if let Ok(dir) = env::var("CHAT_SHELL_DATA_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir.trim()).join("settings.json");
        }
    }
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .unwrap_or_default()
        .join("chat-shell")
        .join("settings.json")
}

/// Read settings; a missing or blank file yields defaults.
///
/// Plain JSON is tried first, then JSON5 so hand-edited files may carry
/// comments and trailing commas.
pub fn read_settings_from_disk(path: &Path) -> Result<Settings> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Settings::default()),
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to read {}", path.display()));
        }
    };
    if raw.trim().is_empty() {
        return Ok(Settings::default());
    }

    serde_json::from_str::<Settings>(&raw)
        .or_else(|_| json5::from_str::<Settings>(&raw))
        .map_err(|err| anyhow!("Failed to parse {}: {}", path.display(), err))
}
