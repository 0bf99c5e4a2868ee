//! Script injected into secondary windows to report page state back to the
//! shell through the `auth_relay_report` command.

use serde::Deserialize;
use serde_json::Value;

use crate::observer::{AuthStep, PageSnapshot};
use crate::relay::message::RelayMessage;

pub const REPORT_COMMAND: &str = "auth_relay_report";

/// Page state as posted by the probe script.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProbeReport {
    pub url: String,
    pub title: Option<String>,
    pub step: Option<String>,
    pub success_marker: bool,
    pub message: Option<Value>,
}

impl ProbeReport {
    /// Unknown step names and unrecognized messages are dropped.
    pub fn into_snapshot(self) -> PageSnapshot {
        let step = self
            .step
            .as_deref()
            .and_then(|raw| serde_json::from_value::<AuthStep>(Value::String(raw.to_string())).ok());
        let message = self.message.as_ref().and_then(RelayMessage::from_value);
        PageSnapshot {
            url: self.url,
            title: self.title.filter(|t| !t.trim().is_empty()),
            step,
            message,
            success_marker: self.success_marker,
        }
    }
}

/// Build the probe script. `step_keywords` are matched against the page text
/// to spot verification challenges.
pub fn probe_script(step_keywords: &[String], poll_ms: u64) -> String {
    let keywords = serde_json::to_string(step_keywords).unwrap_or_else(|_| "[]".into());
    let command = serde_json::to_string(REPORT_COMMAND).unwrap_or_else(|_| "\"\"".into());

    format!(
        r#"(function(){{
if (window.__chatShellProbe) return;
window.__chatShellProbe = true;
var KEYWORDS = {keywords};
var COMMAND = {command};
var lastKey = '';
function visible(sel) {{
  var el = document.querySelector(sel);
  return !!(el && el.offsetParent !== null);
}}
function detectStep() {{
  try {{
    var href = window.location.href;
    if (visible('#identifierId') || visible('input[type="email"]')) return 'identifier';
    if (visible('input[type="password"]')) return 'password';
    var text = (document.body && document.body.textContent) || '';
    if (document.querySelector('[id*="challenge"], [data-challengetype]') ||
        KEYWORDS.some(function(k) {{ return k && text.indexOf(k) !== -1; }})) return 'verification';
    if (href.indexOf('consent') !== -1 || href.indexOf('oauth/approval') !== -1 ||
        document.querySelector('[id*="consent"]')) return 'consent';
  }} catch (_e) {{}}
  return null;
}}
function successMarker() {{
  try {{
    return !!document.querySelector('.signin-success, .auth-success, [data-auth-complete="true"]');
  }} catch (_e) {{ return false; }}
}}
function send(report) {{
  try {{
    var ipc = window.__TAURI_INTERNALS__;
    if (ipc && ipc.invoke) ipc.invoke(COMMAND, {{ report: report }});
  }} catch (_e) {{}}
}}
function snapshot(message) {{
  return {{
    url: window.location.href,
    title: document.title || null,
    step: detectStep(),
    successMarker: successMarker(),
    message: message || null
  }};
}}
function check() {{
  var s = snapshot(null);
  var key = s.url + '|' + s.step + '|' + s.successMarker;
  if (key === lastKey) return;
  lastKey = key;
  send(s);
}}
window.addEventListener('message', function(event) {{
  var data = event && event.data;
  if (data && typeof data === 'object' && typeof data.type === 'string') send(snapshot(data));
}});
if (document.readyState === 'complete') check();
else window.addEventListener('load', check);
setInterval(check, {poll_ms});
}})();"#
    )
}
