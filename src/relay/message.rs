use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayMessageKind {
    AuthComplete,
    AuthCodeReceived,
    AuthError,
    AuthTimeout,
}

impl RelayMessageKind {
    fn from_type(value: &str) -> Option<Self> {
        match value {
            "auth_complete" => Some(Self::AuthComplete),
            "auth_code_received" => Some(Self::AuthCodeReceived),
            "auth_error" => Some(Self::AuthError),
            "auth_timeout" => Some(Self::AuthTimeout),
            _ => None,
        }
    }

    /// Kinds that end an auth session successfully.
    pub fn is_success(self) -> bool {
        matches!(self, Self::AuthComplete | Self::AuthCodeReceived)
    }
}

/// Message relayed from the secondary window context to the primary window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayMessage {
    #[serde(rename = "type")]
    pub kind: RelayMessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl RelayMessage {
    pub fn new(kind: RelayMessageKind) -> Self {
        Self {
            kind,
            code: None,
            url: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Lenient parse of a page-posted payload.
    ///
    /// Unrecognized or missing `type` values yield `None`. Extra fields are
    /// ignored and non-string `code`/`url` values are dropped.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .and_then(RelayMessageKind::from_type)?;
        let text = |key: &str| {
            object
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Some(Self {
            kind,
            code: text("code"),
            url: text("url"),
        })
    }
}
