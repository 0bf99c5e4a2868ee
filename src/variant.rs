use serde::{Deserialize, Serialize};

use crate::allowlist::AllowRule;

/// Chat web applications the shell knows how to wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppVariant {
    Chatgpt,
    Claude,
    Deepseek,
    Grok,
    Qwen,
}

impl AppVariant {
    pub const ALL: [AppVariant; 5] = [
        AppVariant::Chatgpt,
        AppVariant::Claude,
        AppVariant::Deepseek,
        AppVariant::Grok,
        AppVariant::Qwen,
    ];

    pub fn id(self) -> &'static str {
        match self {
            AppVariant::Chatgpt => "chatgpt",
            AppVariant::Claude => "claude",
            AppVariant::Deepseek => "deepseek",
            AppVariant::Grok => "grok",
            AppVariant::Qwen => "qwen",
        }
    }

    /// Case-insensitive lookup by id.
    pub fn from_id(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|variant| variant.id().eq_ignore_ascii_case(raw))
    }

    pub fn profile(self) -> VariantProfile {
        match self {
            AppVariant::Chatgpt => VariantProfile {
                variant: self,
                title: "ChatGPT",
                base_url: "https://chat.openai.com",
                allowlist: vec![AllowRule::suffix("openai.com"), AllowRule::suffix("chatgpt.com")],
                hide_on_close: false,
            },
            AppVariant::Claude => VariantProfile {
                variant: self,
                title: "Claude",
                base_url: "https://claude.ai/new",
                allowlist: vec![AllowRule::suffix("claude.ai"), AllowRule::suffix("anthropic.com")],
                hide_on_close: false,
            },
            AppVariant::Deepseek => VariantProfile {
                variant: self,
                title: "DeepSeek",
                base_url: "https://chat.deepseek.com/",
                allowlist: vec![AllowRule::suffix("deepseek.com")],
                hide_on_close: false,
            },
            AppVariant::Grok => VariantProfile {
                variant: self,
                title: "Grok",
                base_url: "https://grok.com/",
                allowlist: vec![AllowRule::suffix("grok.com"), AllowRule::suffix("x.ai")],
                hide_on_close: true,
            },
            AppVariant::Qwen => VariantProfile {
                variant: self,
                title: "Qwen",
                base_url: "https://chat.qwen.ai/",
                allowlist: vec![AllowRule::suffix("qwen.ai")],
                hide_on_close: false,
            },
        }
    }
}

impl std::fmt::Display for AppVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Built-in defaults for one variant, before user configuration is applied.
#[derive(Debug, Clone)]
pub struct VariantProfile {
    pub variant: AppVariant,
    pub title: &'static str,
    pub base_url: &'static str,
    pub allowlist: Vec<AllowRule>,
    /// Closing the main window hides it instead of quitting.
    pub hide_on_close: bool,
}

/// Sign-in providers shared by every variant.
pub fn default_identity_providers() -> Vec<AllowRule> {
    vec![
        AllowRule::suffix("accounts.google.com"),
        AllowRule::suffix("login.live.com"),
        AllowRule::suffix("login.microsoftonline.com"),
        AllowRule::suffix("appleid.apple.com"),
        AllowRule::path("github.com/login"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip() {
        for variant in AppVariant::ALL {
            assert_eq!(AppVariant::from_id(variant.id()), Some(variant));
        }
        assert_eq!(AppVariant::from_id(" Claude "), Some(AppVariant::Claude));
        assert_eq!(AppVariant::from_id("gemini"), None);
    }

    #[test]
    fn every_profile_has_a_parseable_https_base_url() {
        for variant in AppVariant::ALL {
            let profile = variant.profile();
            let url = url::Url::parse(profile.base_url).unwrap();
            assert_eq!(url.scheme(), "https", "{variant}");
            assert!(!profile.allowlist.is_empty(), "{variant}");
        }
    }

    #[test]
    fn only_grok_hides_on_close() {
        let hiding: Vec<_> = AppVariant::ALL
            .into_iter()
            .filter(|v| v.profile().hide_on_close)
            .collect();
        assert_eq!(hiding, vec![AppVariant::Grok]);
    }
}
