//! Startup configuration. Read once, then passed by value into components.

use std::env;
use std::time::Duration;

use crate::orchestrator::{
    TaskSettings, DEFAULT_MAX_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL, DEFAULT_UPLOAD_FIELD,
};
use crate::resolver::{ResolveOptions, DEFAULT_MAX_IMAGE_BYTES, DEFAULT_RESOLVE_TIMEOUT};

pub const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TASK_MODEL: &str = "gpt-image-1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoint {
    pub api_base: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub request_timeout: Duration,
    pub max_image_bytes: u64,
    pub allow_private_network: bool,
    pub task_type: Option<String>,
    pub upload_field: String,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    pub task_model: String,
    /// Provider used when a request names none.
    pub default_provider: String,
    pub openai: ProviderEndpoint,
    pub gemini: ProviderEndpoint,
    /// `None` leaves the `async-task` provider unregistered.
    pub task_api: Option<ProviderEndpoint>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };
        let secs = |key: &str, default: Duration| {
            value(key)
                .and_then(|raw| raw.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(default)
        };
        let api_base = |key: &str| value(key).map(|raw| raw.trim_end_matches('/').to_string());

        let task_api = api_base("IMAGEGATE_TASK_API_BASE").map(|api_base| ProviderEndpoint {
            api_base,
            api_key: value("IMAGEGATE_TASK_API_KEY"),
        });
        let default_provider = value("IMAGEGATE_DEFAULT_PROVIDER")
            .map(|raw| raw.to_ascii_lowercase())
            .unwrap_or_else(|| {
                if task_api.is_some() {
                    "async-task".to_string()
                } else {
                    "openai".to_string()
                }
            });

        Self {
            request_timeout: secs("IMAGEGATE_REQUEST_TIMEOUT_SECS", DEFAULT_RESOLVE_TIMEOUT),
            max_image_bytes: value("IMAGEGATE_MAX_IMAGE_BYTES")
                .and_then(|raw| raw.parse::<u64>().ok())
                .filter(|bytes| *bytes > 0)
                .unwrap_or(DEFAULT_MAX_IMAGE_BYTES),
            allow_private_network: value("IMAGEGATE_ALLOW_PRIVATE_NETWORK")
                .map(|raw| parse_flag(&raw))
                .unwrap_or(false),
            task_type: value("IMAGEGATE_TASK_TYPE"),
            upload_field: value("IMAGEGATE_UPLOAD_FIELD")
                .unwrap_or_else(|| DEFAULT_UPLOAD_FIELD.to_string()),
            poll_interval: secs("IMAGEGATE_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL),
            max_poll_attempts: value("IMAGEGATE_MAX_POLL_ATTEMPTS")
                .and_then(|raw| raw.parse::<u32>().ok())
                .filter(|attempts| *attempts > 0)
                .unwrap_or(DEFAULT_MAX_POLL_ATTEMPTS),
            task_model: value("IMAGEGATE_TASK_MODEL")
                .unwrap_or_else(|| DEFAULT_TASK_MODEL.to_string()),
            default_provider,
            openai: ProviderEndpoint {
                api_base: api_base("OPENAI_API_BASE")
                    .unwrap_or_else(|| DEFAULT_OPENAI_API_BASE.to_string()),
                api_key: value("OPENAI_API_KEY"),
            },
            gemini: ProviderEndpoint {
                api_base: api_base("GEMINI_API_BASE")
                    .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string()),
                api_key: value("GEMINI_API_KEY").or_else(|| value("GOOGLE_API_KEY")),
            },
            task_api,
        }
    }

    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            timeout: self.request_timeout,
            max_bytes: self.max_image_bytes,
            allow_private_network: self.allow_private_network,
        }
    }

    pub fn task_settings(&self) -> Option<TaskSettings> {
        let endpoint = self.task_api.as_ref()?;
        let mut settings = TaskSettings::new(endpoint.api_base.clone());
        settings.api_key = endpoint.api_key.clone();
        settings.task_type = self.task_type.clone();
        settings.upload_field = self.upload_field.clone();
        settings.poll_interval = self.poll_interval;
        settings.max_attempts = self.max_poll_attempts;
        settings.request_timeout = self.request_timeout;
        Some(settings)
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::GatewayConfig;

    fn config_from(pairs: &[(&str, &str)]) -> GatewayConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        GatewayConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = GatewayConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.max_image_bytes, 10 * 1024 * 1024);
        assert!(!config.allow_private_network);
        assert_eq!(config.task_type, None);
        assert_eq!(config.upload_field, "image");
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.max_poll_attempts, 60);
        assert_eq!(config.default_provider, "openai");
        assert_eq!(config.openai.api_base, "https://api.openai.com/v1");
        assert_eq!(
            config.gemini.api_base,
            "https://generativelanguage.googleapis.com/v1beta"
        );
        assert!(config.task_api.is_none());
        assert!(config.task_settings().is_none());
    }

    #[test]
    fn overrides_are_read_and_trimmed() {
        let config = config_from(&[
            ("IMAGEGATE_REQUEST_TIMEOUT_SECS", "15"),
            ("IMAGEGATE_MAX_IMAGE_BYTES", "2048"),
            ("IMAGEGATE_ALLOW_PRIVATE_NETWORK", "TRUE"),
            ("IMAGEGATE_TASK_TYPE", " image_edit "),
            ("IMAGEGATE_UPLOAD_FIELD", "image[]"),
            ("IMAGEGATE_POLL_INTERVAL_SECS", "2"),
            ("IMAGEGATE_MAX_POLL_ATTEMPTS", "10"),
            ("IMAGEGATE_TASK_API_BASE", "https://tasks.example.com/v1/"),
            ("IMAGEGATE_TASK_API_KEY", "secret"),
            ("GOOGLE_API_KEY", "google"),
        ]);

        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.max_image_bytes, 2048);
        assert!(config.allow_private_network);
        assert_eq!(config.default_provider, "async-task");
        assert_eq!(config.gemini.api_key.as_deref(), Some("google"));

        let settings = config.task_settings().expect("task api configured");
        assert_eq!(settings.api_base, "https://tasks.example.com/v1");
        assert_eq!(settings.api_key.as_deref(), Some("secret"));
        assert_eq!(settings.task_type.as_deref(), Some("image_edit"));
        assert_eq!(settings.upload_field, "image[]");
        assert_eq!(settings.poll_interval, Duration::from_secs(2));
        assert_eq!(settings.max_attempts, 10);
        assert_eq!(settings.request_timeout, Duration::from_secs(15));

        let options = config.resolve_options();
        assert_eq!(options.max_bytes, 2048);
        assert!(options.allow_private_network);
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let config = config_from(&[
            ("IMAGEGATE_REQUEST_TIMEOUT_SECS", "soon"),
            ("IMAGEGATE_MAX_IMAGE_BYTES", "0"),
            ("IMAGEGATE_MAX_POLL_ATTEMPTS", "-3"),
            ("IMAGEGATE_POLL_INTERVAL_SECS", ""),
            ("IMAGEGATE_ALLOW_PRIVATE_NETWORK", "maybe"),
        ]);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.max_image_bytes, 10 * 1024 * 1024);
        assert_eq!(config.max_poll_attempts, 60);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert!(!config.allow_private_network);
    }
}
