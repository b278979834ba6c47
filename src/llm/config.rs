use serde::Deserialize;
use std::collections::BTreeSet;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Upper bound applied to every backoff delay unless configured otherwise.
pub const DEFAULT_DELAY_CAP: Duration = Duration::from_secs(30);

/// Keywords that identify error text some backends send back as a normal reply.
pub const DEFAULT_ERROR_KEYWORDS: &str =
    "api 返回的内容为空\n请求失败\n错误类型\n错误信息\n调用失败\n处理失败";

const ENV_PREFIX: &str = "REPLYGUARD_";

/// Errors raised while loading retry settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("Invalid JSON configuration")]
    Json(#[from] serde_json::Error),
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(String),
    #[error("Invalid delay: {0}")]
    InvalidDelay(String),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// How much of the conversation is echoed into debug logs on each retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugPreview {
    /// Number of trailing turns to preview. 0 disables previews.
    pub count: usize,
    /// Characters kept per previewed turn.
    pub max_chars: usize,
}

impl Default for DebugPreview {
    fn default() -> Self {
        Self {
            count: 0,
            max_chars: 120,
        }
    }
}

/// Immutable retry policy shared by the classifier and the retry controller.
///
/// A policy is built once, wrapped in an `Arc` and handed to whoever needs
/// it. Nothing in the crate mutates it after construction.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
    delay_cap: Duration,
    error_keywords: Vec<String>,
    allowed_status_codes: BTreeSet<u16>,
    denied_status_codes: BTreeSet<u16>,
    fallback_text: String,
    always_use_system_persona: bool,
    fallback_persona: String,
    debug_preview: DebugPreview,
}

impl Default for RetryPolicy {
    /// Mirrors the plugin defaults: 3 retries, 2 second base delay and the
    /// stock error keyword list. No status codes, no fallback text.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            delay_cap: DEFAULT_DELAY_CAP,
            error_keywords: normalize_keywords(DEFAULT_ERROR_KEYWORDS.lines()),
            allowed_status_codes: BTreeSet::new(),
            denied_status_codes: BTreeSet::new(),
            fallback_text: String::new(),
            always_use_system_persona: false,
            fallback_persona: String::new(),
            debug_preview: DebugPreview::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never re-issues a request. A retryable first response
    /// goes straight to the fallback path.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_delay_cap(mut self, delay_cap: Duration) -> Self {
        self.delay_cap = delay_cap;
        self
    }

    /// Replaces the keyword list. Keywords are trimmed, lowercased and
    /// de-duplicated; blank entries are dropped. Order is preserved.
    pub fn with_error_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.error_keywords = normalize_keywords(keywords);
        self
    }

    pub fn with_allowed_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.allowed_status_codes = codes.into_iter().collect();
        self
    }

    pub fn with_denied_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.denied_status_codes = codes.into_iter().collect();
        self
    }

    pub fn with_fallback_text(mut self, text: impl Into<String>) -> Self {
        self.fallback_text = text.into();
        self
    }

    pub fn with_always_use_system_persona(mut self, enabled: bool) -> Self {
        self.always_use_system_persona = enabled;
        self
    }

    pub fn with_fallback_persona(mut self, persona: impl Into<String>) -> Self {
        self.fallback_persona = persona.into();
        self
    }

    pub fn with_debug_preview(mut self, preview: DebugPreview) -> Self {
        self.debug_preview = preview;
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn delay_cap(&self) -> Duration {
        self.delay_cap
    }

    pub fn error_keywords(&self) -> &[String] {
        &self.error_keywords
    }

    pub fn allowed_status_codes(&self) -> &BTreeSet<u16> {
        &self.allowed_status_codes
    }

    pub fn denied_status_codes(&self) -> &BTreeSet<u16> {
        &self.denied_status_codes
    }

    pub fn fallback_text(&self) -> &str {
        &self.fallback_text
    }

    pub fn always_use_system_persona(&self) -> bool {
        self.always_use_system_persona
    }

    pub fn fallback_persona(&self) -> &str {
        &self.fallback_persona
    }

    pub fn debug_preview(&self) -> DebugPreview {
        self.debug_preview
    }
}

fn normalize_keywords<I, S>(keywords: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized: Vec<String> = Vec::new();
    for keyword in keywords {
        let keyword = keyword.as_ref().trim().to_lowercase();
        if !keyword.is_empty() && !normalized.contains(&keyword) {
            normalized.push(keyword);
        }
    }
    normalized
}

/// A list of status codes as it appears in configuration: either a JSON
/// array of integers or a free-form string such as `"429, 500\n502"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum StatusCodeList {
    Codes(Vec<u16>),
    Text(String),
}

impl Default for StatusCodeList {
    fn default() -> Self {
        StatusCodeList::Codes(Vec::new())
    }
}

impl StatusCodeList {
    fn parse(&self) -> Result<BTreeSet<u16>, ConfigError> {
        let codes = match self {
            StatusCodeList::Codes(codes) => codes.clone(),
            StatusCodeList::Text(text) => text
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|token| !token.is_empty())
                .map(|token| {
                    token
                        .parse::<u16>()
                        .map_err(|_| ConfigError::InvalidStatusCode(token.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?,
        };

        codes
            .into_iter()
            .map(|code| {
                if (100..=599).contains(&code) {
                    Ok(code)
                } else {
                    Err(ConfigError::InvalidStatusCode(code.to_string()))
                }
            })
            .collect()
    }
}

/// Raw retry settings as supplied by the host's configuration surface.
///
/// Every field has a default, so partial configuration files are fine.
/// Call [`RetrySettings::into_policy`] to validate and freeze them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: usize,
    /// Base backoff delay in seconds.
    pub retry_delay: f64,
    /// Backoff ceiling in seconds.
    pub delay_cap: f64,
    /// Newline-separated keyword list.
    pub error_keywords: String,
    pub allowed_status_codes: StatusCodeList,
    pub denied_status_codes: StatusCodeList,
    pub always_use_system_persona: bool,
    pub fallback_persona: String,
    pub fallback_text: String,
    pub debug_preview_count: usize,
    pub debug_preview_max_chars: usize,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let preview = DebugPreview::default();
        Self {
            max_attempts: 3,
            retry_delay: 2.0,
            delay_cap: DEFAULT_DELAY_CAP.as_secs_f64(),
            error_keywords: DEFAULT_ERROR_KEYWORDS.to_string(),
            allowed_status_codes: StatusCodeList::default(),
            denied_status_codes: StatusCodeList::default(),
            always_use_system_persona: false,
            fallback_persona: String::new(),
            fallback_text: String::new(),
            debug_preview_count: preview.count,
            debug_preview_max_chars: preview.max_chars,
        }
    }
}

impl RetrySettings {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Reads `REPLYGUARD_*` environment variables on top of the defaults.
    ///
    /// Delay variables take plain seconds (`2.5`) or humantime strings
    /// (`1500ms`, `2s`). Unset variables keep their default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Some(value) = env_var("MAX_ATTEMPTS") {
            settings.max_attempts = parse_number("MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = env_var("RETRY_DELAY") {
            settings.retry_delay = parse_seconds(&value)?;
        }
        if let Some(value) = env_var("DELAY_CAP") {
            settings.delay_cap = parse_seconds(&value)?;
        }
        if let Some(value) = env_var("ERROR_KEYWORDS") {
            settings.error_keywords = value;
        }
        if let Some(value) = env_var("ALLOWED_STATUS_CODES") {
            settings.allowed_status_codes = StatusCodeList::Text(value);
        }
        if let Some(value) = env_var("DENIED_STATUS_CODES") {
            settings.denied_status_codes = StatusCodeList::Text(value);
        }
        if let Some(value) = env_var("ALWAYS_USE_SYSTEM_PERSONA") {
            settings.always_use_system_persona = parse_bool("ALWAYS_USE_SYSTEM_PERSONA", &value)?;
        }
        if let Some(value) = env_var("FALLBACK_PERSONA") {
            settings.fallback_persona = value;
        }
        if let Some(value) = env_var("FALLBACK_TEXT") {
            settings.fallback_text = value;
        }
        if let Some(value) = env_var("DEBUG_PREVIEW_COUNT") {
            settings.debug_preview_count = parse_number("DEBUG_PREVIEW_COUNT", &value)?;
        }
        if let Some(value) = env_var("DEBUG_PREVIEW_MAX_CHARS") {
            settings.debug_preview_max_chars = parse_number("DEBUG_PREVIEW_MAX_CHARS", &value)?;
        }

        Ok(settings)
    }

    /// Validates the settings and produces the policy used at runtime.
    pub fn into_policy(self) -> Result<RetryPolicy, ConfigError> {
        let base_delay = seconds_to_duration(self.retry_delay)?;
        let delay_cap = seconds_to_duration(self.delay_cap)?;

        let policy = RetryPolicy::new()
            .with_max_attempts(self.max_attempts)
            .with_base_delay(base_delay)
            .with_delay_cap(delay_cap)
            .with_error_keywords(self.error_keywords.lines())
            .with_allowed_status_codes(self.allowed_status_codes.parse()?)
            .with_denied_status_codes(self.denied_status_codes.parse()?)
            .with_always_use_system_persona(self.always_use_system_persona)
            .with_fallback_persona(self.fallback_persona)
            .with_fallback_text(self.fallback_text)
            .with_debug_preview(DebugPreview {
                count: self.debug_preview_count,
                max_chars: self.debug_preview_max_chars,
            });

        info!(
            max_attempts = policy.max_attempts(),
            base_delay = %humantime::format_duration(policy.base_delay()),
            delay_cap = %humantime::format_duration(policy.delay_cap()),
            keywords = policy.error_keywords().len(),
            allowed_status_codes = ?policy.allowed_status_codes(),
            denied_status_codes = ?policy.denied_status_codes(),
            "Loaded retry policy"
        );
        if policy.error_keywords().is_empty() {
            warn!("No error keywords configured, only empty replies and status codes will trigger retries");
        }

        Ok(policy)
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(format!("{}{}", ENV_PREFIX, key)).ok()
}

fn parse_number(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_seconds(value: &str) -> Result<f64, ConfigError> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<f64>() {
        return Ok(seconds);
    }
    humantime::parse_duration(value)
        .map(|duration| duration.as_secs_f64())
        .map_err(|_| ConfigError::InvalidDelay(value.to_string()))
}

fn seconds_to_duration(seconds: f64) -> Result<Duration, ConfigError> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(ConfigError::InvalidDelay(seconds.to_string()));
    }
    Duration::try_from_secs_f64(seconds).map_err(|_| ConfigError::InvalidDelay(seconds.to_string()))
}
