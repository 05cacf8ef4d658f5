use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

const DEFAULT_MONITOR_MS: u64 = 10_000;
const DEFAULT_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_MAX_BODY_BYTES: u64 = 1024 * 1024;
const DEFAULT_INLINE_BODY_BYTES: u64 = 16 * 1024;
const DEFAULT_MAX_CONCURRENT_CAPTURES: usize = 6;

/// Invalid option combination, raised before the run directory is created.
#[derive(Error, Debug)]
pub enum OptionsError {
    #[error("target url is empty")]
    EmptyUrl,

    #[error("monitorMs ({monitor_ms}) must be below timeoutMs ({timeout_ms})")]
    WindowExceedsDeadline { monitor_ms: u64, timeout_ms: u64 },

    #[error("inlineBodyBytes ({inline_body_bytes}) must not exceed maxBodyBytes ({max_body_bytes})")]
    InlineAboveMax {
        inline_body_bytes: u64,
        max_body_bytes: u64,
    },

    #[error("maxConcurrentCaptures must be at least 1")]
    ZeroConcurrency,

    #[error("invalid includeRegex: {0}")]
    BadIncludeRegex(regex::Error),

    #[error("invalid excludeRegex: {0}")]
    BadExcludeRegex(regex::Error),
}

/// Which consent handlers the orchestrator drives on an interstitial page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentMode {
    /// Try every built-in handler, first successful dismissal wins.
    Auto,
    /// Skip the interstitial stage entirely.
    Off,
    Yahoo,
    Generic,
}

/// What the consent handler clicks once it finds the dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentAction {
    Reject,
    Accept,
}

/// Effective configuration of one capture run.
///
/// A frozen copy is embedded in `run.json` so a capture directory records the
/// options that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureOptions {
    /// Target page URL.
    pub url: String,

    /// Capture-window duration in milliseconds.
    pub monitor_ms: u64,

    /// Global hard deadline and per-stage ceiling in milliseconds.
    pub timeout_ms: u64,

    /// Root directory under which run directories are created.
    pub out_dir: PathBuf,

    /// Keep only URLs matching this pattern.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_regex: Option<String>,

    /// Drop URLs matching this pattern.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_regex: Option<String>,

    /// Absolute body cap in bytes.
    pub max_body_bytes: u64,

    /// Bodies at or below this size are inlined into the journal line;
    /// larger ones are externalized under `bodies/`.
    pub inline_body_bytes: u64,

    /// Hard cap on persisted records; 0 means unlimited.
    pub max_captures: u64,

    /// Worker-pool capacity for response processing.
    pub max_concurrent_captures: usize,

    /// Disable the resource-type gate and judge responses by content alone.
    pub capture_all_json: bool,

    /// Disarm the global deadline and capture until the response stream closes.
    pub watch: bool,

    pub save_har: bool,
    pub trace: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    pub consent_mode: ConsentMode,
    pub consent_action: ConsentAction,

    /// Storage-state blob to seed the browser context with at launch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_state: Option<PathBuf>,

    /// Where to persist the context's storage state at close.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_storage_state: Option<PathBuf>,

    /// Skip the aggregation stage (no `summary.json` / `endpoints.jsonl`).
    pub disable_summary: bool,

    /// Proxy URLs rotated round-robin across runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub proxies: Vec<String>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            monitor_ms: DEFAULT_MONITOR_MS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            out_dir: PathBuf::from("captures"),
            include_regex: None,
            exclude_regex: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            inline_body_bytes: DEFAULT_INLINE_BODY_BYTES,
            max_captures: 0,
            max_concurrent_captures: DEFAULT_MAX_CONCURRENT_CAPTURES,
            capture_all_json: false,
            watch: false,
            save_har: false,
            trace: false,
            user_agent: None,
            consent_mode: ConsentMode::Auto,
            consent_action: ConsentAction::Reject,
            storage_state: None,
            save_storage_state: None,
            disable_summary: false,
            proxies: Vec::new(),
        }
    }
}

impl CaptureOptions {
    /// Options for capturing `url` with everything else at defaults.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Validate option combinations. Called before anything touches disk.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.url.trim().is_empty() {
            return Err(OptionsError::EmptyUrl);
        }

        // In watch mode the deadline is disarmed, so the window may be
        // arbitrarily long relative to timeoutMs.
        if !self.watch && self.monitor_ms >= self.timeout_ms {
            return Err(OptionsError::WindowExceedsDeadline {
                monitor_ms: self.monitor_ms,
                timeout_ms: self.timeout_ms,
            });
        }

        if self.inline_body_bytes > self.max_body_bytes {
            return Err(OptionsError::InlineAboveMax {
                inline_body_bytes: self.inline_body_bytes,
                max_body_bytes: self.max_body_bytes,
            });
        }

        if self.max_concurrent_captures < 1 {
            return Err(OptionsError::ZeroConcurrency);
        }

        if let Some(pattern) = &self.include_regex {
            Regex::new(pattern).map_err(OptionsError::BadIncludeRegex)?;
        }
        if let Some(pattern) = &self.exclude_regex {
            Regex::new(pattern).map_err(OptionsError::BadExcludeRegex)?;
        }

        Ok(())
    }
}
