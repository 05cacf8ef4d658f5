//! Abstract surface of the browser automation engine.
//!
//! The capture pipeline never talks to a concrete engine; it consumes these
//! traits. Engine errors cross the boundary as plain strings and are passed
//! through [`endpoint_sanitize::redact_error`] before they reach any log or
//! persisted artifact.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Engine-boundary result; the error is an opaque engine message.
pub type BrowserResult<T> = std::result::Result<T, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    DomContentLoaded,
    NetworkIdle,
}

/// Everything the engine needs to open the browser context for one run.
#[derive(Debug, Clone, Default)]
pub struct LaunchConfig {
    pub user_agent: Option<String>,
    pub proxy: Option<String>,
    /// Cookie / local-storage blob to seed the context with.
    pub storage_state: Option<PathBuf>,
    /// When set, the engine records a HAR archive at this path.
    pub har_path: Option<PathBuf>,
    /// When set, the engine records a trace archive at this path.
    pub trace_path: Option<PathBuf>,
}

/// Deferred body fetch for one response. Reading may fail for opaque
/// responses or once the owning context has been torn down.
#[async_trait]
pub trait ResponseBody: Send + Sync {
    async fn read(&self) -> BrowserResult<Vec<u8>>;
}

/// One response observation delivered by the engine's response hook.
#[derive(Clone)]
pub struct ResponseEvent {
    pub url: String,
    pub method: String,
    pub status: u16,
    pub resource_type: String,
    pub request_headers: HashMap<String, String>,
    pub response_headers: HashMap<String, String>,
    pub body: Arc<dyn ResponseBody>,
}

impl ResponseEvent {
    /// The `content-type` response header, looked up case-insensitively.
    pub fn content_type(&self) -> String {
        self.response_headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.clone())
            .unwrap_or_default()
    }

    /// The declared `content-length`, when present and parseable.
    pub fn content_length(&self) -> Option<u64> {
        self.response_headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse().ok())
    }
}

impl fmt::Debug for ResponseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseEvent")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("status", &self.status)
            .field("resource_type", &self.resource_type)
            .finish_non_exhaustive()
    }
}

/// One frame of the page, as much of it as consent handlers need.
#[async_trait]
pub trait BrowserFrame: Send + Sync {
    fn url(&self) -> String;
    async fn is_visible(&self, selector: &str) -> bool;
    async fn click(&self, selector: &str) -> bool;
}

/// A launched browser context with a single page under observation.
///
/// The engine-side response hook must enqueue into the channel handed out by
/// [`take_responses`](Self::take_responses) and return immediately; it must
/// never await the pipeline, or the engine's event loop ends up serialized
/// on capture work.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> BrowserResult<()>;

    async fn wait_for_load_state(&mut self, state: LoadState, timeout: Duration)
        -> BrowserResult<()>;

    /// Resolve once the page URL satisfies the predicate.
    async fn wait_for_url(
        &mut self,
        predicate: &(dyn Fn(&str) -> bool + Send + Sync),
        timeout: Duration,
    ) -> BrowserResult<()>;

    /// Hand over the response stream. Yields `None` if already taken.
    fn take_responses(&mut self) -> Option<mpsc::UnboundedReceiver<ResponseEvent>>;

    async fn frames(&self) -> Vec<Arc<dyn BrowserFrame>>;

    async fn save_storage_state(&mut self, path: &Path) -> BrowserResult<()>;

    async fn close(&mut self) -> BrowserResult<()>;
}

/// Factory for [`BrowserSession`]s; the LAUNCH stage of a run.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, config: &LaunchConfig) -> BrowserResult<Box<dyn BrowserSession>>;
}

/// User-provided page interaction, invoked once between the idle wait and
/// the capture window.
#[async_trait]
pub trait FlowScript: Send + Sync {
    async fn run(&self, session: &mut dyn BrowserSession) -> BrowserResult<()>;
}

/// Whether an engine error means the context is gone rather than the
/// individual operation having failed.
pub fn is_closed_session_error(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    lowered.contains("closed") || lowered.contains("destroyed")
}

// The one piece of process-wide state in the pipeline: back-to-back runs in
// one process advance through the proxy list instead of re-using its head.
static PROXY_ROTATION: AtomicUsize = AtomicUsize::new(0);

/// Round-robin selection over the configured proxy list.
pub fn next_proxy(proxies: &[String]) -> Option<String> {
    if proxies.is_empty() {
        return None;
    }
    let index = PROXY_ROTATION.fetch_add(1, Ordering::Relaxed) % proxies.len();
    proxies.get(index).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_with_headers(headers: &[(&str, &str)]) -> ResponseEvent {
        struct NoBody;
        #[async_trait]
        impl ResponseBody for NoBody {
            async fn read(&self) -> BrowserResult<Vec<u8>> {
                Err("no body".into())
            }
        }

        ResponseEvent {
            url: "https://example.com".into(),
            method: "GET".into(),
            status: 200,
            resource_type: "xhr".into(),
            request_headers: HashMap::new(),
            response_headers: headers
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            body: Arc::new(NoBody),
        }
    }

    #[test]
    fn content_type_lookup_is_case_insensitive() {
        let event = event_with_headers(&[("Content-Type", "application/json; charset=utf-8")]);
        assert_eq!(event.content_type(), "application/json; charset=utf-8");
        assert_eq!(event_with_headers(&[]).content_type(), "");
    }

    #[test]
    fn content_length_parses_or_is_absent() {
        assert_eq!(
            event_with_headers(&[("content-length", " 1234 ")]).content_length(),
            Some(1234)
        );
        assert_eq!(
            event_with_headers(&[("Content-Length", "garbage")]).content_length(),
            None
        );
        assert_eq!(event_with_headers(&[]).content_length(), None);
    }

    #[test]
    fn closed_session_errors_are_recognized() {
        assert!(is_closed_session_error("Target page, context or browser has been closed"));
        assert!(is_closed_session_error("Execution context was destroyed"));
        assert!(!is_closed_session_error("net::ERR_FAILED"));
    }

    #[test]
    fn proxy_rotation_walks_the_list() {
        let proxies = vec!["http://a:8080".to_string(), "http://b:8080".to_string()];
        let mut seen = std::collections::HashSet::new();
        for _ in 0..4 {
            seen.insert(next_proxy(&proxies).expect("proxy"));
        }
        assert_eq!(seen.len(), 2);
        assert_eq!(next_proxy(&[]), None);
    }
}
