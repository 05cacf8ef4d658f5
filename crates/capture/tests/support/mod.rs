//! Scripted browser doubles for orchestrator tests.

use async_trait::async_trait;
use endpoint_capture::browser::{
    BrowserFrame, BrowserLauncher, BrowserResult, BrowserSession, LaunchConfig, LoadState,
    ResponseBody, ResponseEvent,
};
use endpoint_protocol::CaptureOptions;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub struct FakeBody(pub BrowserResult<Vec<u8>>);

#[async_trait]
impl ResponseBody for FakeBody {
    async fn read(&self) -> BrowserResult<Vec<u8>> {
        self.0.clone()
    }
}

pub fn event(
    url: &str,
    method: &str,
    status: u16,
    resource_type: &str,
    content_type: &str,
    body: BrowserResult<Vec<u8>>,
) -> ResponseEvent {
    let mut response_headers = HashMap::new();
    if !content_type.is_empty() {
        response_headers.insert("content-type".to_string(), content_type.to_string());
    }
    ResponseEvent {
        url: url.into(),
        method: method.into(),
        status,
        resource_type: resource_type.into(),
        request_headers: HashMap::new(),
        response_headers,
        body: Arc::new(FakeBody(body)),
    }
}

/// A 200 xhr response carrying the given JSON body.
pub fn json_event(url: &str, body: &serde_json::Value) -> ResponseEvent {
    event(
        url,
        "GET",
        200,
        "xhr",
        "application/json",
        Ok(serde_json::to_vec(body).expect("serializable body")),
    )
}

/// A session that replays a scripted list of responses and then closes its
/// stream, which ends the capture window without waiting out the timer.
pub struct FakeSession {
    events: Vec<ResponseEvent>,
    closed: Arc<AtomicBool>,
    storage_saved: Arc<Mutex<Option<PathBuf>>>,
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&mut self, _url: &str, _timeout: Duration) -> BrowserResult<()> {
        Ok(())
    }

    async fn wait_for_load_state(
        &mut self,
        _state: LoadState,
        _timeout: Duration,
    ) -> BrowserResult<()> {
        Ok(())
    }

    async fn wait_for_url(
        &mut self,
        _predicate: &(dyn Fn(&str) -> bool + Send + Sync),
        _timeout: Duration,
    ) -> BrowserResult<()> {
        Ok(())
    }

    fn take_responses(&mut self) -> Option<mpsc::UnboundedReceiver<ResponseEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        for event in self.events.drain(..) {
            let _ = tx.send(event);
        }
        Some(rx)
    }

    async fn frames(&self) -> Vec<Arc<dyn BrowserFrame>> {
        Vec::new()
    }

    async fn save_storage_state(&mut self, path: &Path) -> BrowserResult<()> {
        *self.storage_saved.lock().expect("lock") = Some(path.to_path_buf());
        Ok(())
    }

    async fn close(&mut self) -> BrowserResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeLauncher {
    events: Mutex<Option<Vec<ResponseEvent>>>,
    pub closed: Arc<AtomicBool>,
    pub storage_saved: Arc<Mutex<Option<PathBuf>>>,
}

impl FakeLauncher {
    pub fn new(events: Vec<ResponseEvent>) -> Self {
        Self {
            events: Mutex::new(Some(events)),
            closed: Arc::new(AtomicBool::new(false)),
            storage_saved: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, _config: &LaunchConfig) -> BrowserResult<Box<dyn BrowserSession>> {
        let events = self
            .events
            .lock()
            .expect("lock")
            .take()
            .unwrap_or_default();
        Ok(Box::new(FakeSession {
            events,
            closed: self.closed.clone(),
            storage_saved: self.storage_saved.clone(),
        }))
    }
}

pub struct FailingLauncher;

#[async_trait]
impl BrowserLauncher for FailingLauncher {
    async fn launch(&self, _config: &LaunchConfig) -> BrowserResult<Box<dyn BrowserSession>> {
        Err("browserType.launch: executable not found".into())
    }
}

/// Options pointed at a temp out dir, fast enough for tests.
pub fn test_options(out_dir: &Path) -> CaptureOptions {
    let mut options = CaptureOptions::for_url("https://api.example.com/app");
    options.out_dir = out_dir.to_path_buf();
    options.monitor_ms = 2_000;
    options.timeout_ms = 30_000;
    options
}
