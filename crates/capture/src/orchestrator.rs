//! Run lifecycle: navigate, dismiss, settle, flow, capture window, drain,
//! close, aggregate. One orchestrator drives exactly one run; nothing here
//! outlives the run, so back-to-back runs in one process are safe.

use crate::browser::{
    next_proxy, BrowserLauncher, BrowserSession, FlowScript, LaunchConfig, LoadState,
};
use crate::classifier::ResponseClassifier;
use crate::interstitial::{dismiss_interstitials, InterstitialHandler};
use crate::limiter::ConcurrencyLimiter;
use crate::worker::{process_response, ResponseContext, RunState};
use crate::{CaptureError, Result};
use chrono::Utc;
use endpoint_analyze::{score_endpoints, Aggregator, FeatureBounds, BODY_EVIDENCE, SCORING_WEIGHTS};
use endpoint_protocol::{CaptureOptions, RunMetadata, RunSummary};
use endpoint_sanitize::redact_error;
use endpoint_store::{generate_run_id, read_journal, BodyStore, CaptureLog};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

const WAIT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);
const HOST_REACH_TIMEOUT: Duration = Duration::from_secs(10);
const INTERSTITIAL_TIMEOUT: Duration = Duration::from_secs(10);
const MIN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);
const TOP_ENDPOINTS_IN_SUMMARY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Init,
    Launch,
    Navigate,
    Interstitial,
    WaitTargetHost,
    WaitIdle,
    Flow,
    CaptureWindow,
    Drain,
    Close,
    Aggregate,
    Done,
    Failed,
}

/// What a finished run hands back. The capture directory is valid even when
/// `failure` is set; whatever was journaled before the failure stays usable.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: String,
    pub run_dir: PathBuf,
    pub summary: Option<RunSummary>,
    pub failure: Option<String>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

pub struct RunOrchestrator {
    options: Arc<CaptureOptions>,
    launcher: Box<dyn BrowserLauncher>,
    handlers: Vec<Arc<dyn InterstitialHandler>>,
    flow: Option<Box<dyn FlowScript>>,
    stage: RunStage,
}

impl RunOrchestrator {
    /// Validates the options; configuration errors surface here, before any
    /// run directory exists.
    pub fn new(options: CaptureOptions, launcher: Box<dyn BrowserLauncher>) -> Result<Self> {
        options.validate()?;
        let handlers = crate::interstitial::handlers_for_mode(options.consent_mode);
        Ok(Self {
            options: Arc::new(options),
            launcher,
            handlers,
            flow: None,
            stage: RunStage::Init,
        })
    }

    /// Replace the consent handler chain selected from the options.
    pub fn with_handlers(mut self, handlers: Vec<Arc<dyn InterstitialHandler>>) -> Self {
        self.handlers = handlers;
        self
    }

    /// Attach a flow script, run once between the idle wait and the window.
    pub fn with_flow(mut self, flow: Box<dyn FlowScript>) -> Self {
        self.flow = Some(flow);
        self
    }

    /// The stage the run is currently in.
    pub fn stage(&self) -> RunStage {
        self.stage
    }

    fn enter(&mut self, stage: RunStage) {
        self.stage = stage;
        log::info!("stage {stage:?}");
    }

    /// Execute the run to completion.
    ///
    /// Fatal launch/navigation errors do not return `Err`: the run directory
    /// already exists at that point, so the failure is reported on the
    /// outcome after the close/aggregate tail has run. `Err` is reserved for
    /// errors before the directory exists.
    pub async fn run(mut self) -> Result<RunOutcome> {
        self.enter(RunStage::Init);
        let run_started = Instant::now();
        let started_at = Utc::now();
        let run_id = generate_run_id(started_at);
        let deadline = (!self.options.watch)
            .then(|| run_started + Duration::from_millis(self.options.timeout_ms));

        let metadata = RunMetadata {
            run_id: run_id.clone(),
            started_at,
            url: self.options.url.clone(),
            options: (*self.options).clone(),
        };
        let log = Arc::new(CaptureLog::create(&self.options.out_dir, &metadata).await?);
        let bodies = BodyStore::create(
            log.run_dir(),
            self.options.inline_body_bytes,
            self.options.max_body_bytes,
        )
        .await?;

        let ctx = Arc::new(ResponseContext {
            options: self.options.clone(),
            classifier: ResponseClassifier::from_options(&self.options)
                .map_err(CaptureError::Gate)?,
            log: log.clone(),
            bodies,
            state: Arc::new(Mutex::new(RunState::default())),
            bounds: FeatureBounds::default(),
        });

        let mut session: Option<Box<dyn BrowserSession>> = None;
        let mut total_responses = 0u64;
        let failure = match self
            .drive(&ctx, deadline, run_started, &mut session, &mut total_responses)
            .await
        {
            Ok(()) => None,
            Err(reason) => {
                log::error!("run failed: {reason}");
                Some(reason)
            }
        };

        self.enter(RunStage::Close);
        if let Some(mut session) = session {
            if let Some(path) = &self.options.save_storage_state {
                if let Err(err) = session.save_storage_state(path).await {
                    log::warn!("could not save storage state: {}", redact_error(&err));
                }
            }
            if let Err(err) = session.close().await {
                log::warn!("browser close failed: {}", redact_error(&err));
            }
        }

        let summary = if self.options.disable_summary {
            log::info!("summary disabled; skipping aggregation");
            None
        } else {
            self.enter(RunStage::Aggregate);
            match self
                .aggregate(&log, &run_id, started_at, total_responses, &ctx)
                .await
            {
                Ok(summary) => summary,
                Err(err) => {
                    log::warn!("aggregation failed: {err}");
                    None
                }
            }
        };

        self.enter(if failure.is_some() {
            RunStage::Failed
        } else {
            RunStage::Done
        });

        Ok(RunOutcome {
            run_id,
            run_dir: log.run_dir().to_path_buf(),
            summary,
            failure,
        })
    }

    /// The LAUNCH..DRAIN stages. A returned `Err` is a fatal reason; the
    /// caller still runs the close/aggregate tail.
    async fn drive(
        &mut self,
        ctx: &Arc<ResponseContext>,
        deadline: Option<Instant>,
        run_started: Instant,
        session_slot: &mut Option<Box<dyn BrowserSession>>,
        total_responses: &mut u64,
    ) -> std::result::Result<(), String> {
        self.enter(RunStage::Launch);
        let launch = LaunchConfig {
            user_agent: self.options.user_agent.clone(),
            proxy: next_proxy(&self.options.proxies),
            storage_state: self.options.storage_state.clone(),
            har_path: self
                .options
                .save_har
                .then(|| ctx.log.run_dir().join("session.har")),
            trace_path: self
                .options
                .trace
                .then(|| ctx.log.run_dir().join("trace.zip")),
        };
        let stage_ceiling = Duration::from_millis(self.options.timeout_ms);
        let mut session = tokio::time::timeout(
            remaining(deadline, stage_ceiling),
            self.launcher.launch(&launch),
        )
        .await
        .map_err(|_| "browser launch timed out".to_string())?
        .map_err(|err| format!("browser launch failed: {}", redact_error(&err)))?;

        self.enter(RunStage::Navigate);
        session
            .navigate(&self.options.url, remaining(deadline, stage_ceiling))
            .await
            .map_err(|err| format!("navigation failed: {}", redact_error(&err)))?;

        if !self.handlers.is_empty() {
            self.enter(RunStage::Interstitial);
            let dismissed = dismiss_interstitials(
                session.as_mut(),
                &self.handlers,
                self.options.consent_action,
                remaining(deadline, INTERSTITIAL_TIMEOUT),
            )
            .await;
            if dismissed {
                // The dismissal usually triggers a reload of the real page.
                if let Err(err) = session
                    .wait_for_load_state(
                        LoadState::DomContentLoaded,
                        remaining(deadline, WAIT_IDLE_TIMEOUT),
                    )
                    .await
                {
                    log::debug!("post-consent load wait failed: {}", redact_error(&err));
                }
            }
        }

        self.enter(RunStage::WaitTargetHost);
        if let Some(host) = Url::parse(&self.options.url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
        {
            let predicate = move |current: &str| {
                Url::parse(current)
                    .ok()
                    .and_then(|url| url.host_str().map(|h| h == host))
                    .unwrap_or(false)
            };
            if let Err(err) = session
                .wait_for_url(&predicate, remaining(deadline, HOST_REACH_TIMEOUT))
                .await
            {
                log::warn!("target host not reached: {}", redact_error(&err));
            }
        }

        self.enter(RunStage::WaitIdle);
        if let Err(err) = session
            .wait_for_load_state(LoadState::NetworkIdle, remaining(deadline, WAIT_IDLE_TIMEOUT))
            .await
        {
            log::debug!("network never settled: {}", redact_error(&err));
        }

        if let Some(flow) = self.flow.take() {
            self.enter(RunStage::Flow);
            match tokio::time::timeout(
                remaining(deadline, stage_ceiling),
                flow.run(session.as_mut()),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(err)) => log::warn!("flow script failed: {}", redact_error(&err)),
                Err(_) => log::warn!("flow script timed out"),
            }
        }

        self.enter(RunStage::CaptureWindow);
        let mut responses = session
            .take_responses()
            .ok_or_else(|| "browser session yields no response stream".to_string())?;
        // The session is parked for the close stage; the window only needs
        // the response stream.
        *session_slot = Some(session);

        let limiter = ConcurrencyLimiter::new(self.options.max_concurrent_captures);
        let window_end =
            (!self.options.watch).then(|| Instant::now() + Duration::from_millis(self.options.monitor_ms));

        let mut progress = tokio::time::interval(PROGRESS_INTERVAL);
        progress.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        progress.tick().await;

        loop {
            tokio::select! {
                event = responses.recv() => {
                    match event {
                        Some(event) => {
                            *total_responses += 1;
                            // Enqueue only; awaiting here would serialize the
                            // browser on our pipeline.
                            let ctx = ctx.clone();
                            let _ = limiter.submit(process_response(ctx, event));
                        }
                        None => {
                            log::info!("response stream closed");
                            break;
                        }
                    }
                }
                _ = sleep_until_or_forever(window_end) => {
                    log::info!("capture window elapsed");
                    break;
                }
                _ = sleep_until_or_forever(deadline) => {
                    log::warn!("global deadline reached during capture window");
                    break;
                }
                _ = progress.tick() => {
                    let state = ctx.state.lock().await;
                    log::info!(
                        "window: {} responses, {} persisted, {} duplicates, {} queued",
                        total_responses,
                        state.persisted,
                        state.duplicates_skipped,
                        limiter.pending(),
                    );
                }
            }
        }
        // Closing: dropping the receiver discards late responses silently.
        drop(responses);

        self.enter(RunStage::Drain);
        let elapsed = run_started.elapsed();
        let drain_budget = MIN_DRAIN_TIMEOUT
            .max(Duration::from_millis(self.options.timeout_ms).saturating_sub(elapsed));
        if tokio::time::timeout(drain_budget, limiter.drain()).await.is_err() {
            log::warn!(
                "drain deadline reached with {} task(s) outstanding; abandoning them",
                limiter.running() + limiter.pending(),
            );
        }

        Ok(())
    }

    async fn aggregate(
        &self,
        log: &CaptureLog,
        run_id: &str,
        started_at: chrono::DateTime<Utc>,
        total_responses: u64,
        ctx: &ResponseContext,
    ) -> endpoint_store::Result<Option<RunSummary>> {
        let records = read_journal(log.run_dir()).await?;
        if records.is_empty() {
            log::info!("journal is empty; nothing to aggregate");
            return Ok(None);
        }

        let mut aggregator = Aggregator::new();
        for record in &records {
            aggregator.observe(record);
        }

        let (json_captures, duplicates_skipped) = {
            let state = ctx.state.lock().await;
            (state.persisted, state.duplicates_skipped)
        };

        let scored = score_endpoints(aggregator.finish(), records.len() as u64);
        let summary = RunSummary {
            run_id: run_id.to_string(),
            url: self.options.url.clone(),
            started_at,
            completed_at: Utc::now(),
            capture_dir: log.run_dir().display().to_string(),
            total_responses,
            json_captures,
            duplicates_skipped,
            total_endpoints: scored.len(),
            scoring_weights: SCORING_WEIGHTS,
            body_evidence: BODY_EVIDENCE,
            endpoints: scored.iter().take(TOP_ENDPOINTS_IN_SUMMARY).cloned().collect(),
        };

        log.write_summary(&summary).await?;
        log.write_endpoints(&scored).await?;
        log::info!(
            "scored {} endpoint(s) from {} record(s)",
            scored.len(),
            records.len(),
        );
        Ok(Some(summary))
    }
}

/// Bound a stage wait by its own ceiling and by what is left of the global
/// deadline.
fn remaining(deadline: Option<Instant>, ceiling: Duration) -> Duration {
    match deadline {
        Some(at) => ceiling.min(at.saturating_duration_since(Instant::now())),
        None => ceiling,
    }
}

async fn sleep_until_or_forever(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
