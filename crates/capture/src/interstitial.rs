//! Consent / interstitial dismissal.
//!
//! The orchestrator walks every frame of the page across the registered
//! handlers at most once per entry into the stage; the first successful
//! dismissal wins. Handler failures are never fatal to a run.

use crate::browser::{BrowserFrame, BrowserSession};
use async_trait::async_trait;
use endpoint_protocol::{ConsentAction, ConsentMode};
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait InterstitialHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap check whether this frame looks like the handler's dialog.
    async fn matches(&self, frame: &dyn BrowserFrame) -> bool;

    /// Try to dismiss the dialog within `timeout`. Returns true when it
    /// was dismissed.
    async fn dismiss(
        &self,
        frame: &dyn BrowserFrame,
        action: ConsentAction,
        timeout: Duration,
    ) -> bool;
}

/// The Yahoo/AOL consent wall, served from its own consent domain.
pub struct YahooConsentHandler;

const YAHOO_CONSENT_HOSTS: [&str; 2] = ["consent.yahoo.com", "guce.yahoo.com"];
const YAHOO_REJECT_SELECTORS: [&str; 2] = ["button[name='reject']", "button.reject-all"];
const YAHOO_ACCEPT_SELECTORS: [&str; 2] = ["button[name='agree']", "button.accept-all"];

#[async_trait]
impl InterstitialHandler for YahooConsentHandler {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    async fn matches(&self, frame: &dyn BrowserFrame) -> bool {
        let url = frame.url();
        YAHOO_CONSENT_HOSTS.iter().any(|host| url.contains(host))
    }

    async fn dismiss(
        &self,
        frame: &dyn BrowserFrame,
        action: ConsentAction,
        timeout: Duration,
    ) -> bool {
        let selectors = match action {
            ConsentAction::Reject => &YAHOO_REJECT_SELECTORS,
            ConsentAction::Accept => &YAHOO_ACCEPT_SELECTORS,
        };
        click_first_visible(frame, selectors, timeout).await
    }
}

/// Common cookie-banner frameworks (OneTrust, Usercentrics, Amazon, ...).
pub struct GenericConsentHandler;

const GENERIC_REJECT_SELECTORS: [&str; 5] = [
    "#onetrust-reject-all-handler",
    "button[data-testid='uc-deny-all-button']",
    "button[aria-label='Reject all']",
    "#sp-cc-rejectall-link",
    "button[mode='secondary']",
];

const GENERIC_ACCEPT_SELECTORS: [&str; 5] = [
    "#onetrust-accept-btn-handler",
    "button[data-testid='uc-accept-all-button']",
    "button[aria-label='Accept all']",
    "#sp-cc-accept",
    "button[mode='primary']",
];

#[async_trait]
impl InterstitialHandler for GenericConsentHandler {
    fn name(&self) -> &'static str {
        "generic"
    }

    async fn matches(&self, frame: &dyn BrowserFrame) -> bool {
        for selector in GENERIC_REJECT_SELECTORS.iter().chain(&GENERIC_ACCEPT_SELECTORS) {
            if frame.is_visible(selector).await {
                return true;
            }
        }
        false
    }

    async fn dismiss(
        &self,
        frame: &dyn BrowserFrame,
        action: ConsentAction,
        timeout: Duration,
    ) -> bool {
        let selectors = match action {
            ConsentAction::Reject => &GENERIC_REJECT_SELECTORS,
            ConsentAction::Accept => &GENERIC_ACCEPT_SELECTORS,
        };
        click_first_visible(frame, selectors, timeout).await
    }
}

async fn click_first_visible(
    frame: &dyn BrowserFrame,
    selectors: &[&str],
    timeout: Duration,
) -> bool {
    let attempt = async {
        for selector in selectors {
            if frame.is_visible(selector).await && frame.click(selector).await {
                return true;
            }
        }
        false
    };
    tokio::time::timeout(timeout, attempt).await.unwrap_or(false)
}

/// The handler chain for a consent mode.
pub fn handlers_for_mode(mode: ConsentMode) -> Vec<Arc<dyn InterstitialHandler>> {
    match mode {
        ConsentMode::Off => Vec::new(),
        ConsentMode::Yahoo => vec![Arc::new(YahooConsentHandler)],
        ConsentMode::Generic => vec![Arc::new(GenericConsentHandler)],
        ConsentMode::Auto => vec![Arc::new(YahooConsentHandler), Arc::new(GenericConsentHandler)],
    }
}

/// Drive the handlers across all frames once. Returns whether anything was
/// dismissed; the whole sweep is bounded by `timeout`.
pub async fn dismiss_interstitials(
    session: &mut dyn BrowserSession,
    handlers: &[Arc<dyn InterstitialHandler>],
    action: ConsentAction,
    timeout: Duration,
) -> bool {
    let sweep = async {
        for frame in session.frames().await {
            for handler in handlers {
                if !handler.matches(frame.as_ref()).await {
                    continue;
                }
                log::debug!(
                    "interstitial handler '{}' matched frame {}",
                    handler.name(),
                    frame.url()
                );
                if handler.dismiss(frame.as_ref(), action, timeout).await {
                    log::info!("interstitial dismissed by '{}'", handler.name());
                    return true;
                }
            }
        }
        false
    };

    match tokio::time::timeout(timeout, sweep).await {
        Ok(dismissed) => dismissed,
        Err(_) => {
            log::warn!("interstitial sweep timed out");
            false
        }
    }
}
