//! Product analytics events for emailed entries.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::IngestConfig;

const COLLECT_URL: &str = "https://www.google-analytics.com/collect";

/// Event category for everything this crate reports.
pub const EVENT_CATEGORY: &str = "Email Entry";

/// Records an analytics event. Failures are logged, never returned.
#[async_trait]
pub trait Tracker: Send + Sync {
    async fn track(&self, action: &str, label: &str);
}

/// Sends Measurement Protocol events.
pub struct AnalyticsTracker {
    client: reqwest::Client,
    tracking_id: String,
}

impl AnalyticsTracker {
    pub fn new(tracking_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            tracking_id: tracking_id.into(),
        }
    }

    fn event_params<'a>(&'a self, action: &'a str, label: &'a str) -> [(&'static str, &'a str); 7] {
        [
            ("v", "1"),
            ("tid", self.tracking_id.as_str()),
            ("cid", label),
            ("t", "event"),
            ("ec", EVENT_CATEGORY),
            ("ea", action),
            ("el", label),
        ]
    }
}

#[async_trait]
impl Tracker for AnalyticsTracker {
    async fn track(&self, action: &str, label: &str) {
        let result = self
            .client
            .post(COLLECT_URL)
            .form(&self.event_params(action, label))
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                debug!(action, label, "Analytics event sent");
            }
            Ok(resp) => warn!(action, status = %resp.status(), "Analytics event rejected"),
            Err(e) => warn!(action, error = %e, "Analytics event failed"),
        }
    }
}

/// Tracker used when analytics is not configured.
pub struct NoopTracker;

#[async_trait]
impl Tracker for NoopTracker {
    async fn track(&self, action: &str, label: &str) {
        debug!(action, label, "Analytics disabled, event dropped");
    }
}

/// Analytics tracker when an id is configured, otherwise a no-op.
pub fn tracker_from_config(config: &IngestConfig) -> Arc<dyn Tracker> {
    match &config.analytics_id {
        Some(id) => Arc::new(AnalyticsTracker::new(id.clone())),
        None => Arc::new(NoopTracker),
    }
}
