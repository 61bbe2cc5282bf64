//! Debounced threshold alerts, raised while admitting samples.

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::error::CoreResult;
use crate::model::{Alert, Channel, Logger, Sample};
use crate::store::SampleStore;

/// State recorded on a freshly raised alert.
pub const ALERT_STATE_NEW: &str = "NEW";

/// Everything a transport needs to render a breach notification.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertNotification {
    pub idcode: String,
    pub logger_name: String,
    pub channel_key: String,
    pub channel_name: String,
    pub value: f64,
    pub alert_low: Option<f64>,
    pub alert_high: Option<f64>,
}

/// Outbound notification transport. Failures are logged by the evaluator
/// and never fail the submission.
pub trait AlertNotifier: Send + Sync {
    fn notify(&self, notification: &AlertNotification) -> anyhow::Result<()>;
}

/// Notifier that only writes a structured log event.
pub struct LogNotifier;

impl AlertNotifier for LogNotifier {
    fn notify(&self, n: &AlertNotification) -> anyhow::Result<()> {
        info!(
            idcode = %n.idcode,
            channel = %n.channel_key,
            value = n.value,
            low = ?n.alert_low,
            high = ?n.alert_high,
            "threshold alert"
        );
        Ok(())
    }
}

pub struct AlertEvaluator {
    expiry: Duration,
}

impl AlertEvaluator {
    pub fn new(expiry: Duration) -> Self {
        Self { expiry }
    }

    /// Evaluate one admitted sample against its channel's alert bounds.
    /// While an unexpired alert exists for the channel, breaches are
    /// swallowed (debounce); expiry re-arms the channel.
    pub fn check(
        &self,
        store: &dyn SampleStore,
        notifier: &dyn AlertNotifier,
        logger: &Logger,
        channel: &Channel,
        sample: &Sample,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<Alert>> {
        if !channel.has_alert_bounds() || !breached(channel, sample.value) {
            return Ok(None);
        }
        if store.unexpired_alert(channel.id, now).is_some() {
            return Ok(None);
        }
        let alert = store.insert_alert(channel.id, ALERT_STATE_NEW, now, now + self.expiry)?;
        let notification = AlertNotification {
            idcode: logger.idcode.clone(),
            logger_name: logger.name.clone(),
            channel_key: channel.key.clone(),
            channel_name: channel.name.clone(),
            value: sample.value,
            alert_low: channel.alert_low,
            alert_high: channel.alert_high,
        };
        if let Err(e) = notifier.notify(&notification) {
            warn!(channel = %channel.key, error = %e, "alert notification failed");
        }
        Ok(Some(alert))
    }
}

fn breached(channel: &Channel, value: f64) -> bool {
    if let Some(low) = channel.alert_low
        && value < low
    {
        return true;
    }
    if let Some(high) = channel.alert_high
        && value > high
    {
        return true;
    }
    false
}
