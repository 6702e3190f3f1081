//! Alerter: delivers operator notifications subject to a single global
//! cooldown window shared across every alert kind (best-IP unavailable, no
//! healthy IPs, and any future caller) — the source makes this choice and we
//! keep it, since splitting cooldowns per kind is not requested anywhere in
//! the command surface.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::Result;
use crate::store::Store;

/// Delivery channel for alert messages. Production wiring points this at the
/// Telegram bot's `sendMessage`; tests use an in-memory recorder.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> Result<()>;
}

/// No-op delivery channel used when no Telegram bot token is configured.
/// Alerts still respect the cooldown and are still logged by [`Alerter`];
/// they simply have nowhere further to go.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        tracing::warn!(message, "no notification channel configured, alert not delivered");
        Ok(())
    }
}

pub struct Alerter<'a> {
    notifier: &'a dyn Notifier,
    store: &'a Store,
    cooldown: Duration,
}

impl<'a> Alerter<'a> {
    pub fn new(notifier: &'a dyn Notifier, store: &'a Store, cooldown: Duration) -> Self {
        Self { notifier, store, cooldown }
    }

    /// Fire `message` unless the cooldown has not yet elapsed since the last
    /// alert of any kind. Delivery failure is swallowed (best-effort); the
    /// cooldown timestamp is still advanced on a dropped or failed attempt.
    pub async fn alert(&self, message: &str) -> Result<()> {
        let last_alert = self.store.load_last_alert()?;
        let now = Utc::now();
        if now - last_alert < chrono::Duration::from_std(self.cooldown).unwrap() {
            tracing::info!(message, "alert suppressed by cooldown");
            return Ok(());
        }

        self.store.save_last_alert(now)?;
        tracing::warn!(message, "alert");
        if let Err(e) = self.notifier.notify(message).await {
            tracing::warn!(error = %e, "alert delivery failed, dropping");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingNotifier {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, message: &str) -> Result<()> {
            self.sent.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _message: &str) -> Result<()> {
            Err(crate::error::LbError::NotifyFailed("boom".into()))
        }
    }

    #[tokio::test]
    async fn first_alert_is_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().to_path_buf());
        let notifier = RecordingNotifier { sent: Mutex::new(Vec::new()) };
        let alerter = Alerter::new(&notifier, &store, Duration::from_secs(300));

        alerter.alert("best-IP unavailable").await.unwrap();
        assert_eq!(notifier.sent.lock().unwrap().as_slice(), ["best-IP unavailable"]);
    }

    #[tokio::test]
    async fn second_alert_within_cooldown_is_suppressed() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().to_path_buf());
        let notifier = RecordingNotifier { sent: Mutex::new(Vec::new()) };
        let alerter = Alerter::new(&notifier, &store, Duration::from_secs(300));

        alerter.alert("first").await.unwrap();
        alerter.alert("second").await.unwrap();
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn alert_outside_cooldown_window_is_delivered_again() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().to_path_buf());
        store.save_last_alert(Utc::now() - chrono::Duration::seconds(301)).unwrap();
        let notifier = RecordingNotifier { sent: Mutex::new(Vec::new()) };
        let alerter = Alerter::new(&notifier, &store, Duration::from_secs(300));

        alerter.alert("after cooldown").await.unwrap();
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_delivery_is_swallowed_and_does_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().to_path_buf());
        let notifier = FailingNotifier;
        let alerter = Alerter::new(&notifier, &store, Duration::from_secs(300));

        assert!(alerter.alert("will fail to deliver").await.is_ok());
    }
}
