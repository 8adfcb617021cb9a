//! Notifier implementations.

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::domain::repositories::notifier::{LifecycleEvent, Notifier, Recipient};

/// Logs every event; the default when no dispatcher is wired in
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: LifecycleEvent, recipients: Vec<Recipient>) {
        let payload = serde_json::to_string(&event).unwrap_or_else(|_| format!("{:?}", event));
        info!(
            event = event.name(),
            recipients = recipients.len(),
            "Lifecycle notification: {}",
            payload
        );
    }
}

/// A dispatched event with its audience
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub event: LifecycleEvent,
    pub recipients: Vec<Recipient>,
}

/// Forwards events into an unbounded channel for an external dispatcher
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, event: LifecycleEvent, recipients: Vec<Recipient>) {
        let name = event.name();
        if self.tx.send(Notification { event, recipients }).is_err() {
            warn!("Notification receiver dropped, discarding {}", name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_notifier_forwards_events() {
        let (notifier, mut rx) = ChannelNotifier::new();
        notifier.notify(
            LifecycleEvent::BasketPublished {
                basket_id: 1,
                version_id: 2,
            },
            vec![Recipient::Amc(7), Recipient::User(42)],
        );

        let notification = rx.recv().await.unwrap();
        assert_eq!(notification.event.name(), "basket_published");
        assert_eq!(notification.recipients, vec![Recipient::Amc(7), Recipient::User(42)]);
    }

    #[test]
    fn test_channel_notifier_survives_dropped_receiver() {
        let (notifier, rx) = ChannelNotifier::new();
        drop(rx);
        notifier.notify(
            LifecycleEvent::VersionSubmitted {
                basket_id: 1,
                version_id: 2,
            },
            vec![Recipient::Admins],
        );
    }

    #[test]
    fn test_event_wire_format() {
        let json = serde_json::to_value(LifecycleEvent::VersionRejected {
            basket_id: 1,
            version_id: 2,
            reason: "bad weights".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "version_rejected");
        assert_eq!(json["reason"], "bad weights");
    }
}
