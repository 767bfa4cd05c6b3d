//! "Something changed" notifications for live viewers.
//!
//! A bounded broadcast channel: the listener publishes one update per
//! decoded packet and each viewer subscribes independently. A viewer that
//! falls behind loses the oldest updates, which is harmless because the
//! store always holds the fresh value.

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::packet::{HubStatus, Observation};

const CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub enum Update {
    Reading(Arc<Observation>),
    Hub(Arc<HubStatus>),
}

impl Update {
    /// Event name used on the wire.
    pub fn event(&self) -> &'static str {
        match self {
            Self::Reading(_) => "reading",
            Self::Hub(_) => "hub",
        }
    }
}

#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Update>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CAPACITY);
        Self { tx }
    }

    /// Fire-and-forget. Returns how many subscribers were reached.
    pub fn publish(&self, update: Update) -> usize {
        self.tx.send(update).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Update> {
        self.tx.subscribe()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    #[test]
    fn publish_without_subscribers_is_fine() {
        let n = Notifier::new();
        assert_eq!(n.publish(Update::Hub(Arc::default())), 0);
    }

    #[tokio::test]
    async fn every_subscriber_gets_the_update() {
        let n = Notifier::new();
        let mut a = n.subscribe();
        let mut b = n.subscribe();

        let obs = Arc::new(Observation {
            serial_number: "ST-7".into(),
            ..Observation::default()
        });
        assert_eq!(n.publish(Update::Reading(Arc::clone(&obs))), 2);

        for rx in [&mut a, &mut b] {
            match rx.recv().await.unwrap() {
                Update::Reading(o) => assert_eq!(o.serial_number, "ST-7"),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn slow_subscriber_lags_then_resumes() {
        let n = Notifier::new();
        let mut rx = n.subscribe();
        for _ in 0..(CAPACITY + 4) {
            n.publish(Update::Hub(Arc::default()));
        }
        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(4))));
        assert!(rx.recv().await.is_ok());
    }

    #[test]
    fn late_subscriber_sees_only_new_updates() {
        let n = Notifier::new();
        n.publish(Update::Hub(Arc::default()));
        let mut rx = n.subscribe();
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn event_names() {
        assert_eq!(Update::Reading(Arc::default()).event(), "reading");
        assert_eq!(Update::Hub(Arc::default()).event(), "hub");
    }
}
