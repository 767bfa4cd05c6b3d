use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::packet::{HubStatus, Observation};

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Store handle
// ---------------------------------------------------------------------------

/// Latest observation and hub status, plus receiver bookkeeping.
///
/// Values are installed as whole `Arc`s, so a reader holds either the
/// previous packet or the new one, never a mix. The listener is the only
/// writer; any number of request handlers read concurrently.
#[derive(Clone)]
pub struct Store {
    latest: Arc<RwLock<Latest>>,
    status: Arc<RwLock<ReceiverStatus>>,
}

#[derive(Default)]
struct Latest {
    observation: Arc<Observation>,
    hub: Arc<HubStatus>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            latest: Arc::new(RwLock::new(Latest::default())),
            status: Arc::new(RwLock::new(ReceiverStatus::new())),
        }
    }

    pub async fn set_observation(&self, obs: Arc<Observation>) {
        self.latest.write().await.observation = obs;
    }

    pub async fn set_hub_status(&self, hub: Arc<HubStatus>) {
        self.latest.write().await.hub = hub;
    }

    /// The most recent observation, or the pending default.
    pub async fn observation(&self) -> Arc<Observation> {
        Arc::clone(&self.latest.read().await.observation)
    }

    /// The most recent hub status, or the pending default.
    pub async fn hub_status(&self) -> Arc<HubStatus> {
        Arc::clone(&self.latest.read().await.hub)
    }

    /// Apply a mutation to the receiver bookkeeping.
    pub async fn record(&self, f: impl FnOnce(&mut ReceiverStatus)) {
        let mut st = self.status.write().await;
        f(&mut st);
    }

    pub async fn status(&self) -> StatusResponse {
        self.status.read().await.to_status()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Receiver bookkeeping
// ---------------------------------------------------------------------------

pub struct ReceiverStatus {
    pub started_at: Instant,
    pub counters: Counters,
    pub events: VecDeque<ReceiverEvent>,
}

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub observations: u64,
    pub hub_statuses: u64,
    pub ignored: u64,
    pub decode_failures: u64,
    pub persist_failures: u64,
}

#[derive(Clone, Serialize)]
pub struct ReceiverEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Reading,
    Hub,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub counters: Counters,
    pub events: Vec<ReceiverEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl ReceiverStatus {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            counters: Counters::default(),
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Record a decoded observation.
    pub fn record_observation(&mut self, obs: &Observation) {
        self.counters.observations += 1;
        let detail = match obs.first() {
            Some(s) => format!(
                "{}: {:.1} °C, {:.1}% rh, {:.1} mb",
                obs.serial_number, s.temperature, s.humidity, s.pressure
            ),
            None => format!("{}: no samples", obs.serial_number),
        };
        self.push_event(EventKind::Reading, detail);
    }

    /// Record a decoded hub status.
    pub fn record_hub(&mut self, hub: &HubStatus) {
        self.counters.hub_statuses += 1;
        self.push_event(
            EventKind::Hub,
            format!("{}: up {}s, rssi {}", hub.serial_number, hub.uptime, hub.rssi),
        );
    }

    /// Datagrams that were not ours are counted but not listed.
    pub fn record_ignored(&mut self) {
        self.counters.ignored += 1;
    }

    pub fn record_decode_failure(&mut self, detail: String) {
        self.counters.decode_failures += 1;
        self.push_event(EventKind::Error, detail);
    }

    pub fn record_persist_failure(&mut self, detail: String) {
        self.counters.persist_failures += 1;
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot, newest event first.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            counters: self.counters,
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(ReceiverEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

impl Default for ReceiverStatus {
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
    use crate::format::{format_observation, Units};
    use crate::packet::Sample;

    /// An observation whose temperature and humidity both equal `n`.
    fn tagged_observation(n: u32) -> Observation {
        Observation {
            serial_number: format!("ST-{n}"),
            hub_sn: "HB-1".into(),
            obs: vec![Sample {
                epoch: 1_700_000_000.0 + n as f64,
                temperature: n as f64,
                humidity: n as f64,
                battery: n as f64,
                ..Sample::default()
            }],
            firmware_revision: 1,
        }
    }

    // -- Latest values ------------------------------------------------------

    #[tokio::test]
    async fn starts_pending() {
        let store = Store::new();
        assert!(store.observation().await.is_pending());
        assert!(store.hub_status().await.is_pending());
    }

    #[tokio::test]
    async fn set_replaces_whole_value() {
        let store = Store::new();
        store.set_observation(Arc::new(tagged_observation(1))).await;
        store.set_observation(Arc::new(tagged_observation(2))).await;
        let obs = store.observation().await;
        assert_eq!(obs.serial_number, "ST-2");
        assert_eq!(obs.first().unwrap().temperature, 2.0);
    }

    #[tokio::test]
    async fn held_snapshot_survives_later_writes() {
        let store = Store::new();
        store.set_observation(Arc::new(tagged_observation(1))).await;
        let held = store.observation().await;
        store.set_observation(Arc::new(tagged_observation(2))).await;
        assert_eq!(held.serial_number, "ST-1");
    }

    #[tokio::test]
    async fn hub_and_observation_are_independent() {
        let store = Store::new();
        store
            .set_hub_status(Arc::new(HubStatus {
                serial_number: "HB-9".into(),
                timestamp: 5,
                ..HubStatus::default()
            }))
            .await;
        assert!(store.observation().await.is_pending());
        assert_eq!(store.hub_status().await.serial_number, "HB-9");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_readers_never_see_mixed_observations() {
        let store = Store::new();
        store.set_observation(Arc::new(tagged_observation(0))).await;

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for n in 1..=500 {
                    store.set_observation(Arc::new(tagged_observation(n))).await;
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut readers = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            readers.push(tokio::spawn(async move {
                let now = OffsetDateTime::now_utc();
                for _ in 0..500 {
                    let obs = store.observation().await;
                    let snap = format_observation(&obs, Units::default(), now);
                    let temp = snap.get("temp").unwrap().to_string();
                    let humid = snap.get("humid").unwrap().trim_end_matches('%').to_string();
                    assert_eq!(temp, humid, "mixed snapshot: {snap:?}");
                    assert_eq!(snap.get("serial").unwrap(), format!("ST-{}", temp.trim_end_matches(".0")));
                    tokio::task::yield_now().await;
                }
            }));
        }

        writer.await.unwrap();
        for r in readers {
            r.await.unwrap();
        }
    }

    // -- Receiver bookkeeping -----------------------------------------------

    #[test]
    fn counters_track_outcomes() {
        let mut st = ReceiverStatus::new();
        st.record_observation(&tagged_observation(3));
        st.record_hub(&HubStatus::default());
        st.record_ignored();
        st.record_ignored();
        st.record_decode_failure("bad".into());
        st.record_persist_failure("disk".into());

        assert_eq!(
            st.counters,
            Counters {
                observations: 1,
                hub_statuses: 1,
                ignored: 2,
                decode_failures: 1,
                persist_failures: 1,
            }
        );
        // ignored datagrams are not listed as events
        assert_eq!(st.events.len(), 4);
    }

    #[test]
    fn status_lists_newest_event_first() {
        let mut st = ReceiverStatus::new();
        st.record_system("first".into());
        st.record_system("second".into());
        let status = st.to_status();
        assert_eq!(status.events[0].detail, "second");
        assert_eq!(status.events[1].detail, "first");
    }

    #[test]
    fn event_ring_buffer_is_bounded() {
        let mut st = ReceiverStatus::new();
        for i in 0..(MAX_EVENTS + 25) {
            st.record_system(format!("e{i}"));
        }
        assert_eq!(st.events.len(), MAX_EVENTS);
        assert_eq!(st.events.front().unwrap().detail, "e25");
    }

    #[test]
    fn observation_event_detail() {
        let mut st = ReceiverStatus::new();
        st.record_observation(&tagged_observation(21));
        let ev = st.events.back().unwrap();
        assert_eq!(ev.kind, EventKind::Reading);
        assert_eq!(ev.detail, "ST-21: 21.0 °C, 21.0% rh, 0.0 mb");
    }

    #[test]
    fn status_serializes() {
        let mut st = ReceiverStatus::new();
        st.record_decode_failure("oops".into());
        let json = serde_json::to_value(st.to_status()).unwrap();
        assert_eq!(json["counters"]["decode_failures"], 1);
        assert_eq!(json["events"][0]["kind"], "error");
        assert!(json["events"][0]["ts"].is_string());
    }
}
