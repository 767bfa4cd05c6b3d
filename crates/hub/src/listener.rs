//! UDP receive loop.
//!
//! One task owns the socket and handles each datagram to completion
//! (decode → persist → store → notify) before reading the next, so writes
//! to the store and the database never race each other.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{error, info, trace, warn};

use crate::db::Db;
use crate::notify::{Notifier, Update};
use crate::packet::{self, Packet, OBS_ST};
use crate::state::Store;

/// Large enough for any hub broadcast.
const MAX_DATAGRAM: usize = 4096;

/// Well-known port the hub broadcasts on.
pub const DEFAULT_PORT: u16 = 50222;

/// What happened to one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Observation,
    HubStatus,
    /// Not ours: non-JSON, no type, or an unrecognised type.
    Ignored,
    /// A known type that failed schema decoding.
    Rejected,
}

/// Everything the ingest path writes to.
#[derive(Clone)]
pub struct Ingest {
    pub store: Store,
    pub db: Option<Db>,
    pub notifier: Notifier,
}

impl Ingest {
    /// Classify, decode and apply one datagram.
    pub async fn handle(&self, payload: &[u8]) -> Outcome {
        let packet = match packet::decode(payload) {
            Ok(Some(p)) => p,
            Ok(None) => {
                trace!(len = payload.len(), "ignoring foreign datagram");
                self.store.record(|st| st.record_ignored()).await;
                return Outcome::Ignored;
            }
            Err(e) => {
                warn!("dropping packet: {e}");
                self.store
                    .record(|st| st.record_decode_failure(e.to_string()))
                    .await;
                return Outcome::Rejected;
            }
        };

        match packet {
            Packet::Observation(obs) => {
                // Persistence failures are reported but never stop live updates.
                if let Some(db) = &self.db {
                    if let Err(e) = db.append(OBS_ST, payload).await {
                        error!("failed to persist observation: {e:#}");
                        self.store
                            .record(|st| st.record_persist_failure(format!("{e:#}")))
                            .await;
                    }
                }

                let obs = Arc::new(obs);
                self.store.set_observation(Arc::clone(&obs)).await;
                self.store.record(|st| st.record_observation(&obs)).await;
                self.notifier.publish(Update::Reading(obs));
                Outcome::Observation
            }
            Packet::HubStatus(hub) => {
                let hub = Arc::new(hub);
                self.store.set_hub_status(Arc::clone(&hub)).await;
                self.store.record(|st| st.record_hub(&hub)).await;
                self.notifier.publish(Update::Hub(hub));
                Outcome::HubStatus
            }
            Packet::Other => Outcome::Ignored,
        }
    }
}

/// Bind the broadcast listener on all interfaces.
pub async fn bind(port: u16) -> Result<UdpSocket> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let socket = UdpSocket::bind(addr)
        .await
        .with_context(|| format!("failed to bind udp {addr}"))?;
    info!(%addr, "listening for hub broadcasts");
    Ok(socket)
}

/// Receive datagrams until `shutdown` flips to true.
pub async fn run(socket: UdpSocket, ingest: Ingest, mut shutdown: watch::Receiver<bool>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        tokio::select! {
            res = socket.recv_from(&mut buf) => match res {
                Ok((n, from)) => {
                    let outcome = ingest.handle(&buf[..n]).await;
                    trace!(%from, len = n, ?outcome, "datagram handled");
                }
                Err(e) => warn!("udp receive error: {e}"),
            },
            _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => break,
        }
    }

    info!("udp listener stopped");
}

// ===========================================================================
// Tests
// ===========================================================================
