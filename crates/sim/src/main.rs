mod sim;

use anyhow::{Context, Result};
use serde::Serialize;
use std::{env, time::Duration};
use time::OffsetDateTime;
use tokio::net::UdpSocket;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use sim::{Scenario, WeatherSim, CHANNELS};

const HUB_EVERY: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct ObsMsg<'a> {
    serial_number: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    hub_sn: &'a str,
    obs: Vec<[f64; CHANNELS]>,
    firmware_revision: i64,
}

#[derive(Debug, Serialize)]
struct HubMsg<'a> {
    serial_number: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    firmware_revision: &'static str,
    uptime: i64,
    rssi: i64,
    timestamp: i64,
    reset_flags: &'static str,
    seq: i64,
    fs: [i64; 4],
    radio_stats: [i64; 5],
    mqtt_stats: [i64; 2],
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wx_sim=info")),
        )
        .init();

    // Env config
    let target = env::var("TARGET").unwrap_or_else(|_| "255.255.255.255:50222".to_string());
    let station_sn = env::var("STATION_SN").unwrap_or_else(|_| "ST-00000512".to_string());
    let hub_sn = env::var("HUB_SN").unwrap_or_else(|_| "HB-00013030".to_string());
    let sample_every_s: u64 = env_or("SAMPLE_EVERY_S", 60).max(1);
    let diurnal_period_s: f64 = env_or("DIURNAL_PERIOD_S", 86_400.0);
    let scenario = Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());

    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .context("failed to bind sender socket")?;
    socket
        .set_broadcast(true)
        .context("failed to enable broadcast")?;

    info!(%target, %scenario, sample_every_s, "simulating {station_sn} via {hub_sn}");

    let mut weather = WeatherSim::new(scenario, diurnal_period_s, sample_every_s);
    let started = now_unix();
    let mut seq = 0_i64;

    let mut obs_tick = interval(Duration::from_secs(sample_every_s));
    let mut hub_tick = interval(HUB_EVERY);
    obs_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    hub_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let payload = tokio::select! {
            _ = obs_tick.tick() => {
                let msg = ObsMsg {
                    serial_number: &station_sn,
                    kind: "obs_st",
                    hub_sn: &hub_sn,
                    obs: vec![weather.sample(now_unix())],
                    firmware_revision: 129,
                };
                debug!(temp = msg.obs[0][7], "observation");
                serde_json::to_vec(&msg)?
            }
            _ = hub_tick.tick() => {
                seq += 1;
                let now = now_unix();
                let msg = HubMsg {
                    serial_number: &hub_sn,
                    kind: "hub_status",
                    firmware_revision: "171",
                    uptime: now - started,
                    rssi: -50 - fastrand::i64(0..10),
                    timestamp: now,
                    reset_flags: "PIN,SFT",
                    seq,
                    fs: [1, 0, 15_675_411, 524_288],
                    radio_stats: [25, 1, 0, 3, 2839],
                    mqtt_stats: [1, 0],
                };
                serde_json::to_vec(&msg)?
            }
        };

        if let Err(e) = socket.send_to(&payload, &target).await {
            warn!("send error: {e}");
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
