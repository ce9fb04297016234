use std::time::Duration;

use anyhow::Error;
use log::{debug, info};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{interval, Instant, MissedTickBehavior},
};

use crate::{error::ScanError, signal::Rssi};

const SCAN_QUEUE_DEPTH: usize = 100;

/// One advertisement picked up by the radio
#[derive(Clone, Debug)]
pub struct ScanEvent {
    /// The identifier the radio layer uses for the device, usually its address
    pub device_id: String,
    pub raw_name: Option<String>,
    pub rssi: Rssi,
    pub timestamp: Instant,
}

impl ScanEvent {
    pub fn now(device_id: impl Into<String>, raw_name: Option<String>, rssi: Rssi) -> Self {
        Self {
            device_id: device_id.into(),
            raw_name,
            rssi,
            timestamp: Instant::now(),
        }
    }
}

/// Where advertisements come from. Once unsubscribed, a source has to be
/// subscribed to again to get a fresh stream.
pub trait ScanSource: Send {
    fn subscribe(&mut self) -> Result<mpsc::Receiver<ScanEvent>, ScanError>;

    fn unsubscribe(&mut self);
}

/// A source fed by hand through the sender returned from `new`. It can only
/// be subscribed to once.
pub struct ChannelScanSource {
    receiver: Option<mpsc::Receiver<ScanEvent>>,
}

impl ChannelScanSource {
    pub fn new() -> (Self, mpsc::Sender<ScanEvent>) {
        let (tx, rx) = mpsc::channel(SCAN_QUEUE_DEPTH);
        (Self { receiver: Some(rx) }, tx)
    }
}

impl ScanSource for ChannelScanSource {
    fn subscribe(&mut self) -> Result<mpsc::Receiver<ScanEvent>, ScanError> {
        self.receiver.take().ok_or(ScanError::Exhausted)
    }

    fn unsubscribe(&mut self) {
        self.receiver = None;
    }
}

/// A device the scripted source pretends to hear
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Advertisement {
    pub device_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub rssi: Rssi,
    /// Stop advertising after this many rounds, so the device gets lost
    #[serde(default)]
    pub rounds: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ScanScript {
    pub period_ms: u64,
    /// Each sample is moved up to this far from the scripted strength
    #[serde(default)]
    pub jitter: Rssi,
    pub advertisements: Vec<Advertisement>,
}

impl ScanScript {
    pub fn from_ron(script: &str) -> Result<ScanScript, Error> {
        let script: ScanScript = ron::from_str(script)?;
        Ok(script)
    }
}

/// Replays a fixed set of advertisements every period, standing in for a
/// real radio
pub struct ScriptedScanSource {
    script: ScanScript,
    worker: Option<JoinHandle<()>>,
}

impl ScriptedScanSource {
    pub fn new(script: ScanScript) -> Self {
        Self {
            script,
            worker: None,
        }
    }
}

impl ScanSource for ScriptedScanSource {
    fn subscribe(&mut self) -> Result<mpsc::Receiver<ScanEvent>, ScanError> {
        if self.worker.is_some() {
            return Err(ScanError::Unavailable("already scanning".to_string()));
        }
        if self.script.period_ms == 0 {
            return Err(ScanError::Unavailable("scan period must be positive".to_string()));
        }

        let (tx, rx) = mpsc::channel(SCAN_QUEUE_DEPTH);
        let script = self.script.clone();

        info!(
            "Replaying {} advertisement(s) every {}ms",
            script.advertisements.len(),
            script.period_ms
        );

        self.worker = Some(tokio::spawn(async move {
            let mut tick = interval(Duration::from_millis(script.period_ms));
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let mut round = 0;
            loop {
                tick.tick().await;

                for ad in &script.advertisements {
                    if ad.rounds.map_or(false, |rounds| round >= rounds) {
                        continue;
                    }

                    let rssi = if script.jitter > 0 {
                        ad.rssi + rand::thread_rng().gen_range(-script.jitter..=script.jitter)
                    } else {
                        ad.rssi
                    };

                    let event = ScanEvent::now(ad.device_id.clone(), ad.name.clone(), rssi);
                    if tx.send(event).await.is_err() {
                        debug!("Scan listener went away, stopping replay");
                        return;
                    }
                }

                round += 1;
            }
        }));

        Ok(rx)
    }

    fn unsubscribe(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}
