use std::fmt::{self, Display};

use bytes::Bytes;
use tokio::time::Instant;

use crate::signal::{Rssi, SignalHistory};

/// What tells one physical broadcaster apart from another. Devices whose
/// name resolves to a URL are keyed by that URL, everything else falls back
/// to the identifier the radio reported.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Identity {
    Url(String),
    Radio(String),
}

impl Identity {
    pub fn as_str(&self) -> &str {
        match self {
            Identity::Url(url) => url,
            Identity::Radio(id) => id,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Identity::Url(url) => Some(url),
            Identity::Radio(_) => None,
        }
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shown for devices that advertise without a name
pub const NO_DEVICE_NAME: &str = "No device name";

/// What the resolver knows about the page behind a device. A device swaps the
/// whole snapshot out when a new one arrives, it is never edited in place.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceMetadata {
    pub title: String,
    pub description: String,
    pub site_url: String,
    pub icon_url: String,
    pub icon: Option<Bytes>,
}

/// A single nearby broadcaster. Devices are owned by the registry; everything
/// outside of it only sees clones handed out in snapshots and events.
#[derive(Clone, Debug)]
pub struct Device {
    identity: Identity,
    display_name: String,
    history: SignalHistory,
    last_seen: Instant,
    metadata: Option<DeviceMetadata>,
    /// Insertion order, used to keep sorting stable between equal signals
    pub(crate) seq: u64,
}

impl Device {
    pub fn new(
        identity: Identity,
        display_name: String,
        sample: Rssi,
        history_length: usize,
        now: Instant,
    ) -> Self {
        Self {
            identity,
            display_name,
            history: SignalHistory::new(sample, history_length),
            last_seen: now,
            metadata: None,
            seq: 0,
        }
    }

    pub fn update_signal(&mut self, sample: Rssi, now: Instant) {
        self.history.append(sample);

        // Events can arrive out of order, the timestamp never goes back
        if now > self.last_seen {
            self.last_seen = now;
        }
    }

    /// True once the device has gone unseen for longer than `threshold_ms`
    pub fn is_stale(&self, now: Instant, threshold_ms: u64) -> bool {
        let unseen = now.saturating_duration_since(self.last_seen);
        unseen.as_millis() > threshold_ms as u128
    }

    pub fn apply_metadata(&mut self, metadata: DeviceMetadata) {
        self.metadata = Some(metadata);
    }

    pub fn average_signal(&self) -> Rssi {
        self.history.average()
    }

    pub fn last_signal(&self) -> Rssi {
        self.history.latest()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn url(&self) -> Option<&str> {
        self.identity.url()
    }

    /// Devices without a URL stay in the list but can't be opened
    pub fn is_broadcasting_url(&self) -> bool {
        self.url().is_some()
    }

    pub fn history(&self) -> &SignalHistory {
        &self.history
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub fn metadata(&self) -> Option<&DeviceMetadata> {
        self.metadata.as_ref()
    }
}
