use std::{cmp::Reverse, collections::HashMap};

use log::debug;
use tokio::time::Instant;

use crate::{
    device::{Device, DeviceMetadata, Identity},
    signal::Rssi,
};

pub mod debounce;
pub mod shared;

pub use shared::SharedRegistry;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    /// First sighting, the caller should look up metadata for it
    New,
    Updated,
}

/// Every device currently in range. Holds at most one device per identity
/// and keeps them in presentation order, strongest average signal first.
///
/// The order is only recomputed by `sort`, so between notifications newly
/// found devices sit at the end of the list.
#[derive(Debug)]
pub struct DeviceRegistry {
    devices: HashMap<String, Device>,
    order: Vec<String>,
    next_seq: u64,
    history_length: usize,
}

impl DeviceRegistry {
    pub fn new(history_length: usize) -> Self {
        Self {
            devices: HashMap::new(),
            order: Vec::new(),
            next_seq: 0,
            history_length,
        }
    }

    pub fn ingest(
        &mut self,
        identity: Identity,
        display_name: String,
        sample: Rssi,
        now: Instant,
    ) -> IngestOutcome {
        if let Some(device) = self.devices.get_mut(identity.as_str()) {
            device.update_signal(sample, now);
            return IngestOutcome::Updated;
        }

        debug!("Tracking new device {} ({})", identity, display_name);

        let key = identity.as_str().to_string();
        let mut device = Device::new(identity, display_name, sample, self.history_length, now);
        device.seq = self.next_seq;
        self.next_seq += 1;

        self.devices.insert(key.clone(), device);
        self.order.push(key);

        IngestOutcome::New
    }

    /// Drop every device that has gone unseen for longer than `threshold_ms`
    /// and hand them back in list order.
    pub fn sweep_expired(&mut self, now: Instant, threshold_ms: u64) -> Vec<Device> {
        let devices = &mut self.devices;
        let mut removed = Vec::new();

        self.order.retain(|key| {
            let stale = devices
                .get(key)
                .map_or(true, |device| device.is_stale(now, threshold_ms));

            if stale {
                if let Some(device) = devices.remove(key) {
                    removed.push(device);
                }
            }

            !stale
        });

        removed
    }

    /// Store metadata for the device that was looked up under `id`. Returns
    /// false when the device has expired since the lookup started.
    pub fn apply_metadata(&mut self, id: &str, metadata: DeviceMetadata) -> bool {
        match self.devices.get_mut(id) {
            Some(device) => {
                device.apply_metadata(metadata);
                true
            }
            None => false,
        }
    }

    /// Reorder by descending average signal. Devices with the same average
    /// keep the order they were first seen in.
    pub fn sort(&mut self) {
        let devices = &self.devices;
        self.order.sort_by_cached_key(|key| {
            devices
                .get(key)
                .map(|device| (Reverse(device.average_signal()), device.seq))
        });
    }

    /// The list as of the last `sort`
    pub fn snapshot(&self) -> Vec<Device> {
        self.order
            .iter()
            .filter_map(|key| self.devices.get(key))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.devices.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
