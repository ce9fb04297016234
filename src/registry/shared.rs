use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use log::debug;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time::{sleep_until, Instant},
};

use super::{
    debounce::{Debouncer, Decision},
    DeviceRegistry, IngestOutcome,
};
use crate::{
    device::{Device, DeviceMetadata, Identity},
    signal::Rssi,
    DeviceEvent,
};

/// The registry as shared between the scan loop, the sweep timer and
/// metadata completions. All reads and writes go through the one lock, and
/// nothing awaits I/O while holding it.
#[derive(Clone)]
pub struct SharedRegistry {
    inner: Arc<Mutex<RegistryState>>,
    /// Set by `shutdown`. Changes are still recorded, but nobody is told.
    stopped: Arc<AtomicBool>,
}

struct RegistryState {
    registry: DeviceRegistry,
    debouncer: Debouncer,
    /// The deferred notification, if one is pending
    timer: Option<JoinHandle<()>>,
    events: mpsc::UnboundedSender<DeviceEvent>,
}

impl RegistryState {
    /// Sort the list and tell the presentation layer to re-read it
    fn deliver(&mut self) {
        self.registry.sort();

        if self.events.send(DeviceEvent::Changed).is_err() {
            debug!("Nobody is listening for list changes");
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl SharedRegistry {
    pub fn new(
        history_length: usize,
        notify_delay: Duration,
        events: mpsc::UnboundedSender<DeviceEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryState {
                registry: DeviceRegistry::new(history_length),
                debouncer: Debouncer::new(notify_delay),
                timer: None,
                events,
            })),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Record a sighting that happened at `seen_at`
    pub async fn ingest(
        &self,
        identity: Identity,
        display_name: String,
        sample: Rssi,
        seen_at: Instant,
    ) -> IngestOutcome {
        let mut state = self.inner.lock().await;
        let outcome = state
            .registry
            .ingest(identity, display_name, sample, seen_at);

        self.queue_changed_notification(&mut state);

        outcome
    }

    /// Remove devices unseen for longer than `threshold_ms` as of `now`.
    /// However many go, the list is only re-announced once.
    pub async fn sweep_expired(&self, now: Instant, threshold_ms: u64) -> Vec<Device> {
        let mut state = self.inner.lock().await;
        let removed = state.registry.sweep_expired(now, threshold_ms);

        if !removed.is_empty() {
            self.queue_changed_notification(&mut state);
        }

        removed
    }

    /// Deliver metadata looked up for `id`. Returns false if the device has
    /// gone away in the meantime.
    pub async fn on_metadata_resolved(&self, id: &str, metadata: DeviceMetadata) -> bool {
        let mut state = self.inner.lock().await;
        if !state.registry.apply_metadata(id, metadata) {
            debug!("Got metadata for {}, but it is no longer around", id);
            return false;
        }

        self.queue_changed_notification(&mut state);
        true
    }

    /// The list as it stood at the last notification
    pub async fn snapshot(&self) -> Vec<Device> {
        self.inner.lock().await.registry.snapshot()
    }

    pub async fn get(&self, id: &str) -> Option<Device> {
        self.inner.lock().await.registry.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.registry.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.registry.is_empty()
    }

    /// Drop any deferred notification and stay quiet until `resume`, so
    /// late lookups can't announce anything after teardown
    pub async fn shutdown(&self) {
        let mut state = self.inner.lock().await;
        self.stopped.store(true, Ordering::SeqCst);
        state.cancel_timer();
        state.debouncer.cancel();
    }

    pub fn resume(&self) {
        self.stopped.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn queue_changed_notification(&self, state: &mut RegistryState) {
        if self.is_stopped() {
            debug!("queue_changed_notification: registry is stopped");
            return;
        }

        let now = Instant::now();

        match state.debouncer.request(now) {
            Decision::NotifyNow => {
                debug!("queue_changed_notification: notifying immediately");
                state.cancel_timer();
                state.deliver();
                state.debouncer.delivered(now);
            }
            Decision::Schedule { fire_at } => {
                debug!(
                    "queue_changed_notification: scheduling for {}ms from now",
                    fire_at.saturating_duration_since(now).as_millis()
                );

                let registry = self.clone();
                state.timer = Some(tokio::spawn(async move {
                    sleep_until(fire_at).await;
                    registry.fire(fire_at).await;
                }));
            }
            Decision::Coalesced => {
                debug!("queue_changed_notification: timer already pending");
            }
        }
    }

    async fn fire(&self, fire_at: Instant) {
        let mut state = self.inner.lock().await;
        if self.is_stopped() || !state.debouncer.fire(fire_at) {
            return;
        }

        // This is the running timer, it only needs forgetting
        state.timer = None;
        state.deliver();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    fn registry() -> (SharedRegistry, mpsc::UnboundedReceiver<DeviceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SharedRegistry::new(3, Duration::from_millis(300), tx), rx)
    }

    fn url(url: &str) -> Identity {
        Identity::Url(url.to_string())
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<DeviceEvent>) -> usize {
        let mut count = 0;
        while let Ok(DeviceEvent::Changed) = rx.try_recv() {
            count += 1;
        }
        count
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_change_is_immediate() {
        let (registry, mut rx) = registry();

        let outcome = registry
            .ingest(url("http://z3.ca/1"), "z3.ca/1".into(), -60, Instant::now())
            .await;

        assert_eq!(outcome, IngestOutcome::New);
        assert!(matches!(rx.try_recv(), Ok(DeviceEvent::Changed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_delivers_once() {
        let (registry, mut rx) = registry();

        registry
            .ingest(url("http://z3.ca/0"), "0".into(), -50, Instant::now())
            .await;
        assert_eq!(drain(&mut rx), 1);

        // Ten sightings inside one window
        let burst_start = Instant::now();
        for i in 0..10 {
            registry
                .ingest(url(&format!("http://z3.ca/{}", i % 3)), "z".into(), -60 - i, Instant::now())
                .await;
            tokio::time::advance(Duration::from_millis(20)).await;
        }
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        assert!(matches!(rx.recv().await, Some(DeviceEvent::Changed)));
        assert!(Instant::now() >= burst_start + Duration::from_millis(300));

        // Let any straggling timers run, there should be none
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(drain(&mut rx), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_changes_each_notify() {
        let (registry, mut rx) = registry();

        registry
            .ingest(url("http://z3.ca/1"), "1".into(), -60, Instant::now())
            .await;
        assert_eq!(drain(&mut rx), 1);

        tokio::time::advance(Duration::from_millis(400)).await;
        registry
            .ingest(url("http://z3.ca/2"), "2".into(), -80, Instant::now())
            .await;
        assert_eq!(drain(&mut rx), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_is_sorted_when_notified() {
        let (registry, mut rx) = registry();

        registry
            .ingest(url("http://z3.ca/2"), "2".into(), -80, Instant::now())
            .await;
        registry
            .ingest(url("http://z3.ca/1"), "1".into(), -60, Instant::now())
            .await;
        registry
            .ingest(url("http://z3.ca/1"), "1".into(), -90, Instant::now())
            .await;

        // Only the first ingest has been announced so far
        assert_eq!(drain(&mut rx), 1);
        assert!(matches!(rx.recv().await, Some(DeviceEvent::Changed)));

        let order: Vec<_> = registry
            .snapshot()
            .await
            .iter()
            .map(|d| (d.identity().to_string(), d.average_signal()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("http://z3.ca/1".to_string(), -75),
                ("http://z3.ca/2".to_string(), -80),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_notifies_once_per_batch() {
        let (registry, mut rx) = registry();

        for i in 0..5 {
            registry
                .ingest(url(&format!("http://jenson.org/iot/{}", i)), "iot".into(), -80, Instant::now())
                .await;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        drain(&mut rx);

        tokio::time::advance(Duration::from_secs(5)).await;
        let removed = registry.sweep_expired(Instant::now(), 1000).await;
        assert_eq!(removed.len(), 5);
        assert!(registry.is_empty().await);
        assert_eq!(drain(&mut rx), 1);

        // An empty sweep doesn't announce anything
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(registry.sweep_expired(Instant::now(), 1000).await.is_empty());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(drain(&mut rx), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_metadata_is_ignored() {
        let (registry, mut rx) = registry();
        let metadata = DeviceMetadata {
            title: "Gone".into(),
            description: "Unknown description".into(),
            site_url: "http://z3.ca/gone".into(),
            icon_url: "http://z3.ca/favicon.ico".into(),
            icon: None,
        };

        assert!(!registry.on_metadata_resolved("http://z3.ca/gone", metadata).await);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(drain(&mut rx), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_notification() {
        let (registry, mut rx) = registry();

        registry
            .ingest(url("http://z3.ca/1"), "1".into(), -60, Instant::now())
            .await;
        registry
            .ingest(url("http://z3.ca/1"), "1".into(), -61, Instant::now())
            .await;
        assert_eq!(drain(&mut rx), 1);

        registry.shutdown().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(drain(&mut rx), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_notifications_after_shutdown() {
        let (registry, mut rx) = registry();

        registry
            .ingest(url("http://z3.ca/1"), "1".into(), -60, Instant::now())
            .await;
        assert_eq!(drain(&mut rx), 1);

        registry.shutdown().await;
        assert!(registry.is_stopped());

        // Metadata that was already on its way still lands, quietly
        let metadata = DeviceMetadata {
            title: "Light".into(),
            description: "Unknown description".into(),
            site_url: "http://z3.ca/1".into(),
            icon_url: "http://z3.ca/favicon.ico".into(),
            icon: None,
        };
        assert!(registry.on_metadata_resolved("http://z3.ca/1", metadata).await);
        assert_eq!(registry.get("http://z3.ca/1").await.unwrap().metadata().unwrap().title, "Light");

        tokio::time::advance(Duration::from_secs(1)).await;
        registry
            .ingest(url("http://z3.ca/2"), "2".into(), -80, Instant::now())
            .await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(drain(&mut rx), 0);

        // Notifications come back once resumed
        registry.resume();
        registry
            .ingest(url("http://z3.ca/2"), "2".into(), -81, Instant::now())
            .await;
        assert_eq!(drain(&mut rx), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_uses_given_time() {
        let (registry, _rx) = registry();
        let seen = Instant::now();

        registry
            .ingest(url("http://z3.ca/1"), "1".into(), -60, seen)
            .await;

        // The clock hasn't moved, only the time handed in
        assert!(registry.sweep_expired(seen + Duration::from_millis(1000), 1000).await.is_empty());
        let removed = registry.sweep_expired(seen + Duration::from_millis(1001), 1000).await;
        assert_eq!(removed.len(), 1);
        assert!(registry.is_empty().await);
    }
}
