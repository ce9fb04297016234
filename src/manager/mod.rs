use log::{debug, info, warn};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};

use crate::{
    config::Config,
    device::{Device, Identity, NO_DEVICE_NAME},
    error::{ResolveError, ScanError},
    metadata::MetadataResolver,
    registry::{IngestOutcome, SharedRegistry},
    scan::{ScanEvent, ScanSource},
    signal::Rssi,
    DeviceEvent,
};

/// Ties a scan source to the registry. It feeds every advertisement in,
/// periodically sweeps out devices that went quiet, and sends newly found
/// devices off for metadata lookup.
pub struct DeviceManager<S: ScanSource> {
    source: S,
    registry: SharedRegistry,
    resolver: MetadataResolver,
    events: mpsc::UnboundedSender<DeviceEvent>,
    config: Config,
    worker: Option<ScanWorkerHandle>,
}

struct ScanWorkerHandle {
    shutdown: oneshot::Sender<()>,
    injector: mpsc::Sender<ScanEvent>,
    handle: JoinHandle<()>,
}

impl<S: ScanSource> DeviceManager<S> {
    /// Build a manager along with the stream of found/lost/changed events
    pub fn new(
        config: &Config,
        source: S,
    ) -> Result<(Self, mpsc::UnboundedReceiver<DeviceEvent>), ResolveError> {
        let (events, rx) = mpsc::unbounded_channel();
        let registry = SharedRegistry::new(
            config.history_length,
            config.notify_delay(),
            events.clone(),
        );
        let resolver = MetadataResolver::new(config, registry.clone())?;

        let manager = Self {
            source,
            registry,
            resolver,
            events,
            config: config.clone(),
            worker: None,
        };

        Ok((manager, rx))
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> &MetadataResolver {
        &self.resolver
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn start(&mut self) -> Result<(), ScanError> {
        if self.worker.is_some() {
            warn!("Device manager is already running");
            return Ok(());
        }

        if self.config.sweep_interval_ms == 0 {
            return Err(ScanError::InvalidConfig("sweep_interval_ms must be positive".to_string()));
        }
        if self.config.batch_window_ms == 0 {
            return Err(ScanError::InvalidConfig("batch_window_ms must be positive".to_string()));
        }

        let scan_rx = self.source.subscribe()?;
        self.registry.resume();
        let (shutdown, shutdown_rx) = oneshot::channel();
        let (injector, injected_rx) = mpsc::channel(16);

        let worker = ScanWorker {
            registry: self.registry.clone(),
            resolver: self.resolver.clone(),
            events: self.events.clone(),
            config: self.config.clone(),
            pending: Vec::new(),
        };

        let handle = tokio::spawn(worker.run(scan_rx, injected_rx, shutdown_rx));
        info!("Started searching for devices");

        self.worker = Some(ScanWorkerHandle {
            shutdown,
            injector,
            handle,
        });

        Ok(())
    }

    /// Stop scanning and sweeping. Calling this without `start` is harmless.
    /// Lookups that are already in flight are left to finish on their own.
    pub async fn stop(&mut self) {
        match self.worker.take() {
            Some(worker) => {
                let _ = worker.shutdown.send(());
                if let Err(e) = worker.handle.await {
                    warn!("Scan worker ended badly: {}", e);
                }
                info!("Stopped searching for devices");
            }
            None => debug!("Device manager was not running"),
        }

        self.source.unsubscribe();
        self.registry.shutdown().await;
    }

    /// Push a made up device through the same path as a real sighting.
    /// Returns false if the manager isn't running.
    pub async fn found_device_debug(&self, url: &str, rssi: Rssi) -> bool {
        let Some(worker) = &self.worker else {
            warn!("Can't inject {}, the device manager is not running", url);
            return false;
        };

        let event = ScanEvent::now(url, Some(url.to_string()), rssi);
        worker.injector.send(event).await.is_ok()
    }
}

/// The state owned by the background loop
struct ScanWorker {
    registry: SharedRegistry,
    resolver: MetadataResolver,
    events: mpsc::UnboundedSender<DeviceEvent>,
    config: Config,
    /// Devices found since the last batch went out
    pending: Vec<Device>,
}

impl ScanWorker {
    async fn run(
        mut self,
        mut scan_rx: mpsc::Receiver<ScanEvent>,
        mut injected_rx: mpsc::Receiver<ScanEvent>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let now = Instant::now();

        let mut sweep = interval_at(now + self.config.sweep_interval(), self.config.sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut batch = interval_at(now + self.config.batch_window(), self.config.batch_window());
        batch.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut scanning = true;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                event = scan_rx.recv(), if scanning => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!("Scan source closed, no more devices will be found");
                        scanning = false;
                    }
                },
                Some(event) = injected_rx.recv() => self.handle_event(event).await,
                _ = sweep.tick() => self.sweep().await,
                _ = batch.tick() => self.flush_batch(),
            }
        }
    }

    async fn handle_event(&mut self, event: ScanEvent) {
        let (identity, display_name) = self.identify(&event);

        let outcome = self
            .registry
            .ingest(identity.clone(), display_name, event.rssi, event.timestamp)
            .await;

        if outcome != IngestOutcome::New {
            return;
        }

        let Some(device) = self.registry.get(identity.as_str()).await else {
            return;
        };

        info!("Found a device: {} ({})", device.display_name(), identity);

        if device.is_broadcasting_url() {
            self.pending.push(device.clone());
        }

        if self.events.send(DeviceEvent::Found(device)).is_err() {
            debug!("Nobody is listening for found devices");
        }
    }

    /// Devices whose name resolves to a URL are known by it. Everything else
    /// is known by its radio identifier and can't be looked up.
    fn identify(&self, event: &ScanEvent) -> (Identity, String) {
        let display_name = event
            .raw_name
            .clone()
            .unwrap_or_else(|| NO_DEVICE_NAME.to_string());

        let identity = match event
            .raw_name
            .as_deref()
            .and_then(|name| self.resolver.resolve_url(name))
        {
            Some(url) => Identity::Url(url),
            None => Identity::Radio(event.device_id.clone()),
        };

        (identity, display_name)
    }

    async fn sweep(&mut self) {
        let removed = self
            .registry
            .sweep_expired(Instant::now(), self.config.max_inactive_ms)
            .await;

        for device in removed {
            info!("Lost a device: {} ({})", device.display_name(), device.identity());

            self.pending
                .retain(|pending| pending.identity() != device.identity());
            if self.events.send(DeviceEvent::Lost(device)).is_err() {
                debug!("Nobody is listening for lost devices");
            }
        }
    }

    fn flush_batch(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let batch = std::mem::take(&mut self.pending);
        if self.resolver.resolve_batch(&batch).is_none() {
            debug!("Nothing in the batch could be looked up");
        }
    }
}
