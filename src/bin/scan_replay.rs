use std::time::Duration;

use anyhow::{anyhow, Error};
use log::info;
use physical_web::prelude::*;

const DEFAULT_RUNTIME_SECS: u64 = 30;

/// Replay a RON scan script through the tracker and print where every device
/// ended up.
///
/// Usage: scan-replay <script.ron> [seconds]
#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::try_init()?;

    let mut args = std::env::args().skip(1);
    let script_path = args
        .next()
        .ok_or_else(|| anyhow!("Usage: scan-replay <script.ron> [seconds]"))?;
    let runtime = match args.next() {
        Some(secs) => Duration::from_secs(secs.parse()?),
        None => Duration::from_secs(DEFAULT_RUNTIME_SECS),
    };

    let script = ScanScript::from_ron(&std::fs::read_to_string(&script_path)?)?;
    let config = Config::load().unwrap_or_default();

    let (mut manager, mut events) = DeviceManager::new(&config, ScriptedScanSource::new(script))?;
    manager.start()?;

    let (mut found, mut lost, mut changes) = (0, 0, 0);
    let deadline = tokio::time::sleep(runtime);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Some(DeviceEvent::Found(_)) => found += 1,
                Some(DeviceEvent::Lost(_)) => lost += 1,
                Some(DeviceEvent::Changed) => changes += 1,
                None => break,
            },
        }
    }

    manager.stop().await;

    info!(
        "{} found, {} lost, {} list updates in {}s",
        found,
        lost,
        changes,
        runtime.as_secs()
    );

    for (rank, device) in manager.registry().snapshot().await.iter().enumerate() {
        println!(
            "{:>2}. {:>4} dBm  {}  {:?}",
            rank + 1,
            device.average_signal(),
            device.identity(),
            device.history().samples().collect::<Vec<_>>()
        );
    }

    Ok(())
}
