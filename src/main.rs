use anyhow::Error;
use log::{info, warn};
use physical_web::prelude::*;

/// The devices the app's debug menu used to inject, with a couple of
/// stragglers that disappear so losing a device can be seen too
fn debug_script() -> ScanScript {
    let mut advertisements = vec![
        Advertisement {
            device_id: "00:1A:7D:DA:71:01".into(),
            name: Some("http://z3.ca/1".into()),
            rssi: -60,
            rounds: None,
        },
        Advertisement {
            device_id: "00:1A:7D:DA:71:02".into(),
            name: Some("http://z3.ca/2".into()),
            rssi: -80,
            rounds: None,
        },
        Advertisement {
            device_id: "00:1A:7D:DA:71:03".into(),
            name: Some("OLP425-ECF5".into()),
            rssi: -72,
            rounds: Some(5),
        },
        Advertisement {
            device_id: "00:1A:7D:DA:71:04".into(),
            name: Some("OLP999-XXXX".into()),
            rssi: -90,
            rounds: Some(3),
        },
    ];

    for i in 1..=8 {
        advertisements.push(Advertisement {
            device_id: format!("00:1A:7D:DA:72:{:02X}", i),
            name: Some(format!("http://jenson.org/iot/{}", i)),
            rssi: -80 - i as i32,
            rounds: None,
        });
    }

    ScanScript {
        period_ms: 1000,
        jitter: 6,
        advertisements,
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::try_init()?;

    // Load the config file
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            warn!("Couldn't load {}, using defaults: {}", CONFIG_FILE, e);
            Config::default()
        }
    };

    let source = ScriptedScanSource::new(debug_script());
    let (mut manager, mut events) = DeviceManager::new(&config, source)?;
    manager.start()?;

    let registry = manager.registry().clone();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(DeviceEvent::Found(device)) => {
                    info!("Found a device: {}", device.display_name());
                }
                Some(DeviceEvent::Lost(device)) => {
                    info!("Lost a device: {}", device.display_name());
                }
                Some(DeviceEvent::Changed) => print_devices(&registry.snapshot().await),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    manager.stop().await;

    Ok(())
}

fn print_devices(devices: &[Device]) {
    println!("--- {} nearby ---", devices.len());

    for device in devices {
        let (title, site) = match device.metadata() {
            Some(metadata) => (metadata.title.as_str(), metadata.site_url.as_str()),
            None => (device.display_name(), device.url().unwrap_or("no URL")),
        };

        println!(
            "{:>4} dBm  {}  {}{}",
            device.average_signal(),
            title,
            site,
            if device.metadata().and_then(|m| m.icon.as_ref()).is_some() {
                "  [icon]"
            } else {
                ""
            }
        );
    }
}
