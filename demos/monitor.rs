//! Watch all six zones through the bridge named by `ITACH_HOST` / `ITACH_PORT`.
//!
//! ```text
//! ITACH_HOST=192.168.1.50 cargo run --example monitor
//! ```

use monozone::{BridgeConfig, MonozoneClient, StateUpdate};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = BridgeConfig::from_env()?;
    println!("Monitoring bridge at {}:{}", config.host, config.port);

    let client = MonozoneClient::new(config);
    if let Err(e) = client.connect().await {
        // the poller keeps retrying
        eprintln!("Initial connect failed: {}", e);
    }

    let mut updates = client.subscribe();
    let mut poller = client.poller();
    poller.start();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = updates.recv() => match update {
                Ok(StateUpdate::Zone(z)) => println!(
                    "zone {} | power {:>3} | src {} | vol {:>2} | mute {:>3} | bass {:+} treble {:+} bal {:+}",
                    z.unit,
                    if z.power { "on" } else { "off" },
                    z.source,
                    z.volume,
                    if z.mute { "on" } else { "off" },
                    z.bass_db(),
                    z.treble_db(),
                    z.balance_offset(),
                ),
                Ok(StateUpdate::Connection(up)) => {
                    println!("bridge {}", if up { "connected" } else { "disconnected" })
                }
                Err(e) => eprintln!("{}", e),
            },
        }
    }

    poller.stop().await;
    client.disconnect().await;
    Ok(())
}
