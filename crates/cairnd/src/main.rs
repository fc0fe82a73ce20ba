//! cairnd — Cairn mesh file-transfer node.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};

use cairn_core::config::CairnConfig;
use cairn_services::{new_registry, AckLatch, FileReceiver};
use cairnd::console::Console;
use cairnd::dispatch::Dispatcher;
use cairnd::presence;
use cairnd::sender::Sender;
use cairnd::supervisor::{self, ActivityTracker};
use cairnd::transport::ble::BleBridge;
use cairnd::transport::Radio;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing — RUST_LOG controls verbosity
    // e.g. RUST_LOG=debug cargo run -p cairnd
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = CairnConfig::write_default_if_missing()?;
    let config = CairnConfig::load()?;
    tracing::info!(
        node_id = %config.identity.node_id,
        role = %config.identity.role,
        config = %config_path.display(),
        output_dir = %config.storage.output_dir.display(),
        "cairnd starting"
    );

    let (inbound_tx, inbound_rx) = mpsc::channel(256);
    let factory = Arc::new(BleBridge {
        address: config.radio.address.clone(),
    });
    let radio = Arc::new(Radio::from_config(factory, inbound_tx, &config));

    // Keep trying; the radio side may still be booting.
    while let Err(e) = radio.connect().await {
        tracing::warn!(error = %e, "connection failed, retrying in 5 seconds");
        tokio::time::sleep(Duration::from_secs(5)).await;
    }

    let peers = new_registry();
    let latch = Arc::new(AckLatch::new());
    let receiver = Arc::new(FileReceiver::new(
        config.storage.output_dir.clone(),
        config.transfer.checkpoint_every,
    ));
    let activity = Arc::new(ActivityTracker::new());
    let (shutdown_tx, _) = broadcast::channel(1);

    let dispatcher = Dispatcher::new(
        config.identity.node_id.clone(),
        config.identity.role,
        radio.clone(),
        receiver.clone(),
        peers.clone(),
        latch.clone(),
        activity.clone(),
        config.transfer.clone(),
    );
    let mut dispatch_task = tokio::spawn(dispatcher.run(inbound_rx, shutdown_tx.subscribe()));

    let _watchdog_task = tokio::spawn(supervisor::watchdog_loop(
        receiver.clone(),
        radio.clone(),
        activity,
        config.transfer.idle_timeout(),
        shutdown_tx.subscribe(),
    ));

    if let Err(e) = presence::announce(&radio, &config.identity.node_id, config.identity.role).await
    {
        tracing::warn!(error = %e, "startup announce failed");
    }

    let sender = Arc::new(Sender::new(
        config.identity.node_id.clone(),
        radio.clone(),
        latch,
        config.transfer.clone(),
    ));
    let console = Console {
        node_id: config.identity.node_id.clone(),
        role: config.identity.role,
        radio,
        peers,
        sender,
        receiver: receiver.clone(),
    };

    let mut fatal = false;
    tokio::select! {
        res = console.run() => {
            if let Err(e) = res {
                tracing::warn!(error = %e, "console failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, saving partial files");
        }
        res = &mut dispatch_task => {
            // The dispatcher only exits on its own when the transport is
            // unrecoverable.
            match res {
                Ok(Err(e)) => tracing::error!(error = %e, "transport failed fatally"),
                other => tracing::error!(result = ?other, "dispatcher exited unexpectedly"),
            }
            fatal = true;
        }
    }

    let _ = shutdown_tx.send(());
    receiver.checkpoint_all().await;

    if fatal {
        std::process::exit(1);
    }
    Ok(())
}
