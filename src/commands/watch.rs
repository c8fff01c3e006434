use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use kuna_core::{KunaConfig, SyncTrigger, trigger};
use owo_colors::OwoColorize;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tracing::debug;

use crate::store;

/// How often the calendar directory is checked for outside edits
const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub async fn run(config: &KunaConfig, every: Option<Duration>) -> Result<()> {
    let mut engine = super::open_enabled_engine(config)?;
    let every = every.unwrap_or(Duration::from_secs(config.sync_interval_secs));
    let root = config.data_path();

    println!(
        "Watching {} (syncing every {}, Ctrl-C to stop)",
        root.display(),
        humantime::format_duration(every)
    );

    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(schedule(tx.clone(), every));
    tokio::spawn(poll_store(tx, root));

    let passes = tokio::select! {
        passes = trigger::run(&mut engine, rx) => passes,
        _ = tokio::signal::ctrl_c() => 0,
    };
    debug!(passes, "watch stopped");

    if !engine.errors().is_empty() {
        println!();
        for error in engine.errors() {
            println!(
                "{} {}",
                error.at.format("%Y-%m-%d %H:%M:%S").dimmed(),
                error.message.red()
            );
        }
    }

    Ok(())
}

/// A manual pass right away, then scheduled ones.
async fn schedule(tx: mpsc::Sender<SyncTrigger>, every: Duration) {
    let mut ticks = interval(every);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticks.tick().await;

    if tx.send(SyncTrigger::Manual).await.is_err() {
        return;
    }
    loop {
        ticks.tick().await;
        if tx.send(SyncTrigger::Scheduled).await.is_err() {
            return;
        }
    }
}

/// Send a store-changed trigger whenever the directory fingerprint moves.
async fn poll_store(tx: mpsc::Sender<SyncTrigger>, root: PathBuf) {
    let mut ticks = interval(POLL_INTERVAL);
    let mut last = store::fingerprint(&root);

    loop {
        ticks.tick().await;
        let current = store::fingerprint(&root);
        if current == last {
            continue;
        }
        last = current;
        if tx.try_send(SyncTrigger::StoreChanged).is_err() && tx.is_closed() {
            return;
        }
    }
}
