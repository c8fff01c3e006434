//! Single-consumer trigger queue feeding the engine.
//!
//! Store-changed notifications arrive in storms (one user edit can fire
//! several), so they are coalesced: after the first one the loop waits for
//! a quiet period before running a pass. A manual or scheduled trigger
//! arriving in that period takes over. Triggers that pile up while a pass
//! runs are dropped, since the pass just finished covers them.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::calendar_store::CalendarStore;
use crate::engine::{SyncEngine, SyncState, SyncTrigger};
use crate::remote::TaskService;
use crate::settings::SettingsStore;

/// Consume triggers until every sender is gone. Returns the number of
/// passes started.
pub async fn run<S, R, K>(
    engine: &mut SyncEngine<S, R, K>,
    mut triggers: mpsc::Receiver<SyncTrigger>,
) -> usize
where
    S: CalendarStore,
    R: TaskService,
    K: SettingsStore,
{
    let debounce = engine.config().debounce;
    let mut passes = 0;

    while let Some(first) = triggers.recv().await {
        let trigger = settle(first, &mut triggers, debounce).await;

        if engine.state() != SyncState::EnabledIdle {
            debug!(%trigger, state = %engine.state(), "ignoring trigger");
            continue;
        }

        passes += 1;
        if let Err(e) = engine.sync(trigger).await {
            warn!(%trigger, error = %e, "sync pass failed");
        }

        let mut dropped = 0;
        while triggers.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "dropped triggers queued during the pass");
        }
    }

    passes
}

/// Wait out a store-changed storm. Other triggers pass straight through.
async fn settle(
    first: SyncTrigger,
    triggers: &mut mpsc::Receiver<SyncTrigger>,
    debounce: Duration,
) -> SyncTrigger {
    if first != SyncTrigger::StoreChanged {
        return first;
    }

    let mut coalesced = 1;
    loop {
        match timeout(debounce, triggers.recv()).await {
            Ok(Some(SyncTrigger::StoreChanged)) => coalesced += 1,
            Ok(Some(other)) => return other,
            Ok(None) | Err(_) => {
                debug!(coalesced, "store settled");
                return SyncTrigger::StoreChanged;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::OnboardingChoice;
    use crate::settings::MemorySettings;
    use crate::testing::{FakeTasks, MemoryStore, at, engine_config, task};

    type Engine = SyncEngine<MemoryStore, FakeTasks, MemorySettings>;

    async fn enabled_engine() -> Engine {
        let mut engine = SyncEngine::new(
            MemoryStore::locked(),
            FakeTasks::with(vec![task(42, 7, Some(at(2025, 3, 1, 10, 0)))]),
            MemorySettings::new(),
            engine_config(),
        )
        .unwrap();
        engine.begin_onboarding().unwrap();
        engine
            .complete_onboarding(OnboardingChoice::default())
            .await
            .unwrap();
        engine
    }

    #[tokio::test(start_paused = true)]
    async fn notification_storm_runs_one_pass() {
        let mut engine = enabled_engine().await;
        let (tx, rx) = mpsc::channel(16);
        for _ in 0..5 {
            tx.send(SyncTrigger::StoreChanged).await.unwrap();
        }
        drop(tx);

        assert_eq!(run(&mut engine, rx).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn separate_bursts_run_separate_passes() {
        let mut engine = enabled_engine().await;
        let debounce = engine.config().debounce;
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            tx.send(SyncTrigger::StoreChanged).await.unwrap();
            tx.send(SyncTrigger::StoreChanged).await.unwrap();
            tokio::time::sleep(debounce * 4).await;
            tx.send(SyncTrigger::StoreChanged).await.unwrap();
        });

        assert_eq!(run(&mut engine, rx).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_trigger_supersedes_pending_notifications() {
        let mut engine = enabled_engine().await;
        let fetches = engine.remote().fetches().len();
        let (tx, rx) = mpsc::channel(16);
        tx.send(SyncTrigger::StoreChanged).await.unwrap();
        tx.send(SyncTrigger::Manual).await.unwrap();
        drop(tx);

        assert_eq!(run(&mut engine, rx).await, 1);
        let fetches_after = engine.remote().fetches();
        assert_eq!(fetches_after.len(), fetches + 1);
        assert_eq!(fetches_after.last(), Some(&None));
    }

    #[tokio::test]
    async fn queued_triggers_are_dropped_after_a_pass() {
        let mut engine = enabled_engine().await;
        let (tx, rx) = mpsc::channel(16);
        for _ in 0..3 {
            tx.send(SyncTrigger::Scheduled).await.unwrap();
        }
        drop(tx);

        assert_eq!(run(&mut engine, rx).await, 1);
    }

    #[tokio::test]
    async fn triggers_are_ignored_while_disabled() {
        let mut engine = SyncEngine::new(
            MemoryStore::new(),
            FakeTasks::default(),
            MemorySettings::new(),
            engine_config(),
        )
        .unwrap();
        let (tx, rx) = mpsc::channel(16);
        tx.send(SyncTrigger::Manual).await.unwrap();
        drop(tx);

        assert_eq!(run(&mut engine, rx).await, 0);
        assert!(engine.remote().fetches().is_empty());
    }
}
