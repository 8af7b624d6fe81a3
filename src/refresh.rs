//! Periodic progress refresh and change-notification fan-out.
//!
//! One driver task owns the whole cycle, so refreshes can never overlap:
//! the interval skips missed ticks instead of bursting, and the diff always
//! compares two totally-ordered snapshots. A failed refresh keeps the
//! previous snapshot and is visible to operators only.

use crate::config::RefreshConfig;
use crate::dialog::DialogRouter;
use crate::llm::ChatClient;
use crate::progress::{ProgressDelta, ProgressSnapshot, ProgressSource, ProgressStore};
use crate::verification::VerificationRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

pub struct RefreshDriver<C: ChatClient, S: ProgressSource> {
    store: Arc<ProgressStore>,
    source: S,
    registry: VerificationRegistry,
    router: Arc<DialogRouter<C>>,
    interval: Duration,
    epsilon: f64,
}

impl<C: ChatClient, S: ProgressSource + 'static> RefreshDriver<C, S> {
    pub fn new(
        store: Arc<ProgressStore>,
        source: S,
        registry: VerificationRegistry,
        router: Arc<DialogRouter<C>>,
        config: &RefreshConfig,
    ) -> Self {
        Self {
            store,
            source,
            registry,
            router,
            interval: Duration::from_secs(config.interval_secs.max(1)),
            epsilon: config.epsilon,
        }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // The first tick fires immediately: the baseline load. No fan-out —
        // at startup nothing has "changed", the roster just wasn't loaded yet.
        ticker.tick().await;
        match self.store.refresh(&self.source).await {
            Ok(count) => tracing::info!(students = count, "initial progress snapshot loaded"),
            Err(error) => tracing::error!(
                %error,
                "initial progress load failed, roster starts empty"
            ),
        }
        let mut previous = self.store.snapshot();

        loop {
            ticker.tick().await;
            previous = self.run_cycle(previous).await;
        }
    }

    /// One refresh + diff + fan-out pass. Returns the snapshot the next
    /// cycle should diff against: the new one on success, the unchanged
    /// previous one on failure.
    pub(crate) async fn run_cycle(
        &self,
        previous: Arc<ProgressSnapshot>,
    ) -> Arc<ProgressSnapshot> {
        match self.store.refresh(&self.source).await {
            Ok(count) => {
                let deltas = self.store.diff_since(&previous, self.epsilon);
                tracing::info!(
                    students = count,
                    changes = deltas.len(),
                    "progress snapshot refreshed"
                );
                let current = self.store.snapshot();
                self.fan_out(deltas).await;
                current
            }
            Err(error) => {
                tracing::error!(%error, "progress refresh failed, keeping previous snapshot");
                previous
            }
        }
    }

    /// Queue one notification per verified channel whose identity moved.
    /// Each channel fails or succeeds on its own.
    async fn fan_out(&self, deltas: Vec<ProgressDelta>) {
        for delta in deltas {
            match self.registry.lookup_by_identity(&delta.identity).await {
                Ok(Some(record)) => {
                    self.router.notify(record.channel_id, delta).await;
                }
                Ok(None) => {
                    // Not verified anywhere; nobody to tell.
                }
                Err(error) => {
                    tracing::warn!(
                        %error,
                        identity = %delta.identity,
                        "verification lookup failed during notification fan-out"
                    );
                }
            }
        }
    }
}

impl<C: ChatClient, S: ProgressSource> std::fmt::Debug for RefreshDriver<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshDriver")
            .field("interval", &self.interval)
            .field("epsilon", &self.epsilon)
            .finish_non_exhaustive()
    }
}
