//! Pipeline schedulers for background tasks
//!
//! Each job runs on its own interval until the shutdown token fires. An
//! iteration in progress is allowed to finish; overlapping iterations are
//! skipped instead of queued.

use super::config::PipelineConfig;
use super::db::Store;
use super::engagement::refresh_engagement;
use super::follower_sync::FollowerSync;
use super::graph::GraphReconciler;
use super::reposter::RepostSelector;
use super::rollups::RollupJobs;
use super::social::SocialActions;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Run `job` every `period` until `token` is cancelled
pub async fn run_periodic<F, Fut>(name: &str, period: Duration, token: CancellationToken, mut job: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    log::info!("⏰ Starting {} scheduler (interval: {}ms)", name, period.as_millis());

    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = timer.tick() => {}
        }
        job().await;
    }

    log::info!("🛑 {} scheduler stopped", name);
}

/// Reconcile → engagement refresh → repost selection, in that order
pub struct SocialCycle {
    store: Store,
    social: Arc<dyn SocialActions>,
    reconciler: GraphReconciler,
    selector: RepostSelector,
}

impl SocialCycle {
    pub fn new(config: &PipelineConfig, store: Store, social: Arc<dyn SocialActions>) -> Self {
        Self {
            reconciler: GraphReconciler::new(
                store.clone(),
                social.clone(),
                &config.identifier,
                config.profile_refresh_batch,
            ),
            selector: RepostSelector::new(store.clone(), social.clone(), config.repost_policy()),
            store,
            social,
        }
    }

    pub async fn run(&self, now: i64) {
        let working_set = match self.reconciler.run_cycle(now).await {
            Ok((working_set, _)) => working_set,
            Err(e) => {
                log::error!("❌ Graph reconciliation failed: {}", e);
                return;
            }
        };

        if let Err(e) = refresh_engagement(
            &self.store,
            self.social.as_ref(),
            &working_set,
            self.selector.policy(),
            now,
        )
        .await
        {
            log::warn!("⚠️  Engagement refresh failed: {}", e);
        }

        match self.selector.run_cycle(&working_set, now).await {
            Ok(report) if report.reposted + report.failed > 0 => log::info!(
                "🔁 Reposted {} ({} failed) of {} eligible",
                report.reposted,
                report.failed,
                report.eligible
            ),
            Ok(_) => {}
            Err(e) => log::error!("❌ Repost selection failed: {}", e),
        }
    }
}

/// Spawn every scheduled job. The handles finish once `token` is cancelled.
pub fn spawn_pipeline_jobs(
    config: &PipelineConfig,
    store: Store,
    social: Arc<dyn SocialActions>,
    token: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    let cycle = Arc::new(SocialCycle::new(config, store.clone(), social.clone()));
    handles.push(tokio::spawn(run_periodic(
        "social",
        Duration::from_millis(config.social_interval_ms),
        token.clone(),
        move || {
            let cycle = cycle.clone();
            async move { cycle.run(now()).await }
        },
    )));

    let rollups = Arc::new(RollupJobs::new(store.clone(), config.histogram_recompute_hours));
    let ranked = rollups.clone();
    handles.push(tokio::spawn(run_periodic(
        "rollup",
        Duration::from_millis(config.rollup_interval_ms),
        token.clone(),
        move || {
            let ranked = ranked.clone();
            async move {
                ranked.run_ranked(now());
            }
        },
    )));

    handles.push(tokio::spawn(run_periodic(
        "histogram",
        Duration::from_millis(config.histogram_interval_ms),
        token.clone(),
        move || {
            let rollups = rollups.clone();
            async move {
                rollups.run_histograms(now());
            }
        },
    )));

    if let Some(period) = config.follower_sync_interval() {
        let sync = Arc::new(FollowerSync::new(store, social, &config.identifier));
        handles.push(tokio::spawn(run_periodic(
            "follower sync",
            period,
            token,
            move || {
                let sync = sync.clone();
                async move {
                    if let Err(e) = sync.run(now()).await {
                        log::error!("❌ Follower sync aborted: {}", e);
                    }
                }
            },
        )));
    } else {
        log::info!("   └─ Follower sync disabled");
    }

    handles
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_run_periodic_stops_on_cancel() {
        let token = CancellationToken::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = runs.clone();
        let handle = tokio::spawn(run_periodic(
            "test",
            Duration::from_millis(5),
            token.clone(),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        ));

        tokio::time::sleep(Duration::from_millis(40)).await;
        token.cancel();
        handle.await.unwrap();

        let seen = runs.load(Ordering::SeqCst);
        assert!(seen >= 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(runs.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_tick_never_runs() {
        let token = CancellationToken::new();
        token.cancel();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = runs.clone();
        run_periodic("test", Duration::from_secs(60), token, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
