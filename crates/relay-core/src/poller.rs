//! Poll loop: authenticate once, then fetch → diff → deliver on a fixed interval.

use std::{collections::HashSet, sync::Arc, time::Duration};

use chrono::{DateTime, Local, NaiveTime, TimeZone};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    dispatch::Dispatcher,
    ports::{AnnouncementSource, Authenticator},
    store::SeenStore,
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollState {
    Authenticating,
    Polling,
    Stopped,
}

#[derive(Clone, Copy, Debug)]
pub struct PollConfig {
    pub interval: Duration,
    /// Local time of day at which the seen-set is cleared, if any.
    pub daily_reset_at: Option<NaiveTime>,
}

/// Outcome of one poll cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Today's announcements in the listing.
    pub listed: usize,
    /// Of those, not yet seen.
    pub new: usize,
    pub delivered: usize,
    pub failed: usize,
}

pub struct PollLoop {
    cfg: PollConfig,
    auth: Arc<dyn Authenticator>,
    store: Arc<dyn SeenStore>,
    dispatcher: Dispatcher,
    state: PollState,
}

impl PollLoop {
    pub fn new(
        cfg: PollConfig,
        auth: Arc<dyn Authenticator>,
        store: Arc<dyn SeenStore>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            cfg,
            auth,
            store,
            dispatcher,
            state: PollState::Authenticating,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Run until `shutdown` is cancelled. Returns the auth error if login fails.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        self.state = PollState::Authenticating;
        let source = match self.auth.authenticate().await {
            Ok(source) => source,
            Err(e) => {
                tracing::error!(error = %e, "could not log into the portal, stopping");
                self.state = PollState::Stopped;
                return Err(e);
            }
        };
        tracing::info!("logged into the portal");

        self.state = PollState::Polling;
        tracing::info!(
            interval_secs = self.cfg.interval.as_secs(),
            daily_reset_at = ?self.cfg.daily_reset_at,
            "polling started"
        );

        let mut ticker = interval(self.cfg.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut next_reset = self.next_reset_deadline();

        loop {
            // Placeholder deadline when no reset is configured; that branch is disabled.
            let reset_at = next_reset.unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.poll_once(source.as_ref()).await;
                    tracing::debug!(?report, "poll cycle finished");
                }
                _ = sleep_until(reset_at), if next_reset.is_some() => {
                    self.daily_reset().await;
                    next_reset = self.next_reset_deadline();
                }
            }
        }

        self.state = PollState::Stopped;
        tracing::info!("polling stopped");
        Ok(())
    }

    /// One cycle: list today's announcements and deliver the ones not seen yet, in order.
    pub async fn poll_once(&self, source: &dyn AnnouncementSource) -> CycleReport {
        tracing::info!("checking for new announcements");
        let announcements = source.list_todays_announcements().await;
        let mut report = CycleReport {
            listed: announcements.len(),
            ..CycleReport::default()
        };

        let mut in_cycle = HashSet::new();
        let mut fresh = Vec::new();
        for a in announcements {
            if !in_cycle.insert(a.id.clone()) {
                continue;
            }
            match self.store.has(&a.id).await {
                Ok(true) => {}
                Ok(false) => fresh.push(a),
                Err(e) => {
                    tracing::error!(id = %a.id, error = %e, "seen-set lookup failed, skipping");
                    report.failed += 1;
                }
            }
        }
        report.new = fresh.len();

        if fresh.is_empty() {
            tracing::info!("no new announcements today");
            return report;
        }
        tracing::info!(count = fresh.len(), "new announcements found, delivering");

        for a in &fresh {
            let body = source.fetch_body(&a.link).await;
            let attachments = source.fetch_attachments(&a.link).await;
            match self.dispatcher.deliver(source, a, &body, &attachments).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::error!(id = %a.id, title = %a.title, error = %e, "delivery failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// The reset deadline is taken on tokio's monotonic clock. Time the host
    /// spends suspended does not count toward it, so after a suspend the reset
    /// runs late by the length of the suspension.
    fn next_reset_deadline(&self) -> Option<Instant> {
        self.cfg
            .daily_reset_at
            .map(|at| Instant::now() + until_next(Local::now(), at))
    }

    async fn daily_reset(&self) {
        match self.store.clear_all().await {
            Ok(n) => tracing::info!(removed = n, "daily reset cleared the seen-set"),
            Err(e) => tracing::error!(error = %e, "daily reset failed"),
        }
    }
}

/// Time from `now` until the next local occurrence of `at` (strictly in the future).
pub fn until_next<Tz: TimeZone>(now: DateTime<Tz>, at: NaiveTime) -> Duration {
    let tz = now.timezone();
    let today = now.date_naive();
    for day in [today, today + chrono::Days::new(1), today + chrono::Days::new(2)] {
        let Some(candidate) = tz.from_local_datetime(&day.and_time(at)).earliest() else {
            // Skipped by a DST jump; try the next day.
            continue;
        };
        if candidate > now {
            return (candidate - now.clone()).to_std().unwrap_or(Duration::ZERO);
        }
    }
    Duration::from_secs(24 * 60 * 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AttachmentMode,
        dispatch::{test_support::*, DispatchConfig},
        domain::ChatId,
        errors::Error,
        store::MemorySeenStore,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::time::sleep;

    struct FakeAuth {
        portal: Option<Arc<FakePortal>>,
    }

    #[async_trait]
    impl Authenticator for FakeAuth {
        async fn authenticate(&self) -> Result<Arc<dyn AnnouncementSource>> {
            match &self.portal {
                Some(p) => Ok(p.clone() as Arc<dyn AnnouncementSource>),
                None => Err(Error::Auth("sentinel not found".to_string())),
            }
        }
    }

    fn poll_loop(
        portal: Option<Arc<FakePortal>>,
        store: Arc<MemorySeenStore>,
        messenger: Arc<FakeMessenger>,
    ) -> PollLoop {
        poll_loop_with(
            PollConfig {
                interval: Duration::from_secs(60),
                daily_reset_at: None,
            },
            portal,
            store,
            messenger,
        )
    }

    fn poll_loop_with(
        cfg: PollConfig,
        portal: Option<Arc<FakePortal>>,
        store: Arc<MemorySeenStore>,
        messenger: Arc<FakeMessenger>,
    ) -> PollLoop {
        let dispatcher = Dispatcher::new(
            DispatchConfig {
                chat_id: ChatId(7),
                attachment_mode: AttachmentMode::Grouped,
                scratch_root: std::env::temp_dir()
                    .join(format!("poller-test-{}", std::process::id())),
            },
            messenger,
            store.clone(),
        );
        PollLoop::new(
            cfg,
            Arc::new(FakeAuth { portal }),
            store,
            dispatcher,
        )
    }

    #[tokio::test]
    async fn delivers_only_unseen_announcements() {
        let store = Arc::new(MemorySeenStore::with_ids(["1001"]));
        let messenger = Arc::new(FakeMessenger::default());
        let portal = Arc::new(FakePortal::with_listing(vec![
            announcement("1001"),
            announcement("1002"),
        ]));
        let pl = poll_loop(Some(portal.clone()), store.clone(), messenger.clone());

        let report = pl.poll_once(portal.as_ref()).await;

        assert_eq!(
            report,
            CycleReport {
                listed: 2,
                new: 1,
                delivered: 1,
                failed: 0
            }
        );
        assert_eq!(messenger.html_count(), 1);
        assert!(matches!(&messenger.sent()[0], Sent::Html(h) if h.contains("Aviso 1002")));
        assert!(store.has(&"1002".into()).await.unwrap());
        assert_eq!(
            portal.body_requests.lock().unwrap().clone(),
            vec!["https://portal.example/avisos/1002".to_string()]
        );
    }

    #[tokio::test]
    async fn second_cycle_does_not_redeliver() {
        let store = Arc::new(MemorySeenStore::new());
        let messenger = Arc::new(FakeMessenger::default());
        let portal = Arc::new(FakePortal::with_listing(vec![
            announcement("2001"),
            announcement("2002"),
        ]));
        let pl = poll_loop(Some(portal.clone()), store, messenger.clone());

        let first = pl.poll_once(portal.as_ref()).await;
        let second = pl.poll_once(portal.as_ref()).await;

        assert_eq!(first.delivered, 2);
        assert_eq!(second.new, 0);
        assert_eq!(messenger.html_count(), 2);
    }

    #[tokio::test]
    async fn delivers_in_listing_order_and_collapses_duplicates() {
        let store = Arc::new(MemorySeenStore::new());
        let messenger = Arc::new(FakeMessenger::default());
        let portal = Arc::new(FakePortal::with_listing(vec![
            announcement("3"),
            announcement("1"),
            announcement("3"),
            announcement("2"),
        ]));
        let pl = poll_loop(Some(portal.clone()), store, messenger.clone());

        let report = pl.poll_once(portal.as_ref()).await;
        assert_eq!(report.new, 3);

        let titles: Vec<String> = messenger
            .sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Html(h) => h.split("</b>").next().map(|t| t.replace("<b>", "")),
                _ => None,
            })
            .collect();
        assert_eq!(titles, ["Aviso 3", "Aviso 1", "Aviso 2"]);
    }

    #[tokio::test]
    async fn clear_all_makes_listed_items_deliverable_again() {
        let store = Arc::new(MemorySeenStore::new());
        let messenger = Arc::new(FakeMessenger::default());
        let portal = Arc::new(FakePortal::with_listing(vec![announcement("4001")]));
        let pl = poll_loop(Some(portal.clone()), store.clone(), messenger.clone());

        pl.poll_once(portal.as_ref()).await;
        pl.daily_reset().await;
        assert!(!store.has(&"4001".into()).await.unwrap());

        pl.poll_once(portal.as_ref()).await;
        assert_eq!(messenger.html_count(), 2);
    }

    #[tokio::test]
    async fn auth_failure_stops_the_loop() {
        let store = Arc::new(MemorySeenStore::new());
        let messenger = Arc::new(FakeMessenger::default());
        let mut pl = poll_loop(None, store, messenger.clone());

        let err = pl.run(CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, Error::Auth(_)));
        assert_eq!(pl.state(), PollState::Stopped);
        assert!(messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn run_polls_immediately_then_stops_on_shutdown() {
        let store = Arc::new(MemorySeenStore::new());
        let messenger = Arc::new(FakeMessenger::default());
        let portal = Arc::new(FakePortal::with_listing(vec![announcement("5001")]));
        let mut pl = poll_loop(Some(portal), store.clone(), messenger.clone());

        let shutdown = CancellationToken::new();
        let stopper = shutdown.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(200)).await;
            stopper.cancel();
        });

        pl.run(shutdown).await.unwrap();

        assert_eq!(pl.state(), PollState::Stopped);
        assert_eq!(messenger.html_count(), 1);
        assert!(store.has(&"5001".into()).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn run_clears_seen_set_at_daily_reset() {
        let store = Arc::new(MemorySeenStore::new());
        let messenger = Arc::new(FakeMessenger::default());
        let portal = Arc::new(FakePortal::with_listing(vec![announcement("6001")]));
        // Reset two hours from now, polls every 150 minutes.
        let reset_at = (Local::now() + chrono::Duration::hours(2)).time();
        let mut pl = poll_loop_with(
            PollConfig {
                interval: Duration::from_secs(150 * 60),
                daily_reset_at: Some(reset_at),
            },
            Some(portal),
            store.clone(),
            messenger.clone(),
        );

        let shutdown = CancellationToken::new();
        let stopper = shutdown.clone();
        let observed = store.clone();
        let checks = tokio::spawn(async move {
            sleep(Duration::from_secs(60 * 60)).await;
            let before_reset = observed.has(&"6001".into()).await.unwrap();
            sleep(Duration::from_secs(80 * 60)).await;
            let after_reset = observed.len().await.unwrap();
            sleep(Duration::from_secs(40 * 60)).await;
            stopper.cancel();
            (before_reset, after_reset)
        });

        pl.run(shutdown).await.unwrap();
        let (before_reset, after_reset) = checks.await.unwrap();

        assert!(before_reset);
        assert_eq!(after_reset, 0);
        // Delivered on the first tick, and again on the tick after the reset.
        assert_eq!(messenger.html_count(), 2);
        assert!(store.has(&"6001".into()).await.unwrap());
    }

    #[test]
    fn until_next_picks_today_or_tomorrow() {
        let at = NaiveTime::from_hms_opt(23, 0, 0).unwrap();
        let morning = Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap();
        assert_eq!(until_next(morning, at), Duration::from_secs(14 * 3600));

        let late = Utc.with_ymd_and_hms(2026, 10, 18, 23, 30, 0).unwrap();
        assert_eq!(until_next(late, at), Duration::from_secs(23 * 3600 + 30 * 60));

        let exact = Utc.with_ymd_and_hms(2026, 10, 18, 23, 0, 0).unwrap();
        assert_eq!(until_next(exact, at), Duration::from_secs(24 * 3600));
    }
}
