use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::filter;
use crate::notify::Notifier;
use crate::render::{render, RenderOptions};
use crate::search::SearchSource;
use crate::storage::{Storage, Subscription, SubscriptionId};

#[derive(Debug, Clone, Copy)]
pub struct PollerSettings {
    pub interval: Duration,
    pub page_size: u32,
    pub max_concurrent_fetches: usize,
    pub render: RenderOptions,
}

/// Totals for one pass over all subscriptions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub subscriptions: usize,
    pub fetch_failures: usize,
    pub delivered: usize,
    pub undelivered: usize,
    pub advanced: usize,
}

#[derive(Debug, Default)]
struct Outcome {
    fetch_failed: bool,
    delivered: usize,
    undelivered: usize,
    advanced: bool,
}

/// Periodically polls every subscription and notifies its destination about new items.
pub struct Poller {
    storage: Arc<Storage>,
    search: Arc<dyn SearchSource>,
    notifier: Arc<dyn Notifier>,
    settings: PollerSettings,
    poll_now: Arc<Notify>,
}

impl Poller {
    pub fn new(
        storage: Arc<Storage>,
        search: Arc<dyn SearchSource>,
        notifier: Arc<dyn Notifier>,
        settings: PollerSettings,
        poll_now: Arc<Notify>,
    ) -> Self {
        Self {
            storage,
            search,
            notifier,
            settings,
            poll_now,
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        async move {
            if !self.wait_until_ready(&cancel).await {
                return Ok(());
            }

            let mut ticker = time::interval(self.settings.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                select! {
                    _ = cancel.cancelled() => {
                        debug!("Received a cancellation signal; exiting");
                        break;
                    }

                    _ = self.poll_now.notified() => {
                        info!("Received a forced poll request");
                        ticker.reset();
                    }

                    _ = ticker.tick() => {}
                }

                match self.run_cycle(&cancel).await {
                    Ok(report) => debug!(
                        subscriptions = report.subscriptions,
                        fetch_failures = report.fetch_failures,
                        delivered = report.delivered,
                        undelivered = report.undelivered,
                        advanced = report.advanced,
                        "Finished a poll cycle",
                    ),
                    Err(e) => error!("Encountered a failure during a poll cycle: {e:#}"),
                }
            }

            Ok(())
        }
        .instrument(info_span!("poller"))
        .await
    }

    /// Returns `false` if cancelled before the delivery channel became ready.
    async fn wait_until_ready(&self, cancel: &CancellationToken) -> bool {
        loop {
            match self.notifier.ready().await {
                Ok(()) => {
                    info!("The delivery channel is ready; starting to poll");
                    return true;
                }

                Err(e) => error!(
                    "The delivery channel is not ready: {:#}",
                    anyhow::Error::new(e)
                ),
            }

            select! {
                _ = cancel.cancelled() => return false,
                _ = time::sleep(self.settings.interval) => {}
            }
        }
    }

    /// Processes every subscription once.
    ///
    /// A failure while processing one subscription is logged and does not affect the others.
    /// Only a failure to read the subscription list fails the whole cycle.
    ///
    /// Once `cancel` fires, no further subscriptions are started. Those already in progress
    /// finish delivering and commit their cursors.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport> {
        async {
            let subs = {
                let mut tx = self.storage.begin().await?;
                let subs = tx.get_subscriptions().await?;
                tx.commit().await?;

                subs
            };

            let outcomes = stream::iter(subs)
                .take_until(cancel.cancelled())
                .map(|sub| {
                    let span = info_span!("subscription", id = %sub.id);

                    self.process(sub).instrument(span)
                })
                .buffer_unordered(self.settings.max_concurrent_fetches.max(1))
                .collect::<Vec<_>>()
                .await;

            let mut report = CycleReport {
                subscriptions: outcomes.len(),
                ..Default::default()
            };

            for outcome in outcomes {
                report.fetch_failures += outcome.fetch_failed as usize;
                report.delivered += outcome.delivered;
                report.undelivered += outcome.undelivered;
                report.advanced += outcome.advanced as usize;
            }

            Ok(report)
        }
        .instrument(info_span!("cycle"))
        .await
    }

    async fn process(&self, sub: Subscription) -> Outcome {
        let mut outcome = Outcome::default();

        let items = match self.search.search(&sub.query, self.settings.page_size).await {
            Ok(items) => items,

            Err(e) => {
                error!(
                    "Could not fetch the search results: {:#}",
                    anyhow::Error::new(e)
                );
                outcome.fetch_failed = true;

                return outcome;
            }
        };

        let items = filter::new_items(items, &sub);

        let Some(cursor) = filter::next_cursor(&items) else {
            trace!("No new items");
            return outcome;
        };

        info!("Found {} new items", items.len());

        for item in &items {
            let notification = render(item, &sub, &self.settings.render);

            match self.notifier.send(&sub.destination, &notification).await {
                Ok(()) => outcome.delivered += 1,

                Err(e) => {
                    warn!(
                        item_id = ?item.id,
                        "Could not deliver a notification: {:#}",
                        anyhow::Error::new(e)
                    );
                    outcome.undelivered += 1;
                }
            }
        }

        match self.advance(sub.id, cursor).await {
            Ok(true) => outcome.advanced = true,
            Ok(false) => debug!("The subscription was deleted during the cycle"),
            Err(e) => error!("{e:#}"),
        }

        outcome
    }

    async fn advance(&self, id: SubscriptionId, cursor: i64) -> Result<bool> {
        let mut tx = self.storage.begin().await?;
        let updated = tx.update_cursor(id, cursor).await?;
        tx.commit()
            .await
            .context("could not save the subscription cursor")?;

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use ::time::OffsetDateTime;

    use crate::testing::{item, render_options, FakeNotifier, FakeSearch};

    use super::*;

    const QUERY_A: &str = "https://www.vinted.fr/catalog?search_text=a";
    const QUERY_B: &str = "https://www.vinted.fr/catalog?search_text=b";

    struct Harness {
        storage: Arc<Storage>,
        search: Arc<FakeSearch>,
        notifier: Arc<FakeNotifier>,
        poll_now: Arc<Notify>,
    }

    impl Harness {
        async fn new() -> Self {
            Self {
                storage: Arc::new(Storage::in_memory().await.unwrap()),
                search: Default::default(),
                notifier: Default::default(),
                poll_now: Default::default(),
            }
        }

        fn poller(&self, interval: Duration) -> Poller {
            Poller::new(
                self.storage.clone(),
                self.search.clone(),
                self.notifier.clone(),
                PollerSettings {
                    interval,
                    page_size: 20,
                    max_concurrent_fetches: 2,
                    render: render_options(),
                },
                self.poll_now.clone(),
            )
        }

        async fn subscribe(&self, query: &str, destination: &str, created: i64) -> SubscriptionId {
            let mut tx = self.storage.begin().await.unwrap();
            let id = tx
                .insert_subscription(
                    query,
                    destination,
                    OffsetDateTime::from_unix_timestamp(created).unwrap(),
                )
                .await
                .unwrap();
            tx.commit().await.unwrap();

            id
        }

        async fn set_cursor(&self, id: SubscriptionId, cursor: i64) {
            let mut tx = self.storage.begin().await.unwrap();
            assert!(tx.update_cursor(id, cursor).await.unwrap());
            tx.commit().await.unwrap();
        }

        async fn get(&self, id: SubscriptionId) -> Option<Subscription> {
            let mut tx = self.storage.begin().await.unwrap();
            let sub = tx.get_subscription(id).await.unwrap();
            tx.commit().await.unwrap();

            sub
        }

        async fn delete(&self, id: SubscriptionId) {
            let mut tx = self.storage.begin().await.unwrap();
            assert!(tx.delete_subscription(id).await.unwrap());
            tx.commit().await.unwrap();
        }
    }

    async fn cycle(poller: &Poller) -> CycleReport {
        poller.run_cycle(&CancellationToken::new()).await.unwrap()
    }

    fn sample_items() -> Vec<crate::search::Item> {
        vec![
            item(1, 2000, false),
            item(2, 1900, true),
            item(3, 1800, false),
        ]
    }

    #[tokio::test]
    async fn first_cycle_notifies_only_the_newest_item() {
        let h = Harness::new().await;
        let id = h.subscribe(QUERY_A, "100", 1000).await;
        h.search.set(QUERY_A, sample_items());

        let report = cycle(&h.poller(Duration::from_secs(5))).await;

        assert_eq!(report.subscriptions, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.advanced, 1);
        assert_eq!(h.notifier.item_urls("100"), ["https://www.vinted.fr/items/1"]);

        let sub = h.get(id).await.unwrap();
        assert!(sub.synced);
        assert_eq!(sub.last_seen, 2000);
    }

    #[tokio::test]
    async fn synced_subscriptions_get_items_newer_than_the_cursor() {
        let h = Harness::new().await;
        let id = h.subscribe(QUERY_A, "100", 1000).await;
        h.set_cursor(id, 1800).await;
        h.search.set(
            QUERY_A,
            vec![
                item(4, 2100, false),
                item(1, 2000, false),
                item(2, 1900, true),
                item(3, 1800, false),
            ],
        );

        let report = cycle(&h.poller(Duration::from_secs(5))).await;

        assert_eq!(report.delivered, 2);
        assert_eq!(
            h.notifier.item_urls("100"),
            [
                "https://www.vinted.fr/items/4",
                "https://www.vinted.fr/items/1"
            ]
        );
        assert_eq!(h.get(id).await.unwrap().last_seen, 2100);
    }

    #[tokio::test]
    async fn repeating_a_cycle_without_new_items_changes_nothing() {
        let h = Harness::new().await;
        let id = h.subscribe(QUERY_A, "100", 1000).await;
        h.search.set(QUERY_A, sample_items());
        let poller = h.poller(Duration::from_secs(5));

        cycle(&poller).await;
        let before = h.get(id).await.unwrap();

        let report = cycle(&poller).await;

        assert_eq!(report.delivered, 0);
        assert_eq!(report.advanced, 0);
        assert_eq!(h.notifier.sent().len(), 1);
        assert_eq!(h.get(id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn no_results_leave_the_subscription_untouched() {
        let h = Harness::new().await;
        let id = h.subscribe(QUERY_A, "100", 1000).await;
        h.search.set(QUERY_A, vec![item(1, 3000, true)]);

        let report = cycle(&h.poller(Duration::from_secs(5))).await;

        assert_eq!(report.delivered, 0);
        let sub = h.get(id).await.unwrap();
        assert!(!sub.synced);
        assert_eq!(sub.last_seen, 1000);
    }

    #[tokio::test]
    async fn a_failing_fetch_does_not_block_other_subscriptions() {
        let h = Harness::new().await;
        let a = h.subscribe(QUERY_A, "100", 1000).await;
        let b = h.subscribe(QUERY_B, "200", 1000).await;
        h.search.fail(QUERY_A);
        h.search.set(QUERY_B, sample_items());

        let report = cycle(&h.poller(Duration::from_secs(5))).await;

        assert_eq!(report.subscriptions, 2);
        assert_eq!(report.fetch_failures, 1);
        assert_eq!(report.advanced, 1);
        assert!(h.notifier.item_urls("100").is_empty());
        assert_eq!(h.notifier.item_urls("200").len(), 1);

        let a = h.get(a).await.unwrap();
        assert!(!a.synced);
        assert_eq!(a.last_seen, 1000);
        assert_eq!(h.get(b).await.unwrap().last_seen, 2000);
    }

    #[tokio::test]
    async fn delivery_failures_do_not_hold_back_the_cursor() {
        let h = Harness::new().await;
        let id = h.subscribe(QUERY_A, "100", 1000).await;
        h.set_cursor(id, 1000).await;
        h.search.set(QUERY_A, sample_items());
        h.notifier.fail_for("100");

        let report = cycle(&h.poller(Duration::from_secs(5))).await;

        assert_eq!(report.delivered, 0);
        assert_eq!(report.undelivered, 2);
        assert_eq!(report.advanced, 1);
        assert_eq!(h.get(id).await.unwrap().last_seen, 2000);
    }

    #[tokio::test]
    async fn subscriptions_deleted_mid_cycle_are_not_resurrected() {
        let h = Harness::new().await;
        let id = h.subscribe(QUERY_A, "100", 1000).await;
        h.search.set(QUERY_A, sample_items());
        let poller = h.poller(Duration::from_secs(5));

        let snapshot = h.get(id).await.unwrap();
        h.delete(id).await;

        let outcome = poller.process(snapshot).await;

        assert_eq!(outcome.delivered, 1);
        assert!(!outcome.advanced);
        assert_eq!(h.get(id).await, None);
    }

    #[tokio::test]
    async fn forced_polls_run_a_cycle_immediately() {
        let h = Harness::new().await;
        h.subscribe(QUERY_A, "100", 1000).await;
        h.search.set(QUERY_A, sample_items());

        let cancel = CancellationToken::new();
        let task = tokio::spawn(h.poller(Duration::from_secs(3600)).run(cancel.clone()));

        // the first tick fires right away
        h.notifier.wait_for(1).await;

        h.search.set(
            QUERY_A,
            vec![item(5, 2500, false), item(1, 2000, false)],
        );
        h.poll_now.notify_one();
        h.notifier.wait_for(2).await;

        cancel.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(
            h.notifier.item_urls("100"),
            [
                "https://www.vinted.fr/items/1",
                "https://www.vinted.fr/items/5"
            ]
        );
    }

    #[tokio::test]
    async fn shutdown_lets_in_flight_deliveries_commit_their_cursor() {
        let h = Harness::new().await;
        let id = h.subscribe(QUERY_A, "100", 1000).await;
        h.search.set(QUERY_A, sample_items());
        h.notifier.set_delay(Duration::from_millis(200));

        let cancel = CancellationToken::new();
        let task = tokio::spawn(h.poller(Duration::from_secs(3600)).run(cancel.clone()));

        // the first tick fires right away, so the delivery is in flight by now
        time::sleep(Duration::from_millis(50)).await;
        assert!(h.notifier.sent().is_empty());
        cancel.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(h.notifier.item_urls("100"), ["https://www.vinted.fr/items/1"]);
        let sub = h.get(id).await.unwrap();
        assert!(sub.synced);
        assert_eq!(sub.last_seen, 2000);
    }

    #[tokio::test]
    async fn cancelled_cycles_start_no_new_subscriptions() {
        let h = Harness::new().await;
        let id = h.subscribe(QUERY_A, "100", 1000).await;
        h.search.set(QUERY_A, sample_items());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = h.poller(Duration::from_secs(5)).run_cycle(&cancel).await.unwrap();

        assert_eq!(report, CycleReport::default());
        assert!(h.notifier.sent().is_empty());
        assert!(!h.get(id).await.unwrap().synced);
    }

    #[tokio::test]
    async fn an_unavailable_store_fails_the_cycle_but_not_the_poller() {
        let h = Harness::new().await;
        h.subscribe(QUERY_A, "100", 1000).await;
        h.search.set(QUERY_A, sample_items());
        h.storage.close().await;

        let poller = h.poller(Duration::from_millis(10));
        assert!(poller.run_cycle(&CancellationToken::new()).await.is_err());

        let cancel = CancellationToken::new();
        let task = tokio::spawn(poller.run(cancel.clone()));

        // several ticks fail in a row; the poller keeps retrying
        time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        cancel.cancel();
        task.await.unwrap().unwrap();
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn cancellation_before_readiness_stops_the_poller() {
        let h = Harness::new().await;
        h.notifier.set_ready(false);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(h.poller(Duration::from_millis(10)).run(cancel.clone()));
        time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        task.await.unwrap().unwrap();
        assert!(h.notifier.sent().is_empty());
    }
}
