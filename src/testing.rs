//! Fixtures and in-process stand-ins for the external collaborators.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use time::macros::datetime;
use time_tz::timezones;

use crate::notify::{DeliveryError, Notifier};
use crate::render::{Notification, RenderOptions};
use crate::search::{FetchError, Item, SearchSource, Seller};
use crate::storage::{Subscription, SubscriptionId};

pub fn item(id: u64, freshness: i64, promoted: bool) -> Item {
    Item {
        id: Some(id),
        title: Some(format!("Item #{id}")),
        url: Some(format!("https://www.vinted.fr/items/{id}")),
        price: Some("10.0".into()),
        currency: None,
        size: Some("M".into()),
        image: None,
        seller: Seller {
            name: Some("alice".into()),
            profile_url: None,
        },
        freshness,
        promoted,
    }
}

pub fn subscription(id: i64, synced: bool, last_seen: i64) -> Subscription {
    Subscription {
        id: SubscriptionId::from(id),
        query: "https://www.vinted.fr/catalog?search_text=jacket".into(),
        destination: "100".into(),
        synced,
        last_seen,
        created: datetime!(2024-08-01 00:00:00 UTC),
    }
}

pub fn render_options() -> RenderOptions {
    RenderOptions {
        color: 0x09b1ba,
        timezone: timezones::get_by_name("UTC").unwrap(),
    }
}

/// Serves canned results per query. Unknown queries yield no items.
#[derive(Default)]
pub struct FakeSearch {
    results: Mutex<HashMap<String, Option<Vec<Item>>>>,
}

impl FakeSearch {
    pub fn set(&self, query: &str, items: Vec<Item>) {
        self.results
            .lock()
            .unwrap()
            .insert(query.into(), Some(items));
    }

    pub fn fail(&self, query: &str) {
        self.results.lock().unwrap().insert(query.into(), None);
    }
}

#[async_trait]
impl SearchSource for FakeSearch {
    async fn search(&self, query: &str, page_size: u32) -> Result<Vec<Item>, FetchError> {
        match self.results.lock().unwrap().get(query) {
            Some(Some(items)) => Ok(items.iter().take(page_size as usize).cloned().collect()),

            Some(None) => Err(FetchError::Status {
                url: query.into(),
                status: StatusCode::SERVICE_UNAVAILABLE,
            }),

            None => Ok(vec![]),
        }
    }
}

/// Records every notification it is asked to deliver.
pub struct FakeNotifier {
    sent: Mutex<Vec<(String, Notification)>>,
    failing: Mutex<HashSet<String>>,
    ready: Mutex<bool>,
    delay: Mutex<Duration>,
}

impl Default for FakeNotifier {
    fn default() -> Self {
        Self {
            sent: Default::default(),
            failing: Default::default(),
            ready: Mutex::new(true),
            delay: Default::default(),
        }
    }
}

impl FakeNotifier {
    pub fn sent(&self) -> Vec<(String, Notification)> {
        self.sent.lock().unwrap().clone()
    }

    /// The item URLs of the notifications delivered to `destination`, in delivery order.
    pub fn item_urls(&self, destination: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(dst, _)| dst == destination)
            .filter_map(|(_, notification)| notification.embed.url)
            .collect()
    }

    pub fn fail_for(&self, destination: &str) {
        self.failing.lock().unwrap().insert(destination.into());
    }

    pub fn set_ready(&self, ready: bool) {
        *self.ready.lock().unwrap() = ready;
    }

    /// Makes every delivery take `delay` before it completes.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Waits until at least `count` notifications have been delivered.
    pub async fn wait_for(&self, count: usize) {
        for _ in 0..500 {
            if self.sent.lock().unwrap().len() >= count {
                return;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        panic!("timed out waiting for {count} notifications");
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn ready(&self) -> Result<(), DeliveryError> {
        if *self.ready.lock().unwrap() {
            Ok(())
        } else {
            Err(DeliveryError::Status {
                status: StatusCode::UNAUTHORIZED,
                body: "401: Unauthorized".into(),
            })
        }
    }

    async fn send(
        &self,
        destination: &str,
        notification: &Notification,
    ) -> Result<(), DeliveryError> {
        let delay = *self.delay.lock().unwrap();

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.failing.lock().unwrap().contains(destination) {
            return Err(DeliveryError::Status {
                status: StatusCode::FORBIDDEN,
                body: "50001: Missing Access".into(),
            });
        }

        self.sent
            .lock()
            .unwrap()
            .push((destination.into(), notification.clone()));

        Ok(())
    }
}
