use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

#[derive(
    sqlx::Type,
    Serialize,
    Deserialize,
    Display,
    From,
    Into,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct SubscriptionId(i64);

/// A tracked search together with its delivery destination and poll cursor.
#[derive(FromRow, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: SubscriptionId,

    /// The marketplace catalog URL to poll.
    pub query: String,

    /// Where notifications for this subscription are delivered.
    pub destination: String,

    /// Whether at least one poll of this subscription has completed.
    pub synced: bool,

    /// The highest freshness (unix seconds) already notified.
    pub last_seen: i64,

    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
}
