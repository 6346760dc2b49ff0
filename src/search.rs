mod vinted;

use async_trait::async_trait;
use thiserror::Error;

pub use self::vinted::VintedClient;

/// A marketplace listing returned by a search.
///
/// Fields the marketplace did not provide are left empty; rendering substitutes placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: Option<u64>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub price: Option<String>,
    pub currency: Option<String>,
    pub size: Option<String>,
    pub image: Option<String>,
    pub seller: Seller,

    /// Publication time in unix seconds, 0 if unknown.
    pub freshness: i64,

    /// Sponsored listing.
    pub promoted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Seller {
    pub name: Option<String>,
    pub profile_url: Option<String>,
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("`{query}` is not a valid search URL: {reason}")]
    InvalidQuery { query: String, reason: String },

    #[error("the request to `{url}` failed")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("`{url}` responded with {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("could not decode the search results from `{url}`")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Runs marketplace searches.
#[async_trait]
pub trait SearchSource: Send + Sync {
    /// Returns up to `page_size` items matching `query`, newest first.
    async fn search(&self, query: &str, page_size: u32) -> Result<Vec<Item>, FetchError>;
}
