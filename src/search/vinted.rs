use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tracing::{debug, trace, warn};

use super::{FetchError, Item, SearchSource, Seller};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(10);
const TOTAL_TIMEOUT: Duration = Duration::from_secs(60);

const API_PATH: &str = "/api/v2/catalog/items";

/// Searches the Vinted catalog API.
///
/// A query is a catalog URL as shown in the browser's address bar, e.g.
/// `https://www.vinted.fr/catalog?search_text=jacket&brand_ids[]=53`.
pub struct VintedClient {
    http_client: reqwest::Client,
    // hosts for which a session cookie has been obtained
    sessions: Mutex<HashSet<String>>,
}

impl VintedClient {
    pub fn new(user_agent: &str) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(user_agent)
            .cookie_store(true)
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .timeout(TOTAL_TIMEOUT)
            .build()
            .context("could not create an HTTP client")?;

        Ok(Self {
            http_client,
            sessions: Default::default(),
        })
    }

    async fn open_session(&self, origin: &Url, force: bool) -> Result<(), FetchError> {
        let host = origin.host_str().unwrap_or_default().to_owned();

        if !force && self.sessions.lock().unwrap().contains(&host) {
            return Ok(());
        }

        debug!(%host, "Requesting a session cookie");
        let response = self
            .http_client
            .get(origin.clone())
            .send()
            .await
            .map_err(|source| FetchError::Http {
                url: origin.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: origin.to_string(),
                status: response.status(),
            });
        }

        self.sessions.lock().unwrap().insert(host);

        Ok(())
    }

    async fn get_items(&self, api_url: &Url) -> Result<reqwest::Response, FetchError> {
        self.http_client
            .get(api_url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|source| FetchError::Http {
                url: api_url.to_string(),
                source,
            })
    }
}

#[async_trait]
impl SearchSource for VintedClient {
    async fn search(&self, query: &str, page_size: u32) -> Result<Vec<Item>, FetchError> {
        let (origin, api_url) = api_url(query, page_size)?;
        trace!(%api_url, "Searching");

        self.open_session(&origin, false).await?;
        let mut response = self.get_items(&api_url).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            debug!("The session cookie was rejected; renewing it");
            self.open_session(&origin, true).await?;
            response = self.get_items(&api_url).await?;
        }

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: api_url.to_string(),
                status: response.status(),
            });
        }

        let body = response.text().await.map_err(|source| FetchError::Http {
            url: api_url.to_string(),
            source,
        })?;

        decode_items(api_url.as_str(), &body)
    }
}

/// Translates a catalog URL into the site origin and the matching API request URL.
fn api_url(query: &str, page_size: u32) -> Result<(Url, Url), FetchError> {
    let invalid = |reason: &str| FetchError::InvalidQuery {
        query: query.into(),
        reason: reason.into(),
    };

    let url = Url::parse(query).map_err(|e| invalid(&e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("not an HTTP URL"));
    }

    let Some(host) = url.host_str() else {
        return Err(invalid("the URL has no host"));
    };

    let origin = Url::parse(&format!("{}://{host}/", url.scheme()))
        .map_err(|e| invalid(&e.to_string()))?;
    let mut api_url = origin.join(API_PATH).map_err(|e| invalid(&e.to_string()))?;

    // the catalog page repeats `key[]=v` for every selected value; the API wants `keys=v1,v2`
    let mut params: Vec<(String, Vec<String>)> = vec![];

    for (key, value) in url.query_pairs() {
        let key = match key.strip_suffix("[]") {
            Some(key) => api_array_key(key),
            None => key.into_owned(),
        };

        if matches!(key.as_str(), "per_page" | "page" | "order" | "time") {
            continue;
        }

        match params.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value.into_owned()),
            None => params.push((key, vec![value.into_owned()])),
        }
    }

    {
        let mut pairs = api_url.query_pairs_mut();

        for (key, values) in &params {
            pairs.append_pair(key, &values.join(","));
        }

        pairs
            .append_pair("per_page", &page_size.to_string())
            .append_pair("page", "1")
            .append_pair("order", "newest_first");
    }

    Ok((origin, api_url))
}

fn api_array_key(key: &str) -> String {
    match key {
        "catalog" => "catalog_ids".into(),
        "status" => "status_ids".into(),
        _ if key.ends_with("_ids") => key.into(),
        _ if key.ends_with("_id") => format!("{key}s"),
        _ => key.into(),
    }
}

#[derive(Deserialize, Debug)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

// Every field decodes on its own: a field with an unexpected type becomes `None` instead of
// failing the whole item.
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct RawItem {
    #[serde(deserialize_with = "lenient_number")]
    id: Option<u64>,
    #[serde(deserialize_with = "lenient")]
    title: Option<String>,
    #[serde(deserialize_with = "lenient")]
    url: Option<String>,
    #[serde(deserialize_with = "lenient")]
    price: Option<RawPrice>,
    #[serde(deserialize_with = "lenient")]
    currency: Option<String>,
    #[serde(deserialize_with = "lenient")]
    size_title: Option<String>,
    #[serde(deserialize_with = "lenient")]
    photo: Option<RawPhoto>,
    #[serde(deserialize_with = "lenient")]
    promoted: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    user: Option<RawUser>,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum RawPrice {
    Text(String),
    Number(serde_json::Number),
    Amount {
        amount: serde_json::Value,
        currency_code: Option<String>,
    },
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct RawPhoto {
    #[serde(deserialize_with = "lenient")]
    url: Option<String>,
    #[serde(deserialize_with = "lenient_number")]
    timestamp: Option<i64>,
    #[serde(deserialize_with = "lenient")]
    high_resolution: Option<RawHighResolution>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct RawHighResolution {
    #[serde(deserialize_with = "lenient_number")]
    timestamp: Option<i64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct RawUser {
    #[serde(alias = "name", deserialize_with = "lenient")]
    login: Option<String>,
    #[serde(deserialize_with = "lenient")]
    profile_url: Option<String>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;

    Ok(serde_json::from_value(value).ok())
}

/// Like [`lenient`], but also accepts numbers sent as strings.
fn lenient_number<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + FromStr,
{
    let value = serde_json::Value::deserialize(deserializer)?;

    Ok(match value {
        serde_json::Value::String(s) => s.trim().parse().ok(),
        value => serde_json::from_value(value).ok(),
    })
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.trim().is_empty())
}

impl From<RawItem> for Item {
    fn from(raw: RawItem) -> Self {
        let (price, currency) = match raw.price {
            Some(RawPrice::Text(amount)) => (Some(amount), raw.currency),
            Some(RawPrice::Number(amount)) => (Some(amount.to_string()), raw.currency),

            Some(RawPrice::Amount {
                amount,
                currency_code,
            }) => {
                let amount = match amount {
                    serde_json::Value::String(s) => Some(s),
                    serde_json::Value::Number(n) => Some(n.to_string()),
                    _ => None,
                };

                (amount, currency_code.or(raw.currency))
            }

            None => (None, raw.currency),
        };

        let photo = raw.photo.unwrap_or_default();
        let freshness = photo
            .high_resolution
            .and_then(|hr| hr.timestamp)
            .or(photo.timestamp)
            .unwrap_or(0);
        let user = raw.user.unwrap_or_default();

        Item {
            id: raw.id,
            title: non_empty(raw.title),
            url: non_empty(raw.url),
            price: non_empty(price),
            currency: non_empty(currency),
            size: non_empty(raw.size_title),
            image: non_empty(photo.url),
            seller: Seller {
                name: non_empty(user.login),
                profile_url: non_empty(user.profile_url),
            },
            freshness,
            promoted: raw.promoted.unwrap_or(false),
        }
    }
}

/// Decodes a search response, skipping entries that are not JSON objects.
fn decode_items(url: &str, body: &str) -> Result<Vec<Item>, FetchError> {
    let response: SearchResponse =
        serde_json::from_str(body).map_err(|source| FetchError::Decode {
            url: url.into(),
            source,
        })?;

    Ok(response
        .items
        .into_iter()
        .enumerate()
        .filter_map(|(idx, value)| {
            serde_json::from_value::<RawItem>(value)
                .inspect_err(|e| warn!("Could not decode search result #{}: {e}", idx + 1))
                .ok()
        })
        .map(Item::from)
        .collect())
}
