use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time;
use tracing::{info, trace, warn};

use crate::render::Notification;

use super::{DeliveryError, Notifier};

const API_BASE: &str = "https://discord.com/api/v10";
const TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(30);

// https://discord.com/developers/docs/resources/channel#embed-object-embed-limits
const MAX_TITLE_LEN: usize = 256;

/// Posts notifications to Discord channels as a bot user.
///
/// A destination is the numeric id of a text channel the bot can write to.
pub struct DiscordNotifier {
    http_client: reqwest::Client,
    auth: String,
}

impl DiscordNotifier {
    pub fn new(token: &str) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(TIMEOUT)
            .build()
            .context("could not create an HTTP client")?;

        Ok(Self {
            http_client,
            auth: format!("Bot {token}"),
        })
    }

    async fn error_from(response: reqwest::Response) -> DeliveryError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        DeliveryError::Status { status, body }
    }
}

#[derive(Deserialize, Debug)]
struct RateLimited {
    retry_after: f64,
}

#[derive(Deserialize, Debug)]
struct CurrentUser {
    username: String,
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn ready(&self) -> Result<(), DeliveryError> {
        let response = self
            .http_client
            .get(format!("{API_BASE}/users/@me"))
            .header(AUTHORIZATION, self.auth.as_str())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let user: CurrentUser = response.json().await?;
        info!("Logged in to Discord as `{}`", user.username);

        Ok(())
    }

    fn check_destination(&self, destination: &str) -> Result<(), DeliveryError> {
        destination
            .parse::<u64>()
            .map(|_| ())
            .map_err(|_| DeliveryError::InvalidDestination(destination.into()))
    }

    async fn send(
        &self,
        destination: &str,
        notification: &Notification,
    ) -> Result<(), DeliveryError> {
        self.check_destination(destination)?;

        let url = format!("{API_BASE}/channels/{destination}/messages");
        let body = message_body(notification);
        let mut rate_limited = false;

        loop {
            let response = self
                .http_client
                .post(&url)
                .header(AUTHORIZATION, self.auth.as_str())
                .json(&body)
                .send()
                .await?;

            match response.status() {
                status if status.is_success() => return Ok(()),

                StatusCode::TOO_MANY_REQUESTS => {
                    let retry_after = response
                        .json::<RateLimited>()
                        .await
                        .map(|r| retry_delay(r.retry_after))
                        .unwrap_or(Duration::from_secs(1));

                    if rate_limited || retry_after > MAX_RATE_LIMIT_WAIT {
                        return Err(DeliveryError::RateLimited { retry_after });
                    }

                    warn!(
                        "Rate limited by Discord; retrying in {:.1}s",
                        retry_after.as_secs_f64()
                    );
                    rate_limited = true;
                    time::sleep(retry_after).await;
                }

                _ => return Err(Self::error_from(response).await),
            }
        }
    }
}

/// Converts Discord's `retry_after` seconds into a wait. Values too large to represent saturate.
fn retry_delay(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].into(),
        None => s.into(),
    }
}

/// Builds a Discord "create message" payload: one embed plus one row of link buttons.
fn message_body(notification: &Notification) -> Value {
    let embed = &notification.embed;
    let mut embed_json = json!({
        "title": truncate(&embed.title, MAX_TITLE_LEN),
        "color": embed.color,
        "fields": embed.fields.iter().map(|field| json!({
            "name": field.name,
            "value": field.value,
            "inline": field.inline,
        })).collect::<Vec<_>>(),
        "author": { "name": embed.author.name },
        "footer": { "text": embed.footer },
    });

    if let Some(url) = &embed.url {
        embed_json["url"] = url.as_str().into();
    }

    if let Some(image) = &embed.image {
        embed_json["image"] = json!({ "url": image });
    }

    if let Some(url) = &embed.author.url {
        embed_json["author"]["url"] = url.as_str().into();
    }

    let buttons = notification
        .buttons
        .iter()
        .map(|button| {
            json!({
                "type": 2,
                "style": 5,
                "label": button.label,
                "emoji": { "name": button.emoji },
                "url": button.url,
            })
        })
        .collect::<Vec<_>>();
    trace!(button_count = buttons.len(), "Built a message payload");

    json!({
        "embeds": [embed_json],
        "components": [{ "type": 1, "components": buttons }],
    })
}
