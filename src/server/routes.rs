use anyhow::{anyhow, Context};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Result};
use axum::Json;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;

use crate::server::convert_errors;
use crate::state::State as AppState;
use crate::storage::{Subscription, SubscriptionId};
use crate::template::Template;

use super::responses::{InvalidSubscription, SubscriptionNotFound, Unauthorized};

/// Checks the bearer admin token, if one is configured. Every route except `/ping` requires it.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), Unauthorized> {
    let Some(expected) = state.cfg.admin_token.as_deref() else {
        return Ok(());
    };

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => Ok(()),
        _ => Err(Unauthorized),
    }
}

pub async fn index(State(state): State<AppState>, headers: HeaderMap) -> Result<Html<String>> {
    authorize(&state, &headers)?;

    #[derive(Serialize, Debug, Clone)]
    struct Context {
        subscriptions: Vec<Subscription>,
    }

    convert_errors(async move {
        let mut tx = state.storage.begin().await?;
        let subscriptions = tx.get_subscriptions().await?;
        tx.commit().await?;

        let ctx = Context { subscriptions };
        let html = state
            .template
            .render(Template::Index.as_str(), &ctx)
            .context("could not render the HTML template")?;

        Ok(Html(html))
    })
    .await
}

pub async fn ping() -> &'static str {
    "Pong!"
}

pub async fn list_subscriptions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Subscription>>> {
    authorize(&state, &headers)?;

    convert_errors(async move {
        let mut tx = state.storage.begin().await?;
        let subscriptions = tx.get_subscriptions().await?;
        tx.commit().await?;

        Ok(Json(subscriptions))
    })
    .await
}

pub async fn get_subscription(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<SubscriptionId>,
) -> Result<Json<Subscription>> {
    authorize(&state, &headers)?;

    let subscription = convert_errors(async {
        let mut tx = state.storage.begin().await?;
        let subscription = tx.get_subscription(id).await?;
        tx.commit().await?;

        Ok(subscription)
    })
    .await?;

    Ok(Json(subscription.ok_or(SubscriptionNotFound { id })?))
}

#[derive(Deserialize, Debug, Clone)]
pub struct NewSubscription {
    pub query: String,
    pub destination: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct Created {
    pub id: SubscriptionId,
}

pub async fn subscribe(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(new): Json<NewSubscription>,
) -> Result<impl IntoResponse> {
    authorize(&state, &headers)?;

    let query = new.query.trim();
    let destination = new.destination.trim();

    match Url::parse(query) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => {}

        Ok(_) => {
            return Err(InvalidSubscription {
                reason: format!("`{query}` is not an HTTP URL"),
            }
            .into())
        }

        Err(e) => {
            return Err(InvalidSubscription {
                reason: format!("`{query}` is not a valid URL: {e}"),
            }
            .into())
        }
    }

    state
        .notifier
        .check_destination(destination)
        .map_err(|e| InvalidSubscription {
            reason: e.to_string(),
        })?;

    let id = convert_errors(async {
        let mut tx = state.storage.begin().await?;
        let id = tx
            .insert_subscription(query, destination, OffsetDateTime::now_utc())
            .await?;
        tx.commit().await?;

        Ok(id)
    })
    .await?;
    info!(%id, %query, %destination, "Created a subscription");

    Ok((StatusCode::CREATED, Json(Created { id })))
}

pub async fn unsubscribe(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<SubscriptionId>,
) -> Result<StatusCode> {
    authorize(&state, &headers)?;

    let deleted = convert_errors(async {
        let mut tx = state.storage.begin().await?;
        let deleted = tx.delete_subscription(id).await?;
        tx.commit()
            .await
            .with_context(|| anyhow!("could not delete the subscription #{id}"))?;

        Ok(deleted)
    })
    .await?;

    if !deleted {
        return Err(SubscriptionNotFound { id }.into());
    }

    info!(%id, "Deleted a subscription");

    Ok(StatusCode::NO_CONTENT)
}

pub async fn poll(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode> {
    authorize(&state, &headers)?;
    state.poll_now.notify_one();

    Ok(StatusCode::ACCEPTED)
}
