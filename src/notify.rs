mod discord;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::render::Notification;

pub use self::discord::DiscordNotifier;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("`{0}` is not a valid destination")]
    InvalidDestination(String),

    #[error("the request to the delivery channel failed")]
    Http(#[from] reqwest::Error),

    #[error("the delivery channel responded with {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("rate limited by the delivery channel (retry after {:.1}s)", .retry_after.as_secs_f64())]
    RateLimited { retry_after: Duration },
}

/// Delivers rendered notifications to a messaging channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Resolves once the channel is able to accept messages.
    async fn ready(&self) -> Result<(), DeliveryError>;

    /// Checks that `destination` is something this channel can deliver to.
    fn check_destination(&self, destination: &str) -> Result<(), DeliveryError> {
        if destination.trim().is_empty() {
            return Err(DeliveryError::InvalidDestination(destination.into()));
        }

        Ok(())
    }

    async fn send(&self, destination: &str, notification: &Notification)
        -> Result<(), DeliveryError>;
}
