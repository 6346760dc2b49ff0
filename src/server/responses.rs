use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::storage::SubscriptionId;

#[derive(Debug, Clone)]
pub struct Unauthorized;

impl IntoResponse for Unauthorized {
    fn into_response(self) -> Response {
        IntoResponse::into_response((
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Bearer")],
            "A valid admin token is required",
        ))
    }
}

#[derive(Debug, Clone)]
pub struct InvalidSubscription {
    pub reason: String,
}

impl IntoResponse for InvalidSubscription {
    fn into_response(self) -> Response {
        let reason = self.reason;

        IntoResponse::into_response((
            StatusCode::BAD_REQUEST,
            format!("The subscription is invalid: {reason}"),
        ))
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionNotFound {
    pub id: SubscriptionId,
}

impl IntoResponse for SubscriptionNotFound {
    fn into_response(self) -> Response {
        let id = self.id;

        IntoResponse::into_response((
            StatusCode::NOT_FOUND,
            format!("There is no subscription #{id}"),
        ))
    }
}
