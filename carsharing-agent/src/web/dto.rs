//! Data transfer objects for web requests and responses.
//!
//! Every query field is optional at the extractor level; handlers decide
//! which ones are required so a missing id yields the documented error body
//! instead of an extractor rejection.

use serde::{Deserialize, Serialize};

/// Query of `/cars`.
#[derive(Debug, Default, Deserialize)]
pub struct CarsRequest {
    pub lat: Option<String>,
    pub lng: Option<String>,
    pub range: Option<String>,

    /// Start of the booking window (ISO 8601)
    pub start: Option<String>,

    /// End of the booking window (ISO 8601)
    pub end: Option<String>,
}

/// Query of `/reservation`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRequest {
    pub bookee_id: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

/// Query of `/book`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmReservationRequest {
    pub reservation_id: Option<String>,
}

/// Query of `/cancel`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelBookingRequest {
    pub booking_id: Option<String>,
}

/// Query of `/cancel-confirm`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmCancellationRequest {
    pub cancellation_id: Option<String>,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
