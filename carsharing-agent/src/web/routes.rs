//! HTTP route handlers.
//!
//! Every handler that talks to casirest runs its upstream calls inside
//! [`AuthManager::with_auth_retry`](crate::auth::AuthManager::with_auth_retry),
//! so an expired session costs one extra round trip and never more.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::auth::CredentialUnavailable;
use crate::cantamen::{AvailabilityQuery, Credential, UpstreamError};
use crate::ranker::{self, RankError, Vehicle};

use super::dto::*;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/gpt-carsharing-agent/auth", get(fetch_credential))
        .route("/gpt-carsharing-agent/cars", get(list_cars))
        .route("/gpt-carsharing-agent/reservation", get(create_reservation))
        .route("/gpt-carsharing-agent/book", get(confirm_reservation))
        .route("/gpt-carsharing-agent/cancel", get(cancel_booking))
        .route("/gpt-carsharing-agent/cancel-confirm", get(confirm_cancellation))
        .route("/gpt-carsharing-agent/bookings", get(list_bookings))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// Return the current session credential, opening a session if needed.
async fn fetch_credential(State(state): State<AppState>) -> Result<Json<Credential>, AppError> {
    let credential = state
        .auth
        .get_credential()
        .await
        .map_err(CredentialUnavailable)?;
    Ok(Json(credential))
}

/// List the best bookable vehicles around a location for a time window.
async fn list_cars(
    State(state): State<AppState>,
    Query(req): Query<CarsRequest>,
) -> Result<Json<Vec<Vehicle>>, AppError> {
    let query = AvailabilityQuery {
        lat: req.lat.unwrap_or_else(|| state.defaults.lat.clone()),
        lng: req.lng.unwrap_or_else(|| state.defaults.lng.clone()),
        range: req.range.unwrap_or_else(|| state.defaults.range.clone()),
        start: req.start,
        end: req.end,
    };
    let duration_hours = booking_duration_hours(query.start.as_deref(), query.end.as_deref())?;

    info!(
        lat = %query.lat,
        lng = %query.lng,
        range = %query.range,
        start = ?query.start,
        end = ?query.end,
        duration_hours,
        "listing available cars"
    );

    let state = &state;
    let query = &query;
    let cars = state
        .auth
        .with_auth_retry(AppError::is_auth_failure, |credential| async move {
            let poi = state
                .availability
                .points_of_interest(&credential, query)
                .await
                .map_err(AppError::upstream("/cars"))?;

            let proposals = state
                .client
                .booking_proposals(&credential, query)
                .await
                .map_err(AppError::upstream("/cars"))?;
            info!(count = proposals.len(), "received booking proposals");

            let candidates = ranker::for_logging(&poi, &proposals);
            info!(
                cars = %serde_json::to_string(&candidates).unwrap_or_default(),
                "cars for logging"
            );

            Ok::<_, AppError>(ranker::rank(&poi, &proposals, duration_hours)?)
        })
        .await?;

    Ok(Json(cars))
}

/// Reserve a vehicle (preliminary booking).
async fn create_reservation(
    State(state): State<AppState>,
    Query(req): Query<ReservationRequest>,
) -> Result<Json<Value>, AppError> {
    let bookee_id = required(req.bookee_id, "no bookee id given")?;
    let start = required(req.start, "no start time given")?;
    let end = required(req.end, "no end time given")?;

    info!(bookee_id = %bookee_id, start = %start, end = %end, "creating reservation");

    let (state, bookee_id, start, end) = (&state, &bookee_id, &start, &end);
    let reservation = state
        .auth
        .with_auth_retry(AppError::is_auth_failure, |credential| async move {
            state
                .client
                .create_prelim_booking(&credential, bookee_id, start, end)
                .await
                .map_err(AppError::upstream("/prelimbookings"))
        })
        .await?;

    Ok(Json(reservation))
}

/// Confirm a reservation, turning it into a booking.
async fn confirm_reservation(
    State(state): State<AppState>,
    Query(req): Query<ConfirmReservationRequest>,
) -> Result<Json<Value>, AppError> {
    let reservation_id = required(req.reservation_id, "no reservation id given")?;
    info!(reservation_id = %reservation_id, "confirming reservation");

    let (state, reservation_id) = (&state, &reservation_id);
    let booking = state
        .auth
        .with_auth_retry(AppError::is_auth_failure, |credential| async move {
            state
                .client
                .confirm_prelim_booking(&credential, reservation_id)
                .await
                .map_err(AppError::upstream("/prelimbookings/{reservationId}/confirm"))
        })
        .await?;

    Ok(Json(booking))
}

/// Request cancellation of a booking.
async fn cancel_booking(
    State(state): State<AppState>,
    Query(req): Query<CancelBookingRequest>,
) -> Result<Json<Value>, AppError> {
    let booking_id = required(req.booking_id, "no booking id given")?;
    info!(booking_id = %booking_id, "cancelling booking");

    let (state, booking_id) = (&state, &booking_id);
    let cancellation = state
        .auth
        .with_auth_retry(AppError::is_auth_failure, |credential| async move {
            state
                .client
                .cancel_booking(&credential, booking_id)
                .await
                .map_err(AppError::upstream("/bookings/{bookingId}/cancel"))
        })
        .await?;

    Ok(Json(cancellation))
}

/// Confirm a pending cancellation.
async fn confirm_cancellation(
    State(state): State<AppState>,
    Query(req): Query<ConfirmCancellationRequest>,
) -> Result<Json<Value>, AppError> {
    let cancellation_id = required(req.cancellation_id, "no cancellation id given")?;
    info!(cancellation_id = %cancellation_id, "confirming cancellation");

    let (state, cancellation_id) = (&state, &cancellation_id);
    let confirmation = state
        .auth
        .with_auth_retry(AppError::is_auth_failure, |credential| async move {
            state
                .client
                .confirm_prelim_booking(&credential, cancellation_id)
                .await
                .map_err(AppError::upstream("/prelimbookings/{cancellationId}/confirm"))
        })
        .await?;

    Ok(Json(confirmation))
}

/// List the customer's upcoming, still changeable bookings.
async fn list_bookings(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    info!("listing current bookings");

    let state = &state;
    let bookings = state
        .auth
        .with_auth_retry(AppError::is_auth_failure, |credential| async move {
            state
                .client
                .current_bookings(&credential, Utc::now())
                .await
                .map_err(AppError::upstream("/bookings"))
        })
        .await?;

    Ok(Json(bookings))
}

/// Treat absent and empty parameters alike.
fn required(value: Option<String>, message: &str) -> Result<String, AppError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::MissingParameter {
            message: message.to_string(),
        })
}

/// Parse an ISO 8601 instant, with or without offset.
///
/// Accepts a space in place of the `T`, offsets with or without a colon,
/// times down to the hour and plain dates (midnight). Instants without an
/// offset are compared as-is; only the difference between start and end
/// matters.
fn parse_instant(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim().replacen(' ', "T", 1);

    if let Ok(dt) = DateTime::parse_from_rfc3339(&value) {
        return Some(dt.naive_utc());
    }

    let with_offset = ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%dT%H:%M%z"]
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(&value, fmt).ok());
    if let Some(dt) = with_offset {
        return Some(dt.naive_utc());
    }

    let naive = value.strip_suffix('Z').unwrap_or(&value);
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
        // chrono needs minutes to build a time
        .or_else(|| {
            NaiveDateTime::parse_from_str(&format!("{naive}:00"), "%Y-%m-%dT%H:%M").ok()
        })
        .or_else(|| {
            NaiveDate::parse_from_str(naive, "%Y-%m-%d")
                .ok()
                .map(|date| date.and_time(NaiveTime::MIN))
        })
}

/// Whole hours between start and end, truncated toward zero.
///
/// A request without a complete window counts as zero hours.
fn booking_duration_hours(start: Option<&str>, end: Option<&str>) -> Result<i64, AppError> {
    let (Some(start), Some(end)) = (start, end) else {
        return Ok(0);
    };

    let parse = |what: &str, value: &str| {
        parse_instant(value).ok_or_else(|| AppError::BadRequest {
            message: format!("invalid {what} time: {value}"),
        })
    };

    Ok((parse("end", end)? - parse("start", start)?).num_hours())
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    /// A required parameter is absent; nothing was sent upstream
    MissingParameter { message: String },
    BadRequest { message: String },
    Credential(CredentialUnavailable),
    Upstream {
        context: &'static str,
        source: UpstreamError,
    },
    Ranking(RankError),
}

impl AppError {
    /// Wrap an upstream failure of the named upstream operation.
    fn upstream(context: &'static str) -> impl FnOnce(UpstreamError) -> AppError {
        move |source| AppError::Upstream { context, source }
    }

    /// Whether the upstream rejected the session credential.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, AppError::Upstream { source, .. } if source.is_unauthorized())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            // The agent contract has always reported missing ids as 500
            AppError::MissingParameter { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::Credential(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Ranking(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Upstream { source, .. } => match source.status() {
                Some(401) => StatusCode::BAD_GATEWAY,
                Some(status) if (400..500).contains(&status) => StatusCode::BAD_REQUEST,
                _ => StatusCode::BAD_GATEWAY,
            },
        }
    }
}

impl From<CredentialUnavailable> for AppError {
    fn from(e: CredentialUnavailable) -> Self {
        AppError::Credential(e)
    }
}

impl From<RankError> for AppError {
    fn from(e: RankError) -> Self {
        AppError::Ranking(e)
    }
}

/// Message to hand back for an upstream failure; business errors verbatim.
fn upstream_details(source: &UpstreamError) -> String {
    match source {
        UpstreamError::Api { message, .. } if !message.is_empty() => message.clone(),
        UpstreamError::Shared(inner) => upstream_details(inner),
        other => other.to_string(),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();

        let (message, details) = match self {
            AppError::MissingParameter { message } | AppError::BadRequest { message } => {
                (message, None)
            }
            AppError::Credential(e) => (
                "unable to obtain session credential".to_string(),
                Some(e.0.to_string()),
            ),
            AppError::Upstream { context, source } => (
                format!("Error in {context} request"),
                Some(upstream_details(&source)),
            ),
            AppError::Ranking(e) => ("unable to rank vehicles".to_string(), Some(e.to_string())),
        };

        error!(
            status = status.as_u16(),
            error = %message,
            details = details.as_deref().unwrap_or_default(),
            "request failed"
        );

        let body = Json(ErrorResponse {
            error: message,
            details,
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_is_truncated_to_whole_hours() {
        let hours = booking_duration_hours(
            Some("2024-05-01T10:00:00Z"),
            Some("2024-05-01T12:59:59Z"),
        )
        .unwrap();
        assert_eq!(hours, 2);

        let hours = booking_duration_hours(
            Some("2024-05-01T10:00:00+02:00"),
            Some("2024-05-01T11:00:00Z"),
        )
        .unwrap();
        assert_eq!(hours, 3);
    }

    #[test]
    fn duration_accepts_naive_timestamps() {
        let hours =
            booking_duration_hours(Some("2024-05-01T10:00"), Some("2024-05-02T10:00:00.000"))
                .unwrap();
        assert_eq!(hours, 24);
    }

    #[test]
    fn duration_accepts_iso_8601_variants() {
        let cases = [
            ("2024-05-01", "2024-05-02", 24),
            ("2024-05-01 10:00", "2024-05-01 12:30", 2),
            ("2024-05-01T10:00:00+0200", "2024-05-01T18:00:00+0200", 8),
            ("2024-05-01T10:00+0200", "2024-05-01T10:00:00Z", 2),
            ("2024-05-01T10", "2024-05-01T18", 8),
            ("2024-05-01T10:00Z", "2024-05-01T11:00Z", 1),
        ];

        for (start, end, expected) in cases {
            let hours = booking_duration_hours(Some(start), Some(end))
                .unwrap_or_else(|e| panic!("{start}..{end} rejected: {e:?}"));
            assert_eq!(hours, expected, "{start}..{end}");
        }
    }

    #[test]
    fn incomplete_window_is_zero_hours() {
        assert_eq!(booking_duration_hours(None, None).unwrap(), 0);
        assert_eq!(
            booking_duration_hours(Some("2024-05-01T10:00:00Z"), None).unwrap(),
            0
        );
    }

    #[test]
    fn malformed_window_is_rejected() {
        let err = booking_duration_hours(Some("tomorrow"), Some("2024-05-01T10:00:00Z"))
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn required_rejects_empty() {
        assert!(required(Some(String::new()), "missing").is_err());
        assert!(required(None, "missing").is_err());
        assert_eq!(required(Some("7".into()), "missing").unwrap(), "7");
    }

    #[test]
    fn upstream_status_mapping() {
        let err = |source| AppError::Upstream {
            context: "/bookings",
            source,
        };

        assert_eq!(err(UpstreamError::Unauthorized).status(), StatusCode::BAD_GATEWAY);
        assert!(err(UpstreamError::Unauthorized).is_auth_failure());

        let business = err(UpstreamError::Api {
            status: 409,
            message: "overlapping booking".into(),
        });
        assert_eq!(business.status(), StatusCode::BAD_REQUEST);
        assert!(!business.is_auth_failure());

        let outage = err(UpstreamError::Api {
            status: 503,
            message: String::new(),
        });
        assert_eq!(outage.status(), StatusCode::BAD_GATEWAY);
    }
}
