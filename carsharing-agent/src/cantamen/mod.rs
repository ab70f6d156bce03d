//! Cantamen casirest (v3) client.
//!
//! This module provides an HTTP client for the carsharing reservation API
//! fronted by this service.
//!
//! Key characteristics of casirest:
//! - Authentication is a two-step affair: `POST /tokens` returns an object
//!   whose `id` and `customerId` form the Basic credentials for every other
//!   call
//! - Sessions expire silently; the only signal is a 401 on the next call
//! - Vehicles are called "bookees" and live under places, which live under
//!   points of interest

mod client;
mod error;
mod types;

pub use client::{AvailabilityQuery, CantamenClient, CantamenConfig, ServiceAccount};
pub use error::UpstreamError;
pub use types::{
    BookeeId, BookeeType, BookingProposal, Credential, Place, PointOfInterest, UpstreamBookee,
    UpstreamId,
};
