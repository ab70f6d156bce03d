//! Web layer for the carsharing agent.
//!
//! Provides the HTTP endpoints the agent calls to find, reserve and manage
//! vehicles.

mod dto;
mod routes;
mod state;

pub use dto::*;
pub use routes::{AppError, create_router};
pub use state::AppState;
