//! Carsharing agent proxy.
//!
//! A small HTTP service that lets a conversational agent find, reserve and
//! manage carsharing vehicles through the casirest API, ranking the
//! available cars by size and walking distance.

pub mod auth;
pub mod availability;
pub mod cantamen;
pub mod config;
pub mod logging;
pub mod ranker;
pub mod web;
