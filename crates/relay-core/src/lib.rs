//! Core domain + delivery pipeline for the announcement relay.
//!
//! This crate is framework-agnostic. The portal (HTTP + HTML) and Telegram live
//! behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod poller;
pub mod ports;
pub mod scratch;
pub mod store;

pub use errors::{Error, Result};
