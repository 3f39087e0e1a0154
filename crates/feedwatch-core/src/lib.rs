//! feedwatch-core - Core library for Feedwatch
//!
//! This crate contains the feedback record model, the data source adapters,
//! the push stream wire format, and the client-side reconciler and filters
//! shared by the API server and the operator CLI.

pub mod config;
pub mod error;
pub mod events;
pub mod filter;
pub mod models;
pub mod reconcile;
pub mod source;
pub mod util;
pub mod wire;

pub use error::{Error, Result};
pub use models::{FeedbackId, FeedbackRecord};
