//! Data models for Feedwatch

mod feedback;

pub use feedback::{max_sequence, FeedbackId, FeedbackRecord};
