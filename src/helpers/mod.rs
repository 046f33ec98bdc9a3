//! Useful helpers for demo front ends
//!
//! - `TranscriptWriter` - Save raw responses and an HTML summary per session

mod transcript;

pub use transcript::TranscriptWriter;
