//! Core types for the round-trip controller
//!
//! - `RoundState` - Controller state machine
//! - `TextSink` - Destination for streamed text
//! - `RoundTripError` - Error taxonomy

pub mod error;
pub mod output;
pub mod state;

pub use error::{RoundTripError, RoundTripResult};
pub use output::{StdoutSink, TextSink};
pub use state::RoundState;
