//! Round-trip agent
//!
//! - `RoundTripController` - drives model/tool rounds for a conversation
//! - `RoundOutcome` - what a single model response asked for
//! - `AgentConfig` - prompt, budgets and limits

pub mod config;
pub mod controller;
pub mod outcome;

pub use config::{default_system_prompt, AgentConfig};
pub use controller::RoundTripController;
pub use outcome::RoundOutcome;
