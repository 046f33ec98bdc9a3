pub mod core;
pub mod tools;

pub mod conversation;
pub mod llm;

// Round-trip controller and its configuration
pub mod agent;

// Optional components
pub mod cli;
pub mod helpers;
pub mod logging;
