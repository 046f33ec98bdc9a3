//! Output sinks for streamed model text
//!
//! A `TextSink` receives text fragments in the order the model produced them.
//! Returning `RoundTripError::SinkClosed` tells the controller the consumer is
//! gone; the controller then drops the underlying stream.

use std::io::{self, Write};

use serde_json::Value;
use tokio::sync::mpsc;

use super::error::{RoundTripError, RoundTripResult};

/// Destination for streamed text fragments and tool activity
pub trait TextSink: Send {
    /// Receive one text fragment
    fn send_text(&mut self, fragment: &str) -> RoundTripResult<()>;

    /// Notified when the model's tool call is about to be dispatched
    fn tool_call(&mut self, _name: &str, _input: &Value) {}

    /// Notified with the tool's output before it is sent back to the model
    fn tool_result(&mut self, _name: &str, _output: &str, _is_error: bool) {}
}

/// Writes fragments straight to stdout, flushing after each one
#[derive(Debug, Default)]
pub struct StdoutSink;

impl TextSink for StdoutSink {
    fn send_text(&mut self, fragment: &str) -> RoundTripResult<()> {
        let mut out = io::stdout().lock();
        out.write_all(fragment.as_bytes())
            .and_then(|_| out.flush())
            .map_err(|e| {
                tracing::warn!("[StdoutSink] Write failed: {}", e);
                RoundTripError::SinkClosed
            })
    }
}

/// Collects fragments in memory
impl TextSink for Vec<String> {
    fn send_text(&mut self, fragment: &str) -> RoundTripResult<()> {
        self.push(fragment.to_string());
        Ok(())
    }
}

/// Forwards fragments to a channel; a dropped receiver closes the sink
impl TextSink for mpsc::UnboundedSender<String> {
    fn send_text(&mut self, fragment: &str) -> RoundTripResult<()> {
        self.send(fragment.to_string())
            .map_err(|_| RoundTripError::SinkClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_sink_keeps_order() {
        let mut sink: Vec<String> = Vec::new();
        sink.send_text("Hel").unwrap();
        sink.send_text("lo").unwrap();
        assert_eq!(sink, vec!["Hel".to_string(), "lo".to_string()]);
    }

    #[test]
    fn test_channel_sink_closed() {
        let (mut tx, rx) = mpsc::unbounded_channel::<String>();
        tx.send_text("first").unwrap();
        drop(rx);
        assert!(matches!(tx.send_text("second"), Err(RoundTripError::SinkClosed)));
    }
}
