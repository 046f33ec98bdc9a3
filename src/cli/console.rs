use colored::*;
use serde_json::Value;
use std::io::{self, Write};

use crate::core::{RoundTripError, RoundTripResult, TextSink};

const MAX_TOOL_OUTPUT: usize = 500;

/// Console handles all terminal I/O with colored formatting
pub struct Console {
    user_color: Color,
    assistant_color: Color,
    tool_color: Color,
}

impl Console {
    /// Create a new Console with default colors
    pub fn new() -> Self {
        Self {
            user_color: Color::Cyan,
            assistant_color: Color::Green,
            tool_color: Color::Magenta,
        }
    }

    /// Print a user message with colored formatting
    pub fn print_user(&self, message: &str) {
        println!("{} {}", "User:".color(self.user_color).bold(), message);
    }

    /// Print an assistant message prefix (without newline)
    pub fn print_assistant_prefix(&self) {
        print!("{} ", "Assistant:".color(self.assistant_color).bold());
        let _ = io::stdout().flush();
    }

    /// Print a chunk of assistant response (for streaming)
    pub fn print_assistant_chunk(&self, chunk: &str) -> io::Result<()> {
        let mut out = io::stdout().lock();
        write!(out, "{}", chunk.color(self.assistant_color))?;
        out.flush()
    }

    /// Print a complete assistant message with colored formatting
    pub fn print_assistant(&self, message: &str) {
        println!(
            "{} {}",
            "Assistant:".color(self.assistant_color).bold(),
            message.color(self.assistant_color)
        );
    }

    /// Print a newline
    pub fn println(&self) {
        println!();
    }

    /// Print a system message (errors, info, etc.)
    pub fn print_system(&self, message: &str) {
        println!("{} {}", "System:".yellow().bold(), message);
    }

    /// Print an error message
    pub fn print_error(&self, error: &str) {
        eprintln!("{} {}", "Error:".red().bold(), error);
    }

    /// Read a line of input from the user
    pub fn read_input(&self) -> io::Result<String> {
        print!("{} ", ">".color(self.user_color).bold());
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        Ok(input.trim().to_string())
    }

    /// Print a welcome banner
    pub fn print_banner(&self, title: &str) {
        println!("{}", "=".repeat(60).bright_blue());
        println!("  {}", title.bright_blue().bold());
        println!("{}", "=".repeat(60).bright_blue());
        println!();
        println!("Type your message and press Enter. Type 'exit' or 'quit' to end the session.");
        println!();
    }

    /// Print a separator line
    pub fn print_separator(&self) {
        println!("{}", "-".repeat(60).bright_black());
    }

    /// Print a tool action message
    pub fn print_tool_action(&self, tool_name: &str, action: &str) {
        println!(
            "{} {} {}",
            "Tool:".color(self.tool_color).bold(),
            format!("[{}]", tool_name).color(self.tool_color),
            action
        );
    }

    /// Print a tool result
    pub fn print_tool_result(&self, result: &str, is_error: bool) {
        if is_error {
            println!("{} {}", "Tool Error:".red().bold(), result);
        } else {
            println!("{}", truncate(result, MAX_TOOL_OUTPUT).bright_black());
        }
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

/// Streamed text goes straight to the terminal
impl TextSink for Console {
    fn send_text(&mut self, fragment: &str) -> RoundTripResult<()> {
        self.print_assistant_chunk(fragment).map_err(|e| {
            tracing::warn!("[Console] Write failed: {}", e);
            RoundTripError::SinkClosed
        })
    }

    fn tool_call(&mut self, name: &str, input: &Value) {
        println!();
        self.print_tool_action(name, &input.to_string());
    }

    fn tool_result(&mut self, _name: &str, output: &str, is_error: bool) {
        self.print_tool_result(output, is_error);
        self.print_assistant_prefix();
    }
}

/// Cut long tool output for display, on a character boundary
fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...\n(output truncated)", &text[..end]),
        None => text.to_string(),
    }
}
