//! # chat-roundtrip
//!
//! Demo front end for the round-trip controller:
//! - `chat` - Claude with web search and Wolfram Alpha tools
//! - `search` - Gemini with Google Search grounding
//! - `tools` - Smoke-test the built-in tools

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};

use chat_roundtrip::agent::{default_system_prompt, AgentConfig, RoundTripController};
use chat_roundtrip::cli::Console;
use chat_roundtrip::conversation::Conversation;
use chat_roundtrip::core::{RoundTripError, StdoutSink};
use chat_roundtrip::helpers::TranscriptWriter;
use chat_roundtrip::llm::{AnthropicProvider, GeminiProvider, LlmProvider};
use chat_roundtrip::logging::{self, LoggingConfig};
use chat_roundtrip::tools::{ToolRegistry, WebSearchTool, WolframAlphaTool};

/// Tool-augmented chat against hosted LLM APIs
#[derive(Parser)]
#[command(name = "chat-roundtrip")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Tool-augmented chat and grounded search against hosted LLM APIs")]
struct Cli {
    /// Directory for log files
    #[arg(long, env = "CHAT_ROUNDTRIP_LOG_DIR", default_value = "logs")]
    log_dir: PathBuf,

    /// Write logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Directory for transcript files
    #[arg(long, env = "CHAT_ROUNDTRIP_TRANSCRIPTS", default_value = "transcripts")]
    transcripts: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with Claude using web search and Wolfram Alpha
    Chat {
        /// Stream the response as it is generated
        #[arg(long)]
        stream: bool,

        /// Answer a single message and exit
        #[arg(long)]
        once: Option<String>,

        /// Maximum model calls per message
        #[arg(long, env = "CHAT_ROUNDTRIP_MAX_ROUNDS", default_value_t = 8)]
        max_rounds: usize,
    },

    /// Ask Gemini with Google Search grounding
    Search {
        /// Stream the response as it is generated
        #[arg(long)]
        stream: bool,

        /// The question (prompted for when omitted)
        prompt: Option<String>,
    },

    /// Run each built-in tool once
    Tools {
        /// Query for the web search tool (prompted for when omitted)
        query: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _guard = logging::init_logging(&LoggingConfig {
        dir: cli.log_dir.clone(),
        json: cli.log_json,
        ..LoggingConfig::default()
    })?;

    tracing::info!("=== chat-roundtrip starting ===");

    let result = match cli.command {
        Commands::Chat {
            stream,
            once,
            max_rounds,
        } => chat(&cli.transcripts, stream, once, max_rounds).await,
        Commands::Search { stream, prompt } => search(&cli.transcripts, stream, prompt).await,
        Commands::Tools { query } => smoke_test_tools(query).await,
    };

    if let Err(ref e) = result {
        tracing::error!("Exiting with error: {:#}", e);
    }
    tracing::info!("=== chat-roundtrip shutting down ===");

    result
}

fn builtin_tools() -> Result<ToolRegistry> {
    let mut tools = ToolRegistry::new();
    tools.register_tool(WebSearchTool::new())?;
    tools.register_tool(WolframAlphaTool::from_env())?;
    Ok(tools)
}

async fn chat(
    transcripts: &Path,
    stream: bool,
    once: Option<String>,
    max_rounds: usize,
) -> Result<()> {
    let llm: Arc<dyn LlmProvider> = Arc::new(AnthropicProvider::from_env()?);
    let tools = Arc::new(builtin_tools()?);

    let config = AgentConfig::new(default_system_prompt(Local::now().date_naive()))
        .with_max_rounds(max_rounds)
        .with_streaming(stream);
    let controller = RoundTripController::new(config, llm, tools);

    let cancel = controller.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received");
            cancel.cancel();
        }
    });

    let transcript = TranscriptWriter::new(transcripts, "Claude")?;
    let mut console = Console::new();
    let mut conversation = Conversation::new();

    if let Some(message) = once {
        console.print_user(&message);
        let result = chat_turn(&controller, &mut conversation, &mut console, &message).await;
        transcript.write_json(&conversation)?;
        result?;
        return Ok(());
    }

    console.print_banner("Chat - Powered by Claude");

    loop {
        let input = console.read_input().context("Failed to read input")?;
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        match chat_turn(&controller, &mut conversation, &mut console, &input).await {
            Ok(_) => {}
            Err(RoundTripError::Cancelled) => {
                console.print_system("Interrupted");
                break;
            }
            Err(e) => console.print_error(&e.to_string()),
        }

        let path = transcript.write_json(&conversation)?;
        tracing::debug!("Transcript saved to {:?}", path);
        console.print_separator();
    }

    Ok(())
}

async fn chat_turn(
    controller: &RoundTripController,
    conversation: &mut Conversation,
    console: &mut Console,
    input: &str,
) -> Result<String, RoundTripError> {
    console.print_assistant_prefix();
    let result = controller.respond(conversation, input, console).await;
    console.println();
    result
}

async fn search(transcripts: &Path, stream: bool, prompt: Option<String>) -> Result<()> {
    let gemini = GeminiProvider::from_env()?;
    let console = Console::new();

    let prompt = match prompt {
        Some(prompt) => prompt,
        None => {
            console.print_system("What do you want to ask Gemini?");
            console.read_input().context("Failed to read prompt")?
        }
    };

    let transcript = TranscriptWriter::new(transcripts, "Gemini")?;

    let response = if stream {
        let mut sink = StdoutSink;
        let response = gemini
            .generate_grounded_stream(&prompt, &mut sink, |chunk| {
                transcript.append_jsonl(chunk).map(|_| ())
            })
            .await?;
        console.println();
        response
    } else {
        let response = gemini.generate_grounded(&prompt).await?;
        if let Some(raw) = response.raw.first() {
            transcript.write_json(raw)?;
        }
        console.print_assistant(&response.text);
        response
    };

    let path = transcript.write_html(
        &prompt,
        &response.text,
        response.rendered_content.as_deref(),
    )?;
    console.print_system(&format!("HTML file created: {}", path.display()));

    Ok(())
}

async fn smoke_test_tools(query: Option<String>) -> Result<()> {
    let console = Console::new();
    let tools = builtin_tools()?;

    let query = match query {
        Some(query) => query,
        None => {
            console.print_system("Enter any message for online searching:");
            console.read_input().context("Failed to read query")?
        }
    };

    for (name, input) in [
        ("web_search", serde_json::json!({ "query": query })),
        ("wolfram_alpha", serde_json::json!({ "query": "1+1" })),
    ] {
        console.print_tool_action(name, &input.to_string());
        let result = tools.dispatch(name, &input).await?;
        console.print_tool_result(&result.output, result.is_error);
    }

    Ok(())
}
