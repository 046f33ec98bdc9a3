//! Per-session transcript files
//!
//! Each session gets one timestamp; every file it writes is named
//! `<prefix>_<timestamp>.<ext>` inside the transcript directory.
//!
//! # Example
//!
//! ```ignore
//! let transcript = TranscriptWriter::new("transcripts", "Gemini")?;
//! transcript.append_jsonl(&chunk)?;
//! transcript.write_html(prompt, &response.text, response.rendered_content.as_deref())?;
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use minijinja::{context, AutoEscape, Environment};
use serde::Serialize;

const HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">

<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{{ title }} Search Demo</title>
    <style>
        body {
            font-family: Arial, sans-serif;
            max-width: 800px;
            margin: 0 auto;
            padding: 20px;
            background-color: #f0f0f0;
            color: #333;
        }

        h1 {
            font-size: 2em;
            margin-bottom: 20px;
        }

        .section {
            background-color: white;
            border-radius: 8px;
            padding: 15px;
            margin-bottom: 20px;
            box-shadow: 0 2px 4px rgba(0, 0, 0, 0.1);
        }

        @media (prefers-color-scheme: dark) {
            body {
                background-color: #1a1a1a;
                color: #e0e0e0;
            }

            .section {
                background-color: #2a2a2a;
                box-shadow: 0 2px 4px rgba(255, 255, 255, 0.1);
            }

            #gemini-response .container {
                background-color: #2a2a2a !important;
            }

            #gemini-response .chip {
                background-color: #3a3a3a !important;
                border-color: #5a5a5a !important;
                color: #e0e0e0 !important;
            }

            #gemini-response .logo-light {
                display: none !important;
            }

            #gemini-response .logo-dark {
                display: inline !important;
            }
        }
    </style>
</head>

<body>
    <h1>{{ title }}</h1>
    <div class="section">
        <div class="section">
            <h4>User</h4>
            <p>{{ query }}</p>
        </div>
        <div class="section">
            <h4>{{ title }}</h4>
            <p style="white-space: pre-wrap;">{{ response }}</p>
            {{ rendered_content|safe }}
        </div>
    </div>
</body>

</html>
"#;

/// Writes the raw and rendered artifacts of one session
#[derive(Debug, Clone)]
pub struct TranscriptWriter {
    dir: PathBuf,
    prefix: String,
    timestamp: String,
}

impl TranscriptWriter {
    /// Create a writer for a new session, creating `dir` if needed
    pub fn new(dir: impl AsRef<Path>, prefix: impl Into<String>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create transcript directory: {:?}", dir))?;

        let timestamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
        tracing::info!("[Transcript] Session {} in {:?}", timestamp, dir);

        Ok(Self {
            dir,
            prefix: prefix.into(),
            timestamp,
        })
    }

    /// Path of the session file with the given extension
    pub fn path(&self, extension: &str) -> PathBuf {
        self.dir
            .join(format!("{}_{}.{}", self.prefix, self.timestamp, extension))
    }

    /// Write a value as pretty-printed JSON
    pub fn write_json<T: Serialize>(&self, value: &T) -> Result<PathBuf> {
        let path = self.path("json");
        let file = File::create(&path)
            .with_context(|| format!("Failed to create transcript: {:?}", path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)
            .with_context(|| format!("Failed to write transcript: {:?}", path))?;
        writer
            .flush()
            .with_context(|| format!("Failed to flush transcript: {:?}", path))?;

        tracing::debug!("[Transcript] Wrote {:?}", path);
        Ok(path)
    }

    /// Append one value as a line of JSON
    pub fn append_jsonl<T: Serialize>(&self, value: &T) -> Result<PathBuf> {
        let path = self.path("jsonl");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open transcript: {:?}", path))?;

        let line = serde_json::to_string(value).context("Failed to serialize transcript entry")?;
        writeln!(file, "{}", line)
            .with_context(|| format!("Failed to append to transcript: {:?}", path))?;

        Ok(path)
    }

    /// Render the query, the response, and the search entry point as HTML.
    ///
    /// `rendered_content` is vendor-provided HTML and is inserted as is.
    pub fn write_html(
        &self,
        query: &str,
        response: &str,
        rendered_content: Option<&str>,
    ) -> Result<PathBuf> {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::Html);

        let html = env
            .render_str(
                HTML_TEMPLATE,
                context! {
                    title => &self.prefix,
                    query => query,
                    response => response,
                    rendered_content => rendered_content.unwrap_or(""),
                },
            )
            .context("Failed to render HTML transcript")?;

        let path = self.path("html");
        fs::write(&path, html).with_context(|| format!("Failed to write HTML: {:?}", path))?;

        tracing::info!("[Transcript] HTML file created: {:?}", path);
        Ok(path)
    }
}
