//! Server-sent event framing shared by the providers

use anyhow::Result;
use futures::stream::Stream;
use futures::StreamExt;
use reqwest::Response;
use std::pin::Pin;
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;

/// Stream of `data:` payloads, one per SSE line, in arrival order
pub(crate) type DataStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Read the `data:` lines of an SSE response body.
///
/// `event:`, `id:` and comment lines are skipped; the vendor payloads carry
/// their own type tag.
pub(crate) fn data_stream(response: Response) -> DataStream {
    let byte_stream = response
        .bytes_stream()
        .map(|result| result.map_err(|e| std::io::Error::other(e.to_string())));
    let buf_reader = tokio::io::BufReader::new(StreamReader::new(byte_stream));

    let stream = async_stream::try_stream! {
        let mut lines = buf_reader.lines();

        while let Some(line) = lines.next_line().await? {
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data.is_empty() || data == "[DONE]" {
                continue;
            }
            yield data.to_string();
        }
    };

    Box::pin(stream)
}
