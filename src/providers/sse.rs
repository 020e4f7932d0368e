//! Line-oriented reading of streaming upstream response bodies.

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use tokio::io::{AsyncBufReadExt, Lines};
use tokio_util::io::StreamReader;

pub(crate) type BodyLines =
    Lines<StreamReader<BoxStream<'static, std::io::Result<Bytes>>, Bytes>>;

/// Adapt a streaming HTTP response body into a line reader.
///
/// Server-sent-event framing is line based, so adapters consume the body one
/// line at a time; partial lines at TCP chunk boundaries are reassembled by
/// the buffered reader.
pub(crate) fn body_lines(response: reqwest::Response) -> BodyLines {
    let stream = response
        .bytes_stream()
        .map_err(std::io::Error::other)
        .boxed();
    StreamReader::new(stream).lines()
}

/// Strip the `data:` prefix from an SSE line, tolerating a missing space.
pub(crate) fn data_payload(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Strip the `event:` prefix from an SSE line.
pub(crate) fn event_name(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("event:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_payload() {
        assert_eq!(data_payload("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(data_payload("data:[DONE]"), Some("[DONE]"));
        assert_eq!(data_payload("event: message"), None);
        assert_eq!(data_payload(": comment"), None);
    }

    #[test]
    fn test_event_name() {
        assert_eq!(event_name("event: content_block_delta"), Some("content_block_delta"));
        assert_eq!(event_name("data: {}"), None);
    }
}
