//! Shared SSE streaming infrastructure for both client adapters.
//!
//! Each adapter receives a `reqwest::Response`, buffers bytes, pops
//! complete events off the front of the buffer, and feeds each event's
//! payload to a provider-specific parser returning
//! `Vec<Result<StreamChunk>>`.

use std::time::Duration;

use hearth_domain::error::{Error, Result};
use hearth_domain::stream::{BoxStream, StreamChunk};

/// Inter-chunk idle limit. A stream that stays silent longer fails
/// with a timeout.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Pop the next complete SSE event off the front of `buffer` and
/// return its payload: the event's `data:` lines, trimmed and joined
/// with `\n` (field lines other than `data:` are dropped). Events are
/// `\n\n`-terminated; an unterminated trailer stays in the buffer.
///
/// Returns `None` when no complete event is buffered; an event with
/// no data yields `Some("")`, which callers skip.
pub(crate) fn next_event_payload(buffer: &mut String) -> Option<String> {
    let boundary = buffer.find("\n\n")?;
    let event: String = buffer.drain(..boundary + 2).collect();

    let payload = event
        .lines()
        .filter_map(|line| line.trim_start().strip_prefix("data:"))
        .map(str::trim)
        .filter(|data| !data.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    Some(payload)
}

/// Build a [`BoxStream`] from an SSE response and a parser closure.
///
/// The closure is `FnMut` because both adapters keep assembly state
/// across events (tool-call argument buffers). The stream:
/// 1. buffers incoming bytes and pops complete events as they land,
/// 2. enforces the inter-chunk idle timeout,
/// 3. treats a close mid-event as terminating that final event,
/// 4. emits a fallback `Done` if the parser never produced one.
pub(crate) fn sse_chunk_stream<F>(
    response: reqwest::Response,
    mut parse_data: F,
) -> BoxStream<'static, Result<StreamChunk>>
where
    F: FnMut(&str) -> Vec<Result<StreamChunk>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut done_emitted = false;

        loop {
            let next = tokio::time::timeout(IDLE_TIMEOUT, response.chunk()).await;
            let bytes = match next {
                Err(_) => {
                    yield Err(Error::Timeout(format!(
                        "stream idle for {}s",
                        IDLE_TIMEOUT.as_secs()
                    )));
                    break;
                }
                Ok(Err(e)) => {
                    yield Err(from_reqwest(e));
                    break;
                }
                Ok(Ok(None)) => {
                    // Body closed. Whatever is left is the last event.
                    if buffer.trim().is_empty() {
                        break;
                    }
                    buffer.push_str("\n\n");
                    None
                }
                Ok(Ok(Some(bytes))) => Some(bytes),
            };

            if let Some(bytes) = &bytes {
                buffer.push_str(&String::from_utf8_lossy(bytes));
            }

            while let Some(payload) = next_event_payload(&mut buffer) {
                if payload.is_empty() {
                    continue;
                }
                for chunk in parse_data(&payload) {
                    if matches!(&chunk, Ok(StreamChunk::Done { .. })) {
                        done_emitted = true;
                    }
                    yield chunk;
                }
            }

            if bytes.is_none() {
                break;
            }
        }

        if !done_emitted {
            yield Ok(StreamChunk::Done { usage: None });
        }
    };

    Box::pin(stream)
}

/// Convert a [`reqwest::Error`] into the typed domain error.
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else if e.is_connect() {
        Error::Unavailable(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Map a non-success HTTP response to a typed error at the client
/// boundary, so the runtime matches on variants rather than text.
pub(crate) fn error_from_status(provider: &str, status: u16, body: &str) -> Error {
    match status {
        401 | 403 => Error::Auth(format!("HTTP {status} - {body}")),
        429 => Error::RateLimited(format!("HTTP {status} - {body}")),
        400 if body.to_lowercase().contains("context")
            || body.to_lowercase().contains("too long") =>
        {
            Error::ContextOverflow(format!("HTTP {status} - {body}"))
        }
        500 | 502 | 503 | 504 | 529 => Error::Unavailable(format!("HTTP {status} - {body}")),
        _ => Error::Provider {
            provider: provider.to_string(),
            message: format!("HTTP {status} - {body}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_one_event_with_payload() {
        let mut buf = String::from("event: message\ndata: {\"a\":1}\n\n");
        assert_eq!(next_event_payload(&mut buf).as_deref(), Some("{\"a\":1}"));
        assert!(buf.is_empty());
        assert!(next_event_payload(&mut buf).is_none());
    }

    #[test]
    fn events_pop_in_order_and_trailer_stays() {
        let mut buf = String::from("data: first\n\ndata: second\n\ndata: partial");
        assert_eq!(next_event_payload(&mut buf).as_deref(), Some("first"));
        assert_eq!(next_event_payload(&mut buf).as_deref(), Some("second"));
        assert!(next_event_payload(&mut buf).is_none());
        assert_eq!(buf, "data: partial");
    }

    #[test]
    fn non_data_fields_are_dropped() {
        let mut buf = String::from("event: ping\nid: 42\nretry: 5000\ndata: payload\n\n");
        assert_eq!(next_event_payload(&mut buf).as_deref(), Some("payload"));
    }

    #[test]
    fn multi_data_lines_join() {
        let mut buf = String::from("data: line one\ndata: line two\n\n");
        assert_eq!(
            next_event_payload(&mut buf).as_deref(),
            Some("line one\nline two")
        );
    }

    #[test]
    fn dataless_event_yields_empty_payload() {
        let mut buf = String::from("event: ping\n\ndata: \n\n");
        assert_eq!(next_event_payload(&mut buf).as_deref(), Some(""));
        assert_eq!(next_event_payload(&mut buf).as_deref(), Some(""));
        assert!(buf.is_empty());
    }

    #[test]
    fn buffer_grows_across_reads() {
        let mut buf = String::from("data: chu");
        assert!(next_event_payload(&mut buf).is_none());
        buf.push_str("nk1\n\n");
        assert_eq!(next_event_payload(&mut buf).as_deref(), Some("chunk1"));
    }

    #[test]
    fn done_sentinel_passes_through() {
        let mut buf = String::from("data: [DONE]\n\n");
        assert_eq!(next_event_payload(&mut buf).as_deref(), Some("[DONE]"));
    }

    #[test]
    fn status_401_is_auth() {
        assert_eq!(error_from_status("p", 401, "no key").category(), "auth");
    }

    #[test]
    fn status_429_is_rate_limit() {
        assert_eq!(error_from_status("p", 429, "slow down").category(), "rate_limit");
    }

    #[test]
    fn status_400_context_is_overflow() {
        let e = error_from_status("p", 400, "prompt exceeds context window");
        assert_eq!(e.category(), "context_overflow");
    }

    #[test]
    fn status_503_is_unavailable() {
        assert_eq!(error_from_status("p", 503, "overloaded").category(), "unavailable");
    }

    #[test]
    fn status_404_is_provider_error() {
        assert_eq!(error_from_status("p", 404, "nope").category(), "unknown");
    }
}
