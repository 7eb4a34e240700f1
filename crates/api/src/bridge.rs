//! Watch-to-stream bridge: drains a watch channel into an event-stream sink,
//! one flushed frame per event.

use std::io;

use kapis_core::WatchEvent;
use kapis_kubehub::StreamHandle;
use metrics::counter;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Response headers for an event stream.
pub const SSE_HEADERS: [(&str, &str); 4] = [
    ("Content-Type", "text/event-stream"),
    ("Cache-Control", "no-cache"),
    ("Connection", "keep-alive"),
    ("Transfer-Encoding", "chunked"),
];

/// Why a stream ended. None of these is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The store closed the watch channel.
    ProducerClosed,
    /// Writing to the sink failed.
    PeerGone,
    /// The request was cancelled.
    Cancelled,
}

impl StreamEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamEnd::ProducerClosed => "producer_closed",
            StreamEnd::PeerGone => "peer_gone",
            StreamEnd::Cancelled => "cancelled",
        }
    }
}

/// Whether frames carry the object as a second `data:` line
/// (`KAPIS_WATCH_EVENT_PAYLOAD`, default off).
pub fn payload_from_env() -> bool {
    std::env::var("KAPIS_WATCH_EVENT_PAYLOAD")
        .ok()
        .map(|s| matches!(s.trim(), "1" | "true" | "TRUE" | "yes"))
        .unwrap_or(false)
}

/// `data: ADDED\n\n`, optionally with the object JSON on a second data line.
pub fn encode_frame(ev: &WatchEvent, with_payload: bool) -> String {
    if with_payload {
        match serde_json::to_string(&ev.object) {
            Ok(json) => return format!("data: {}\ndata: {}\n\n", ev.event_type, json),
            Err(e) => warn!(error = %e, "watch: payload not serializable; sending type only"),
        }
    }
    format!("data: {}\n\n", ev.event_type)
}

async fn write_frame<W: AsyncWrite + Unpin>(sink: &mut W, frame: &str) -> io::Result<()> {
    sink.write_all(frame.as_bytes()).await?;
    sink.flush().await
}

/// Drain `handle` into `sink` until the producer closes, a write fails or
/// `cancel` fires. The watch is stopped exactly once on every exit path.
pub async fn stream_events<W>(handle: StreamHandle<WatchEvent>, sink: W, cancel: CancellationToken) -> StreamEnd
where
    W: AsyncWrite + Unpin,
{
    stream_events_with(handle, sink, cancel, payload_from_env()).await
}

pub async fn stream_events_with<W>(
    handle: StreamHandle<WatchEvent>,
    mut sink: W,
    cancel: CancellationToken,
    with_payload: bool,
) -> StreamEnd
where
    W: AsyncWrite + Unpin,
{
    let StreamHandle { mut rx, cancel: stop } = handle;
    let mut sent = 0u64;
    let end = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break StreamEnd::Cancelled,
            next = rx.recv() => match next {
                None => break StreamEnd::ProducerClosed,
                Some(ev) => {
                    let frame = encode_frame(&ev, with_payload);
                    // A peer that stops reading must not hold off cancellation.
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break StreamEnd::Cancelled,
                        written = write_frame(&mut sink, &frame) => {
                            if let Err(e) = written {
                                debug!(error = %e, "watch: sink write failed");
                                break StreamEnd::PeerGone;
                            }
                        }
                    }
                    sent += 1;
                    counter!("watch_events_total", 1u64, "type" => ev.event_type.as_str());
                }
            }
        }
    };
    drop(rx);
    stop.cancel();
    counter!("watch_streams_total", 1u64, "end" => end.as_str());
    info!(end = end.as_str(), sent, "watch: stream ended");
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use kapis_core::{EventType, GroupVersionKind, ResourceObject};
    use serde_json::json;

    fn event(event_type: EventType, name: &str) -> WatchEvent {
        let mut obj = ResourceObject::generic(&GroupVersionKind::new("", "v1", "ConfigMap"));
        obj.load(json!({"metadata": {"name": name}})).expect("load");
        WatchEvent::new(event_type, obj)
    }

    #[test]
    fn frames_carry_event_type() {
        assert_eq!(encode_frame(&event(EventType::Added, "a"), false), "data: ADDED\n\n");
        assert_eq!(encode_frame(&event(EventType::Deleted, "a"), false), "data: DELETED\n\n");
    }

    #[test]
    fn payload_frames_add_object_line() {
        let frame = encode_frame(&event(EventType::Modified, "cfg"), true);
        let mut lines = frame.lines();
        assert_eq!(lines.next(), Some("data: MODIFIED"));
        let payload = lines.next().and_then(|l| l.strip_prefix("data: ")).expect("payload line");
        let v: serde_json::Value = serde_json::from_str(payload).expect("json");
        assert_eq!(v["metadata"]["name"], "cfg");
        assert!(frame.ends_with("\n\n"));
    }
}
