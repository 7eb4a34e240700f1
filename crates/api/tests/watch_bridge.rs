use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kapis_api::{stream_events_with, InProcApi, ResourceApi, StreamEnd};
use kapis_core::{EventType, GroupVersionKind, GroupVersionResource, Registry, ResourceObject, WatchEvent};
use kapis_kubehub::{CancelHandle, MemoryStore, StreamHandle};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn config_map(name: &str) -> ResourceObject {
    let mut obj = ResourceObject::generic(&GroupVersionKind::new("", "v1", "ConfigMap"));
    obj.load(json!({"metadata": {"name": name, "namespace": "default"}})).expect("load");
    obj
}

/// Handle fed by a scripted producer; the counter records stop calls.
fn scripted(events: Vec<(EventType, &'static str)>) -> (StreamHandle<WatchEvent>, Arc<AtomicUsize>) {
    let (tx, rx) = mpsc::channel(4);
    let stops = Arc::new(AtomicUsize::new(0));
    let s = stops.clone();
    tokio::spawn(async move {
        let script = async_stream::stream! {
            for (event_type, name) in events {
                yield WatchEvent::new(event_type, config_map(name));
            }
        };
        futures::pin_mut!(script);
        while let Some(ev) = script.next().await {
            if tx.send(ev).await.is_err() {
                break;
            }
        }
    });
    let cancel = CancelHandle::new(move || {
        s.fetch_add(1, Ordering::SeqCst);
    });
    (StreamHandle::new(rx, cancel), stops)
}

#[tokio::test]
async fn producer_close_ends_stream_in_order() {
    let (handle, stops) =
        scripted(vec![(EventType::Added, "a"), (EventType::Modified, "a"), (EventType::Deleted, "a")]);
    let mut out = Vec::new();
    let end = stream_events_with(handle, &mut out, CancellationToken::new(), false).await;
    assert_eq!(end, StreamEnd::ProducerClosed);
    assert_eq!(String::from_utf8(out).expect("utf8"), "data: ADDED\n\ndata: MODIFIED\n\ndata: DELETED\n\n");
    assert_eq!(stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn peer_disconnect_stops_watch_once() {
    let (tx, rx) = mpsc::channel(4);
    let stops = Arc::new(AtomicUsize::new(0));
    let s = stops.clone();
    let handle = StreamHandle::new(rx, CancelHandle::new(move || {
        s.fetch_add(1, Ordering::SeqCst);
    }));
    let (writer, reader) = tokio::io::duplex(64);
    drop(reader);

    let bridge = tokio::spawn(stream_events_with(handle, writer, CancellationToken::new(), false));
    tx.send(WatchEvent::new(EventType::Added, config_map("a"))).await.expect("send");
    let end = tokio::time::timeout(Duration::from_secs(2), bridge).await.expect("bounded").expect("join");
    assert_eq!(end, StreamEnd::PeerGone);
    assert_eq!(stops.load(Ordering::SeqCst), 1);
    // The receiver is gone with the bridge.
    assert!(tx.is_closed());
}

#[tokio::test]
async fn cancel_interrupts_a_blocked_write() {
    let (tx, rx) = mpsc::channel(4);
    let stops = Arc::new(AtomicUsize::new(0));
    let s = stops.clone();
    let handle = StreamHandle::new(rx, CancelHandle::new(move || {
        s.fetch_add(1, Ordering::SeqCst);
    }));
    // Connected peer that never reads: the first frame overflows the pipe.
    let (writer, _reader) = tokio::io::duplex(4);
    let token = CancellationToken::new();

    let bridge = tokio::spawn(stream_events_with(handle, writer, token.clone(), false));
    tx.send(WatchEvent::new(EventType::Added, config_map("a"))).await.expect("send");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!bridge.is_finished());
    assert_eq!(stops.load(Ordering::SeqCst), 0);

    token.cancel();
    let end = tokio::time::timeout(Duration::from_secs(2), bridge).await.expect("bounded").expect("join");
    assert_eq!(end, StreamEnd::Cancelled);
    assert_eq!(stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancellation_wins_over_pending_events() {
    let (handle, stops) = scripted(vec![(EventType::Added, "a")]);
    let token = CancellationToken::new();
    token.cancel();
    let mut out = Vec::new();
    let end = stream_events_with(handle, &mut out, token, false).await;
    assert_eq!(end, StreamEnd::Cancelled);
    assert!(out.is_empty());
    assert_eq!(stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn memory_watch_streams_changes_until_cancelled() {
    let registry = Registry::builtin();
    let store = Arc::new(MemoryStore::new(&registry));
    let api = InProcApi::new(store.clone(), Arc::new(registry));
    let cms = GroupVersionResource::new("", "v1", "configmaps");

    let handle = api.watch(&cms, "default", None).await.expect("watch");
    let (writer, reader) = tokio::io::duplex(1024);
    let token = CancellationToken::new();
    let bridge = tokio::spawn(stream_events_with(handle, writer, token.clone(), false));

    api.create(&cms, "default", json!({"metadata": {"name": "cfg"}, "data": {"k": "v"}})).await.expect("create");
    api.patch(&cms, "default", "cfg", json!({"data": {"k": "w"}})).await.expect("patch");
    api.create(&cms, "other", json!({"metadata": {"name": "elsewhere"}})).await.expect("create other ns");
    api.delete(&cms, "default", "cfg").await.expect("delete");

    let mut lines = BufReader::new(reader).lines();
    let mut frames = Vec::new();
    while frames.len() < 3 {
        let line = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
            .await
            .expect("frame in time")
            .expect("read")
            .expect("open");
        if !line.is_empty() {
            frames.push(line);
        }
    }
    assert_eq!(frames, vec!["data: ADDED", "data: MODIFIED", "data: DELETED"]);

    token.cancel();
    let end = tokio::time::timeout(Duration::from_secs(2), bridge).await.expect("bounded").expect("join");
    assert_eq!(end, StreamEnd::Cancelled);
    assert_eq!(store.stopped_watches(), 1);

    // The producer task winds down after its stop signal.
    tokio::time::timeout(Duration::from_secs(2), async {
        while store.active_watches() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("producer stopped");
}

#[tokio::test]
async fn payload_frames_carry_the_object() {
    let (handle, _) = scripted(vec![(EventType::Added, "with-payload")]);
    let mut out = Vec::new();
    stream_events_with(handle, &mut out, CancellationToken::new(), true).await;
    let text = String::from_utf8(out).expect("utf8");
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("data: ADDED"));
    let json = lines.next().and_then(|l| l.strip_prefix("data: ")).expect("payload");
    let v: serde_json::Value = serde_json::from_str(json).expect("json");
    assert_eq!(v["metadata"]["name"], "with-payload");
}
