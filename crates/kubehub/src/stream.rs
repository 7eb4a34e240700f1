//! Stream handles: a receiver paired with its producer's stop hook.

use std::fmt;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Stops a running stream producer. Fires at most once: on `cancel` or on drop.
pub struct CancelHandle {
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl CancelHandle {
    pub fn new(stop: impl FnOnce() + Send + 'static) -> Self { Self { stop: Some(Box::new(stop)) } }

    pub fn from_sender(tx: oneshot::Sender<()>) -> Self {
        Self::new(move || {
            let _ = tx.send(());
        })
    }

    pub fn from_task(task: JoinHandle<()>) -> Self { Self::new(move || task.abort()) }

    pub fn noop() -> Self { Self { stop: None } }

    pub fn cancel(mut self) { self.fire(); }

    fn fire(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) { self.fire(); }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle").field("armed", &self.stop.is_some()).finish()
    }
}

/// Receiver plus the handle that stops its producer.
#[derive(Debug)]
pub struct StreamHandle<T> {
    pub rx: mpsc::Receiver<T>,
    pub cancel: CancelHandle,
}

impl<T> StreamHandle<T> {
    pub fn new(rx: mpsc::Receiver<T>, cancel: CancelHandle) -> Self { Self { rx, cancel } }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn cancel_fires_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let handle = CancelHandle::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        handle.cancel();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_fires_when_not_cancelled() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        drop(CancelHandle::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sender_handle_signals_receiver() {
        let (tx, rx) = oneshot::channel();
        CancelHandle::from_sender(tx).cancel();
        assert!(rx.await.is_ok());
    }
}
