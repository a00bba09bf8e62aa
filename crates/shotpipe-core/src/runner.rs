use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::AbortHandle;

/// Cooperative cancellation flag. The one piece of per-task state that is
/// written from outside the worker.
#[derive(Clone, Debug, Default)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Runs one unit of work on its own tokio task and funnels every event the
/// work emits through a single channel. The owner drains the receiver in its
/// own context, so observers never get called from the worker directly, and
/// events for one runner arrive strictly in emission order.
pub struct BackgroundRunner<E> {
    sender: UnboundedSender<E>,
    receiver: Mutex<Option<UnboundedReceiver<E>>>,
    started: AtomicBool,
    abort: Mutex<Option<AbortHandle>>,
}

impl<E: Send + 'static> BackgroundRunner<E> {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            started: AtomicBool::new(false),
            abort: Mutex::new(None),
        }
    }

    /// Starts the worker exactly once. A second call is a no-op and returns
    /// false. The work owns its error handling; nothing it emits may panic
    /// past the future boundary unobserved, there is no supervisor above it.
    pub fn start<F>(&self, work: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.started.swap(true, Ordering::SeqCst) {
            return false;
        }

        let handle = tokio::spawn(work);
        if let Ok(mut slot) = self.abort.lock() {
            *slot = Some(handle.abort_handle());
        }
        true
    }

    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Cloneable sender half, handed to the work so it can emit events.
    pub fn sink(&self) -> EventSink<E> {
        EventSink {
            sender: self.sender.clone(),
        }
    }

    /// The single consumer end. Yields `Some` exactly once.
    pub fn take_events(&self) -> Option<UnboundedReceiver<E>> {
        self.receiver.lock().ok()?.take()
    }

    /// Hard abort of the worker task. Cancellation is cooperative in normal
    /// operation; this is a last resort for teardown.
    pub fn abort(&self) {
        if let Ok(slot) = self.abort.lock()
            && let Some(handle) = slot.as_ref()
        {
            handle.abort();
        }
    }
}

impl<E: Send + 'static> Default for BackgroundRunner<E> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct EventSink<E> {
    sender: UnboundedSender<E>,
}

impl<E> Clone for EventSink<E> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<E> EventSink<E> {
    /// Sends are infallible from the emitter's point of view; once the owner
    /// drops the receiver, further events are discarded.
    pub fn emit(&self, event: E) {
        let _ = self.sender.send(event);
    }
}
