use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

use crate::errors::AuthError;

/// Tri-state result of an asynchronous UI-facing operation.
///
/// Exactly one state is active per emission; `Loading` always precedes the
/// terminal state for a given action.
#[derive(Debug, Clone)]
pub enum UiResult<T> {
    Loading,
    Success(T),
    Error(Arc<AuthError>),
}

impl<T> UiResult<T> {
    pub fn error(err: AuthError) -> Self {
        Self::Error(Arc::new(err))
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    pub fn stored_data(&self) -> Option<&T> {
        match self {
            Self::Success(data) => Some(data),
            _ => None,
        }
    }

    pub fn error_cause(&self) -> Option<&AuthError> {
        match self {
            Self::Error(cause) => Some(cause),
            _ => None,
        }
    }
}

/// Value that can be observed many times but consumed at most once across
/// all clones of the event
#[derive(Debug, Clone)]
pub struct Event<T> {
    content: T,
    handled: Arc<AtomicBool>,
}

impl<T> Event<T> {
    pub fn new(content: T) -> Self {
        Self {
            content,
            handled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Look at the content without consuming the event
    pub fn peek(&self) -> &T {
        &self.content
    }

    /// Take the content if no clone of this event has taken it yet
    pub fn take(&self) -> Option<T>
    where
        T: Clone,
    {
        if self.handled.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(self.content.clone())
        }
    }
}

/// Receiver half of an [`EventChannel`]
pub type EventReceiver<T> = watch::Receiver<Option<Event<T>>>;

/// Last-value event channel: every emission replaces the previous one, so a
/// re-triggered action supersedes its predecessor instead of queueing behind
/// it. Late subscribers observe the most recent event.
pub struct EventChannel<T: Clone> {
    tx: watch::Sender<Option<Event<T>>>,
    closed: AtomicBool,
}

impl<T: Clone> EventChannel<T> {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            tx,
            closed: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> EventReceiver<T> {
        self.tx.subscribe()
    }

    pub fn emit(&self, content: T) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.tx.send_replace(Some(Event::new(content)));
    }

    /// Stop delivering events; used on disposal so that an aborted task
    /// cannot emit a final value
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl<T: Clone> Default for EventChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_is_consumed_at_most_once_across_clones() {
        let event = Event::new(7);
        let clone = event.clone();

        assert_eq!(*event.peek(), 7);
        assert_eq!(*clone.peek(), 7);

        assert_eq!(event.take(), Some(7));
        assert_eq!(clone.take(), None);
        // peeking is still allowed after consumption
        assert_eq!(*event.peek(), 7);
    }

    #[tokio::test]
    async fn channel_is_last_write_wins() {
        let channel = EventChannel::new();
        let mut rx = channel.subscribe();

        channel.emit(UiResult::<u32>::Loading);
        channel.emit(UiResult::Success(1));
        channel.emit(UiResult::Success(2));

        rx.changed().await.unwrap();
        let event = rx.borrow_and_update().clone().unwrap();
        assert!(matches!(event.peek(), UiResult::Success(2)));
    }

    #[tokio::test]
    async fn late_subscriber_sees_latest_event() {
        let channel = EventChannel::new();
        channel.emit(UiResult::Success("done"));

        let rx = channel.subscribe();
        let event = rx.borrow().clone().unwrap();
        assert_eq!(event.peek().stored_data(), Some(&"done"));
    }

    #[tokio::test]
    async fn closed_channel_drops_emissions() {
        let channel = EventChannel::new();
        let rx = channel.subscribe();

        channel.close();
        channel.emit(UiResult::Success(1));

        assert!(rx.borrow().is_none());
    }
}
