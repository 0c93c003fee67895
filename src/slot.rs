//! A single-producer, read-once slot for metadata that arrives
//! asynchronously as a notification: last-inserted-id, rows-affected,
//! column-names (spec.md §3 "Streaming result state", §4.5).

use std::sync::Mutex;

use tokio::sync::Notify;

use crate::error::ResultError;
use crate::remote_object::ClosedSignal;

enum State<T> {
    Empty,
    Filled(T),
    Read,
}

pub struct SingleShotSlot<T> {
    state: Mutex<State<T>>,
    notify: Notify,
}

impl<T> SingleShotSlot<T> {
    pub fn new() -> Self {
        SingleShotSlot {
            state: Mutex::new(State::Empty),
            notify: Notify::new(),
        }
    }

    /// Called synchronously from a notification handler. The first publish
    /// wins; a duplicate publish (the server should never send one) is
    /// silently dropped rather than overwriting an unread value.
    pub fn publish(&self, value: T) {
        let mut guard = self.state.lock().unwrap();
        if matches!(*guard, State::Empty) {
            *guard = State::Filled(value);
        }
        drop(guard);
        self.notify.notify_waiters();
    }

    fn try_take(&self) -> Option<Result<T, ResultError>> {
        let mut guard = self.state.lock().unwrap();
        match &*guard {
            State::Empty => None,
            State::Read => Some(Err(ResultError::AlreadyRead)),
            State::Filled(_) => {
                let State::Filled(v) = std::mem::replace(&mut *guard, State::Read) else {
                    unreachable!()
                };
                Some(Ok(v))
            }
        }
    }

    /// Suspends until a value is published, the slot has already been read
    /// once, or the connection tears down. Returns the value exactly once.
    pub async fn read_once(&self, closed: &ClosedSignal) -> Result<T, ResultError> {
        loop {
            if let Some(result) = self.try_take() {
                return result;
            }
            if closed.is_closed() {
                return Err(ResultError::ConnectionClosed);
            }
            let notified = self.notify.notified();
            let closed_notified = closed.notified();
            if let Some(result) = self.try_take() {
                return result;
            }
            if closed.is_closed() {
                return Err(ResultError::ConnectionClosed);
            }
            tokio::select! {
                _ = notified => {}
                _ = closed_notified => {}
            }
        }
    }
}

impl<T> Default for SingleShotSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_read() {
        let slot: SingleShotSlot<u64> = SingleShotSlot::new();
        let closed = ClosedSignal::new();
        slot.publish(42);
        assert_eq!(slot.read_once(&closed).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn second_read_fails() {
        let slot: SingleShotSlot<u64> = SingleShotSlot::new();
        let closed = ClosedSignal::new();
        slot.publish(42);
        slot.read_once(&closed).await.unwrap();
        assert!(matches!(
            slot.read_once(&closed).await,
            Err(ResultError::AlreadyRead)
        ));
    }

    #[tokio::test]
    async fn read_suspends_until_published() {
        let slot: std::sync::Arc<SingleShotSlot<u64>> = std::sync::Arc::new(SingleShotSlot::new());
        let closed = ClosedSignal::new();
        let slot2 = slot.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            slot2.publish(7);
        });
        let closed2 = closed.clone();
        assert_eq!(slot.read_once(&closed2).await.unwrap(), 7);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn teardown_unblocks_waiter() {
        let slot: SingleShotSlot<u64> = SingleShotSlot::new();
        let closed = ClosedSignal::new();
        closed.fire();
        assert!(matches!(
            slot.read_once(&closed).await,
            Err(ResultError::ConnectionClosed)
        ));
    }
}
