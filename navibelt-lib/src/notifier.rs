//! Ordered, asynchronous delivery of belt events to the application.
//!
//! The listener must never wait on application code, so events are queued
//! and handed to the observer from a dedicated blocking thread. Dropping the
//! queue stops the notifier once the remaining events are delivered.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

use crate::types::{BeltEvent, BeltMode};

pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// Receives mode changes and button presses.
///
/// Called on the notifier thread, one event at a time and in the order the
/// packets arrived. An error (or panic) stops all further notifications for
/// the connection.
pub trait BeltObserver: Send + Sync {
    fn on_mode_change(&self, event: &BeltEvent) -> Result<(), ObserverError>;
}

impl<F> BeltObserver for F
where
    F: Fn(&BeltEvent) -> Result<(), ObserverError> + Send + Sync,
{
    fn on_mode_change(&self, event: &BeltEvent) -> Result<(), ObserverError> {
        self(event)
    }
}

/// Producer side of the notification queue.
#[derive(Debug)]
pub(crate) struct EventQueue {
    sender: UnboundedSender<BeltEvent>,
    next_sequence: u64,
}

impl EventQueue {
    pub(crate) fn push(&mut self, mode: BeltMode, button_id: u8, press_type: u8) {
        let event = BeltEvent {
            mode,
            button_id,
            press_type,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        if self.sender.send(event).is_err() {
            trace!(?event, "Notifier stopped, event dropped");
        }
    }
}

/// Start a notifier delivering to `observer`.
pub(crate) fn spawn(observer: Arc<dyn BeltObserver>) -> (EventQueue, JoinHandle<()>) {
    let (sender, mut receiver) = unbounded_channel::<BeltEvent>();
    let handle = tokio::task::spawn_blocking(move || {
        info!("Event notifier started");
        while let Some(event) = receiver.blocking_recv() {
            debug!(mode = %event.mode, button = event.button_id, press = event.press_type, "Notifying belt event");
            let outcome = catch_unwind(AssertUnwindSafe(|| observer.on_mode_change(&event)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(?event, "Belt observer failed, stopping notifications: {}", e);
                    break;
                }
                Err(_) => {
                    error!(?event, "Belt observer panicked, stopping notifications");
                    break;
                }
            }
        }
        info!("Event notifier stopped");
    });
    let queue = EventQueue {
        sender,
        next_sequence: 0,
    };
    (queue, handle)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[tokio::test]
    async fn test_events_delivered_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer = move |event: &BeltEvent| -> Result<(), ObserverError> {
            sink.lock().unwrap().push(*event);
            Ok(())
        };
        let (mut queue, handle) = spawn(Arc::new(observer));
        queue.push(BeltMode::Standby, 0, 0);
        queue.push(BeltMode::AppMode, 1, 2);
        queue.push(BeltMode::AppMode, 3, 1);
        drop(queue);
        handle.await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(seen[1].mode, BeltMode::AppMode);
        assert_eq!((seen[2].button_id, seen[2].press_type), (3, 1));
    }

    #[tokio::test]
    async fn test_failing_observer_stops_notifier() {
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let observer = move |_: &BeltEvent| -> Result<(), ObserverError> {
            *counter.lock().unwrap() += 1;
            Err("observer broke".into())
        };
        let (mut queue, handle) = spawn(Arc::new(observer));
        queue.push(BeltMode::Standby, 0, 0);
        handle.await.unwrap();

        // later events are dropped quietly
        queue.push(BeltMode::Compass, 0, 0);
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_panicking_observer_stops_notifier() {
        let observer = |_: &BeltEvent| -> Result<(), ObserverError> { panic!("boom") };
        let (mut queue, handle) = spawn(Arc::new(observer));
        queue.push(BeltMode::Pause, 0, 0);
        assert!(handle.await.is_ok());
    }
}
