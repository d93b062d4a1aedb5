//! Unsolicited Event Sink
//!
//! Fans out lines that belong to no command.
//!
//! ## Architecture
//! ```text
//! read loop ──try_send──▶ bounded queue ──▶ dispatcher thread ──▶ callbacks
//!                                                             └──▶ subscriber channels
//! ```
//! The read loop never blocks on a consumer: a full queue or a full
//! subscriber channel drops the event and counts it.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::error::{AtError, Result};
use crate::stats::Counters;

/// A notification emitted by the device without being asked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsolicitedEvent {
    /// A single notification line
    Line(String),

    /// A header line and the payload line that followed it (`+CMT:` etc.)
    Pair { header: String, payload: String },
}

impl UnsolicitedEvent {
    /// The first (or only) line of the event
    pub fn header(&self) -> &str {
        match self {
            UnsolicitedEvent::Line(line) => line,
            UnsolicitedEvent::Pair { header, .. } => header,
        }
    }
}

type Callback = Arc<dyn Fn(&UnsolicitedEvent) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    callbacks: Vec<Callback>,
    channels: Vec<Sender<UnsolicitedEvent>>,
}

/// Producer side handed to the read loop
#[derive(Clone)]
pub(crate) struct EventPublisher {
    queue: Sender<UnsolicitedEvent>,
    counters: Arc<Counters>,
}

impl EventPublisher {
    /// Queue an event without blocking
    pub fn publish(&self, event: UnsolicitedEvent) {
        match self.queue.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                Counters::bump(&self.counters.unsolicited_dropped);
                tracing::warn!(header = event.header(), "Unsolicited queue full, dropping event");
            }
            Err(TrySendError::Disconnected(event)) => {
                Counters::bump(&self.counters.unsolicited_dropped);
                tracing::debug!(header = event.header(), "Dispatcher gone, dropping event");
            }
        }
    }
}

/// Owns the dispatcher thread and the subscriber list
pub struct EventSink {
    /// Queue sender; `None` once shut down
    queue: Option<Sender<UnsolicitedEvent>>,

    subscribers: Arc<Mutex<Subscribers>>,

    subscriber_capacity: usize,

    counters: Arc<Counters>,

    dispatcher: Option<JoinHandle<()>>,
}

impl EventSink {
    /// Spawn the dispatcher thread
    pub(crate) fn spawn(
        queue_capacity: usize,
        subscriber_capacity: usize,
        counters: Arc<Counters>,
    ) -> Result<Self> {
        let (tx, rx) = channel::bounded(queue_capacity);
        let subscribers = Arc::new(Mutex::new(Subscribers::default()));

        let dispatcher = {
            let subscribers = Arc::clone(&subscribers);
            let counters = Arc::clone(&counters);
            thread::Builder::new()
                .name("at-unsolicited".to_string())
                .spawn(move || dispatch_loop(rx, subscribers, counters))
                .map_err(AtError::Io)?
        };

        Ok(Self {
            queue: Some(tx),
            subscribers,
            subscriber_capacity,
            counters,
            dispatcher: Some(dispatcher),
        })
    }

    /// Producer handle for the read loop
    pub(crate) fn publisher(&self) -> Result<EventPublisher> {
        let queue = self.queue.clone().ok_or(AtError::ChannelClosed)?;
        Ok(EventPublisher {
            queue,
            counters: Arc::clone(&self.counters),
        })
    }

    /// Subscribe with a bounded channel; a slow receiver loses events
    pub fn subscribe(&self) -> Receiver<UnsolicitedEvent> {
        let (tx, rx) = channel::bounded(self.subscriber_capacity);
        self.subscribers.lock().channels.push(tx);
        rx
    }

    /// Register a callback run on the dispatcher thread for every event
    ///
    /// Callbacks run outside the subscriber lock, so they may subscribe or
    /// register further callbacks. A callback registered that way first runs
    /// on the next event.
    pub fn on_event<F>(&self, callback: F)
    where
        F: Fn(&UnsolicitedEvent) + Send + Sync + 'static,
    {
        self.subscribers.lock().callbacks.push(Arc::new(callback));
    }

    /// Stop accepting events and wait for the dispatcher to drain
    ///
    /// Publishers still alive keep the dispatcher running until they drop.
    pub(crate) fn shutdown(&mut self) {
        self.queue.take();
        if let Some(handle) = self.dispatcher.take() {
            if handle.join().is_err() {
                tracing::error!("Unsolicited dispatcher panicked");
            }
        }

        // Disconnect subscribers so their receivers observe the close
        let mut subs = self.subscribers.lock();
        subs.channels.clear();
        subs.callbacks.clear();
    }
}

impl Drop for EventSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatch_loop(
    rx: Receiver<UnsolicitedEvent>,
    subscribers: Arc<Mutex<Subscribers>>,
    counters: Arc<Counters>,
) {
    for event in rx.iter() {
        tracing::trace!(?event, "Dispatching unsolicited event");
        Counters::bump(&counters.unsolicited_dispatched);

        let callbacks: Vec<Callback> = subscribers.lock().callbacks.clone();
        for callback in &callbacks {
            callback(&event);
        }

        subscribers.lock().channels.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                Counters::bump(&counters.unsolicited_dropped);
                tracing::warn!(header = event.header(), "Subscriber lagging, dropping event");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
    tracing::debug!("Unsolicited dispatcher stopped");
}
