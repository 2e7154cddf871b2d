use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    Tick { id: String, remaining: Duration },
    Expired { id: String },
}

/// One repeating countdown task per id. Every handle is owned here and is
/// aborted on `cancel`, `cancel_all`, or drop.
#[derive(Debug)]
pub struct PollRegistry {
    period: Duration,
    handles: HashMap<String, JoinHandle<()>>,
    events: mpsc::UnboundedSender<PollEvent>,
}

impl PollRegistry {
    pub fn new(period: Duration) -> (Self, mpsc::UnboundedReceiver<PollEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let registry = Self {
            period,
            handles: HashMap::new(),
            events,
        };
        (registry, rx)
    }

    /// Starts polling `id` until `remaining` has elapsed. An existing poll
    /// for the same id is cancelled first. Must be called inside a tokio
    /// runtime.
    #[tracing::instrument(skip(self))]
    pub fn spawn(&mut self, id: &str, remaining: Duration) {
        self.cancel(id);

        let deadline = Instant::now() + remaining;
        let period = self.period;
        let events = self.events.clone();
        let owned_id = id.to_string();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let now = Instant::now();
                if now >= deadline {
                    let _ = events.send(PollEvent::Expired { id: owned_id });
                    break;
                }
                let tick = PollEvent::Tick {
                    id: owned_id.clone(),
                    remaining: deadline - now,
                };
                trace!(?tick, "poll tick");
                if events.send(tick).is_err() {
                    break;
                }
            }
        });

        self.handles.insert(id.to_string(), handle);
    }

    /// Aborts the poll for `id`. Returns whether one was registered.
    pub fn cancel(&mut self, id: &str) -> bool {
        match self.handles.remove(id) {
            Some(handle) => {
                handle.abort();
                debug!(id, "cancelled poll");
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) -> usize {
        let count = self.handles.len();
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
        if count > 0 {
            debug!(count, "cancelled all polls");
        }
        count
    }

    /// Drops the bookkeeping for a poll that ended on its own.
    pub fn release(&mut self, id: &str) {
        self.handles.remove(id);
    }

    pub fn is_polling(&self, id: &str) -> bool {
        self.handles
            .get(id)
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Drop for PollRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
