//! Scheduled events.
//!
//! Named periodic and one-shot callbacks on a monotonic second clock.
//! Registration spreads start times with a small jitter so sweepers
//! added together do not all fire on the same tick; frequencies can be
//! re-pointed in place, which `.events` and rehash rely on.
//!
//! The ticker task runs due events at most once per tick each, after the
//! uplink input for that tick has been drained.

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::Instant;

use crate::state::Network;

/// An event callback. Takes the shared context and returns a future the
/// ticker awaits to completion before the next event runs.
pub type EventFn = fn(Arc<Network>) -> BoxFuture<'static, ()>;

struct Event {
    name: &'static str,
    func: EventFn,
    /// Seconds between runs; meaningless for one-shots.
    frequency: u64,
    /// Monotonic second at which the event is next due.
    next: u64,
    oneshot: bool,
}

/// The event registry.
pub struct Scheduler {
    start: Instant,
    events: Mutex<Vec<Event>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Seconds since scheduler creation; the clock events run against.
    pub fn now(&self) -> u64 {
        self.start.elapsed().as_secs()
    }

    /// Register a periodic event.
    ///
    /// First execution lands `frequency` seconds out, plus a jitter of up
    /// to a tenth of the frequency so co-registered scans spread out.
    pub fn add(&self, name: &'static str, func: EventFn, frequency: u64) {
        let jitter = if frequency >= 10 {
            rand::thread_rng().gen_range(0..=frequency / 10)
        } else {
            0
        };
        self.events.lock().push(Event {
            name,
            func,
            frequency,
            next: self.now() + frequency + jitter,
            oneshot: false,
        });
    }

    /// Register a one-shot event `delay` seconds out.
    pub fn add_once(&self, name: &'static str, func: EventFn, delay: u64) {
        self.events.lock().push(Event {
            name,
            func,
            frequency: delay,
            next: self.now() + delay,
            oneshot: true,
        });
    }

    /// Re-point an existing event's frequency in place. The next run is
    /// rescheduled from now; unknown names are ignored.
    pub fn update(&self, name: &str, frequency: u64) {
        let now = self.now();
        let mut events = self.events.lock();
        if let Some(ev) = events.iter_mut().find(|e| e.name == name) {
            ev.frequency = frequency;
            ev.next = now + frequency;
        }
    }

    /// Remove an event by name.
    pub fn delete(&self, name: &str) {
        self.events.lock().retain(|e| e.name != name);
    }

    /// Collect callbacks due at `now`, rescheduling periodics and
    /// dropping one-shots. Each event is returned at most once per call
    /// however overdue it is.
    pub fn due(&self, now: u64) -> Vec<EventFn> {
        let mut due = Vec::new();
        let mut events = self.events.lock();
        events.retain_mut(|ev| {
            if ev.next > now {
                return true;
            }
            due.push(ev.func);
            if ev.oneshot {
                false
            } else {
                ev.next = now + ev.frequency;
                true
            }
        });
        due
    }

    /// Snapshot for `.events`: name, frequency, seconds until next run.
    pub fn list(&self) -> Vec<(String, u64, i64)> {
        let now = self.now();
        self.events
            .lock()
            .iter()
            .map(|e| (e.name.to_string(), e.frequency, e.next as i64 - now as i64))
            .collect()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive the scheduler: one tick per second, events run sequentially.
pub fn spawn_ticker(net: Arc<Network>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(1));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let now = net.scheduler.now();
            for func in net.scheduler.due(now) {
                func(net.clone()).await;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: Arc<Network>) -> BoxFuture<'static, ()> {
        Box::pin(async {})
    }

    #[test]
    fn periodic_reschedules_oneshot_does_not() {
        let sched = Scheduler::new();
        sched.add("periodic", noop, 5);
        sched.add_once("oneshot", noop, 5);

        // Nothing due yet.
        assert!(sched.due(0).is_empty());

        let due = sched.due(100);
        assert_eq!(due.len(), 2);

        // Only the periodic survives.
        let names: Vec<_> = sched.list().into_iter().map(|(n, _, _)| n).collect();
        assert_eq!(names, vec!["periodic".to_string()]);
    }

    #[test]
    fn overdue_event_fires_once_per_call() {
        let sched = Scheduler::new();
        sched.add("scan", noop, 1);
        assert_eq!(sched.due(1000).len(), 1);
    }

    #[test]
    fn update_repoints_in_place() {
        let sched = Scheduler::new();
        sched.add("scan", noop, 10);
        sched.update("scan", 100);
        let list = sched.list();
        assert_eq!(list[0].1, 100);

        sched.delete("scan");
        assert!(sched.list().is_empty());
    }
}
