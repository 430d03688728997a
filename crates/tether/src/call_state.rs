//! Per-call state shared by a waiting caller and the engine thread.
//!
//! `call_state` hands out exactly two references to one shared record: a
//! [`Waiter`] for the blocked caller and a [`Completer`] for the reply
//! handler on the engine thread. Each side releases its reference by
//! dropping it, and the record is freed by whichever drop comes last.
//! Neither side is privileged, so a reply that lands before, during or
//! after the waiter's timeout all tear down the same way.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex};

/// Name a reply is routed by. Unique per call, even for concurrent calls
/// against the same engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    /// Derive a key from the engine id and a high-resolution timestamp. The
    /// sequence number breaks ties between calls in the same clock tick.
    pub fn new(engine_id: u64) -> Self {
        static SEQUENCE: AtomicU64 = AtomicU64::new(0);

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!("__tether_reply_{engine_id}_{nanos:x}_{seq}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Default)]
struct Slot {
    /// Set once, after `payload` is written.
    done: bool,
    /// Set by the first final delivery; later ones are ignored.
    final_seen: bool,
    /// The completer went away without publishing.
    orphaned: bool,
    payload: String,
}

struct Shared {
    key: CorrelationKey,
    slot: Mutex<Slot>,
    cond: Condvar,
}

/// How a wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed(String),
    TimedOut,
    /// The completer was dropped unpublished, e.g. the engine shut down.
    Abandoned,
}

/// Create the two halves of a call.
pub fn call_state(key: CorrelationKey) -> (Waiter, Completer) {
    let shared = Arc::new(Shared {
        key,
        slot: Mutex::new(Slot::default()),
        cond: Condvar::new(),
    });
    (
        Waiter {
            shared: Arc::clone(&shared),
        },
        Completer { shared },
    )
}

/// The caller's half.
pub struct Waiter {
    shared: Arc<Shared>,
}

impl Waiter {
    pub fn key(&self) -> &CorrelationKey {
        &self.shared.key
    }

    /// Block until the result is published, the completer is dropped, or
    /// `timeout` elapses. Consumes the waiter, releasing its reference.
    ///
    /// On timeout the payload is not read; the call is abandoned, not
    /// cancelled, and a late reply still tears the state down.
    pub fn wait(self, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock();
        loop {
            if slot.done {
                return WaitOutcome::Completed(std::mem::take(&mut slot.payload));
            }
            if slot.orphaned {
                return WaitOutcome::Abandoned;
            }
            if self.shared.cond.wait_until(&mut slot, deadline).timed_out() {
                // A reply that won the race for the lock still counts.
                if slot.done {
                    return WaitOutcome::Completed(std::mem::take(&mut slot.payload));
                }
                return WaitOutcome::TimedOut;
            }
        }
    }

    #[cfg(test)]
    fn downgrade(&self) -> std::sync::Weak<Shared> {
        Arc::downgrade(&self.shared)
    }
}

/// The engine-side half.
pub struct Completer {
    shared: Arc<Shared>,
}

impl Completer {
    pub fn key(&self) -> &CorrelationKey {
        &self.shared.key
    }

    /// Publish the final payload and wake the waiter.
    ///
    /// Returns true for the first final delivery only, which is the
    /// caller's cue to unregister the reply callback.
    pub fn publish(&self, payload: String) -> bool {
        let mut slot = self.shared.slot.lock();
        if slot.final_seen {
            return false;
        }
        slot.final_seen = true;
        slot.payload = payload;
        slot.done = true;
        self.shared.cond.notify_all();
        true
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        let mut slot = self.shared.slot.lock();
        if !slot.done {
            slot.orphaned = true;
            self.shared.cond.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn pair() -> (Waiter, Completer) {
        call_state(CorrelationKey::new(7))
    }

    #[test]
    fn test_keys_are_unique() {
        let keys: std::collections::HashSet<_> = (0..1000).map(|_| CorrelationKey::new(1)).collect();
        assert_eq!(keys.len(), 1000);
        assert!(CorrelationKey::new(42).as_str().starts_with("__tether_reply_42_"));
    }

    #[test]
    fn test_publish_before_wait() {
        let (waiter, completer) = pair();
        assert!(completer.publish("early".to_string()));

        assert_eq!(waiter.wait(Duration::from_secs(1)), WaitOutcome::Completed("early".to_string()));
    }

    #[test]
    fn test_publish_wakes_waiter() {
        let (waiter, completer) = pair();

        let publisher = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            completer.publish("late".to_string())
        });

        assert_eq!(waiter.wait(Duration::from_secs(5)), WaitOutcome::Completed("late".to_string()));
        assert!(publisher.join().unwrap());
    }

    #[test]
    fn test_second_final_is_ignored() {
        let (waiter, completer) = pair();
        assert!(completer.publish("first".to_string()));
        assert!(!completer.publish("second".to_string()));

        assert_eq!(waiter.wait(Duration::ZERO), WaitOutcome::Completed("first".to_string()));
    }

    #[test]
    fn test_timeout_is_bounded() {
        let (waiter, _completer) = pair();
        let start = Instant::now();

        assert_eq!(waiter.wait(Duration::from_millis(50)), WaitOutcome::TimedOut);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(500));
    }

    #[test]
    fn test_dropped_completer_abandons_call() {
        let (waiter, completer) = pair();
        drop(completer);

        let start = Instant::now();
        assert_eq!(waiter.wait(Duration::from_secs(10)), WaitOutcome::Abandoned);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_freed_when_waiter_releases_last() {
        let (waiter, completer) = pair();
        let weak = waiter.downgrade();

        assert!(completer.publish("done".to_string()));
        drop(completer);
        assert!(weak.upgrade().is_some());

        assert_eq!(waiter.wait(Duration::ZERO), WaitOutcome::Completed("done".to_string()));
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_freed_when_completer_releases_last() {
        let (waiter, completer) = pair();
        let weak = waiter.downgrade();

        assert_eq!(waiter.wait(Duration::from_millis(10)), WaitOutcome::TimedOut);
        assert!(weak.upgrade().is_some());

        // The late reply still lands and releases the last reference.
        assert!(completer.publish("nobody listening".to_string()));
        drop(completer);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_timeout_racing_delivery() {
        for i in 0..200u64 {
            let (waiter, completer) = pair();
            let weak = waiter.downgrade();

            let publisher = thread::spawn(move || {
                thread::sleep(Duration::from_micros(i % 7 * 100));
                completer.publish(format!("value-{i}"));
            });

            match waiter.wait(Duration::from_micros(i % 5 * 100)) {
                WaitOutcome::Completed(payload) => assert_eq!(payload, format!("value-{i}")),
                WaitOutcome::TimedOut => {}
                WaitOutcome::Abandoned => panic!("completer published, call cannot be abandoned"),
            }

            publisher.join().unwrap();
            assert!(weak.upgrade().is_none());
        }
    }
}
