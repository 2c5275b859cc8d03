//! Waiter registry correlating response frames with pending requests.
//!
//! A waiter is registered under the key of the response it expects. When a
//! frame with that key arrives, every waiter registered under the key is
//! removed, its callback (if any) runs with the frame payload and its signal is
//! set. Frames nobody waits for are dropped.

use crate::signal::{Signal, SignalInner};
use bfmc_protocol::{CommandKey, ResponseFrame};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// Callback invoked with the payload of the frame that released a waiter.
pub type Callback = Arc<dyn Fn(&str) + Send + Sync>;

enum Waiter {
    Signal(Weak<SignalInner>),
    WithCallback(Weak<SignalInner>, Callback),
}

impl Waiter {
    fn signal(&self) -> &Weak<SignalInner> {
        match self {
            Waiter::Signal(s) | Waiter::WithCallback(s, _) => s,
        }
    }

    fn is_alive(&self) -> bool {
        self.signal().strong_count() > 0
    }

    /// Runs the callback, then sets the signal. Returns `false` if the owner
    /// already dropped the signal.
    fn release(self, payload: &str) -> bool {
        let (weak, callback) = match self {
            Waiter::Signal(s) => (s, None),
            Waiter::WithCallback(s, cb) => (s, Some(cb)),
        };
        let Some(signal) = weak.upgrade() else {
            return false;
        };
        if let Some(cb) = callback {
            cb(payload);
        }
        signal.set();
        true
    }
}

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Waiter::Signal(_) => f.write_str("Waiter::Signal"),
            Waiter::WithCallback(_, _) => f.write_str("Waiter::WithCallback"),
        }
    }
}

/// Pending waiters keyed by the response they expect.
#[derive(Debug, Default)]
pub struct WaiterRegistry {
    waiters: Mutex<HashMap<CommandKey, Vec<Waiter>>>,
}

impl WaiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `signal` under `key`. Registrations are additive.
    pub fn register(&self, key: CommandKey, signal: &Signal, callback: Option<Callback>) {
        let weak = signal.downgrade();
        let waiter = match callback {
            Some(cb) => Waiter::WithCallback(weak, cb),
            None => Waiter::Signal(weak),
        };

        let mut waiters = self.waiters.lock();
        let list = waiters.entry(key).or_default();
        list.retain(Waiter::is_alive);
        list.push(waiter);
        tracing::trace!("registered waiter for {} ({} pending)", key, list.len());
    }

    /// Removes every registration of `signal` under `key`.
    ///
    /// Returns whether anything was removed. Absent keys and signals are a no-op.
    pub fn unregister(&self, key: CommandKey, signal: &Signal) -> bool {
        let mut waiters = self.waiters.lock();
        let Some(list) = waiters.get_mut(&key) else {
            return false;
        };
        let before = list.len();
        list.retain(|w| !signal.is(w.signal()));
        let removed = list.len() != before;
        if list.is_empty() {
            waiters.remove(&key);
        }
        removed
    }

    /// Delivers `frame` to every waiter registered under its key.
    ///
    /// Returns the number of waiters released. The registry lock is released
    /// before any callback runs.
    pub fn dispatch(&self, frame: &ResponseFrame) -> usize {
        let Some(key) = frame.command_key() else {
            tracing::trace!("dropping frame with unknown key {:?}", frame.key);
            return 0;
        };

        let taken = self.waiters.lock().remove(&key);
        let Some(taken) = taken else {
            tracing::trace!("no waiter for {}", key);
            return 0;
        };

        let released = taken
            .into_iter()
            .map(|w| w.release(&frame.payload))
            .filter(|&delivered| delivered)
            .count();
        tracing::debug!("dispatched {} to {} waiter(s)", key, released);
        released
    }

    /// Number of live waiters registered under `key`.
    pub fn pending_for(&self, key: CommandKey) -> usize {
        self.waiters
            .lock()
            .get(&key)
            .map(|list| list.iter().filter(|w| w.is_alive()).count())
            .unwrap_or(0)
    }

    /// Number of live waiters across all keys.
    pub fn pending_count(&self) -> usize {
        self.waiters
            .lock()
            .values()
            .flatten()
            .filter(|w| w.is_alive())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn frame(body: &str) -> ResponseFrame {
        ResponseFrame::parse(body).unwrap()
    }

    #[test]
    fn test_dispatch_releases_all_waiters_for_key() {
        let registry = WaiterRegistry::new();
        let first = Signal::new();
        let second = Signal::new();
        let other = Signal::new();

        registry.register(CommandKey::Move, &first, None);
        registry.register(CommandKey::Move, &second, None);
        registry.register(CommandKey::Brake, &other, None);

        assert_eq!(registry.dispatch(&frame("MCTL:ack;;")), 2);
        assert!(first.is_set());
        assert!(second.is_set());
        assert!(!other.is_set());

        // One-shot: a second frame finds nobody under MCTL.
        first.reset();
        assert_eq!(registry.dispatch(&frame("MCTL:ack;;")), 0);
        assert!(!first.is_set());
        assert_eq!(registry.pending_for(CommandKey::Brake), 1);
    }

    #[test]
    fn test_callback_receives_payload() {
        let registry = WaiterRegistry::new();
        let signal = Signal::new();
        let seen = Arc::new(PlMutex::new(Vec::new()));

        let sink = seen.clone();
        let callback: Callback = Arc::new(move |payload: &str| sink.lock().push(payload.to_string()));
        registry.register(CommandKey::EncoderPublisher, &signal, Some(callback));

        assert_eq!(registry.dispatch(&frame("ENPB:12.50;;")), 1);
        assert!(signal.is_set());
        assert_eq!(*seen.lock(), vec!["12.50".to_string()]);
    }

    #[test]
    fn test_callback_runs_before_signal() {
        let registry = WaiterRegistry::new();
        let signal = Signal::new();
        let observer = signal.clone();
        let was_set = Arc::new(AtomicUsize::new(usize::MAX));

        let flag = was_set.clone();
        let callback: Callback = Arc::new(move |_: &str| {
            flag.store(usize::from(observer.is_set()), Ordering::SeqCst);
        });
        registry.register(CommandKey::PidActivate, &signal, Some(callback));
        registry.dispatch(&frame("PIDA:1;;"));

        assert_eq!(was_set.load(Ordering::SeqCst), 0);
        assert!(signal.is_set());
    }

    #[test]
    fn test_dispatch_follows_registration_order() {
        let registry = WaiterRegistry::new();
        let order = Arc::new(PlMutex::new(Vec::new()));

        let signals: Vec<Signal> = (0..5).map(|_| Signal::new()).collect();
        for (index, signal) in signals.iter().enumerate() {
            let order = order.clone();
            let callback: Callback = Arc::new(move |_: &str| order.lock().push(index));
            registry.register(CommandKey::Move, signal, Some(callback));
        }

        assert_eq!(registry.dispatch(&frame("MCTL:ack;;")), 5);
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
        assert!(signals.iter().all(Signal::is_set));
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = WaiterRegistry::new();
        let signal = Signal::new();
        let keeper = Signal::new();

        registry.register(CommandKey::PidGains, &signal, None);
        registry.register(CommandKey::PidGains, &keeper, None);

        assert!(registry.unregister(CommandKey::PidGains, &signal));
        assert!(!registry.unregister(CommandKey::PidGains, &signal));
        assert!(!registry.unregister(CommandKey::Spline, &signal));
        assert_eq!(registry.pending_for(CommandKey::PidGains), 1);

        registry.dispatch(&frame("PIDS:ack;;"));
        assert!(!signal.is_set());
        assert!(keeper.is_set());
    }

    #[test]
    fn test_unregister_last_waiter_clears_key() {
        let registry = WaiterRegistry::new();
        let signal = Signal::new();
        registry.register(CommandKey::Brake, &signal, None);
        registry.unregister(CommandKey::Brake, &signal);
        assert_eq!(registry.pending_count(), 0);
        assert_eq!(registry.dispatch(&frame("BRAK:ack;;")), 0);
    }

    #[test]
    fn test_unmatched_and_unknown_frames_dropped() {
        let registry = WaiterRegistry::new();
        let signal = Signal::new();
        registry.register(CommandKey::Move, &signal, None);

        assert_eq!(registry.dispatch(&frame("DSPB:0.45;;")), 0);
        assert_eq!(registry.dispatch(&frame("LOGS:boot;;")), 0);
        assert!(!signal.is_set());
        assert_eq!(registry.pending_count(), 1);
    }

    #[test]
    fn test_dropped_signal_is_skipped() {
        let registry = WaiterRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        {
            let signal = Signal::new();
            let counter = calls.clone();
            let callback: Callback = Arc::new(move |_: &str| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            registry.register(CommandKey::SafetyBrake, &signal, Some(callback));
        }

        assert_eq!(registry.pending_count(), 0);
        assert_eq!(registry.dispatch(&frame("SFBR:1;;")), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_same_signal_under_two_keys() {
        let registry = WaiterRegistry::new();
        let signal = Signal::new();
        registry.register(CommandKey::Move, &signal, None);
        registry.register(CommandKey::Brake, &signal, None);

        registry.unregister(CommandKey::Move, &signal);
        assert_eq!(registry.pending_for(CommandKey::Brake), 1);
        assert_eq!(registry.dispatch(&frame("BRAK:ack;;")), 1);
        assert!(signal.is_set());
    }

    #[test]
    fn test_concurrent_register_and_dispatch() {
        let registry = Arc::new(WaiterRegistry::new());
        let signals: Vec<Signal> = (0..64).map(|_| Signal::new()).collect();

        let handles: Vec<_> = signals
            .chunks(16)
            .map(|chunk| {
                let registry = registry.clone();
                let chunk = chunk.to_vec();
                std::thread::spawn(move || {
                    for s in &chunk {
                        registry.register(CommandKey::EncoderPublisher, s, None);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(registry.dispatch(&frame("ENPB:1.0;;")), 64);
        assert!(signals.iter().all(Signal::is_set));
    }
}
