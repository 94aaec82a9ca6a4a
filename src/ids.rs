//! Thread-safe, collision-free id counters.
//!
//! Channel Access hands out four kinds of small integer id (CID, SID,
//! subscription id, IO id) plus the Broadcaster's search id. Surrounding
//! client implementations are free to allocate these from multiple worker
//! threads (spec &sect;5), so the counters here must be safe under
//! contention even though the rest of a [`crate::broadcaster::Broadcaster`]
//! or [`crate::circuit::VirtualCircuit`] is not.
//!
//! This is a direct transliteration of caproto's `ThreadsafeCounter`
//! (`_broadcaster.py`): an atomic increment, wrapping at `MAX_ID`, that
//! skips any value currently "in use" according to a caller-supplied check.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// caproto reserves the top bit of the 32-bit id space; ids wrap at this
/// boundary rather than at `u32::MAX`.
pub const MAX_ID: u32 = 0x7FFF_FFFF;

/// A uniform random seed in `[0, MAX_ID]` for a fresh [`IdCounter`], so
/// two freshly constructed peers don't both start handing out CID/SID/
/// subscription-id/ioid 0 and collide the moment they talk to each other.
pub fn random_initial_value() -> u32 {
    use rand::Rng;
    rand::rng().random_range(0..=MAX_ID)
}

/// A monotonically increasing id counter that never returns a value the
/// caller considers "in use".
pub struct IdCounter {
    next: AtomicU32,
    in_use: Mutex<()>,
}

impl IdCounter {
    pub fn new(initial_value: u32) -> Self {
        IdCounter {
            next: AtomicU32::new(initial_value % (MAX_ID + 1)),
            in_use: Mutex::new(()),
        }
    }

    /// Return the next unused id, skipping any value for which
    /// `in_use` returns `true`. Wraps at [`MAX_ID`].
    ///
    /// The short critical section under `in_use` just serialises the
    /// "read, check, advance" sequence across threads; it does not hold the
    /// lock while the caller inspects or mutates anything else.
    pub fn next(&self, in_use: impl Fn(u32) -> bool) -> u32 {
        let _guard = self.in_use.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            let candidate = self.next.fetch_add(1, Ordering::Relaxed) % (MAX_ID + 1);
            if !in_use(candidate) {
                return candidate;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn skips_in_use_values() {
        let counter = IdCounter::new(0);
        let taken: StdMutex<HashSet<u32>> = StdMutex::new([0, 1, 2].into_iter().collect());
        let id = counter.next(|v| taken.lock().unwrap().contains(&v));
        assert_eq!(id, 3);
    }

    #[test]
    fn wraps_at_max_id() {
        let counter = IdCounter::new(MAX_ID);
        let first = counter.next(|_| false);
        assert_eq!(first, MAX_ID);
        let second = counter.next(|_| false);
        assert_eq!(second, 0);
    }

    #[test]
    fn concurrent_callers_never_collide() {
        use std::sync::Arc;
        use std::thread;

        let counter = Arc::new(IdCounter::new(0));
        let seen: Arc<StdMutex<HashSet<u32>>> = Arc::new(StdMutex::new(HashSet::new()));
        let mut handles = vec![];
        for _ in 0..8 {
            let counter = counter.clone();
            let seen = seen.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    let id = counter.next(|v| seen.lock().unwrap().contains(&v));
                    assert!(seen.lock().unwrap().insert(id), "id {id} issued twice");
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(seen.lock().unwrap().len(), 800);
    }
}
