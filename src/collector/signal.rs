use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct SignalState {
    set: bool,
    generation: u64,
}

/// Binary event used to wake the drain loop. Independent of the cache mutex.
///
/// Every `set` also bumps a generation counter so observers other than the drain loop
/// can wait for "something happened since I last looked" without clearing the flag.
#[derive(Debug, Default)]
pub struct DrainSignal {
    state: Mutex<SignalState>,
    cv: Condvar,
}

impl DrainSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        let mut state = self.state.lock();
        state.set = true;
        state.generation = state.generation.wrapping_add(1);
        self.cv.notify_all();
    }

    pub fn clear(&self) {
        self.state.lock().set = false;
    }

    pub fn is_set(&self) -> bool {
        self.state.lock().set
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Blocks until the flag is set or `timeout` elapses. Returns whether it was set.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.set {
            if self.cv.wait_until(&mut state, deadline).timed_out() {
                return state.set;
            }
        }
        true
    }

    /// Blocks until the generation moves past `seen` or `timeout` elapses, returning the
    /// generation observed last.
    pub fn wait_for_generation(&self, seen: u64, timeout: Duration) -> u64 {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.generation == seen {
            if self.cv.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.generation
    }
}
