use super::coordinator::{CollectionCoordinator, FillState};
use super::signal::DrainSignal;
use crate::logging::SessionLogger;
use crate::processor::ProcessingController;
use crate::producer::{ProducerChannel, ProducerQueue};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Lifecycle of the drain loop, exposed for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DrainState {
    Filling = 0,
    Draining = 1,
    Finishing = 2,
    Finished = 3,
}

impl DrainState {
    pub fn as_str(self) -> &'static str {
        match self {
            DrainState::Filling => "filling",
            DrainState::Draining => "draining",
            DrainState::Finishing => "finishing",
            DrainState::Finished => "finished",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => DrainState::Filling,
            1 => DrainState::Draining,
            2 => DrainState::Finishing,
            _ => DrainState::Finished,
        }
    }
}

/// State shared between the drain thread and the session controlling it.
#[derive(Debug)]
pub struct DrainControl {
    state: AtomicU8,
    stop: AtomicBool,
    progress: DrainSignal,
    fill_timeout_ms: AtomicU64,
    poll_timeout_ms: AtomicU64,
}

impl DrainControl {
    pub fn new(fill_timeout: Duration, poll_timeout: Duration) -> Self {
        Self {
            state: AtomicU8::new(DrainState::Filling as u8),
            stop: AtomicBool::new(false),
            progress: DrainSignal::new(),
            fill_timeout_ms: AtomicU64::new(as_millis(fill_timeout).max(1)),
            poll_timeout_ms: AtomicU64::new(as_millis(poll_timeout).max(1)),
        }
    }

    pub fn state(&self) -> DrainState {
        DrainState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: DrainState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Set after every completed drain pass and once more when the loop exits.
    pub fn progress(&self) -> &DrainSignal {
        &self.progress
    }

    pub fn fill_timeout(&self) -> Duration {
        Duration::from_millis(self.fill_timeout_ms.load(Ordering::Relaxed))
    }

    pub fn set_fill_timeout(&self, timeout: Duration) {
        self.fill_timeout_ms
            .store(as_millis(timeout).max(1), Ordering::Relaxed);
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms.load(Ordering::Relaxed))
    }

    pub fn set_poll_timeout(&self, timeout: Duration) {
        self.poll_timeout_ms
            .store(as_millis(timeout).max(1), Ordering::Relaxed);
    }
}

/// Dedicated consumer of the reorder cache for one collection session.
pub struct DrainLoop<P> {
    coordinator: Arc<CollectionCoordinator<P>>,
    channels: Vec<Arc<ProducerChannel<P>>>,
    controller: Arc<ProcessingController<P>>,
    control: Arc<DrainControl>,
    logger: SessionLogger,
}

impl<P: Send + 'static> DrainLoop<P> {
    pub fn new(
        coordinator: Arc<CollectionCoordinator<P>>,
        channels: Vec<Arc<ProducerChannel<P>>>,
        controller: Arc<ProcessingController<P>>,
        control: Arc<DrainControl>,
        logger: SessionLogger,
    ) -> Self {
        Self {
            coordinator,
            channels,
            controller,
            control,
            logger,
        }
    }

    /// Runs the loop on a named thread.
    pub fn spawn(self, name: String) -> io::Result<thread::JoinHandle<()>> {
        thread::Builder::new().name(name).spawn(move || self.run())
    }

    /// Fills and drains until a stop is requested, then flushes everything still buffered.
    pub fn run(self) {
        self.logger.info(
            "drain",
            &format!(
                "drain loop started: {} producers, cache size {}",
                self.channels.len(),
                self.coordinator.cache_size()
            ),
        );
        while !self.control.stop_requested() {
            self.control.set_state(DrainState::Filling);
            if self.fill() {
                self.control.set_state(DrainState::Draining);
                self.drain(false);
            }
        }
        self.finish();
    }

    /// One filling step. Returns true when the cache should be drained now.
    fn fill(&self) -> bool {
        let signal = self.coordinator.signal();
        signal.clear();
        let pulled = self.pull_queues();
        let wait = match self.coordinator.fill_state(self.control.fill_timeout()) {
            FillState::Ready => return true,
            FillState::Empty => self.control.fill_timeout(),
            FillState::Accumulating { remaining } => remaining,
        };
        if self.control.stop_requested() {
            return false;
        }
        match self.first_queue() {
            Some(queue) => {
                if pulled == 0 {
                    queue.wait_not_empty(wait.min(self.control.poll_timeout()));
                }
            }
            None => {
                signal.wait(wait);
            }
        }
        false
    }

    /// Rotates over the client queues, one event per producer per rotation, until no
    /// producer yields or the cache is full. Returns how many events moved.
    fn pull_queues(&self) -> usize {
        if self.first_queue().is_none() {
            return 0;
        }
        let cache_size = self.coordinator.cache_size();
        let mut pulled = 0;
        loop {
            let moved: usize = self
                .channels
                .iter()
                .map(|channel| channel.try_drain_queue(1))
                .sum();
            pulled += moved;
            if moved == 0
                || self.control.stop_requested()
                || self.coordinator.cache_len() as u64 >= cache_size
            {
                break;
            }
        }
        pulled
    }

    /// Hands contiguous runs to the processor until the cache is empty. Outside of
    /// finishing, a stop request ends the pass between runs.
    fn drain(&self, finishing: bool) {
        loop {
            let run = self.coordinator.get_objects_from_cache();
            if run.is_empty() {
                break;
            }
            for entry in &run {
                // Failures are counted and logged by the controller.
                let _ = self.controller.deliver(&entry.event);
            }
            if !finishing && self.control.stop_requested() {
                break;
            }
        }
        self.control.progress.set();
    }

    fn finish(&self) {
        self.control.set_state(DrainState::Finishing);
        let flushed: usize = self
            .channels
            .iter()
            .map(|channel| channel.try_drain_queue(usize::MAX))
            .sum();
        self.drain(true);
        self.coordinator.signal().set();
        self.control.set_state(DrainState::Finished);
        self.control.progress.set();

        let counters = self.coordinator.counters();
        let processing = self.controller.counters();
        self.logger.info(
            "drain",
            &format!(
                "drain loop finished: flushed {flushed} queued, collected {}, missed {}, rejected {}, processed {}, errors {}",
                counters.collected(),
                counters.missed(),
                counters.rejected(),
                processing.processed(),
                processing.errors()
            ),
        );
    }

    fn first_queue(&self) -> Option<&ProducerQueue<P>> {
        self.channels.iter().find_map(|channel| channel.queue())
    }
}

fn as_millis(duration: Duration) -> u64 {
    duration.as_millis().min(u128::from(u64::MAX)) as u64
}
