//! Queues connecting the pipeline stages.
//!
//! The turn queue is a single latest-only slot. The response and audio
//! queues are FIFO and can be flushed. A barge-in advances the shared
//! generation and then flushes both FIFO queues; consumers also drop any
//! item whose generation is no longer current, which covers items pushed
//! by a producer that was still finishing the superseded turn.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::{debug, info};

use super::messages::{AudioItem, ResponseItem, TurnInput};

/// Shared turn counter. Every accepted final input advances it.
#[derive(Debug, Clone, Default)]
pub struct GenerationCounter(Arc<AtomicU64>);

impl GenerationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The generation of the newest accepted input.
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Start a new generation and return it.
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Whether `generation` is still current.
    pub fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct SlotState {
    pending: Option<TurnInput>,
    closed: bool,
}

/// The turn queue: holds at most the most recent pending input.
#[derive(Debug, Default)]
pub struct TurnSlot {
    state: Mutex<SlotState>,
    ready: Notify,
}

impl TurnSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `input`, replacing anything not yet taken.
    ///
    /// Returns the superseded input, if there was one. Inputs put after
    /// [`TurnSlot::close`] are dropped.
    pub fn put(&self, input: TurnInput) -> Option<TurnInput> {
        let superseded = {
            let mut state = lock(&self.state);
            if state.closed {
                debug!(generation = input.generation, "turn slot closed, input dropped");
                return None;
            }
            state.pending.replace(input)
        };
        if let Some(old) = &superseded {
            info!(
                generation = old.generation,
                "pending input superseded before it was processed"
            );
        }
        self.ready.notify_one();
        superseded
    }

    /// Take the pending input, waiting until there is one.
    ///
    /// Returns `None` once the slot is closed and empty.
    pub async fn recv(&self) -> Option<TurnInput> {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = lock(&self.state);
                if let Some(input) = state.pending.take() {
                    return Some(input);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Whether an input is waiting.
    pub fn is_pending(&self) -> bool {
        lock(&self.state).pending.is_some()
    }

    /// Stop accepting inputs and wake any waiting receiver.
    pub fn close(&self) {
        lock(&self.state).closed = true;
        self.ready.notify_waiters();
        self.ready.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }
}

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// An unbounded FIFO queue whose contents can be discarded in one step.
#[derive(Debug)]
pub struct FlushableQueue<T> {
    state: Mutex<QueueState<T>>,
    ready: Notify,
}

impl<T> Default for FlushableQueue<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            ready: Notify::new(),
        }
    }
}

impl<T> FlushableQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item. Returns `false` if the queue is closed.
    pub fn push(&self, item: T) -> bool {
        {
            let mut state = lock(&self.state);
            if state.closed {
                return false;
            }
            state.items.push_back(item);
        }
        self.ready.notify_one();
        true
    }

    /// Take the oldest item, waiting until there is one.
    ///
    /// Items pushed before [`FlushableQueue::close`] are still delivered;
    /// `None` means closed and drained.
    pub async fn recv(&self) -> Option<T> {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = lock(&self.state);
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Take the oldest item without waiting.
    pub fn try_recv(&self) -> Option<T> {
        lock(&self.state).items.pop_front()
    }

    /// Discard everything queued. Returns how many items were dropped.
    pub fn flush(&self) -> usize {
        let mut state = lock(&self.state);
        let dropped = state.items.len();
        state.items.clear();
        dropped
    }

    /// Stop accepting items and wake any waiting receiver.
    pub fn close(&self) {
        lock(&self.state).closed = true;
        self.ready.notify_waiters();
        self.ready.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    pub fn len(&self) -> usize {
        lock(&self.state).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The queues and counter shared by every stage, created once per pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineQueues {
    pub turns: Arc<TurnSlot>,
    pub responses: Arc<FlushableQueue<ResponseItem>>,
    pub audio: Arc<FlushableQueue<AudioItem>>,
    pub generation: GenerationCounter,
}

impl PipelineQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidate everything downstream of the turn slot.
    ///
    /// Advances the generation first so that producers still finishing the
    /// previous turn have their output dropped by consumers, then flushes
    /// the response and audio queues. Returns the new generation.
    pub fn barge_in(&self) -> u64 {
        let generation = self.generation.advance();
        let responses = self.responses.flush();
        let audio = self.audio.flush();
        if responses > 0 || audio > 0 {
            info!(
                generation,
                responses_dropped = responses,
                audio_dropped = audio,
                "barge-in flushed queued output"
            );
        }
        generation
    }

    /// Close every queue.
    pub fn close(&self) {
        self.turns.close();
        self.responses.close();
        self.audio.close();
    }
}
