//! Ping-pong handoff of raw blocks from the acquisition producer to the processing consumer.
//!
//! The producer fills two transfer slots alternately. A slot stays pending from the moment its
//! block is handed over until the consumer releases it after processing; a block that arrives
//! for a still pending slot is an overrun and is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError};

use crate::{Error, Result};
use crate::decode::RawBlock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Ping,
    Pong,
}

impl Slot {
    pub fn index(self) -> usize {
        match self {
            Slot::Ping => 0,
            Slot::Pong => 1,
        }
    }

    /// The slot filled after this one.
    pub fn next(self) -> Slot {
        match self {
            Slot::Ping => Slot::Pong,
            Slot::Pong => Slot::Ping,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    pending: [AtomicBool; 2],
    overruns: AtomicUsize,
}

#[derive(Debug, Clone)]
pub struct BlockProducer {
    shared: Arc<Shared>,
    sender: SyncSender<(Slot, RawBlock)>,
}

#[derive(Debug)]
pub struct BlockConsumer {
    shared: Arc<Shared>,
    receiver: Receiver<(Slot, RawBlock)>,
}

/// Create the two ends of a handoff.
pub fn handoff() -> (BlockProducer, BlockConsumer) {
    let shared = Arc::new(Shared::default());
    // one block in flight per slot
    let (sender, receiver) = mpsc::sync_channel(2);
    (BlockProducer { shared: shared.clone(), sender }, BlockConsumer { shared, receiver })
}

impl BlockProducer {
    /// Hand over a completed block. Never blocks.
    pub fn on_block_ready(&self, slot: Slot, block: RawBlock) -> Result<()> {
        let pending = &self.shared.pending[slot.index()];
        if pending.swap(true, Ordering::AcqRel) {
            let overruns = self.shared.overruns.fetch_add(1, Ordering::Relaxed) + 1;
            log::warn!("handoff: {:?} slot overrun, dropping block ({} so far)", slot, overruns);
            return Err(Error::Overrun(slot))
        }
        match self.sender.try_send((slot, block)) {
            Ok(()) => {
                log::trace!("handoff: {:?} block ready", slot);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                pending.store(false, Ordering::Release);
                self.shared.overruns.fetch_add(1, Ordering::Relaxed);
                log::warn!("handoff: queue full, dropping {:?} block", slot);
                Err(Error::Overrun(slot))
            }
            Err(TrySendError::Disconnected(_)) => {
                pending.store(false, Ordering::Release);
                Err(Error::Disconnected)
            }
        }
    }

    /// Whether the block last handed over in `slot` is still waiting to be processed.
    pub fn is_pending(&self, slot: Slot) -> bool {
        self.shared.pending[slot.index()].load(Ordering::Acquire)
    }
}

impl BlockConsumer {
    /// Take the next ready block, if any, without blocking.
    pub fn try_next(&self) -> Result<Option<(Slot, RawBlock)>> {
        match self.receiver.try_recv() {
            Ok(ready) => Ok(Some(ready)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::Disconnected),
        }
    }

    /// Wait for the next ready block.
    pub fn next(&self) -> Result<(Slot, RawBlock)> {
        self.receiver.recv().map_err(|_| Error::Disconnected)
    }

    /// Mark the block taken from `slot` as processed so that the slot can be filled again.
    pub fn release(&self, slot: Slot) {
        self.shared.pending[slot.index()].store(false, Ordering::Release);
    }

    /// Blocks dropped so far because their slot was still pending.
    pub fn overruns(&self) -> usize {
        self.shared.overruns.load(Ordering::Relaxed)
    }
}
