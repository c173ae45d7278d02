use std::time::Duration;

use serde_derive::{Deserialize, Serialize};

use crate::core::{self, attach_region, Region, RegionConfig};
use crate::errors::RingError;

pub const DEFAULT_ITEMS: u64 = 1_000_000;

// How often a producer blocked on a full ring wakes to notice a shutdown
// signal.
const SLOT_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Serialize, Deserialize)]
pub struct ProducerConfig {
    pub region: RegionConfig,
    pub items: u64,
}

impl Default for ProducerConfig {
    fn default() -> ProducerConfig {
        ProducerConfig {
            region: RegionConfig::default(),
            items: DEFAULT_ITEMS,
        }
    }
}

/// The single producer role: generates a fixed number of items and inserts
/// them through the region's semaphore protocol.
pub struct Producer {
    region: Region,
    items: u64,
}

impl Producer {
    pub fn new(cfg: &ProducerConfig) -> Result<Producer, RingError> {
        let region = attach_region(&cfg.region)?;
        Ok(Producer::with_region(region, cfg.items))
    }

    /// Wraps an already-attached region; coordinators that set the region
    /// up themselves hand attachments to the roles this way.
    pub fn with_region(region: Region, items: u64) -> Producer {
        Producer { region, items }
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    /// Produces exactly `items` values, then publishes the completion flag.
    ///
    /// Iteration `i` inserts the value `i`:
    /// `empty.wait -> lock -> enqueue -> unlock -> fill.post`. The
    /// completion flag is written once, after the last post, and is never
    /// retracted; no item is produced after it.
    pub fn run(&mut self) -> Result<u64, RingError> {
        for item in 0..self.items {
            self.reserve_slot()?;
            self.region.with_state(|state| {
                // `empty` reserved a free slot; a full ring here means the
                // protocol was violated somewhere else.
                if state.ring.is_full() {
                    return Err(RingError::Invariant(format!(
                        "enqueue of item {} found the ring full",
                        item
                    )));
                }
                state.ring.enqueue(item);
                Ok(())
            })??;
            self.region.sync().fill().post()?;
        }
        self.region.mark_production_done();
        Ok(self.items)
    }

    // Waits on `empty` in bounded slices so a signalled process stops at
    // the next slice instead of sleeping in sem_wait forever.
    fn reserve_slot(&self) -> Result<(), RingError> {
        loop {
            if core::interrupted() {
                return Err(RingError::Interrupted);
            }
            if self.region.sync().empty().wait_timeout(SLOT_POLL)? {
                return Ok(());
            }
        }
    }
}
