use std::time::Duration;

use serde_derive::{Deserialize, Serialize};

use crate::core::{self, attach_region, Region, RegionConfig};
use crate::errors::RingError;

// Poll interval for the final drain: a timed-out `fill` wait re-checks the
// termination condition instead of staying blocked on a post that may never
// come. This closes the check-then-wait window in which another consumer
// can drain the last item.
const DRAIN_POLL: Duration = Duration::from_millis(50);

#[derive(Default, Debug, Serialize, Deserialize)]
pub struct ConsumerConfig {
    pub region: RegionConfig,
    pub id: u32,
}

/// One of K concurrent consumer roles: removes items until production is
/// finished and the ring has drained.
pub struct Consumer {
    region: Region,
    id: u32,
}

impl Consumer {
    pub fn new(cfg: &ConsumerConfig) -> Result<Consumer, RingError> {
        let region = attach_region(&cfg.region)?;
        Ok(Consumer::with_region(region, cfg.id))
    }

    pub fn with_region(region: Region, id: u32) -> Consumer {
        Consumer { region, id }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    /// Consumes until `production_done` is set and the ring is empty.
    /// Returns the number of items this consumer removed; the region's
    /// `total_consumed` aggregates the same count across all consumers.
    pub fn run(&mut self) -> Result<u64, RingError> {
        self.run_with(|_| {})
    }

    /// Like `run`, invoking `f` with every removed item in removal order.
    pub fn run_with<F>(&mut self, mut f: F) -> Result<u64, RingError>
    where
        F: FnMut(u64),
    {
        let mut consumed = 0u64;
        loop {
            if core::interrupted() {
                return Err(RingError::Interrupted);
            }
            // Done flag first, emptiness second: the flag is published only
            // after the producer's last fill post, so observing it together
            // with an empty ring means no further item can appear.
            if self.region.production_done()
                && self.region.with_state(|state| state.ring.is_empty())?
            {
                return Ok(consumed);
            }
            if !self.region.sync().fill().wait_timeout(DRAIN_POLL)? {
                continue;
            }
            let item = self.region.with_state(|state| {
                let item = state.ring.dequeue()?;
                state.total_consumed += 1;
                Ok::<u64, RingError>(item)
            })??;
            self.region.sync().empty().post()?;
            consumed += 1;
            f(item);
        }
    }
}
