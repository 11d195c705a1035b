//! Implements rising edge/falling edge level trigger over consecutive stored codes, with a
//! free-running floor that keeps the display live when no qualifying edge arrives.

use crate::Code;
use crate::config::{Channel, Edge, FreeRun, TriggerConfig};
use crate::store::{CircularStore, StoreCursor};

#[derive(Debug, Clone, Copy)]
pub struct Trigger {
    level: Code,
    edge: Edge,
    source: Channel,
    free_run: Option<FreeRun>,
    misses: u8,     // consecutive processing passes without an edge
    fired: bool,    // an edge was seen during the current pass
    forcing: bool,
}

impl Trigger {
    /// Create a new trigger mechanism from `config`.
    ///
    /// An edge is detected at the code where the source channel reaches `level` coming from
    /// the configured side: a rising edge at code `i` if `code[i - 1] <= level` and
    /// `code[i] >= level`, a falling edge if `code[i - 1] >= level` and `code[i] <= level`.
    /// There is no hysteresis: a signal that lands exactly on `level` fires both on the code
    /// that reaches it and on the code that leaves it in the same direction.
    ///
    /// For example, with `level` at `50` and a rising edge, processing the codes
    /// `[10, 49, 51, 52, 49, 48]` detects an edge at code #2 (value 51) only.
    pub fn new(config: TriggerConfig, free_run: Option<FreeRun>) -> Trigger {
        Trigger {
            level: config.level,
            edge: config.edge,
            source: config.source,
            free_run,
            misses: 0,
            fired: false,
            forcing: false,
        }
    }

    /// Switch to new parameters, forgetting any missed passes.
    pub fn reconfigure(&mut self, config: TriggerConfig, free_run: Option<FreeRun>) {
        *self = Trigger::new(config, free_run)
    }

    pub fn source(&self) -> Channel {
        self.source
    }

    pub fn misses(&self) -> u8 {
        self.misses
    }

    pub fn crosses(&self, prev: Code, curr: Code) -> bool {
        match self.edge {
            Edge::Rising  => prev <= self.level && curr >= self.level,
            Edge::Falling => prev >= self.level && curr <= self.level,
        }
    }

    /// Check the code at `cursor` against the one before it.
    pub fn check(&mut self, store: &CircularStore, cursor: StoreCursor) -> bool {
        let prev = store.read(self.source, cursor - 1);
        let curr = store.read(self.source, cursor);
        let found = self.crosses(prev, curr);
        self.fired |= found;
        found
    }

    /// Finish a processing pass. Returns whether a trigger has to be forced because too many
    /// consecutive passes went by without an edge.
    ///
    /// The miss counter saturates at the configured cap, so arbitrarily long stretches without
    /// an edge keep forcing a trigger every pass.
    pub fn end_pass(&mut self) -> bool {
        let fired = std::mem::take(&mut self.fired);
        let Some(free_run) = self.free_run else {
            self.misses = 0;
            return false
        };
        if fired {
            if self.forcing {
                log::debug!("trigger: edge found after free running");
            }
            self.misses = 0;
            self.forcing = false;
            return false
        }
        let cap = free_run.miss_cap.max(free_run.after_misses);
        self.misses = self.misses.saturating_add(1).min(cap);
        let force = self.misses >= free_run.after_misses;
        if force && !self.forcing {
            log::warn!("trigger: no edge in {} passes, free running", self.misses);
        }
        self.forcing = force;
        force
    }
}
