//! Trigger-synchronized frame assembly.
//!
//! The engine is fed one stored code at a time together with the trigger verdict for that code.
//! Once triggered, the columns before `TriggerConfig::position` are back-filled from history in
//! the store, and the remaining columns are taken from the following codes, dropping
//! `decimation` codes between two accepted ones. In `AcquisitionMode::Average` several such
//! captures are summed and divided before a frame is published.

use crate::{Code, FRAME_LENGTH};
use crate::config::{AcquisitionMode, BackfillSpacing, BackfillWeighting, Channel};
use crate::params::Parameters;
use crate::store::{CircularStore, StoreCursor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalState {
    Idle,
    BackfillPending,
    Filling,
    Publishing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AverageState {
    Idle,
    AccumulatingBackfill,
    Accumulating,
    Averaging,
    Publishing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Normal(NormalState),
    Average(AverageState),
}

impl CaptureState {
    fn idle(mode: AcquisitionMode) -> CaptureState {
        match mode {
            AcquisitionMode::Normal  => CaptureState::Normal(NormalState::Idle),
            AcquisitionMode::Average => CaptureState::Average(AverageState::Idle),
        }
    }

    pub fn is_idle(self) -> bool {
        matches!(self,
            CaptureState::Normal(NormalState::Idle) |
            CaptureState::Average(AverageState::Idle))
    }
}

/// A completed capture cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    codes: [Option<Box<[Code]>>; 2],
    params: Parameters,
    captures: usize,
    free_running: bool,
}

impl Frame {
    /// Assemble a frame from already captured codes.
    ///
    /// Panics if a channel does not hold exactly `FRAME_LENGTH` codes.
    pub fn new(params: Parameters, codes: [Option<Vec<Code>>; 2]) -> Frame {
        let codes = codes.map(|codes| codes.map(|codes| {
            assert_eq!(codes.len(), FRAME_LENGTH);
            codes.into_boxed_slice()
        }));
        Frame { codes, params, captures: 1, free_running: false }
    }

    /// Exactly `FRAME_LENGTH` codes, or `None` if the channel was disabled for this cycle.
    pub fn channel(&self, channel: Channel) -> Option<&[Code]> {
        self.codes[channel.index()].as_deref()
    }

    /// Parameters the frame was captured with.
    pub fn params(&self) -> &Parameters {
        &self.params
    }

    /// Number of triggered captures combined into this frame.
    pub fn captures(&self) -> usize {
        self.captures
    }

    /// Whether any capture of this frame was started by the free-run floor instead of an edge.
    pub fn is_free_running(&self) -> bool {
        self.free_running
    }

    /// Mean code of a channel, if enabled.
    pub fn mean(&self, channel: Channel) -> Option<f32> {
        self.channel(channel).map(|codes| {
            codes.iter().map(|&code| code as u32).sum::<u32>() as f32 / codes.len() as f32
        })
    }
}

#[derive(Debug)]
pub struct CaptureEngine {
    params: Parameters,
    state: CaptureState,
    pixels: [Box<[Code]>; 2],
    totals: [Box<[u32]>; 2],
    filled: usize,      // next column to be written
    skip_left: usize,   // codes still to drop before the next column
    elapsed: usize,     // codes seen since the trigger code
    deferred: usize,    // pre-trigger columns waiting for a code after the trigger
    completed: usize,   // captures summed into `totals` so far
    force_pending: bool,
    free_running: bool,
}

impl CaptureEngine {
    pub fn new(params: Parameters) -> CaptureEngine {
        CaptureEngine {
            params,
            state: CaptureState::idle(params.mode),
            pixels: [Self::zeroed(), Self::zeroed()],
            totals: [Self::zeroed(), Self::zeroed()],
            filled: 0,
            skip_left: 0,
            elapsed: 0,
            deferred: 0,
            completed: 0,
            force_pending: false,
            free_running: false,
        }
    }

    fn zeroed<T: Clone + Default>() -> Box<[T]> {
        vec![T::default(); FRAME_LENGTH].into_boxed_slice()
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    /// Whether new parameters can be applied without tearing a frame or an averaging set.
    pub fn at_cycle_boundary(&self) -> bool {
        self.state.is_idle() && self.completed == 0
    }

    /// Switch to new parameters. Any capture in progress, including a partial averaging set,
    /// is abandoned; callers wait for `at_cycle_boundary` to avoid that.
    pub fn reconfigure(&mut self, params: Parameters) {
        if !self.at_cycle_boundary() {
            log::debug!("capture: abandoning {:?} after {} captures to reconfigure",
                self.state, self.completed);
        }
        self.params = params;
        self.state = CaptureState::idle(params.mode);
        self.completed = 0;
        self.free_running = false;
        self.clear_totals();
    }

    /// Start a capture at the next code even without an edge, if not already capturing.
    pub fn force(&mut self) {
        if self.state.is_idle() {
            self.force_pending = true;
        }
    }

    /// Process the code at `cursor`, which has just been stored. `triggered` tells whether
    /// the trigger fired on this code. Returns a frame when a capture cycle completes.
    pub fn push(&mut self, store: &CircularStore, cursor: StoreCursor, triggered: bool)
            -> Option<Frame> {
        loop {
            self.state = match self.state {
                CaptureState::Normal(state) => match state {
                    NormalState::Idle => {
                        if !self.arm(triggered, cursor) { return None }
                        CaptureState::Normal(NormalState::BackfillPending)
                    }
                    NormalState::BackfillPending => {
                        self.backfill(store, cursor);
                        CaptureState::Normal(NormalState::Filling)
                    }
                    NormalState::Filling => {
                        if !self.fill(store, cursor) { return None }
                        CaptureState::Normal(NormalState::Publishing)
                    }
                    NormalState::Publishing => {
                        self.state = CaptureState::Normal(NormalState::Idle);
                        return Some(self.publish(1))
                    }
                }
                CaptureState::Average(state) => match state {
                    AverageState::Idle => {
                        if !self.arm(triggered, cursor) { return None }
                        if self.completed == 0 {
                            self.clear_totals();
                        }
                        CaptureState::Average(AverageState::AccumulatingBackfill)
                    }
                    AverageState::AccumulatingBackfill => {
                        self.backfill(store, cursor);
                        CaptureState::Average(AverageState::Accumulating)
                    }
                    AverageState::Accumulating => {
                        if !self.fill(store, cursor) { return None }
                        self.completed += 1;
                        log::trace!("capture: accumulated {} of {}",
                            self.completed, self.params.average_count);
                        if self.completed < self.params.average_count {
                            self.state = CaptureState::Average(AverageState::Idle);
                            return None
                        }
                        CaptureState::Average(AverageState::Averaging)
                    }
                    AverageState::Averaging => {
                        self.average();
                        CaptureState::Average(AverageState::Publishing)
                    }
                    AverageState::Publishing => {
                        let captures = std::mem::take(&mut self.completed);
                        self.state = CaptureState::Average(AverageState::Idle);
                        return Some(self.publish(captures))
                    }
                }
            }
        }
    }

    fn arm(&mut self, triggered: bool, cursor: StoreCursor) -> bool {
        let forced = std::mem::take(&mut self.force_pending) && !triggered;
        if !(triggered || forced) {
            return false
        }
        log::trace!("capture: {} at {}", if forced { "forced" } else { "triggered" },
            cursor.into_inner());
        self.free_running |= forced;
        true
    }

    /// Store cursor of pre-trigger column `column` for a trigger at `trigger`, or `None` if
    /// that code comes after the trigger and has not been stored yet.
    ///
    /// `history` is the furthest the store reaches back from the trigger without running into
    /// codes of the trigger's own block; columns beyond it repeat the oldest code.
    fn backfill_cursor(&self, trigger: StoreCursor, column: usize, history: usize)
            -> Option<StoreCursor> {
        let step = self.params.decimation + 1;
        let position = self.params.trigger.position;
        match self.params.backfill_spacing {
            BackfillSpacing::Decimated =>
                Some(trigger - ((position - column) * step).min(history)),
            BackfillSpacing::Reference => (column * step <= position)
                .then(|| trigger - (position - column * step).min(history)),
        }
    }

    /// The pre-trigger column due at `elapsed` codes after the trigger, if one was deferred.
    fn deferred_column(&self, elapsed: usize) -> Option<usize> {
        if self.deferred == 0 || elapsed == 0 {
            return None
        }
        let step = self.params.decimation + 1;
        let position = self.params.trigger.position;
        let offset = elapsed + position;
        (offset % step == 0 && offset / step < position).then(|| offset / step)
    }

    fn put(&mut self, column: usize, codes: [Code; 2]) {
        for channel in Channel::ALL {
            let code = codes[channel.index()];
            match self.params.mode {
                AcquisitionMode::Normal  => self.pixels[channel.index()][column] = code,
                AcquisitionMode::Average => self.totals[channel.index()][column] += code as u32,
            }
        }
    }

    fn backfill(&mut self, store: &CircularStore, trigger: StoreCursor) {
        let position = self.params.trigger.position;
        let history = store.capacity() - store.geometry().block_len;
        if position * (self.params.decimation + 1) > history {
            log::trace!("capture: backfill limited to {} codes of history", history);
        }
        self.deferred = 0;
        for column in 0..position {
            match self.backfill_cursor(trigger, column, history) {
                Some(cursor) => self.put(column, store.read_pair(cursor)),
                None => self.deferred += 1,
            }
        }
        // the trigger code itself is the first forward column
        self.filled = position;
        self.skip_left = 0;
        self.elapsed = 0;
    }

    /// Take the code at `cursor` unless it is decimated away, and complete any deferred
    /// pre-trigger column it belongs to. Returns whether every column has been written.
    fn fill(&mut self, store: &CircularStore, cursor: StoreCursor) -> bool {
        let codes = store.read_pair(cursor);
        if let Some(column) = self.deferred_column(self.elapsed) {
            self.put(column, codes);
            self.deferred -= 1;
        }
        self.elapsed += 1;
        if self.filled < FRAME_LENGTH {
            if self.skip_left > 0 {
                self.skip_left -= 1;
            } else {
                self.put(self.filled, codes);
                self.filled += 1;
                self.skip_left = self.params.decimation;
            }
        }
        self.filled == FRAME_LENGTH && self.deferred == 0
    }

    fn average(&mut self) {
        let count = self.params.average_count as u32;
        let position = self.params.trigger.position;
        for (pixels, totals) in self.pixels.iter_mut().zip(self.totals.iter_mut()) {
            if let BackfillWeighting::HalvedReference = self.params.backfill_weighting {
                for total in totals[..position].iter_mut() {
                    *total /= 2;
                }
            }
            for (pixel, total) in pixels.iter_mut().zip(totals.iter_mut()) {
                *pixel = (*total / count) as Code;
                *total = 0;
            }
        }
    }

    fn clear_totals(&mut self) {
        for totals in self.totals.iter_mut() {
            totals.fill(0);
        }
    }

    fn publish(&mut self, captures: usize) -> Frame {
        let codes = Channel::ALL.map(|channel| {
            self.params.channel(channel).enabled
                .then(|| self.pixels[channel.index()].clone())
        });
        let free_running = std::mem::take(&mut self.free_running);
        log::debug!("capture: frame complete ({} captures{})", captures,
            if free_running { ", free running" } else { "" });
        Frame { codes, params: self.params, captures, free_running }
    }
}
