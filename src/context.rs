//! Owns the whole acquisition pipeline: decoding, triggering, capture, measurement, and the
//! staged application of configuration changes.

use crate::{Code, Error, Result, MID_CODE};
use crate::capture::{CaptureEngine, Frame};
use crate::config::{
    AcquisitionMode, BackfillSpacing, BackfillWeighting, Channel, Configuration, Edge, FreeRun,
    TriggerConfig,
};
use crate::decode::{self, RawBlock, WordLayout};
use crate::handoff::BlockConsumer;
use crate::measure::{Measurement, MeasurementEngine};
use crate::params::{HorizontalScale, Parameters, VerticalScale};
use crate::store::{CircularStore, StoreGeometry};
use crate::trigger::Trigger;

/// Receives the results of acquisition.
pub trait Sink {
    fn frame_published(&mut self, frame: &Frame);

    /// Called once for every published frame, right after `frame_published`.
    fn measurement_updated(&mut self, measurement: &Measurement);
}

#[derive(Debug)]
pub struct AcquisitionContext {
    layout: WordLayout,
    store: CircularStore,
    trigger: Trigger,
    capture: CaptureEngine,
    measurement: MeasurementEngine,
    config: Configuration,
    pending: Option<Configuration>, // applied at the next capture cycle boundary
    params: Parameters,
    running: bool,
    last_frame: Option<Frame>,
}

impl AcquisitionContext {
    pub fn new(geometry: StoreGeometry, layout: WordLayout, config: Configuration)
            -> Result<AcquisitionContext> {
        config.validate()?;
        let params = Parameters::derive(&config);
        log::debug!("context: starting with {:#?}", config);
        Ok(AcquisitionContext {
            layout,
            store: CircularStore::new(geometry)?,
            trigger: Trigger::new(params.trigger, params.free_run),
            capture: CaptureEngine::new(params),
            measurement: MeasurementEngine::new(),
            config,
            pending: None,
            params,
            running: true,
            last_frame: None,
        })
    }

    /// Configuration in effect for the current capture cycle.
    pub fn active_configuration(&self) -> &Configuration {
        &self.config
    }

    /// Most recently requested configuration, which may not be in effect yet.
    pub fn configuration(&self) -> &Configuration {
        self.pending.as_ref().unwrap_or(&self.config)
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn store(&self) -> &CircularStore {
        &self.store
    }

    pub fn capture(&self) -> &CaptureEngine {
        &self.capture
    }

    pub fn last_frame(&self) -> Option<&Frame> {
        self.last_frame.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Decode one block into the store and run every new code through trigger and capture.
    pub fn process_block<S: Sink>(&mut self, block: &RawBlock, sink: &mut S) -> Result<()> {
        self.apply_pending();
        let start = decode::decode_block(block, self.layout, &mut self.store)?;
        log::trace!("context: decoded {} words at {}", block.len(), start.into_inner());
        for offset in 0..block.len() {
            let cursor = start + offset;
            let triggered = self.trigger.check(&self.store, cursor);
            if let Some(frame) = self.capture.push(&self.store, cursor, triggered) {
                self.publish(frame, sink);
                self.apply_pending();
            }
        }
        if self.trigger.end_pass() {
            self.capture.force();
        }
        Ok(())
    }

    /// Process every block the producer has handed over so far. Returns the number of blocks
    /// processed.
    pub fn poll<S: Sink>(&mut self, consumer: &BlockConsumer, sink: &mut S) -> Result<usize> {
        let mut processed = 0;
        while let Some((slot, block)) = consumer.try_next()? {
            let result = self.process_block(&block, sink);
            consumer.release(slot);
            result?;
            processed += 1;
        }
        Ok(processed)
    }

    fn publish<S: Sink>(&mut self, frame: Frame, sink: &mut S) {
        if !self.running {
            log::trace!("context: stopped, discarding frame");
            return
        }
        let measurement = self.measurement.measure(&frame);
        sink.frame_published(&frame);
        sink.measurement_updated(&measurement);
        self.last_frame = Some(frame);
    }

    fn apply_pending(&mut self) {
        if !self.capture.at_cycle_boundary() {
            return
        }
        let Some(config) = self.pending.take() else { return };
        let params = Parameters::derive(&config);
        log::info!("context: switching configuration to {:#?}", config);
        if (params.trigger, params.free_run) != (self.params.trigger, self.params.free_run) {
            self.trigger.reconfigure(params.trigger, params.free_run);
        }
        if (params.horizontal_scale, params.trigger.edge, params.enabled()) !=
                (self.params.horizontal_scale, self.params.trigger.edge, self.params.enabled()) {
            self.measurement.reset();
        }
        self.capture.reconfigure(params);
        self.config = config;
        self.params = params;
    }

    fn stage<F>(&mut self, change: F) -> Result<()>
            where F: FnOnce(&mut Configuration) {
        let mut config = *self.configuration();
        change(&mut config);
        config.validate()?;
        self.pending = Some(config);
        self.apply_pending();
        Ok(())
    }

    pub fn set_vertical_scale(&mut self, channel: Channel, index: usize) -> Result<()> {
        self.stage(|config| config.channel_mut(channel).vertical_scale = index)
    }

    /// Move the vertical scale of `channel` by `delta` steps, stopping at either end of the
    /// table. Returns the new index.
    pub fn step_vertical_scale(&mut self, channel: Channel, delta: isize) -> usize {
        let current = self.configuration().channel(channel).vertical_scale;
        let index = VerticalScale::step(current, delta);
        self.stage(|config| config.channel_mut(channel).vertical_scale = index)
            .map(|()| index)
            .unwrap_or(current)
    }

    pub fn set_horizontal_scale(&mut self, index: usize) -> Result<()> {
        self.stage(|config| config.horizontal_scale = index)
    }

    /// Move the horizontal scale by `delta` steps, stopping at either end of the table.
    /// Returns the new index.
    pub fn step_horizontal_scale(&mut self, delta: isize) -> usize {
        let current = self.configuration().horizontal_scale;
        let index = HorizontalScale::step(current, delta);
        self.stage(|config| config.horizontal_scale = index)
            .map(|()| index)
            .unwrap_or(current)
    }

    pub fn set_trigger(&mut self, level: Code, position: usize, edge: Edge, source: Channel)
            -> Result<()> {
        let trigger = TriggerConfig::new(level, position, edge, source)?;
        self.stage(|config| config.trigger = trigger)
    }

    pub fn set_acquisition_mode(&mut self, mode: AcquisitionMode) -> Result<()> {
        self.stage(|config| config.mode = mode)
    }

    pub fn set_average_count(&mut self, count: usize) -> Result<()> {
        if count == 0 {
            return Err(Error::AverageCount(count))
        }
        self.stage(|config| config.average_count = count)
    }

    pub fn set_channel_enabled(&mut self, channel: Channel, enabled: bool) -> Result<()> {
        self.stage(|config| config.enabled.set(channel.flag(), enabled))
    }

    /// Move the zero volt row of `channel`, discarding its offset calibration.
    pub fn set_ground_level(&mut self, channel: Channel, row: f32) -> Result<()> {
        self.stage(|config| {
            let channel = config.channel_mut(channel);
            channel.ground_row = row;
            channel.level = row;
        })
    }

    pub fn set_free_run(&mut self, free_run: Option<FreeRun>) -> Result<()> {
        self.stage(|config| config.free_run = free_run)
    }

    pub fn set_backfill(&mut self, spacing: BackfillSpacing, weighting: BackfillWeighting)
            -> Result<()> {
        self.stage(|config| {
            config.backfill_spacing = spacing;
            config.backfill_weighting = weighting;
        })
    }

    /// Stopping freezes the display: frames keep being captured but are not published.
    pub fn set_run(&mut self, running: bool) {
        if running != self.running {
            log::info!("context: {}", if running { "running" } else { "stopped" });
        }
        self.running = running;
    }

    pub fn toggle_run(&mut self) -> bool {
        self.set_run(!self.running);
        self.running
    }

    /// Shift the zero volt row of every channel in the last published frame so that the mean
    /// of its codes lands on the channel's ground row. Returns whether any channel was
    /// calibrated.
    pub fn calibrate_offset(&mut self) -> Result<bool> {
        let Some(frame) = &self.last_frame else {
            log::debug!("context: no frame to calibrate offset against");
            return Ok(false)
        };
        let mut levels = [None; 2];
        for channel in Channel::ALL {
            if let Some(mean) = frame.mean(channel) {
                let pixel_divider = frame.params().channel(channel).pixel_divider;
                levels[channel.index()] = Some((mean - MID_CODE as f32) / pixel_divider);
            }
        }
        if levels.iter().all(Option::is_none) {
            return Ok(false)
        }
        self.stage(|config| {
            for channel in Channel::ALL {
                if let Some(offset) = levels[channel.index()] {
                    let channel = config.channel_mut(channel);
                    channel.level = channel.ground_row + offset;
                    log::info!("context: offset calibrated to {:+.2} rows", offset);
                }
            }
        })?;
        Ok(true)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::FRAME_LENGTH;
    use crate::config::MAX_AVERAGE_COUNT;
    use crate::handoff::{handoff, Slot};

    const BLOCK_LEN: usize = 128;

    #[derive(Default)]
    struct Recorder {
        frames: Vec<Frame>,
        measurements: Vec<Measurement>,
    }

    impl Sink for Recorder {
        fn frame_published(&mut self, frame: &Frame) {
            self.frames.push(frame.clone())
        }

        fn measurement_updated(&mut self, measurement: &Measurement) {
            self.measurements.push(*measurement)
        }
    }

    fn context(config: Configuration) -> AcquisitionContext {
        AcquisitionContext::new(StoreGeometry { block_len: BLOCK_LEN, blocks: 20 },
            WordLayout::Packed, config).unwrap()
    }

    fn block<F: Fn(usize) -> [Code; 2]>(index: usize, sample: F) -> RawBlock {
        let base = index * BLOCK_LEN;
        RawBlock::from_codes((base..base + BLOCK_LEN).map(sample), WordLayout::Packed)
    }

    fn feed<F>(ctx: &mut AcquisitionContext, blocks: std::ops::Range<usize>, sample: F)
            -> Recorder
            where F: Fn(usize) -> [Code; 2] + Copy {
        let mut recorder = Recorder::default();
        for index in blocks {
            ctx.process_block(&block(index, sample), &mut recorder).unwrap();
        }
        recorder
    }

    fn ramp(n: usize) -> [Code; 2] {
        [(1048 + n) as Code, 2048]
    }

    fn square(n: usize) -> [Code; 2] {
        if n % 100 < 50 { [1000, 1000] } else { [3000, 3000] }
    }

    fn triggered_config(position: usize) -> Configuration {
        let mut config = Configuration::default();
        config.trigger = TriggerConfig::new(2048, position, Edge::Rising, Channel::Ch1).unwrap();
        config.free_run = None;
        config
    }

    #[test]
    fn test_ramp_scenario() {
        let mut ctx = context(triggered_config(50));
        assert_eq!(ctx.params().decimation, 0);
        let recorder = feed(&mut ctx, 0..11, ramp);
        assert_eq!(recorder.frames.len(), 1);
        assert_eq!(recorder.measurements.len(), 1);
        let codes = recorder.frames[0].channel(Channel::Ch1).unwrap();
        let expected: Vec<Code> = (950..950 + FRAME_LENGTH).map(|n| ramp(n)[0]).collect();
        assert_eq!(codes, &expected[..]);
        assert_eq!(codes[50], 2048);
        let amplitude = recorder.measurements[0].channel(Channel::Ch1).unwrap().amplitude;
        assert_eq!(amplitude.peak_to_peak, FRAME_LENGTH as Code - 1);
        assert_eq!(ctx.last_frame(), Some(&recorder.frames[0]));
    }

    #[test]
    fn test_block_length_mismatch() {
        let mut ctx = context(Configuration::default());
        let mut recorder = Recorder::default();
        assert!(matches!(ctx.process_block(&RawBlock::new(vec![0; 3]), &mut recorder),
            Err(Error::BlockLength { expected: BLOCK_LEN, actual: 3 })));
    }

    #[test]
    fn test_frequency_every_ten_frames() {
        let mut ctx = context(triggered_config(0));
        let recorder = feed(&mut ctx, 0..40, square);
        assert!(recorder.frames.len() >= 10);
        let frequencies: Vec<usize> = recorder.measurements.iter().enumerate()
            .filter(|(_, measurement)| {
                measurement.channel(Channel::Ch1).unwrap().frequency.is_some()
            })
            .map(|(index, _)| index)
            .collect();
        assert_eq!(frequencies[0], 9);
        let frequency = recorder.measurements[9].channel(Channel::Ch1).unwrap()
            .frequency.unwrap();
        let expected = 1.0 / (100.0 * ctx.params().seconds_per_pixel);
        assert!((frequency.0 - expected).abs() < 0.05 * expected);
    }

    #[test]
    fn test_run_stop() {
        let mut ctx = context(triggered_config(0));
        assert!(!ctx.toggle_run());
        let recorder = feed(&mut ctx, 0..10, square);
        assert!(recorder.frames.is_empty());
        assert!(recorder.measurements.is_empty());
        assert_eq!(ctx.last_frame(), None);

        ctx.set_run(true);
        let recorder = feed(&mut ctx, 10..20, square);
        assert!(!recorder.frames.is_empty());
        assert_eq!(recorder.frames.len(), recorder.measurements.len());
    }

    #[test]
    fn test_staged_reconfiguration() {
        let mut ctx = context(triggered_config(0));
        let mut recorder = Recorder::default();
        // trigger at sample 50, capture runs into the third block
        ctx.process_block(&block(0, square), &mut recorder).unwrap();
        assert!(!ctx.capture().at_cycle_boundary());
        ctx.set_vertical_scale(Channel::Ch1, 3).unwrap();
        assert_eq!(ctx.configuration().channel(Channel::Ch1).vertical_scale, 3);
        assert_eq!(ctx.active_configuration().channel(Channel::Ch1).vertical_scale, 0);
        assert_eq!(ctx.params().channel(Channel::Ch1).vertical_scale, 0);

        ctx.process_block(&block(1, square), &mut recorder).unwrap();
        ctx.process_block(&block(2, square), &mut recorder).unwrap();
        assert_eq!(recorder.frames.len(), 1);
        assert_eq!(recorder.frames[0].params().channel(Channel::Ch1).vertical_scale, 0);
        assert_eq!(ctx.params().channel(Channel::Ch1).vertical_scale, 3);

        for index in 3..8 {
            ctx.process_block(&block(index, square), &mut recorder).unwrap();
        }
        assert!(recorder.frames.len() > 1);
        assert_eq!(recorder.frames[1].params().channel(Channel::Ch1).vertical_scale, 3);
    }

    #[test]
    fn test_settings_validated() {
        let mut ctx = context(Configuration::default());
        assert!(matches!(ctx.set_trigger(2048, FRAME_LENGTH, Edge::Rising, Channel::Ch1),
            Err(Error::TriggerPosition(FRAME_LENGTH))));
        assert!(matches!(ctx.set_average_count(0), Err(Error::AverageCount(0))));
        assert!(matches!(ctx.set_average_count(MAX_AVERAGE_COUNT + 1),
            Err(Error::AverageCount(_))));
        assert!(matches!(ctx.set_vertical_scale(Channel::Ch2, 11), Err(Error::Scale { .. })));
        assert!(matches!(ctx.set_horizontal_scale(29), Err(Error::Scale { .. })));
        assert_eq!(ctx.configuration(), &Configuration::default());

        assert_eq!(ctx.step_vertical_scale(Channel::Ch1, -1), 0);
        assert_eq!(ctx.step_vertical_scale(Channel::Ch1, 1), 1);
        assert_eq!(ctx.step_horizontal_scale(100), 28);
        assert_eq!(ctx.step_horizontal_scale(-1), 27);
        // idle between blocks, so applied right away
        assert_eq!(ctx.params().horizontal_scale, 27);
        assert_eq!(ctx.params().decimation, 499);
    }

    #[test]
    fn test_disabled_channel() {
        let mut ctx = context(triggered_config(0));
        ctx.set_channel_enabled(Channel::Ch2, false).unwrap();
        let recorder = feed(&mut ctx, 0..5, square);
        assert!(recorder.frames.iter().all(|frame| frame.channel(Channel::Ch2).is_none()));
        assert!(recorder.measurements.iter().all(|m| m.channel(Channel::Ch2).is_none()));
    }

    #[test]
    fn test_average_mode() {
        let mut ctx = context(triggered_config(20));
        ctx.set_acquisition_mode(AcquisitionMode::Average).unwrap();
        ctx.set_average_count(3).unwrap();
        // captures start at 50, 350, ... 2150
        let recorder = feed(&mut ctx, 0..20, square);
        assert_eq!(recorder.frames.len(), 2);
        for frame in recorder.frames.iter() {
            assert_eq!(frame.captures(), 3);
            // every capture is phase aligned to the rising edge
            let codes = frame.channel(Channel::Ch1).unwrap();
            assert!(codes[..20].iter().all(|&code| code == 1000));
            assert!(codes[20..70].iter().all(|&code| code == 3000));
            assert!(codes[70..120].iter().all(|&code| code == 1000));
        }
        assert_eq!(recorder.frames[0].channel(Channel::Ch1),
            recorder.frames[1].channel(Channel::Ch1));
    }

    #[test]
    fn test_poll_and_overrun() {
        let mut ctx = context(triggered_config(0));
        let (producer, consumer) = handoff();
        let mut recorder = Recorder::default();
        producer.on_block_ready(Slot::Ping, block(0, square)).unwrap();
        assert!(matches!(producer.on_block_ready(Slot::Ping, block(1, square)),
            Err(Error::Overrun(Slot::Ping))));
        producer.on_block_ready(Slot::Pong, block(1, square)).unwrap();
        assert_eq!(ctx.poll(&consumer, &mut recorder).unwrap(), 2);
        assert_eq!(consumer.overruns(), 1);
        assert!(!producer.is_pending(Slot::Ping));
        assert!(!producer.is_pending(Slot::Pong));

        producer.on_block_ready(Slot::Ping, block(2, square)).unwrap();
        drop(producer);
        assert!(matches!(ctx.poll(&consumer, &mut recorder), Err(Error::Disconnected)));
        assert_eq!(recorder.frames.len(), 1);
    }

    #[test]
    fn test_calibrate_offset() {
        let mut ctx = context(Configuration { free_run: None, ..Configuration::default() });
        assert!(!ctx.calibrate_offset().unwrap());

        let recorder = feed(&mut ctx, 0..16, |_| [2148, 1948]);
        assert!(!recorder.frames.is_empty());
        assert!(ctx.calibrate_offset().unwrap());
        for (channel, code) in [(Channel::Ch1, 2148), (Channel::Ch2, 1948)] {
            let params = ctx.params().channel(channel);
            let ground_row = ctx.configuration().channel(channel).ground_row;
            assert!((params.code_to_row(code) - ground_row).abs() < 1e-2,
                "{:?}: {} != {}", channel, params.code_to_row(code), ground_row);
        }

        ctx.set_ground_level(Channel::Ch1, 100.0).unwrap();
        let channel = ctx.configuration().channel(Channel::Ch1);
        assert_eq!((channel.ground_row, channel.level), (100.0, 100.0));
    }
}
