//! Scale tables and the per-cycle parameters derived from a `Configuration`.

use std::fmt;

use crate::{Code, MID_CODE};
use crate::config::{
    AcquisitionMode, BackfillSpacing, BackfillWeighting, Channel, Channels, Configuration,
    FreeRun, TriggerConfig,
};

/// Screen rows per vertical division.
const ROWS_PER_DIV: f32 = 15.0;

/// Seconds per pixel is defined as 8 divisions spread over 240 pixels.
const DIVS_PER_SWEEP: f32 = 8.0;
const PIXELS_PER_SWEEP: f32 = 240.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerticalScale {
    pub label: &'static str,
    pub millivolts_per_div: f32,
    /// ADC codes per screen row, per channel; the two front ends are not matched.
    pub pixel_divider: [f32; 2],
}

impl VerticalScale {
    pub fn millivolts_per_pixel(&self) -> f32 {
        self.millivolts_per_div / ROWS_PER_DIV
    }

    pub fn step(index: usize, delta: isize) -> usize {
        step_index(index, delta, VERTICAL_SCALES.len())
    }
}

impl fmt::Display for VerticalScale {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/div", self.label)
    }
}

macro_rules! vertical {
    ($label:expr, $mv:expr, $ch1:expr, $ch2:expr) => {
        VerticalScale { label: $label, millivolts_per_div: $mv, pixel_divider: [$ch1, $ch2] }
    };
}

pub static VERTICAL_SCALES: [VerticalScale; 11] = [
    vertical!("20mV",     20.0,  5.461,  5.461),
    vertical!("50mV",     50.0, 13.653, 13.653),
    vertical!("100mV",   100.0, 21.639, 21.639),
    vertical!("200mV",   200.0, 21.690, 21.690),
    vertical!("500mV",   500.0, 21.586, 21.586),
    vertical!("1V",     1000.0, 21.586, 21.586),
    vertical!("2V",     2000.0, 12.335, 21.586),
    vertical!("5V",     5000.0, 43.073, 43.073),
    vertical!("10V",   10000.0, 43.176, 43.176),
    vertical!("20V",   20000.0, 54.484, 54.484),
    vertical!("25V",   25000.0, 68.105, 68.105),
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HorizontalScale {
    pub label: &'static str,
    pub seconds_per_div: f32,
    /// Sampling bus clock divider; applied by the acquisition hardware, not by this crate.
    pub clock_divider: u32,
    /// Codes dropped between two rendered pixels.
    pub decimation: usize,
}

impl HorizontalScale {
    pub fn seconds_per_pixel(&self) -> f32 {
        DIVS_PER_SWEEP * self.seconds_per_div / PIXELS_PER_SWEEP
    }

    pub fn step(index: usize, delta: isize) -> usize {
        step_index(index, delta, HORIZONTAL_SCALES.len())
    }
}

impl fmt::Display for HorizontalScale {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/div", self.label)
    }
}

macro_rules! horizontal {
    ($label:expr, $secs:expr, $clkdiv:expr, $skip:expr) => {
        HorizontalScale {
            label: $label,
            seconds_per_div: $secs,
            clock_divider: $clkdiv,
            decimation: $skip,
        }
    };
}

pub static HORIZONTAL_SCALES: [HorizontalScale; 29] = [
    horizontal!("20ns",  20e-9,     5,    0),
    horizontal!("50ns",  50e-9,    10,    0),
    horizontal!("100ns", 100e-9,   35,    0),
    horizontal!("200ns", 200e-9,   75,    0),
    horizontal!("500ns", 500e-9,    0,    0),
    horizontal!("1us",   1e-6,      1,    0),
    horizontal!("2us",   2e-6,      2,    0),
    horizontal!("5us",   5e-6,      6,    0),
    horizontal!("10us",  10e-6,    14,    0),
    horizontal!("20us",  20e-6,     8,    2),
    horizontal!("50us",  50e-6,    74,    0),
    horizontal!("100us", 100e-6,  148,    0),
    horizontal!("200us", 200e-6,  298,    0),
    horizontal!("500us", 500e-6,  748,    0),
    horizontal!("1ms",   1e-3,   1498,    0),
    horizontal!("2ms",   2e-3,   2998,    0),
    horizontal!("5ms",   5e-3,   7498,    0),
    horizontal!("10ms",  10e-3, 14998,    0),
    horizontal!("20ms",  20e-3, 29998,    0),
    horizontal!("50ms",  50e-3, 59998,    0),
    horizontal!("100ms", 0.1,   49998,    2),
    horizontal!("200ms", 0.2,   59998,    4),
    horizontal!("500ms", 0.5,   59998,    9),
    horizontal!("1s",    1.0,   59998,   24),
    horizontal!("2s",    2.0,   59998,   49),
    horizontal!("5s",    5.0,   59998,  149),
    horizontal!("10s",   10.0,  59998,  249),
    horizontal!("20s",   20.0,  59998,  499),
    horizontal!("50s",   50.0,  59998, 2499),
];

fn step_index(index: usize, delta: isize, steps: usize) -> usize {
    (index as isize).saturating_add(delta).clamp(0, steps as isize - 1) as usize
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelParameters {
    pub enabled: bool,
    pub vertical_scale: usize,
    pub pixel_divider: f32,
    /// Screen row of code 0; `y = midlevel - code / pixel_divider`.
    pub midlevel: f32,
    pub millivolts_per_pixel: f32,
}

impl ChannelParameters {
    pub fn code_to_row(&self, code: Code) -> f32 {
        self.midlevel - code as f32 / self.pixel_divider
    }

    pub fn codes_to_millivolts(&self, codes: Code) -> f32 {
        codes as f32 / self.pixel_divider * self.millivolts_per_pixel
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Parameters {
    pub channels: [ChannelParameters; 2],
    pub horizontal_scale: usize,
    pub decimation: usize,
    pub seconds_per_pixel: f32,
    pub trigger: TriggerConfig,
    pub mode: AcquisitionMode,
    pub average_count: usize,
    pub free_run: Option<FreeRun>,
    pub backfill_spacing: BackfillSpacing,
    pub backfill_weighting: BackfillWeighting,
}

impl Default for Parameters {
    fn default() -> Self {
        Parameters::derive(&Configuration::default())
    }
}

impl Parameters {
    /// Derive per-cycle parameters. Out of range scale indices are clamped to the table; use
    /// `Configuration::validate` to reject them instead.
    pub fn derive(config: &Configuration) -> Parameters {
        let channel_params = |channel: Channel| {
            let channel_config = config.channel(channel);
            let vertical_scale = channel_config.vertical_scale.min(VERTICAL_SCALES.len() - 1);
            let scale = &VERTICAL_SCALES[vertical_scale];
            let pixel_divider = scale.pixel_divider[channel.index()];
            ChannelParameters {
                enabled: config.enabled.contains(channel.flag()),
                vertical_scale,
                pixel_divider,
                midlevel: MID_CODE as f32 / pixel_divider + channel_config.level,
                millivolts_per_pixel: scale.millivolts_per_pixel(),
            }
        };
        let horizontal_scale = config.horizontal_scale.min(HORIZONTAL_SCALES.len() - 1);
        let time = &HORIZONTAL_SCALES[horizontal_scale];
        Parameters {
            channels: [channel_params(Channel::Ch1), channel_params(Channel::Ch2)],
            horizontal_scale,
            decimation: time.decimation,
            seconds_per_pixel: time.seconds_per_pixel(),
            trigger: config.trigger,
            mode: config.mode,
            average_count: config.average_count.max(1),
            free_run: config.free_run,
            backfill_spacing: config.backfill_spacing,
            backfill_weighting: config.backfill_weighting,
        }
    }

    pub fn channel(&self, channel: Channel) -> &ChannelParameters {
        &self.channels[channel.index()]
    }

    pub fn enabled(&self) -> Channels {
        Channel::ALL.iter()
            .filter(|channel| self.channel(**channel).enabled)
            .fold(Channels::empty(), |channels, channel| channels | channel.flag())
    }
}
