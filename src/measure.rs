//! Per-frame amplitude and rolling frequency estimates.

use std::fmt;

use wide::u16x8;

use crate::Code;
use crate::capture::Frame;
use crate::config::{Channel, Edge};
use crate::params::ChannelParameters;

/// Number of per-frame frequency estimates combined into one reported frequency.
pub const MEASURE_AVG: usize = 10;

/// Largest number of crossing intervals considered within a frame.
pub const TIME_AVG: usize = 320;

/// A voltage in millivolts.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Voltage(pub f32);

impl fmt::Display for Voltage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let millivolts = self.0;
        if millivolts.abs() >= 1000.0 {
            write!(f, "{:.2} V", millivolts / 1000.0)
        } else {
            write!(f, "{:.0} mV", millivolts)
        }
    }
}

/// A frequency in hertz.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Frequency(pub f32);

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let hertz = self.0;
        if hertz >= 1e6 {
            write!(f, "{:.2} MHz", hertz / 1e6)
        } else if hertz >= 1e3 {
            write!(f, "{:.2} kHz", hertz / 1e3)
        } else if hertz >= 1.0 {
            write!(f, "{:.2} Hz", hertz)
        } else {
            write!(f, "{:.0} mHz", hertz * 1e3)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Amplitude {
    pub min: Code,
    pub max: Code,
    pub peak_to_peak: Code,
    pub voltage: Voltage,
}

impl Amplitude {
    pub fn measure(codes: &[Code], params: &ChannelParameters) -> Amplitude {
        let (min, max) = min_max(codes);
        let peak_to_peak = max.saturating_sub(min);
        let voltage = Voltage(params.codes_to_millivolts(peak_to_peak));
        Amplitude { min, max, peak_to_peak, voltage }
    }
}

fn min_max(codes: &[Code]) -> (Code, Code) {
    if codes.is_empty() {
        return (0, 0)
    }
    let (groups, rest) = codes.split_at(codes.len() / 8 * 8);
    let groups: &[[Code; 8]] = bytemuck::cast_slice(groups);
    let (mut lower, mut upper) = (u16x8::splat(Code::MAX), u16x8::splat(Code::MIN));
    for &group in groups {
        let group = u16x8::new(group);
        lower = lower.min(group);
        upper = upper.max(group);
    }
    (lower.to_array().into_iter().chain(rest.iter().copied()).fold(Code::MAX, Code::min),
     upper.to_array().into_iter().chain(rest.iter().copied()).fold(Code::MIN, Code::max))
}

/// Mean distance in columns between successive crossings of the frame's fourth code, in the
/// direction of `edge`.
///
/// Intervals further than half the mean from it are discarded before the final mean is taken.
/// Returns `None` if fewer than two crossings were found or no interval survived.
pub fn period(codes: &[Code], edge: Edge) -> Option<f32> {
    let reference = *codes.get(3)?;
    // a code that only reaches the reference does not cross it, so plateaus count once
    let crossings = codes.windows(2).enumerate()
        .filter(|(_, pair)| match edge {
            Edge::Rising  => pair[0] < reference && pair[1] >= reference,
            Edge::Falling => pair[0] > reference && pair[1] <= reference,
        })
        .map(|(index, _)| index + 1);

    let mut intervals = Vec::with_capacity(TIME_AVG);
    let mut last = None;
    for crossing in crossings {
        if let Some(last) = last {
            if intervals.len() == TIME_AVG { break }
            intervals.push((crossing - last) as f32);
        }
        last = Some(crossing);
    }

    let first = mean(intervals.iter().copied())?;
    mean(intervals.iter().copied()
        .filter(|&interval| interval >= 0.5 * first && interval <= 1.5 * first))
}

fn mean<I: Iterator<Item = f32>>(values: I) -> Option<f32> {
    let (sum, count) = values.fold((0.0, 0), |(sum, count), value| (sum + value, count + 1));
    (count > 0 && sum > 0.0).then(|| sum / count as f32)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelMeasurement {
    pub amplitude: Amplitude,
    /// Present only on the frame that completes a set of `MEASURE_AVG` estimates, and only if
    /// one of them found a period.
    pub frequency: Option<Frequency>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    channels: [Option<ChannelMeasurement>; 2],
}

impl Measurement {
    pub fn channel(&self, channel: Channel) -> Option<&ChannelMeasurement> {
        self.channels[channel.index()].as_ref()
    }
}

#[derive(Debug, Clone)]
pub struct MeasurementEngine {
    estimates: [[f32; MEASURE_AVG]; 2], // hertz, or 0 if the frame had no period
    count: usize,
}

impl MeasurementEngine {
    pub fn new() -> MeasurementEngine {
        MeasurementEngine { estimates: [[0.0; MEASURE_AVG]; 2], count: 0 }
    }

    /// Drop the estimates collected so far, e.g. after the time base changed.
    pub fn reset(&mut self) {
        *self = MeasurementEngine::new()
    }

    pub fn measure(&mut self, frame: &Frame) -> Measurement {
        let params = frame.params();
        let slot = self.count;
        let mut amplitudes = [None; 2];
        for channel in Channel::ALL {
            let estimate = match frame.channel(channel) {
                Some(codes) => {
                    amplitudes[channel.index()] =
                        Some(Amplitude::measure(codes, params.channel(channel)));
                    period(codes, params.trigger.edge)
                        .map(|period| 1.0 / (period * params.seconds_per_pixel))
                        .unwrap_or(0.0)
                }
                None => 0.0,
            };
            self.estimates[channel.index()][slot] = estimate;
        }
        self.count += 1;

        let mut frequencies = [None; 2];
        if self.count == MEASURE_AVG {
            for channel in Channel::ALL {
                let estimates = self.estimates[channel.index()].iter().copied()
                    .filter(|&estimate| estimate > 0.0);
                frequencies[channel.index()] = mean(estimates).map(Frequency);
            }
            log::trace!("measure: frequencies {:?}", frequencies);
            self.reset();
        }

        let channels = Channel::ALL.map(|channel| {
            amplitudes[channel.index()].map(|amplitude| ChannelMeasurement {
                amplitude,
                frequency: frequencies[channel.index()],
            })
        });
        Measurement { channels }
    }
}

impl Default for MeasurementEngine {
    fn default() -> Self {
        MeasurementEngine::new()
    }
}
