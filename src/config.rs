//! High-level configuration of the acquisition core in terms of scale steps, trigger and mode.

use bitflags::bitflags;

use crate::{Code, Error, Result, FRAME_LENGTH, MAX_CODE, MID_CODE};
use crate::params::{HORIZONTAL_SCALES, VERTICAL_SCALES};

/// Largest `Configuration::average_count` whose sums of 12-bit codes still fit in a `u32`.
pub const MAX_AVERAGE_COUNT: usize = (u32::MAX / (MAX_CODE as u32 + 1)) as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Ch1 = 0,
    Ch2 = 1,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Ch1, Channel::Ch2];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn flag(self) -> Channels {
        match self {
            Self::Ch1 => Channels::Ch1,
            Self::Ch2 => Channels::Ch2,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Channels: u8 {
        const Ch1 = 1<<0;
        const Ch2 = 1<<1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Edge {
    #[default]
    Rising,
    Falling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerConfig {
    pub level: Code,
    pub edge: Edge,
    pub source: Channel,
    /// Frame column at which the trigger sample is placed; columns before it are back-filled.
    pub position: usize,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        TriggerConfig {
            level: MID_CODE,
            edge: Edge::Rising,
            source: Channel::Ch1,
            position: 0,
        }
    }
}

impl TriggerConfig {
    pub fn new(level: Code, position: usize, edge: Edge, source: Channel) -> Result<TriggerConfig> {
        if position >= FRAME_LENGTH {
            return Err(Error::TriggerPosition(position))
        }
        Ok(TriggerConfig { level: level.min(MAX_CODE), edge, source, position })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcquisitionMode {
    #[default]
    Normal,
    Average,
}

/// Placement of the pre-trigger pixels when decimating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackfillSpacing {
    /// Pixel `i` is `position - i` decimated steps before the trigger, so the whole frame
    /// shares one time base. Columns further back than the store holds repeat its oldest code.
    #[default]
    Decimated,
    /// Pixel `i` is read at the literal index `trigger - position + i * (skip + 1)`.
    /// Identical to `Decimated` for `skip == 0`; for larger decimation the later pixels point
    /// past the trigger and are written once those codes have been stored, which may hold the
    /// frame back beyond its last forward column.
    Reference,
}

/// Weighting of the pre-trigger region when averaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackfillWeighting {
    /// Every pixel is the plain mean over the averaging set.
    #[default]
    Equal,
    /// The pre-trigger sums are halved once per averaging set before the final division.
    HalvedReference,
}

/// Forces a trigger after too many processing passes without a qualifying edge, so that
/// the display keeps updating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeRun {
    pub after_misses: u8,
    pub miss_cap: u8,
}

impl Default for FreeRun {
    fn default() -> Self {
        FreeRun { after_misses: 10, miss_cap: 20 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelConfiguration {
    /// Index into `VERTICAL_SCALES`.
    pub vertical_scale: usize,
    /// Screen row where zero volts should be drawn.
    pub ground_row: f32,
    /// Screen row offset actually applied; equals `ground_row` until offset calibration.
    pub level: f32,
}

impl ChannelConfiguration {
    pub fn with_ground_row(ground_row: f32) -> Self {
        ChannelConfiguration { vertical_scale: 0, ground_row, level: ground_row }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Configuration {
    pub channels: [ChannelConfiguration; 2],
    pub enabled: Channels,
    /// Index into `HORIZONTAL_SCALES`.
    pub horizontal_scale: usize,
    pub trigger: TriggerConfig,
    pub mode: AcquisitionMode,
    /// Number of triggered captures summed per frame in `AcquisitionMode::Average`.
    pub average_count: usize,
    pub free_run: Option<FreeRun>,
    pub backfill_spacing: BackfillSpacing,
    pub backfill_weighting: BackfillWeighting,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            channels: [
                ChannelConfiguration::with_ground_row(80.0),
                ChannelConfiguration::with_ground_row(160.0),
            ],
            enabled: Channels::all(),
            horizontal_scale: 6, // 2 us/div
            trigger: TriggerConfig::default(),
            mode: AcquisitionMode::Normal,
            average_count: 10,
            free_run: Some(FreeRun::default()),
            backfill_spacing: BackfillSpacing::default(),
            backfill_weighting: BackfillWeighting::default(),
        }
    }
}

impl Configuration {
    pub fn channel(&self, channel: Channel) -> &ChannelConfiguration {
        &self.channels[channel.index()]
    }

    pub fn channel_mut(&mut self, channel: Channel) -> &mut ChannelConfiguration {
        &mut self.channels[channel.index()]
    }

    pub fn is_enabled(&self, channel: Channel) -> bool {
        self.enabled.contains(channel.flag())
    }

    pub fn validate(&self) -> Result<()> {
        for channel in self.channels.iter() {
            if channel.vertical_scale >= VERTICAL_SCALES.len() {
                return Err(Error::Scale {
                    index: channel.vertical_scale,
                    steps: VERTICAL_SCALES.len()
                })
            }
        }
        if self.horizontal_scale >= HORIZONTAL_SCALES.len() {
            return Err(Error::Scale {
                index: self.horizontal_scale,
                steps: HORIZONTAL_SCALES.len()
            })
        }
        if self.trigger.position >= FRAME_LENGTH {
            return Err(Error::TriggerPosition(self.trigger.position))
        }
        if self.average_count == 0 || self.average_count > MAX_AVERAGE_COUNT {
            return Err(Error::AverageCount(self.average_count))
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = Configuration::default();
        config.validate().unwrap();
        assert!(config.is_enabled(Channel::Ch1));
        assert!(config.is_enabled(Channel::Ch2));
        assert_eq!(config.channel(Channel::Ch2).ground_row, 160.0);
    }

    #[test]
    fn test_trigger_position_bound() {
        assert!(TriggerConfig::new(2048, FRAME_LENGTH - 1, Edge::Rising, Channel::Ch1).is_ok());
        assert!(matches!(
            TriggerConfig::new(2048, FRAME_LENGTH, Edge::Rising, Channel::Ch1),
            Err(Error::TriggerPosition(FRAME_LENGTH))
        ));
    }

    #[test]
    fn test_trigger_level_clamped_to_code_range() {
        let trigger = TriggerConfig::new(9000, 0, Edge::Falling, Channel::Ch2).unwrap();
        assert_eq!(trigger.level, MAX_CODE);
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = Configuration::default();
        config.channels[1].vertical_scale = VERTICAL_SCALES.len();
        assert!(matches!(config.validate(), Err(Error::Scale { .. })));

        let mut config = Configuration::default();
        config.horizontal_scale = HORIZONTAL_SCALES.len();
        assert!(matches!(config.validate(), Err(Error::Scale { .. })));

        let mut config = Configuration::default();
        config.average_count = 0;
        assert!(matches!(config.validate(), Err(Error::AverageCount(0))));

        config.average_count = MAX_AVERAGE_COUNT;
        config.validate().unwrap();
        config.average_count = MAX_AVERAGE_COUNT + 1;
        assert!(matches!(config.validate(), Err(Error::AverageCount(_))));
        // a full set of the largest code does not overflow the accumulator
        assert!((MAX_AVERAGE_COUNT as u64) * (MAX_CODE as u64) <= u32::MAX as u64);
    }
}
