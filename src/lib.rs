mod config;
mod params;
mod decode;
mod store;
mod trigger;
mod capture;
mod viewport;
mod measure;
mod handoff;
mod context;

use std::io;

/// Number of pixel columns in a frame.
pub const FRAME_LENGTH: usize = 319;

/// Code that corresponds to zero volts at the ADC input.
pub const MID_CODE: Code = 2048;

/// Largest valid 12-bit code.
pub const MAX_CODE: Code = 4095;

/// Biased (offset-binary) 12-bit sample.
pub type Code = u16;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Geometry { block_len: usize, blocks: usize },
    BlockLength { expected: usize, actual: usize },
    Scale { index: usize, steps: usize },
    TriggerPosition(usize),
    AverageCount(usize),
    Overrun(Slot),
    Disconnected,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Io(io_error) =>
                write!(f, "I/O error: {}", io_error),
            Self::Geometry { block_len, blocks } =>
                write!(f, "invalid store geometry: {} blocks of {} words", blocks, block_len),
            Self::BlockLength { expected, actual } =>
                write!(f, "raw block has {} words, expected {}", actual, expected),
            Self::Scale { index, steps } =>
                write!(f, "scale index {} out of range (0..{})", index, steps),
            Self::TriggerPosition(position) =>
                write!(f, "trigger position {} outside frame (0..{})", position, FRAME_LENGTH),
            Self::AverageCount(count) =>
                write!(f, "invalid average count {}", count),
            Self::Overrun(slot) =>
                write!(f, "{:?} slot overrun: previous block not yet consumed", slot),
            Self::Disconnected =>
                write!(f, "block producer disconnected"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            &Self::Io(ref io_error) => Some(io_error),
            _ => None
        }
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Error::Io(error)
    }
}

pub type Result<T> =
    core::result::Result<T, Error>;

pub use config::{
    MAX_AVERAGE_COUNT,
    Channel,
    Channels,
    Edge,
    TriggerConfig,
    AcquisitionMode,
    BackfillSpacing,
    BackfillWeighting,
    FreeRun,
    ChannelConfiguration,
    Configuration,
};

pub use params::{
    VerticalScale,
    HorizontalScale,
    VERTICAL_SCALES,
    HORIZONTAL_SCALES,
    ChannelParameters,
    Parameters,
};

pub use decode::{
    WordLayout,
    RawBlock,
    decode_word,
    encode_word,
    decode_block,
};

pub use store::{
    StoreCursor,
    StoreGeometry,
    CircularStore,
};

pub use trigger::Trigger;

pub use capture::{
    NormalState,
    AverageState,
    CaptureState,
    Frame,
    CaptureEngine,
};

pub use viewport::{
    Band,
    Clamp,
    Segment,
    Renderer,
    Viewport,
};

pub use measure::{
    Amplitude,
    Frequency,
    Voltage,
    ChannelMeasurement,
    Measurement,
    MeasurementEngine,
    period,
    MEASURE_AVG,
    TIME_AVG,
};

pub use handoff::{
    Slot,
    BlockProducer,
    BlockConsumer,
    handoff,
};

pub use context::{
    Sink,
    AcquisitionContext,
};
