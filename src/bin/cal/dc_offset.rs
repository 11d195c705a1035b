use std::io;

use twinscope::{AcquisitionContext, Channel, Code, Configuration, Frame, Measurement, Sink};
use twinscope::{RawBlock, StoreGeometry, VERTICAL_SCALES, WordLayout};

const BLOCK_COUNT: usize = 40;

/// Codes the front end of each channel reads with its input grounded.
const GROUNDED_CODES: [Code; 2] = [2113, 1990];

struct LastFrame(Option<Frame>);

impl Sink for LastFrame {
    fn frame_published(&mut self, frame: &Frame) {
        self.0 = Some(frame.clone());
    }

    fn measurement_updated(&mut self, _measurement: &Measurement) {}
}

fn calibrate_offset(vertical_scale: usize) -> twinscope::Result<[f32; 2]> {
    let mut config = Configuration::default();
    for channel in config.channels.iter_mut() {
        channel.vertical_scale = vertical_scale;
    }
    let geometry = StoreGeometry::default();
    let mut context = AcquisitionContext::new(geometry, WordLayout::Packed, config)?;

    let block = RawBlock::from_codes(
        std::iter::repeat(GROUNDED_CODES).take(geometry.block_len), WordLayout::Packed);
    let mut sink = LastFrame(None);
    for _ in 0..BLOCK_COUNT {
        context.process_block(&block, &mut sink)?;
    }
    let Some(frame) = &sink.0 else {
        return Err(io::Error::other(
            format!("no frame captured at {}", VERTICAL_SCALES[vertical_scale])).into())
    };
    println!("measurement:");
    for channel in Channel::ALL {
        println!("  {:?} mean code: {:.1}", channel, frame.mean(channel).unwrap_or(f32::NAN));
    }

    if !context.calibrate_offset()? {
        return Err(io::Error::other(
            format!("failed to calibrate offset at {}", VERTICAL_SCALES[vertical_scale])).into())
    }
    // let the calibrated configuration take effect
    while context.configuration() != context.active_configuration() {
        context.process_block(&block, &mut sink)?;
    }
    Ok(Channel::ALL.map(|channel| context.params().channel(channel).midlevel))
}

fn main() -> twinscope::Result<()> {
    env_logger::init();

    let mut calibration_table = Vec::new();
    for vertical_scale in 0..VERTICAL_SCALES.len() {
        println!("==> calibrate_offset {}", VERTICAL_SCALES[vertical_scale]);
        calibration_table.push((vertical_scale, calibrate_offset(vertical_scale)?));
    }

    println!("calibrated midlevels:");
    for (vertical_scale, midlevels) in calibration_table {
        println!("  {:>10}: {:8.3} {:8.3}", VERTICAL_SCALES[vertical_scale].to_string(),
            midlevels[0], midlevels[1]);
    }
    Ok(())
}
