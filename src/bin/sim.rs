use std::f32::consts::PI;
use std::io::Read;
use std::thread;
use std::time::Duration;

use twinscope::{Code, Error, Result, encode_word, handoff};
use twinscope::{AcquisitionContext, AcquisitionMode, Channel, Configuration, Edge};
use twinscope::{Frame, Measurement, Renderer, Segment, Sink, Viewport};
use twinscope::{RawBlock, Slot, StoreGeometry, WordLayout};

const LAYOUT: WordLayout = WordLayout::Epi;
const BLOCK_COUNT: usize = 400;
const BLOCK_PERIOD: Duration = Duration::from_micros(500);

/// Codes per period of each channel's test signal.
const PERIODS: [f32; 2] = [40.0, 130.0];

/// Sine on channel 1, square on channel 2, as raw bus words.
struct SignalGenerator {
    phase: [f32; 2],
    step: [f32; 2],
}

impl SignalGenerator {
    fn new(periods: [f32; 2]) -> SignalGenerator {
        SignalGenerator {
            phase: [0.0; 2],
            step: periods.map(|period| 2.0 * PI / period),
        }
    }

    fn next_codes(&mut self) -> [Code; 2] {
        let ch1 = (2048.0 + 1500.0 * self.phase[0].sin()) as Code;
        let ch2 = if self.phase[1] < PI { 2848 } else { 1248 };
        for (phase, step) in self.phase.iter_mut().zip(self.step) {
            *phase = (*phase + step) % (2.0 * PI);
        }
        [ch1, ch2]
    }
}

impl Read for SignalGenerator {
    fn read(&mut self, data: &mut [u8]) -> std::io::Result<usize> {
        let mut length = 0;
        for word in data.chunks_exact_mut(4) {
            word.copy_from_slice(&encode_word(self.next_codes(), LAYOUT).to_le_bytes());
            length += 4;
        }
        Ok(length)
    }
}

#[derive(Debug, Default)]
struct Canvas {
    drawn: usize,
    erased: usize,
}

impl Renderer for Canvas {
    fn erase(&mut self, _channel: Channel, _segment: Segment) {
        self.erased += 1;
    }

    fn draw(&mut self, _channel: Channel, _segment: Segment) {
        self.drawn += 1;
    }
}

#[derive(Debug, Default)]
struct Console {
    viewport: Viewport,
    canvas: Canvas,
    frames: usize,
}

impl Sink for Console {
    fn frame_published(&mut self, frame: &Frame) {
        self.frames += 1;
        self.viewport.render(frame, &mut self.canvas);
        log::debug!("sim: frame #{} ({} captures{})", self.frames, frame.captures(),
            if frame.is_free_running() { ", free running" } else { "" });
    }

    fn measurement_updated(&mut self, measurement: &Measurement) {
        for channel in Channel::ALL {
            let Some(measurement) = measurement.channel(channel) else { continue };
            if let Some(frequency) = measurement.frequency {
                println!("{:?}: {} peak to peak, {}", channel,
                    measurement.amplitude.voltage, frequency);
            }
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let mut config = Configuration::default();
    config.trigger.position = 40;
    let geometry = StoreGeometry::default();
    let mut context = AcquisitionContext::new(geometry, LAYOUT, config)?;
    let (producer, consumer) = handoff();

    let producer = thread::spawn(move || -> Result<()> {
        let mut generator = SignalGenerator::new(PERIODS);
        let mut slot = Slot::Ping;
        for _ in 0..BLOCK_COUNT {
            let block = RawBlock::read_from(&mut generator, geometry.block_len)?;
            thread::sleep(BLOCK_PERIOD);
            match producer.on_block_ready(slot, block) {
                Ok(()) | Err(Error::Overrun(_)) => (),
                Err(error) => return Err(error),
            }
            slot = slot.next();
        }
        log::debug!("sim: producer done");
        Ok(())
    });

    let mut console = Console::default();
    let mut switched = false;
    loop {
        match context.poll(&consumer, &mut console) {
            Ok(0) => thread::sleep(BLOCK_PERIOD / 4),
            Ok(_) => (),
            Err(Error::Disconnected) => break,
            Err(error) => return Err(error),
        }
        if !switched && console.frames >= 50 {
            context.set_trigger(2048, 40, Edge::Falling, Channel::Ch1)?;
            context.set_acquisition_mode(AcquisitionMode::Average)?;
            switched = true;
        }
    }
    match producer.join() {
        Ok(result) => result?,
        Err(panic) => std::panic::resume_unwind(panic),
    }

    println!("{} frames, {} segments drawn, {} erased, {} blocks overrun",
        console.frames, console.canvas.drawn, console.canvas.erased, consumer.overruns());
    Ok(())
}
