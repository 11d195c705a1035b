//! Maps frames onto the screen band as line segments, keeping the previously drawn trace so that
//! it can be erased exactly before the new one is drawn.

use crate::{Code, FRAME_LENGTH};
use crate::capture::Frame;
use crate::config::Channel;
use crate::params::ChannelParameters;

/// Drawable rows and columns of the waveform area. Rows grow downwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    pub y_min: i32,
    pub y_max: i32,
    pub first_column: usize,
}

impl Default for Band {
    fn default() -> Self {
        Band { y_min: 29, y_max: 210, first_column: 1 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clamp {
    InRange,
    BelowMin,
    AboveMax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl Band {
    pub fn classify(&self, y: f32) -> Clamp {
        if y < self.y_min as f32 {
            Clamp::BelowMin
        } else if y > self.y_max as f32 {
            Clamp::AboveMax
        } else {
            Clamp::InRange
        }
    }

    /// Segment from column `x - 1` at row `y0` to column `x` at row `y1`, with each endpoint
    /// pinned to the band edge it left through.
    pub fn segment(&self, x: usize, y0: f32, y1: f32) -> Segment {
        let (min, max) = (self.y_min, self.y_max);
        let (y0, y1) = match (self.classify(y0), self.classify(y1)) {
            (Clamp::InRange,  Clamp::InRange)  => (y0 as i32, y1 as i32),
            (Clamp::BelowMin, Clamp::InRange)  => (min, y1 as i32),
            (Clamp::BelowMin, Clamp::BelowMin) => (min, min),
            (Clamp::BelowMin, Clamp::AboveMax) => (min, max),
            (Clamp::AboveMax, Clamp::InRange)  => (max, y1 as i32),
            (Clamp::AboveMax, Clamp::BelowMin) => (max, min),
            (Clamp::AboveMax, Clamp::AboveMax) => (max, max),
            (Clamp::InRange,  Clamp::BelowMin) => (y0 as i32, min),
            (Clamp::InRange,  Clamp::AboveMax) => (y0 as i32, max),
        };
        Segment { x0: x as i32 - 1, y0, x1: x as i32, y1 }
    }
}

/// Display collaborator. Segments are always within the band.
pub trait Renderer {
    fn erase(&mut self, channel: Channel, segment: Segment);

    fn draw(&mut self, channel: Channel, segment: Segment);
}

#[derive(Debug)]
pub struct Viewport {
    band: Band,
    traces: [Option<Box<[i32]>>; 2],
}

impl Viewport {
    pub fn new(band: Band) -> Viewport {
        Viewport { band, traces: [None, None] }
    }

    pub fn band(&self) -> Band {
        self.band
    }

    /// Rows drawn for `channel` by the last render, if it is on screen.
    pub fn trace(&self, channel: Channel) -> Option<&[i32]> {
        self.traces[channel.index()].as_deref()
    }

    fn first_column(&self) -> usize {
        self.band.first_column.max(1)
    }

    pub fn render<R: Renderer>(&mut self, frame: &Frame, renderer: &mut R) {
        for channel in Channel::ALL {
            match frame.channel(channel) {
                Some(codes) => self.render_channel(channel, codes, frame.params().channel(channel),
                    renderer),
                None => self.clear(channel, renderer),
            }
        }
    }

    fn render_channel<R: Renderer>(&mut self, channel: Channel, codes: &[Code],
                                   params: &ChannelParameters, renderer: &mut R) {
        let first_column = self.first_column();
        let mut trace = vec![0; FRAME_LENGTH].into_boxed_slice();
        let previous = self.traces[channel.index()].take();
        for x in first_column..FRAME_LENGTH {
            if let Some(previous) = &previous {
                renderer.erase(channel, Segment {
                    x0: x as i32 - 1, y0: previous[x - 1], x1: x as i32, y1: previous[x]
                });
            }
            let segment = self.band.segment(x,
                params.code_to_row(codes[x - 1]), params.code_to_row(codes[x]));
            renderer.draw(channel, segment);
            trace[x - 1] = segment.y0;
            trace[x] = segment.y1;
        }
        self.traces[channel.index()] = Some(trace);
    }

    /// Erase the trace of `channel`, if any, and forget it.
    pub fn clear<R: Renderer>(&mut self, channel: Channel, renderer: &mut R) {
        let Some(previous) = self.traces[channel.index()].take() else { return };
        log::debug!("viewport: clearing {:?}", channel);
        for x in self.first_column()..FRAME_LENGTH {
            renderer.erase(channel, Segment {
                x0: x as i32 - 1, y0: previous[x - 1], x1: x as i32, y1: previous[x]
            });
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Viewport::new(Band::default())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::params::Parameters;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Op {
        Erase(Channel, Segment),
        Draw(Channel, Segment),
    }

    #[derive(Default)]
    struct Recorder(Vec<Op>);

    impl Renderer for Recorder {
        fn erase(&mut self, channel: Channel, segment: Segment) {
            self.0.push(Op::Erase(channel, segment))
        }

        fn draw(&mut self, channel: Channel, segment: Segment) {
            self.0.push(Op::Draw(channel, segment))
        }
    }

    macro_rules! assert_segment {
        ($y0:expr, $y1:expr => $e0:expr, $e1:expr) => {
            assert_eq!(Band::default().segment(5, $y0, $y1),
                Segment { x0: 4, y0: $e0, x1: 5, y1: $e1 });
        };
    }

    #[test]
    fn test_classify() {
        let band = Band::default();
        assert_eq!(band.classify(29.0), Clamp::InRange);
        assert_eq!(band.classify(210.0), Clamp::InRange);
        assert_eq!(band.classify(28.9), Clamp::BelowMin);
        assert_eq!(band.classify(210.5), Clamp::AboveMax);
    }

    #[test]
    fn test_nine_clamp_cases() {
        assert_segment!(100.7, 120.2 => 100, 120);
        assert_segment!( 10.0, 120.0 =>  29, 120);
        assert_segment!( 10.0,  -5.0 =>  29,  29);
        assert_segment!( 10.0, 300.0 =>  29, 210);
        assert_segment!(300.0, 120.0 => 210, 120);
        assert_segment!(300.0,  10.0 => 210,  29);
        assert_segment!(300.0, 999.0 => 210, 210);
        assert_segment!(100.0,  10.0 => 100,  29);
        assert_segment!(100.0, 300.0 => 100, 210);
    }

    fn frame(ch1: Code, ch2: Option<Code>) -> Frame {
        Frame::new(Parameters::default(),
            [Some(vec![ch1; FRAME_LENGTH]), ch2.map(|code| vec![code; FRAME_LENGTH])])
    }

    #[test]
    fn test_rows_from_codes() {
        let mut viewport = Viewport::default();
        let mut recorder = Recorder::default();
        // midscale lands on the ground row, full scale and zero are clamped
        viewport.render(&frame(2048, Some(0)), &mut recorder);
        let ch1 = viewport.trace(Channel::Ch1).unwrap();
        assert!(ch1[1..].iter().all(|&y| (y - 80).abs() <= 1), "{:?}", &ch1[..4]);
        let ch2 = viewport.trace(Channel::Ch2).unwrap();
        assert!(ch2.iter().all(|&y| y == 210));
        viewport.render(&frame(4095, Some(0)), &mut recorder);
        assert!(viewport.trace(Channel::Ch1).unwrap().iter().all(|&y| y == 29));
    }

    #[test]
    fn test_erase_then_draw() {
        let mut viewport = Viewport::default();
        let mut first = Recorder::default();
        viewport.render(&frame(4095, Some(0)), &mut first);
        assert_eq!(first.0.len(), 2 * (FRAME_LENGTH - 1));
        assert!(first.0.iter().all(|op| matches!(op, Op::Draw(..))));

        let mut second = Recorder::default();
        viewport.render(&frame(0, Some(4095)), &mut second);
        assert_eq!(second.0.len(), 4 * (FRAME_LENGTH - 1));
        // per column, the old segment goes before the new one is drawn
        assert_eq!(second.0[0],
            Op::Erase(Channel::Ch1, Segment { x0: 0, y0: 29, x1: 1, y1: 29 }));
        assert_eq!(second.0[1],
            Op::Draw(Channel::Ch1, Segment { x0: 0, y0: 210, x1: 1, y1: 210 }));
        let erased: Vec<Segment> = second.0.iter().filter_map(|op| match op {
            Op::Erase(Channel::Ch2, segment) => Some(*segment),
            _ => None,
        }).collect();
        let drawn: Vec<Segment> = first.0.iter().filter_map(|op| match op {
            Op::Draw(Channel::Ch2, segment) => Some(*segment),
            _ => None,
        }).collect();
        assert_eq!(erased, drawn);
    }

    #[test]
    fn test_disabled_channel_erased_once() {
        let mut viewport = Viewport::default();
        let mut recorder = Recorder::default();
        viewport.render(&frame(2048, Some(2048)), &mut recorder);

        let mut recorder = Recorder::default();
        viewport.render(&frame(2048, None), &mut recorder);
        let ch2_ops = recorder.0.iter().filter(|op| matches!(op,
            Op::Erase(Channel::Ch2, _) | Op::Draw(Channel::Ch2, _))).count();
        assert_eq!(ch2_ops, FRAME_LENGTH - 1);
        assert_eq!(viewport.trace(Channel::Ch2), None);

        let mut recorder = Recorder::default();
        viewport.render(&frame(2048, None), &mut recorder);
        assert!(recorder.0.iter().all(|op| !matches!(op,
            Op::Erase(Channel::Ch2, _) | Op::Draw(Channel::Ch2, _))));
    }

    #[test]
    fn test_first_column() {
        let mut viewport = Viewport::new(Band { first_column: 7, ..Band::default() });
        let mut recorder = Recorder::default();
        viewport.render(&frame(2048, None), &mut recorder);
        assert_eq!(recorder.0.len(), FRAME_LENGTH - 7);
        assert!(matches!(recorder.0[0], Op::Draw(Channel::Ch1, Segment { x0: 6, x1: 7, .. })));
    }
}
