//! Audio visualization: spectrum bars while narration plays, a flat
//! baseline otherwise.

pub mod analyser;
pub mod meter;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::config::VisualizerConfig;
use analyser::Analyser;

pub use meter::TerminalMeter;

const BAR_GAP: f32 = 2.0;
const BAR_WIDTH_FACTOR: f32 = 2.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    fn lerp(self, other: Rgb, t: f32) -> Rgb {
        let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
        Rgb(mix(self.0, other.0), mix(self.1, other.1), mix(self.2, other.2))
    }
}

/// Bottom-to-top bar gradient: blue-500, blue-400, blue-300.
pub const BAR_GRADIENT: [(f32, Rgb); 3] = [
    (0.0, Rgb(0x3b, 0x82, 0xf6)),
    (0.5, Rgb(0x60, 0xa5, 0xfa)),
    (1.0, Rgb(0x93, 0xc5, 0xfd)),
];

/// slate-200
pub const BASELINE_COLOR: Rgb = Rgb(0xe2, 0xe8, 0xf0);

/// Colour of the gradient at `t` (0 = bottom, 1 = top).
pub fn gradient_at(t: f32) -> Rgb {
    let t = t.clamp(0.0, 1.0);
    for pair in BAR_GRADIENT.windows(2) {
        let (lo, lo_color) = pair[0];
        let (hi, hi_color) = pair[1];
        if t <= hi {
            return lo_color.lerp(hi_color, (t - lo) / (hi - lo));
        }
    }
    BAR_GRADIENT[BAR_GRADIENT.len() - 1].1
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub x: f32,
    /// Top edge; bars grow up from the canvas bottom.
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub value: u8,
}

impl Bar {
    /// Tip colour, picked by intensity.
    pub fn peak_color(&self) -> Rgb {
        gradient_at(self.value as f32 / 255.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Baseline {
    pub y: f32,
    pub width: f32,
    pub color: Rgb,
    pub line_width: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Spectrum(Vec<Bar>),
    Idle(Baseline),
}

pub struct Visualizer {
    analyser: Arc<Mutex<Analyser>>,
    width: f32,
    height: f32,
}

impl Visualizer {
    pub fn new(analyser: Arc<Mutex<Analyser>>, config: &VisualizerConfig) -> Self {
        Self {
            analyser,
            width: config.width,
            height: config.height,
        }
    }

    /// Sample the analyser and lay out one frame.
    pub fn frame(&self, active: bool) -> Frame {
        if !active {
            return Frame::Idle(Baseline {
                y: self.height - 2.0,
                width: self.width,
                color: BASELINE_COLOR,
                line_width: 2.0,
            });
        }
        let data = match self.analyser.lock() {
            Ok(mut analyser) => analyser.byte_frequency_data(),
            Err(_) => Vec::new(),
        };
        Frame::Spectrum(layout_bars(&data, self.width, self.height))
    }
}

/// Bars for one spectrum, clipped to a `width` x `height` canvas.
pub fn layout_bars(data: &[u8], width: f32, height: f32) -> Vec<Bar> {
    if data.is_empty() {
        return Vec::new();
    }
    let bar_width = width / data.len() as f32 * BAR_WIDTH_FACTOR;

    let mut bars = Vec::new();
    let mut x = 0.0;
    for &value in data {
        if x >= width {
            break;
        }
        let bar_height = value as f32 / 255.0 * height;
        if bar_height > 0.0 {
            bars.push(Bar {
                x,
                y: height - bar_height,
                width: bar_width.min(width - x),
                height: bar_height,
                value,
            });
        }
        x += bar_width + BAR_GAP;
    }
    bars
}

/// Something that can show frames.
pub trait FrameSink: Send {
    fn draw(&mut self, frame: &Frame);
}

/// Render frames while `active` is true, one per `frame_interval`.
/// Going inactive draws a single idle frame and stops sampling until the
/// next activation. Returns when the sender is dropped.
pub async fn run_frames(
    visualizer: Visualizer,
    mut active: watch::Receiver<bool>,
    mut sink: impl FrameSink,
    frame_interval: Duration,
) {
    loop {
        if *active.borrow_and_update() {
            debug!("Visualizer active");
            let mut ticker = tokio::time::interval(frame_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => sink.draw(&visualizer.frame(true)),
                    changed = active.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        if !*active.borrow_and_update() {
                            break;
                        }
                    }
                }
            }
            debug!("Visualizer idle");
        }

        sink.draw(&visualizer.frame(false));
        if active.changed().await.is_err() {
            return;
        }
    }
}
