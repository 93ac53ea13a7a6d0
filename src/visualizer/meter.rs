//! Bar meter drawn with block characters on a terminal line.

use std::io::Write;

use super::{Bar, Frame, FrameSink, BASELINE_COLOR};

const LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Squeezes a `canvas_width` x `canvas_height` frame into `columns`
/// characters. Each bar lands in the column under its `x`, so a bin keeps
/// its place on the frequency axis even when its neighbours are silent.
pub struct TerminalMeter<W: Write + Send> {
    out: W,
    columns: usize,
    canvas_width: f32,
    canvas_height: f32,
}

impl TerminalMeter<std::io::Stderr> {
    pub fn stderr(columns: usize, canvas_width: f32, canvas_height: f32) -> Self {
        Self::new(std::io::stderr(), columns, canvas_width, canvas_height)
    }
}

impl<W: Write + Send> TerminalMeter<W> {
    pub fn new(out: W, columns: usize, canvas_width: f32, canvas_height: f32) -> Self {
        Self {
            out,
            columns: columns.max(1),
            canvas_width: canvas_width.max(1.0),
            canvas_height,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// One line of text for `frame`, without colour codes.
    pub fn render_plain(&self, frame: &Frame) -> String {
        match frame {
            Frame::Idle(_) => "─".repeat(self.columns),
            Frame::Spectrum(bars) => self
                .place(bars)
                .into_iter()
                .map(|slot| slot.map_or(' ', |bar| self.level(bar)))
                .collect(),
        }
    }

    /// One slot per column holding the tallest bar starting there.
    fn place<'a>(&self, bars: &'a [Bar]) -> Vec<Option<&'a Bar>> {
        let mut slots: Vec<Option<&Bar>> = vec![None; self.columns];
        for bar in bars {
            let col = (bar.x / self.canvas_width * self.columns as f32) as usize;
            let Some(slot) = slots.get_mut(col) else {
                continue;
            };
            if slot.is_none_or(|held| held.height < bar.height) {
                *slot = Some(bar);
            }
        }
        slots
    }

    fn level(&self, bar: &Bar) -> char {
        level_char(bar.height / self.canvas_height)
    }
}

fn level_char(fraction: f32) -> char {
    let idx = (fraction.clamp(0.0, 1.0) * (LEVELS.len() - 1) as f32).round() as usize;
    LEVELS[idx]
}

impl<W: Write + Send> FrameSink for TerminalMeter<W> {
    fn draw(&mut self, frame: &Frame) {
        let mut line = String::from("\r");
        match frame {
            Frame::Idle(_) => {
                let c = BASELINE_COLOR;
                line.push_str(&format!("\x1b[38;2;{};{};{}m", c.0, c.1, c.2));
                line.push_str(&self.render_plain(frame));
            }
            Frame::Spectrum(bars) => {
                for slot in self.place(bars) {
                    match slot {
                        Some(bar) => {
                            let c = bar.peak_color();
                            line.push_str(&format!("\x1b[38;2;{};{};{}m{}", c.0, c.1, c.2, self.level(bar)));
                        }
                        None => line.push(' '),
                    }
                }
            }
        }
        line.push_str("\x1b[0m");
        // A closed terminal is not worth failing playback over.
        let _ = self.out.write_all(line.as_bytes());
        let _ = self.out.flush();
    }
}
