//! Frequency analyser shared by every audio output.
//!
//! Mirrors the Web Audio `AnalyserNode`: the most recent `fft_size`
//! samples are Blackman-windowed, transformed, smoothed over time and
//! mapped from a dB range onto bytes.

use std::collections::{HashSet, VecDeque};
use std::f32::consts::PI;
use std::sync::{Arc, Mutex};

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use tracing::debug;

use crate::config::VisualizerConfig;

/// Identity of one audio output (one player).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputId(pub u32);

pub struct Analyser {
    fft_size: usize,
    smoothing: f32,
    min_db: f32,
    max_db: f32,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    samples: VecDeque<f32>,
    smoothed: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

impl Analyser {
    pub fn new(config: &VisualizerConfig) -> Self {
        let fft_size = config.fft_size.max(32).next_power_of_two();
        let fft = FftPlanner::new().plan_fft_forward(fft_size);
        Self {
            fft_size,
            smoothing: config.smoothing.clamp(0.0, 1.0),
            min_db: config.min_db,
            max_db: config.max_db,
            window: blackman_window(fft_size),
            fft,
            samples: VecDeque::from(vec![0.0; fft_size]),
            smoothed: vec![0.0; fft_size / 2],
            scratch: vec![Complex::default(); fft_size],
        }
    }

    /// Number of frequency bins (half the FFT size).
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Append mono samples, keeping only the last `fft_size`.
    pub fn push(&mut self, samples: &[f32]) {
        for &s in samples {
            if self.samples.len() == self.fft_size {
                self.samples.pop_front();
            }
            self.samples.push_back(s);
        }
    }

    /// Current spectrum as bytes, one per bin. Each call advances the
    /// smoothing by one step, so call it once per frame.
    pub fn byte_frequency_data(&mut self) -> Vec<u8> {
        for (i, (slot, &s)) in self.scratch.iter_mut().zip(self.samples.iter()).enumerate() {
            *slot = Complex::new(s * self.window[i], 0.0);
        }
        self.fft.process(&mut self.scratch);

        let n = self.fft_size as f32;
        let range = self.max_db - self.min_db;
        let tau = self.smoothing;
        self.smoothed
            .iter_mut()
            .zip(self.scratch.iter())
            .map(|(prev, bin)| {
                let magnitude = bin.norm() / n;
                *prev = tau * *prev + (1.0 - tau) * magnitude;
                let db = if *prev > 0.0 { 20.0 * prev.log10() } else { f32::NEG_INFINITY };
                let scaled = 255.0 / range * (db - self.min_db);
                scaled.floor().clamp(0.0, 255.0) as u8
            })
            .collect()
    }
}

fn blackman_window(n: usize) -> Vec<f32> {
    let (a0, a1, a2) = (0.42, 0.5, 0.08);
    (0..n)
        .map(|i| {
            let x = i as f32 / n as f32;
            a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
        })
        .collect()
}

/// Write handle into the shared analyser, held by one output.
#[derive(Clone)]
pub struct SampleTap {
    analyser: Arc<Mutex<Analyser>>,
}

impl SampleTap {
    /// Feed interleaved samples; channels are averaged to mono.
    pub fn feed(&self, interleaved: &[f32], channels: u16) {
        let channels = channels.max(1) as usize;
        let mono: Vec<f32> = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();
        if let Ok(mut analyser) = self.analyser.lock() {
            analyser.push(&mono);
        }
    }
}

/// An audio output the analyser can listen to.
pub trait Tappable {
    fn output_id(&self) -> OutputId;
    fn connect_tap(&self, tap: SampleTap);
}

/// The single analysis graph: one analyser, any number of attached outputs.
#[derive(Clone)]
pub struct AudioGraph {
    analyser: Arc<Mutex<Analyser>>,
    attached: Arc<Mutex<HashSet<OutputId>>>,
}

impl AudioGraph {
    pub fn new(config: &VisualizerConfig) -> Self {
        Self {
            analyser: Arc::new(Mutex::new(Analyser::new(config))),
            attached: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Connect `output` to the analyser. Attaching an output that is
    /// already connected does nothing and returns false.
    pub fn attach(&self, output: &dyn Tappable) -> bool {
        let id = output.output_id();
        let newly = match self.attached.lock() {
            Ok(mut attached) => attached.insert(id),
            Err(_) => false,
        };
        if !newly {
            debug!("Output {id:?} already attached to analyser");
            return false;
        }
        output.connect_tap(SampleTap {
            analyser: self.analyser.clone(),
        });
        debug!("Attached output {id:?} to analyser");
        true
    }

    pub fn analyser(&self) -> Arc<Mutex<Analyser>> {
        self.analyser.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingOutput {
        id: OutputId,
        taps: AtomicUsize,
    }

    impl Tappable for CountingOutput {
        fn output_id(&self) -> OutputId {
            self.id
        }

        fn connect_tap(&self, _tap: SampleTap) {
            self.taps.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn quiet_sine(freq_bin: usize, fft_size: usize) -> Vec<f32> {
        (0..fft_size)
            .map(|i| 0.05 * (2.0 * PI * freq_bin as f32 * i as f32 / fft_size as f32).sin())
            .collect()
    }

    #[test]
    fn second_attach_is_ignored() {
        let graph = AudioGraph::new(&VisualizerConfig::default());
        let output = CountingOutput {
            id: OutputId(1),
            taps: AtomicUsize::new(0),
        };

        assert!(graph.attach(&output));
        assert!(!graph.attach(&output));
        assert_eq!(output.taps.load(Ordering::SeqCst), 1);

        let other = CountingOutput {
            id: OutputId(2),
            taps: AtomicUsize::new(0),
        };
        assert!(graph.attach(&other));
    }

    #[test]
    fn silence_reads_as_zero() {
        let mut analyser = Analyser::new(&VisualizerConfig::default());
        assert_eq!(analyser.bin_count(), 128);
        assert!(analyser.byte_frequency_data().iter().all(|&b| b == 0));
    }

    #[test]
    fn tone_peaks_at_its_bin() {
        let config = VisualizerConfig {
            smoothing: 0.0,
            ..VisualizerConfig::default()
        };
        let mut analyser = Analyser::new(&config);
        analyser.push(&quiet_sine(16, 256));

        let data = analyser.byte_frequency_data();
        assert!(data[16] > 200);
        assert!(data.iter().enumerate().all(|(i, &v)| i == 16 || v < data[16]));
        assert!(data[60] < 50);
    }

    #[test]
    fn smoothing_decays_after_sound_stops() {
        let mut analyser = Analyser::new(&VisualizerConfig::default());
        analyser.push(&quiet_sine(16, 256));
        let loud = analyser.byte_frequency_data()[16];

        analyser.push(&[0.0; 256]);
        let first = analyser.byte_frequency_data()[16];
        let second = analyser.byte_frequency_data()[16];
        assert!(loud > first);
        assert!(first > second);
    }

    #[test]
    fn tap_downmixes_stereo() {
        let graph = AudioGraph::new(&VisualizerConfig::default());
        let tap = SampleTap {
            analyser: graph.analyser(),
        };
        tap.feed(&[1.0, 0.0, 0.5, 0.5], 2);
        let analyser = graph.analyser();
        let analyser = analyser.lock().unwrap();
        let tail: Vec<f32> = analyser.samples.iter().rev().take(2).copied().collect();
        assert_eq!(tail, vec![0.5, 0.5]);
    }
}
