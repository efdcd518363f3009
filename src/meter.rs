use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub const FFT_SIZE: usize = 256;
pub const SMOOTHING: f32 = 0.5;
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Most recent PCM samples of one audio track.
///
/// The bridge pushes decoded frames; meters read the tail. Cloning shares the
/// same buffer.
#[derive(Clone, Default)]
pub struct SampleTap {
    inner: Arc<Mutex<TapState>>,
}

#[derive(Default)]
struct TapState {
    samples: VecDeque<f32>,
    closed: bool,
}

impl SampleTap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, samples: &[f32]) {
        let Ok(mut state) = self.inner.lock() else {
            return;
        };
        if state.closed {
            return;
        }
        state.samples.extend(samples.iter().copied());
        let excess = state.samples.len().saturating_sub(FFT_SIZE);
        state.samples.drain(..excess);
    }

    /// Copy the newest samples into `out`, zero-padding at the front.
    /// Returns false once the track has ended.
    fn read_tail(&self, out: &mut [f32]) -> bool {
        let Ok(state) = self.inner.lock() else {
            return false;
        };
        if state.closed {
            return false;
        }
        out.fill(0.0);
        let n = state.samples.len().min(out.len());
        let offset = out.len() - n;
        for (dst, src) in out[offset..].iter_mut().zip(state.samples.iter().skip(state.samples.len() - n)) {
            *dst = *src;
        }
        true
    }

    pub fn close(&self) {
        if let Ok(mut state) = self.inner.lock() {
            state.closed = true;
            state.samples.clear();
        }
    }

    pub fn same_track(&self, other: &SampleTap) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

struct Analyser {
    tap: SampleTap,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    time: Vec<f32>,
    buf: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
}

impl Analyser {
    fn new(tap: SampleTap) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);
        Self {
            tap,
            fft,
            window: blackman(FFT_SIZE),
            time: vec![0.0; FFT_SIZE],
            buf: vec![Complex::new(0.0, 0.0); FFT_SIZE],
            smoothed: vec![0.0; FFT_SIZE / 2],
        }
    }

    fn sample(&mut self) -> f32 {
        if !self.tap.read_tail(&mut self.time) {
            return 0.0;
        }
        for ((dst, s), w) in self.buf.iter_mut().zip(&self.time).zip(&self.window) {
            *dst = Complex::new(s * w, 0.0);
        }
        self.fft.process(&mut self.buf);

        let scale = 1.0 / FFT_SIZE as f32;
        let mut total = 0u32;
        for (k, smoothed) in self.smoothed.iter_mut().enumerate() {
            let magnitude = self.buf[k].norm() * scale;
            *smoothed = SMOOTHING * *smoothed + (1.0 - SMOOTHING) * magnitude;
            total += byte_level(*smoothed) as u32;
        }
        total as f32 / self.smoothed.len() as f32 / 255.0
    }
}

fn blackman(n: usize) -> Vec<f32> {
    let (a0, a1, a2) = (0.42f32, 0.5f32, 0.08f32);
    (0..n)
        .map(|i| {
            let x = i as f32 / n as f32;
            a0 - a1 * (2.0 * std::f32::consts::PI * x).cos() + a2 * (4.0 * std::f32::consts::PI * x).cos()
        })
        .collect()
}

/// Map a linear magnitude onto the 0..=255 range spanning
/// [MIN_DECIBELS, MAX_DECIBELS].
fn byte_level(magnitude: f32) -> u8 {
    if magnitude <= 0.0 {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = 255.0 / (MAX_DECIBELS - MIN_DECIBELS) * (db - MIN_DECIBELS);
    scaled.clamp(0.0, 255.0) as u8
}

/// Normalized loudness of one track, sampled once per rendered frame.
#[derive(Default)]
pub struct VolumeMeter {
    analyser: Option<Analyser>,
}

impl VolumeMeter {
    pub fn new(track: Option<SampleTap>) -> Self {
        Self {
            analyser: track.map(Analyser::new),
        }
    }

    /// Swap the analysed track. The previous analyser and its buffers are
    /// dropped; the same track keeps its smoothing history.
    pub fn set_track(&mut self, track: Option<SampleTap>) {
        let same = match (&self.analyser, &track) {
            (Some(a), Some(t)) => a.tap.same_track(t),
            (None, None) => true,
            _ => false,
        };
        if !same {
            self.analyser = track.map(Analyser::new);
        }
    }

    /// Loudness in [0, 1]; 0 without a track.
    pub fn sample(&mut self) -> f32 {
        match self.analyser.as_mut() {
            Some(a) => a.sample().clamp(0.0, 1.0),
            None => 0.0,
        }
    }

    pub fn has_track(&self) -> bool {
        self.analyser.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * 8.0 * i as f32 / FFT_SIZE as f32).sin())
            .collect()
    }

    #[test]
    fn no_track_reads_zero() {
        let mut meter = VolumeMeter::new(None);
        assert_eq!(meter.sample(), 0.0);
    }

    #[test]
    fn silence_reads_zero() {
        let tap = SampleTap::new();
        tap.push(&vec![0.0; FFT_SIZE]);
        let mut meter = VolumeMeter::new(Some(tap));
        assert_eq!(meter.sample(), 0.0);
    }

    #[test]
    fn louder_signal_reads_higher() {
        let quiet = SampleTap::new();
        quiet.push(&tone(0.01, FFT_SIZE));
        let loud = SampleTap::new();
        loud.push(&tone(0.9, FFT_SIZE));

        let mut q = VolumeMeter::new(Some(quiet));
        let mut l = VolumeMeter::new(Some(loud));
        for _ in 0..5 {
            q.sample();
            l.sample();
        }
        let (qv, lv) = (q.sample(), l.sample());
        assert!(lv > qv, "loud {} should exceed quiet {}", lv, qv);
        assert!((0.0..=1.0).contains(&lv));
    }

    #[test]
    fn smoothing_ramps_up() {
        let tap = SampleTap::new();
        tap.push(&tone(0.5, FFT_SIZE));
        let mut meter = VolumeMeter::new(Some(tap));
        let first = meter.sample();
        let second = meter.sample();
        assert!(second >= first);
    }

    #[test]
    fn closed_track_and_track_swap() {
        let tap = SampleTap::new();
        tap.push(&tone(0.5, FFT_SIZE));
        let mut meter = VolumeMeter::new(Some(tap.clone()));
        assert!(meter.sample() > 0.0);

        tap.close();
        assert_eq!(meter.sample(), 0.0);

        meter.set_track(None);
        assert!(!meter.has_track());
    }

    #[test]
    fn tap_keeps_only_latest_window() {
        let tap = SampleTap::new();
        tap.push(&vec![1.0; FFT_SIZE * 3]);
        tap.push(&[0.5]);
        let mut out = vec![0.0; FFT_SIZE];
        assert!(tap.read_tail(&mut out));
        assert_eq!(out[FFT_SIZE - 1], 0.5);
        assert_eq!(out[0], 1.0);
    }
}
