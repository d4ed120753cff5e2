//! Band-Limited Step Synthesis
//!
//! A minimum-phase band-limited step (MinBLEP) generator. Instead of emitting an
//! ideal step, a caller adds the ideal step to its naive waveform and registers
//! the step here; the generator then supplies the correction that turns the
//! naive step into a band-limited one over the following samples.
//!
//! The kernel is a Blackman-Harris windowed sinc with [`ZERO_CROSSINGS`] zero
//! crossings per side, oversampled [`OVERSAMPLING`] times, converted to minimum
//! phase through the real cepstrum and integrated into a step response. It is
//! computed once per process and shared by every generator.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use std::f64::consts::PI;
use std::sync::OnceLock;

/// Zero crossings of the windowed sinc on each side
pub const ZERO_CROSSINGS: usize = 16;

/// Kernel points per output sample
pub const OVERSAMPLING: usize = 32;

/// Number of output samples a single discontinuity affects
pub const BUFFER_LEN: usize = 2 * ZERO_CROSSINGS;

/// Number of points in the step-response table
pub const KERNEL_LEN: usize = 2 * ZERO_CROSSINGS * OVERSAMPLING + 1;

static KERNEL: OnceLock<Vec<f64>> = OnceLock::new();

/// The shared minimum-phase step response, rising from ~0 to exactly 1
pub fn kernel() -> &'static [f64] {
    KERNEL.get_or_init(|| min_blep_kernel(ZERO_CROSSINGS, OVERSAMPLING))
}

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        let px = PI * x;
        px.sin() / px
    }
}

fn blackman_harris(p: f64) -> f64 {
    const A0: f64 = 0.35875;
    const A1: f64 = 0.48829;
    const A2: f64 = 0.14128;
    const A3: f64 = 0.01168;
    let w = 2.0 * PI * p;
    A0 - A1 * w.cos() + A2 * (2.0 * w).cos() - A3 * (3.0 * w).cos()
}

fn min_blep_kernel(zero_crossings: usize, oversampling: usize) -> Vec<f64> {
    let n = 2 * zero_crossings * oversampling;
    let z = zero_crossings as f64;
    let last = (n - 1) as f64;

    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);
    let scale = 1.0 / n as f64;

    let mut x: Vec<Complex<f64>> = (0..n)
        .map(|i| {
            let t = -z + 2.0 * z * (i as f64) / last;
            Complex::new(sinc(t) * blackman_harris(i as f64 / last), 0.0)
        })
        .collect();

    // Real cepstrum
    forward.process(&mut x);
    for v in x.iter_mut() {
        *v = Complex::new(v.norm().max(1e-100).ln(), 0.0);
    }
    inverse.process(&mut x);
    for v in x.iter_mut() {
        *v *= scale;
    }

    // Fold the cepstrum onto positive quefrencies
    for v in x.iter_mut().take(n / 2).skip(1) {
        *v *= 2.0;
    }
    for v in x.iter_mut().skip(n / 2 + 1) {
        *v = Complex::new(0.0, 0.0);
    }

    // Back to a minimum-phase impulse
    forward.process(&mut x);
    for v in x.iter_mut() {
        *v = v.exp();
    }
    inverse.process(&mut x);

    // Integrate into a step and normalize its final value to 1
    let mut total = 0.0;
    let mut step: Vec<f64> = x
        .iter()
        .map(|v| {
            total += v.re * scale;
            total
        })
        .collect();
    let norm = step[n - 1];
    if norm.abs() > f64::EPSILON {
        for v in step.iter_mut() {
            *v /= norm;
        }
    }
    step.push(1.0);
    step
}

/// Accumulates band-limited corrections for discontinuities
///
/// Overlapping discontinuities superpose linearly. State is a fixed ring
/// buffer, so neither insertion nor processing allocates.
#[derive(Debug, Clone)]
pub struct MinBlepGenerator {
    buf: [f64; BUFFER_LEN],
    pos: usize,
    kernel: &'static [f64],
}

impl MinBlepGenerator {
    pub fn new() -> Self {
        Self {
            buf: [0.0; BUFFER_LEN],
            pos: 0,
            kernel: kernel(),
        }
    }

    /// Registers a step of `magnitude` at fractional offset `p` in (-1, 0]
    /// relative to the current sample. Offsets outside that interval are ignored.
    pub fn insert_discontinuity(&mut self, p: f64, magnitude: f64) {
        if !(p > -1.0 && p <= 0.0) {
            return;
        }
        for j in 0..BUFFER_LEN {
            let position = (j as f64 - p) * OVERSAMPLING as f64;
            let index = position as usize;
            let frac = position - index as f64;
            let value = if index + 1 < self.kernel.len() {
                self.kernel[index] + frac * (self.kernel[index + 1] - self.kernel[index])
            } else {
                1.0
            };
            self.buf[(self.pos + j) % BUFFER_LEN] += magnitude * (value - 1.0);
        }
    }

    /// Returns the correction for the current sample and advances by one sample
    #[inline]
    pub fn process(&mut self) -> f64 {
        let v = self.buf[self.pos];
        self.buf[self.pos] = 0.0;
        self.pos = (self.pos + 1) % BUFFER_LEN;
        v
    }

    pub fn reset(&mut self) {
        self.buf = [0.0; BUFFER_LEN];
        self.pos = 0;
    }
}

impl Default for MinBlepGenerator {
    fn default() -> Self {
        Self::new()
    }
}
