//! Filtered-noise synthesizer.
//!
//! Per frame: the band magnitudes are turned into a linear-phase FIR by
//! frequency sampling (inverse FFT of a real spectrum, zero-phase Hann
//! windowing, rotation to causal form), then convolved with fresh white noise
//! in the frequency domain. The crop compensates the FIR group delay.

use std::f32::consts::TAU;
use std::sync::Arc;

use rand::distributions::{Distribution, Uniform};
use rand::SeedableRng;
use rand_pcg::Pcg32;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::constants::{CONV_FFT_SIZE, IR_LENGTH};

pub struct NoiseSynthesizer {
    num_noise_bands: usize,
    num_output_samples: usize,

    ifft_window: Arc<dyn Fft<f32>>,
    fft_convolve: Arc<dyn Fft<f32>>,
    ifft_convolve: Arc<dyn Fft<f32>>,

    /// Hann window of length [`IR_LENGTH`], rotated so the peak sits at
    /// index 0.
    zero_phase_window: Vec<f32>,

    rng: Pcg32,
    noise_dist: Uniform<f32>,

    // Scratch, stable across frames.
    spectrum: Vec<Complex<f32>>,
    impulse_response: Vec<f32>,
    ir_freq: Vec<Complex<f32>>,
    noise_freq: Vec<Complex<f32>>,
    noise_audio: Vec<f32>,
}

impl NoiseSynthesizer {
    pub fn new(num_noise_bands: usize, num_output_samples: usize) -> Self {
        assert_eq!(IR_LENGTH, (num_noise_bands - 1) * 2);
        assert!(num_output_samples + IR_LENGTH <= CONV_FFT_SIZE);

        let mut planner = FftPlanner::new();
        let ifft_window = planner.plan_fft_inverse(IR_LENGTH);
        let fft_convolve = planner.plan_fft_forward(CONV_FFT_SIZE);
        let ifft_convolve = planner.plan_fft_inverse(CONV_FFT_SIZE);

        Self {
            num_noise_bands,
            num_output_samples,
            ifft_window,
            fft_convolve,
            ifft_convolve,
            zero_phase_window: zero_phase_hann(IR_LENGTH),
            rng: Pcg32::from_entropy(),
            noise_dist: Uniform::new_inclusive(-1.0, 1.0),
            spectrum: vec![Complex::default(); IR_LENGTH],
            impulse_response: vec![0.0; IR_LENGTH],
            ir_freq: vec![Complex::default(); CONV_FFT_SIZE],
            noise_freq: vec![Complex::default(); CONV_FFT_SIZE],
            noise_audio: vec![0.0; num_output_samples],
        }
    }

    /// Zero output and scratch buffers. The RNG stream is preserved; use
    /// [`reseed`](Self::reseed) for deterministic output.
    pub fn reset(&mut self) {
        self.spectrum.fill(Complex::default());
        self.impulse_response.fill(0.0);
        self.ir_freq.fill(Complex::default());
        self.noise_freq.fill(Complex::default());
        self.noise_audio.fill(0.0);
    }

    /// Restart the noise generator from a fixed seed.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = Pcg32::seed_from_u64(seed);
    }

    /// Render one hop of filtered noise from per-band magnitudes.
    pub fn render(&mut self, magnitudes: &[f32]) -> &[f32] {
        debug_assert_eq!(magnitudes.len(), self.num_noise_bands);
        self.design_fir(magnitudes);
        self.convolve();
        &self.noise_audio
    }

    /// Frequency-sampling FIR design: magnitudes become the real spectrum of
    /// a length-[`IR_LENGTH`] filter, inverse-transformed, windowed with the
    /// zero-phase Hann, and rotated to causal linear-phase form.
    fn design_fir(&mut self, magnitudes: &[f32]) {
        self.spectrum.fill(Complex::default());
        for (bin, &mag) in magnitudes.iter().enumerate().take(self.num_noise_bands) {
            self.spectrum[bin] = Complex::new(mag, 0.0);
        }
        // Hermitian mirror for a real impulse response.
        for i in 1..IR_LENGTH / 2 {
            self.spectrum[IR_LENGTH - i] = self.spectrum[i].conj();
        }

        self.ifft_window.process(&mut self.spectrum);
        let scale = 1.0 / IR_LENGTH as f32;
        for i in 0..IR_LENGTH {
            self.impulse_response[i] = self.spectrum[i].re * scale * self.zero_phase_window[i];
        }
        self.impulse_response.rotate_left(IR_LENGTH / 2);
    }

    fn convolve(&mut self) {
        for slot in self.noise_freq.iter_mut() {
            *slot = Complex::new(self.noise_dist.sample(&mut self.rng), 0.0);
        }
        for (slot, &ir) in self.ir_freq.iter_mut().zip(self.impulse_response.iter()) {
            *slot = Complex::new(ir, 0.0);
        }
        self.ir_freq[IR_LENGTH..].fill(Complex::default());

        self.fft_convolve.process(&mut self.noise_freq);
        self.fft_convolve.process(&mut self.ir_freq);
        for (noise_bin, ir_bin) in self.noise_freq.iter_mut().zip(self.ir_freq.iter()) {
            *noise_bin *= ir_bin;
        }
        self.ifft_convolve.process(&mut self.noise_freq);

        // Crop with group-delay compensation. The reference offset is one
        // sample short of the textbook (IR_LENGTH - 1) / 2; kept for
        // bit-level parity with existing model regressions.
        let delay = (IR_LENGTH - 1) / 2 - 1;
        let scale = 1.0 / CONV_FFT_SIZE as f32;
        for i in 0..self.num_output_samples {
            let src = delay + i;
            self.noise_audio[i] = if src < CONV_FFT_SIZE {
                self.noise_freq[src].re * scale
            } else {
                0.0
            };
        }
    }
}

/// Hann window rotated so its peak sits at index 0.
fn zero_phase_hann(length: usize) -> Vec<f32> {
    let mut window: Vec<f32> = (0..length)
        .map(|i| 0.5 * (1.0 - (TAU * i as f32 / length as f32).cos()))
        .collect();
    window.rotate_left(length / 2);
    window
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{MODEL_HOP_SIZE, NUM_NOISE_BANDS};

    fn model_rate_synth() -> NoiseSynthesizer {
        NoiseSynthesizer::new(NUM_NOISE_BANDS, MODEL_HOP_SIZE)
    }

    #[test]
    fn test_zero_phase_window_peaks_at_index_zero() {
        let window = zero_phase_hann(IR_LENGTH);
        assert!((window[0] - 1.0).abs() < 1e-6);
        // Original endpoints land mid-buffer after the rotation.
        assert!(window[IR_LENGTH / 2] < 1e-6);
        let max = window.iter().cloned().fold(0.0f32, f32::max);
        assert_eq!(max, window[0]);
    }

    #[test]
    fn test_zero_magnitudes_render_silence() {
        let mut synth = model_rate_synth();
        let out = synth.render(&vec![0.0; NUM_NOISE_BANDS]).to_vec();
        assert!(out.iter().all(|&x| x.abs() < 1e-7));
    }

    #[test]
    fn test_output_scales_linearly_with_magnitude() {
        let mut synth = model_rate_synth();
        synth.reseed(7);
        let quiet = synth.render(&vec![0.5; NUM_NOISE_BANDS]).to_vec();
        synth.reseed(7);
        let loud = synth.render(&vec![1.0; NUM_NOISE_BANDS]).to_vec();

        for (q, l) in quiet.iter().zip(loud.iter()) {
            assert!((l - 2.0 * q).abs() < 1e-5);
        }
    }

    #[test]
    fn test_long_run_is_zero_mean() {
        let mut synth = model_rate_synth();
        synth.reseed(42);
        let mags = vec![1.0; NUM_NOISE_BANDS];
        let mut sum = 0.0f64;
        let mut count = 0usize;
        for _ in 0..100 {
            for &x in synth.render(&mags) {
                sum += x as f64;
                count += 1;
            }
        }
        let mean = sum / count as f64;
        assert!(mean.abs() < 0.01, "mean was {mean}");
    }

    #[test]
    fn test_flat_magnitudes_have_nonzero_rms() {
        let mut synth = model_rate_synth();
        synth.reseed(3);
        let out = synth.render(&vec![1.0; NUM_NOISE_BANDS]).to_vec();
        let rms = (out.iter().map(|x| x * x).sum::<f32>() / out.len() as f32).sqrt();
        assert!(rms > 0.05, "rms was {rms}");
    }

    #[test]
    fn test_reset_preserves_rng_stream_determinism() {
        let mut synth = model_rate_synth();
        synth.reseed(11);
        let first = synth.render(&vec![1.0; NUM_NOISE_BANDS]).to_vec();

        synth.reseed(11);
        synth.reset();
        let second = synth.render(&vec![1.0; NUM_NOISE_BANDS]).to_vec();
        assert_eq!(first, second);
    }
}
