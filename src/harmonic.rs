//! Additive harmonic synthesizer.
//!
//! Renders one hop of a phase-continuous sinusoid bank from a harmonic
//! distribution, an overall amplitude and a fundamental. Frequency and
//! per-harmonic amplitudes are interpolated with a "midway lerp": linear over
//! the first half of the hop, held over the second. That bounds the slew to
//! 10 ms per 20 ms hop and keeps glides free of audible swoop without
//! per-sample oscillator retuning.

use std::f32::consts::TAU;

/// Phase-continuous additive synthesizer at a fixed sample rate.
///
/// All buffers are allocated at construction; `render` performs no heap
/// allocation.
pub struct HarmonicSynthesizer {
    num_harmonics: usize,
    num_output_samples: usize,
    sample_rate: f32,

    previous_phase: f32,
    previous_f0: Option<f32>,
    previous_distribution: Vec<f32>,

    // Scratch, stable across frames.
    frequency_envelope: Vec<f32>,
    phases: Vec<f32>,
    /// Per-harmonic amplitude envelopes, flat [num_harmonics x hop].
    amplitude_envelopes: Vec<f32>,
    render_buffer: Vec<f32>,
}

impl HarmonicSynthesizer {
    pub fn new(num_harmonics: usize, num_output_samples: usize, sample_rate: f32) -> Self {
        Self {
            num_harmonics,
            num_output_samples,
            sample_rate,
            previous_phase: 0.0,
            previous_f0: None,
            previous_distribution: vec![0.0; num_harmonics],
            frequency_envelope: vec![0.0; num_output_samples],
            phases: vec![0.0; num_output_samples],
            amplitude_envelopes: vec![0.0; num_harmonics * num_output_samples],
            render_buffer: vec![0.0; num_output_samples],
        }
    }

    /// Zero all carried state. The next `render` uses its own f0 for both
    /// interpolation endpoints.
    pub fn reset(&mut self) {
        self.previous_phase = 0.0;
        self.previous_f0 = None;
        self.previous_distribution.fill(0.0);
        self.render_buffer.fill(0.0);
    }

    /// Render one hop. `distribution` is normalized in place: harmonics at or
    /// above Nyquist are zeroed, the rest are scaled to sum to `amplitude`.
    pub fn render(&mut self, distribution: &mut [f32], amplitude: f32, f0_hz: f32) -> &[f32] {
        debug_assert_eq!(distribution.len(), self.num_harmonics);

        self.normalize_distribution(distribution, amplitude, f0_hz);

        let prev_f0 = self.previous_f0.unwrap_or(f0_hz);
        midway_lerp(prev_f0, f0_hz, &mut self.frequency_envelope);
        self.previous_f0 = Some(f0_hz);

        let hop = self.num_output_samples;
        for (k, &target) in distribution.iter().enumerate() {
            let envelope = &mut self.amplitude_envelopes[k * hop..(k + 1) * hop];
            midway_lerp(self.previous_distribution[k], target, envelope);
        }
        self.previous_distribution.copy_from_slice(distribution);

        self.synthesize()
    }

    /// Zero harmonics above Nyquist, normalize the remainder to unit sum,
    /// scale by the overall amplitude.
    fn normalize_distribution(&self, distribution: &mut [f32], amplitude: f32, f0_hz: f32) {
        let nyquist = self.sample_rate / 2.0;
        for (k, weight) in distribution.iter_mut().enumerate() {
            let harmonic_freq = f0_hz * (k + 1) as f32;
            if harmonic_freq >= nyquist {
                *weight = 0.0;
            }
        }

        let total: f32 = distribution.iter().sum();
        if total != 0.0 {
            for weight in distribution.iter_mut() {
                *weight /= total;
            }
        }
        for weight in distribution.iter_mut() {
            *weight *= amplitude;
        }
    }

    fn synthesize(&mut self) -> &[f32] {
        let hop = self.num_output_samples;

        // Hz -> radians/sample, then prefix-sum into instantaneous phase.
        let scale = TAU / self.sample_rate;
        let mut accum = self.previous_phase;
        for i in 0..hop {
            accum += self.frequency_envelope[i] * scale;
            self.phases[i] = accum;
        }
        self.previous_phase = self.phases[hop - 1] % TAU;

        self.render_buffer.fill(0.0);
        for k in 0..self.num_harmonics {
            let order = (k + 1) as f32;
            let envelope = &self.amplitude_envelopes[k * hop..(k + 1) * hop];
            for i in 0..hop {
                self.render_buffer[i] += (self.phases[i] * order).sin() * envelope[i];
            }
        }
        &self.render_buffer
    }
}

/// Linear interpolation across the first half of `out`, constant hold across
/// the second half.
fn midway_lerp(first: f32, last: f32, out: &mut [f32]) {
    let half = out.len() / 2;
    if half > 0 {
        let step = (last - first) / half as f32;
        for (i, sample) in out[..half].iter_mut().enumerate() {
            *sample = first + step * i as f32;
        }
    }
    out[half..].fill(last);
}
