//! Fractional-ratio resampler bridging the 16 kHz model rate to the host
//! sample rate.
//!
//! A Kaiser-windowed sinc prototype is decomposed into L polyphase branches
//! for an L/M rational ratio. The delay line persists across calls, so
//! consecutive hops splice without discontinuities. `process` performs no
//! heap allocation.

use std::f32::consts::PI;

const TAPS_PER_PHASE: usize = 32;
const KAISER_BETA: f32 = 8.0;

pub struct Resampler {
    /// Polyphase coefficients, flat [num_phases x TAPS_PER_PHASE].
    coefficients: Vec<f32>,
    num_phases: usize,
    /// Interpolation factor L.
    up_factor: usize,
    /// Decimation factor M.
    down_factor: usize,
    /// FIR delay line, circular.
    history: Vec<f32>,
    hist_pos: usize,
    /// Selects the polyphase branch for the next output sample.
    phase_acc: usize,
}

impl Resampler {
    /// Build a resampler converting `src_rate` to `dst_rate`.
    ///
    /// The prototype filter cuts off at `min(pi/L, pi/M)` so neither imaging
    /// nor aliasing products pass.
    pub fn new(src_rate: u32, dst_rate: u32) -> Self {
        let g = gcd(src_rate, dst_rate);
        let up = (dst_rate / g) as usize;
        let down = (src_rate / g) as usize;

        let total_taps = TAPS_PER_PHASE * up;
        let cutoff = PI / up.max(down) as f32;
        let center = (total_taps - 1) as f32 / 2.0;

        let mut coefficients = vec![0.0f32; total_taps];
        for (phase, chunk) in coefficients.chunks_mut(TAPS_PER_PHASE).enumerate() {
            for (tap, coeff) in chunk.iter_mut().enumerate() {
                let idx = phase + tap * up;
                let x = idx as f32 - center;
                let sinc = if x.abs() < 1e-6 {
                    1.0
                } else {
                    (cutoff * x).sin() / (PI * x) * up as f32
                };
                *coeff = sinc * kaiser(idx, total_taps, KAISER_BETA);
            }
        }

        Self {
            coefficients,
            num_phases: up,
            up_factor: up,
            down_factor: down,
            history: vec![0.0; TAPS_PER_PHASE],
            hist_pos: 0,
            phase_acc: 0,
        }
    }

    /// Resample `input`, appending to the internal delay line. Returns the
    /// number of output samples produced (at most `output.len()` are
    /// written; the count is clamped to the buffer).
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) -> usize {
        let mut produced = 0usize;

        for &sample in input {
            self.history[self.hist_pos] = sample;
            self.hist_pos = (self.hist_pos + 1) % TAPS_PER_PHASE;

            while self.phase_acc < self.up_factor {
                let coeffs = &self.coefficients
                    [self.phase_acc * TAPS_PER_PHASE..(self.phase_acc + 1) * TAPS_PER_PHASE];
                let mut acc = 0.0f32;
                for (tap, &c) in coeffs.iter().enumerate() {
                    let idx = (self.hist_pos + TAPS_PER_PHASE - 1 - tap) % TAPS_PER_PHASE;
                    acc += self.history[idx] * c;
                }
                if produced < output.len() {
                    output[produced] = acc;
                }
                produced += 1;
                self.phase_acc += self.down_factor;
            }
            self.phase_acc -= self.up_factor;
        }

        produced.min(output.len())
    }

    /// Upper bound on output samples for `input_len` input samples.
    pub fn max_output_len(input_len: usize, src_rate: u32, dst_rate: u32) -> usize {
        let num = input_len as u64 * dst_rate as u64 + src_rate as u64 - 1;
        (num / src_rate as u64) as usize + 1
    }

    /// Clear the delay line and phase accumulator.
    pub fn reset(&mut self) {
        self.history.fill(0.0);
        self.hist_pos = 0;
        self.phase_acc = 0;
    }

    pub fn ratio(&self) -> (usize, usize) {
        (self.up_factor, self.down_factor)
    }

    pub fn num_phases(&self) -> usize {
        self.num_phases
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Modified zeroth-order Bessel function of the first kind.
fn bessel_i0(x: f32) -> f32 {
    let mut sum = 1.0f32;
    let mut term = 1.0f32;
    let x2 = x * x * 0.25;
    for k in 1..25 {
        term *= x2 / (k * k) as f32;
        sum += term;
        if term < 1e-10 * sum {
            break;
        }
    }
    sum
}

fn kaiser(n: usize, length: usize, beta: f32) -> f32 {
    let center = (length - 1) as f32 / 2.0;
    let x = (n as f32 - center) / center;
    bessel_i0(beta * (1.0 - x * x).max(0.0).sqrt()) / bessel_i0(beta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{MODEL_HOP_SIZE, MODEL_SAMPLE_RATE};

    fn sine(rate: u32, freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_gcd() {
        assert_eq!(gcd(16_000, 48_000), 16_000);
        assert_eq!(gcd(16_000, 44_100), 100);
    }

    #[test]
    fn test_hop_upsamples_to_exact_user_hop_at_48k() {
        let mut rs = Resampler::new(MODEL_SAMPLE_RATE, 48_000);
        let input = sine(MODEL_SAMPLE_RATE, 440.0, MODEL_HOP_SIZE);
        let mut output = vec![0.0f32; Resampler::max_output_len(MODEL_HOP_SIZE, 16_000, 48_000)];
        assert_eq!(rs.process(&input, &mut output), 960);
    }

    #[test]
    fn test_hop_upsamples_to_exact_user_hop_at_44_1k() {
        let mut rs = Resampler::new(MODEL_SAMPLE_RATE, 44_100);
        assert_eq!(rs.ratio(), (441, 160));
        let input = sine(MODEL_SAMPLE_RATE, 440.0, MODEL_HOP_SIZE);
        let mut output = vec![0.0f32; Resampler::max_output_len(MODEL_HOP_SIZE, 16_000, 44_100)];
        assert_eq!(rs.process(&input, &mut output), 882);
    }

    #[test]
    fn test_chunked_equals_whole() {
        let input = sine(MODEL_SAMPLE_RATE, 330.0, 4 * MODEL_HOP_SIZE);
        let out_cap = Resampler::max_output_len(input.len(), 16_000, 48_000);

        let mut whole = Resampler::new(MODEL_SAMPLE_RATE, 48_000);
        let mut whole_out = vec![0.0f32; out_cap];
        let n_whole = whole.process(&input, &mut whole_out);

        let mut chunked = Resampler::new(MODEL_SAMPLE_RATE, 48_000);
        let mut chunked_out = Vec::with_capacity(out_cap);
        for chunk in input.chunks(MODEL_HOP_SIZE) {
            let mut out = vec![0.0f32; Resampler::max_output_len(chunk.len(), 16_000, 48_000)];
            let n = chunked.process(chunk, &mut out);
            chunked_out.extend_from_slice(&out[..n]);
        }

        assert_eq!(n_whole, chunked_out.len());
        for (w, c) in whole_out[..n_whole].iter().zip(chunked_out.iter()) {
            assert!((w - c).abs() < 1e-6);
        }
    }

    #[test]
    fn test_upsampled_energy_is_preserved() {
        let mut rs = Resampler::new(MODEL_SAMPLE_RATE, 48_000);
        // 100 ms past the filter transient.
        let input = sine(MODEL_SAMPLE_RATE, 1_000.0, 1_600);
        let mut output = vec![0.0f32; Resampler::max_output_len(input.len(), 16_000, 48_000)];
        let n = rs.process(&input, &mut output);

        let skip = 400;
        let in_energy: f32 =
            input[skip / 3..].iter().map(|x| x * x).sum::<f32>() / (input.len() - skip / 3) as f32;
        let out_energy: f32 =
            output[skip..n].iter().map(|x| x * x).sum::<f32>() / (n - skip) as f32;
        let ratio = out_energy / in_energy;
        assert!(ratio > 0.8 && ratio < 1.2, "energy ratio {ratio}");
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let mut rs = Resampler::new(MODEL_SAMPLE_RATE, 48_000);
        let input = sine(MODEL_SAMPLE_RATE, 440.0, MODEL_HOP_SIZE);
        let mut first = vec![0.0f32; 1024];
        let n1 = rs.process(&input, &mut first);

        rs.reset();
        let mut second = vec![0.0f32; 1024];
        let n2 = rs.process(&input, &mut second);

        assert_eq!(n1, n2);
        assert_eq!(first[..n1], second[..n2]);
    }
}
