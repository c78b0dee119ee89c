//! Pitch and loudness feature mapping.
//!
//! Pure conversions between Hz, MIDI and the normalized [0, 1] ranges the
//! decoder consumes. The loudness maps use the 80 dB span of the DDSP Python
//! normalization. None of these functions allocate.

use crate::constants::{PITCH_MAX_HZ, PITCH_MIN_HZ};

const SEMITONES_PER_OCTAVE: f32 = 12.0;
const MIDI_NOTE_A4: f32 = 69.0;
const FREQ_A4_HZ: f32 = 440.0;

// 14-bit pitch bend, centered, +-2 semitones at the extremes.
const PITCH_BEND_RANGE: f32 = 16_384.0;
const PITCH_BEND_BASE: f32 = PITCH_BEND_RANGE / 2.0;
const PITCH_BEND_PER_SEMITONE: f32 = PITCH_BEND_RANGE / 4.0;

/// Normalize pitch from Hz to [0, 1] on the MIDI scale.
///
/// Clamps to the model pitch range, converts to MIDI note number, divides by
/// 127.
pub fn normalized_pitch(pitch_hz: f32) -> f32 {
    let pitch_hz = pitch_hz.clamp(PITCH_MIN_HZ, PITCH_MAX_HZ);
    let midi = SEMITONES_PER_OCTAVE * (pitch_hz.log2() - FREQ_A4_HZ.log2()) + MIDI_NOTE_A4;
    midi / 127.0
}

/// Shift a frequency by a (possibly fractional, possibly negative) number of
/// semitones.
pub fn offset_pitch(pitch_hz: f32, semitone_offset: f32) -> f32 {
    pitch_hz * (semitone_offset / SEMITONES_PER_OCTAVE).exp2()
}

/// Frequency for a MIDI note plus a raw 14-bit pitch-bend value
/// (0..=16383, centered at 8192).
pub fn freq_from_note_and_bend(midi_note: i32, pitch_bend: i32) -> f32 {
    let note_in_octave = (midi_note as f32 - MIDI_NOTE_A4) / SEMITONES_PER_OCTAVE;
    let bend_in_octave =
        (pitch_bend as f32 - PITCH_BEND_BASE) / PITCH_BEND_PER_SEMITONE / SEMITONES_PER_OCTAVE;
    (note_in_octave + bend_in_octave).exp2() * FREQ_A4_HZ
}

/// Logarithmic map of Hz onto [0, 1] between the model pitch bounds.
///
/// This is the MIDI-mode normalization, distinct from [`normalized_pitch`].
pub fn map_from_log10(freq_hz: f32) -> f32 {
    let freq_hz = freq_hz.clamp(PITCH_MIN_HZ, PITCH_MAX_HZ);
    let log_min = PITCH_MIN_HZ.log10();
    let log_max = PITCH_MAX_HZ.log10();
    (freq_hz.log10() - log_min) / (log_max - log_min)
}

/// Normalize loudness from dB to [0, 1]: -80 dB -> 0, 0 dB -> 1.
pub fn normalized_loudness(loudness_db: f32) -> f32 {
    loudness_db / 80.0 + 1.0
}

/// Inverse of [`normalized_loudness`].
pub fn denormalize_loudness(loudness_norm: f32) -> f32 {
    (loudness_norm - 1.0) * 80.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loudness_round_trip_is_exact() {
        for i in 0..=100 {
            let norm = i as f32 / 100.0;
            assert_eq!(normalized_loudness(denormalize_loudness(norm)), norm);
        }
        assert_eq!(normalized_loudness(-80.0), 0.0);
        assert_eq!(normalized_loudness(0.0), 1.0);
    }

    #[test]
    fn test_normalized_pitch_reference_points() {
        // A4 is MIDI 69.
        assert!((normalized_pitch(440.0) - 69.0 / 127.0).abs() < 1e-5);
        // Range endpoints clamp to roughly 0 and 1.
        assert!(normalized_pitch(1.0) < 0.001);
        assert!(normalized_pitch(20_000.0) > 0.999);
    }

    #[test]
    fn test_normalized_pitch_is_monotonic() {
        let mut prev = normalized_pitch(PITCH_MIN_HZ);
        let mut f = PITCH_MIN_HZ * 1.05;
        while f < PITCH_MAX_HZ {
            let cur = normalized_pitch(f);
            assert!(cur > prev, "not monotonic at {f} Hz");
            prev = cur;
            f *= 1.05;
        }
    }

    #[test]
    fn test_offset_pitch_octaves() {
        assert!((offset_pitch(440.0, 12.0) - 880.0).abs() < 1e-3);
        assert!((offset_pitch(440.0, -12.0) - 220.0).abs() < 1e-3);
        assert_eq!(offset_pitch(440.0, 0.0), 440.0);
    }

    #[test]
    fn test_freq_from_note_and_bend() {
        assert!((freq_from_note_and_bend(69, 8192) - 440.0).abs() < 1e-3);
        assert!((freq_from_note_and_bend(81, 8192) - 880.0).abs() < 1e-2);
        // A full 8192-count bend above center is +2 semitones.
        let two_up = freq_from_note_and_bend(69, 8192 + 8192);
        assert!((two_up - offset_pitch(440.0, 2.0)).abs() < 0.1);
    }

    #[test]
    fn test_freq_from_note_and_bend_is_monotonic_in_bend() {
        let mut prev = freq_from_note_and_bend(60, 0);
        for bend in (256..16_384).step_by(256) {
            let cur = freq_from_note_and_bend(60, bend);
            assert!(cur > prev);
            prev = cur;
        }
    }

    #[test]
    fn test_map_from_log10_endpoints() {
        assert!(map_from_log10(PITCH_MIN_HZ).abs() < 1e-6);
        assert!((map_from_log10(PITCH_MAX_HZ) - 1.0).abs() < 1e-6);
        let mid = map_from_log10(440.0);
        assert!(mid > 0.0 && mid < 1.0);
    }
}
