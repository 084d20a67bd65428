//! Per-note tuning table

use crate::types::{NoteNumber, NUM_NOTES};

/// Reference pitch of A4 (note 69)
pub const A4_HZ: f32 = 440.0;

/// Cent offsets from 12-tone equal temperament, one per MIDI note
#[derive(Debug, Clone, PartialEq)]
pub struct TuningTable {
    cents: [f32; NUM_NOTES],
}

impl TuningTable {
    /// Standard 12-TET tuning
    pub fn equal_temperament() -> Self {
        Self {
            cents: [0.0; NUM_NOTES],
        }
    }

    /// Build from a list of cent offsets
    ///
    /// Notes past the end of `cents` keep 0 cents. Non-finite entries are
    /// treated as 0.
    pub fn from_cents(cents: &[f32]) -> Self {
        let mut table = Self::equal_temperament();
        for (slot, &value) in table.cents.iter_mut().zip(cents) {
            *slot = if value.is_finite() { value } else { 0.0 };
        }
        table
    }

    /// Cent offset applied to `note`
    pub fn cents(&self, note: NoteNumber) -> f32 {
        self.cents.get(note as usize).copied().unwrap_or(0.0)
    }

    /// Frequency of `note` in Hz
    pub fn frequency(&self, note: NoteNumber) -> f32 {
        let semitones = note as f32 - 69.0 + self.cents(note) / 100.0;
        A4_HZ * (semitones / 12.0).exp2()
    }
}

impl Default for TuningTable {
    fn default() -> Self {
        Self::equal_temperament()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_temperament_reference_pitches() {
        let table = TuningTable::equal_temperament();
        assert!((table.frequency(69) - 440.0).abs() < 0.001);
        assert!((table.frequency(81) - 880.0).abs() < 0.01);
        assert!((table.frequency(60) - 261.626).abs() < 0.01);
    }

    #[test]
    fn test_cent_offsets() {
        let mut cents = vec![0.0; 70];
        cents[69] = 1200.0;
        cents[0] = f32::NAN;
        let table = TuningTable::from_cents(&cents);

        assert!((table.frequency(69) - 880.0).abs() < 0.01);
        assert_eq!(table.cents(0), 0.0);
        assert_eq!(table.cents(100), 0.0);
    }
}
