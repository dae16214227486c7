/// Scale definitions and the row -> pitch mapping
use serde::{Deserialize, Serialize};

use super::ROWS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scale {
    #[default]
    Major,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Minor,
    Locrian,
}

impl Scale {
    pub const ALL: [Scale; 7] = [
        Scale::Major,
        Scale::Dorian,
        Scale::Phrygian,
        Scale::Lydian,
        Scale::Mixolydian,
        Scale::Minor,
        Scale::Locrian,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Scale::Major => "Ionian (Major)",
            Scale::Dorian => "Dorian",
            Scale::Phrygian => "Phrygian",
            Scale::Lydian => "Lydian",
            Scale::Mixolydian => "Mixolydian",
            Scale::Minor => "Aeolian (Minor)",
            Scale::Locrian => "Locrian",
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Scale::Major => "major",
            Scale::Dorian => "dorian",
            Scale::Phrygian => "phrygian",
            Scale::Lydian => "lydian",
            Scale::Mixolydian => "mixolydian",
            Scale::Minor => "minor",
            Scale::Locrian => "locrian",
        }
    }

    pub fn from_key(key: &str) -> Option<Scale> {
        Scale::ALL.iter().copied().find(|s| s.key() == key)
    }

    /// Semitone offsets from the root, strictly ascending, ending at the octave.
    pub fn offsets(self) -> &'static [u8] {
        match self {
            Scale::Major => &[0, 2, 4, 5, 7, 9, 11, 12],
            Scale::Dorian => &[0, 2, 3, 5, 7, 9, 10, 12],
            Scale::Phrygian => &[0, 1, 3, 5, 7, 8, 10, 12],
            Scale::Lydian => &[0, 2, 4, 6, 7, 9, 11, 12],
            Scale::Mixolydian => &[0, 2, 4, 5, 7, 9, 10, 12],
            Scale::Minor => &[0, 2, 3, 5, 7, 8, 10, 12],
            Scale::Locrian => &[0, 1, 3, 5, 6, 8, 10, 12],
        }
    }
}

/// Pitch for every grid row. Row 0 holds the highest pitch so the grid reads
/// low-to-high from the bottom up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleMapping {
    pitches: [u8; ROWS],
}

impl ScaleMapping {
    pub fn new(scale: Scale, base: u8) -> Self {
        let offsets = scale.offsets();
        let mut pitches = [0u8; ROWS];
        for (row, pitch) in pitches.iter_mut().enumerate() {
            let offset = offsets[ROWS - 1 - row];
            *pitch = base.saturating_add(offset).min(127);
        }
        Self { pitches }
    }

    pub fn pitch(&self, row: usize) -> u8 {
        self.pitches[row]
    }

    pub fn pitches(&self) -> &[u8; ROWS] {
        &self.pitches
    }
}

impl Default for ScaleMapping {
    fn default() -> Self {
        Self::new(Scale::Major, 60)
    }
}
