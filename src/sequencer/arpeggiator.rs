/// Arpeggiator - turns a pool of notes into one note (or chord) per sub-tick
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArpMode {
    #[default]
    Off,
    Up,
    Down,
    UpDown,
    Random,
}

impl ArpMode {
    pub const ALL: [ArpMode; 5] = [
        ArpMode::Off,
        ArpMode::Up,
        ArpMode::Down,
        ArpMode::UpDown,
        ArpMode::Random,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ArpMode::Off => "Off",
            ArpMode::Up => "Up",
            ArpMode::Down => "Down",
            ArpMode::UpDown => "Up/Down",
            ArpMode::Random => "Random",
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            ArpMode::Off => "off",
            ArpMode::Up => "up",
            ArpMode::Down => "down",
            ArpMode::UpDown => "up_down",
            ArpMode::Random => "random",
        }
    }

    pub fn from_key(key: &str) -> Option<ArpMode> {
        ArpMode::ALL.iter().copied().find(|m| m.key() == key)
    }

    pub fn is_on(self) -> bool {
        self != ArpMode::Off
    }
}

/// Chord shapes applied to each selected arp note. `HeldNotes` plays the pool
/// literally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChordSet {
    #[default]
    HeldNotes,
    MajorTriad,
    MinorTriad,
    SeventhChord,
    FifthChord,
}

impl ChordSet {
    pub const ALL: [ChordSet; 5] = [
        ChordSet::HeldNotes,
        ChordSet::MajorTriad,
        ChordSet::MinorTriad,
        ChordSet::SeventhChord,
        ChordSet::FifthChord,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ChordSet::HeldNotes => "Held Notes",
            ChordSet::MajorTriad => "Major Triad",
            ChordSet::MinorTriad => "Minor Triad",
            ChordSet::SeventhChord => "7th Chord",
            ChordSet::FifthChord => "5th (Power)",
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            ChordSet::HeldNotes => "held_notes",
            ChordSet::MajorTriad => "major_triad",
            ChordSet::MinorTriad => "minor_triad",
            ChordSet::SeventhChord => "seventh_chord",
            ChordSet::FifthChord => "fifth_chord",
        }
    }

    pub fn from_key(key: &str) -> Option<ChordSet> {
        ChordSet::ALL.iter().copied().find(|c| c.key() == key)
    }

    pub fn intervals(self) -> Option<&'static [u8]> {
        match self {
            ChordSet::HeldNotes => None,
            ChordSet::MajorTriad => Some(&[0, 4, 7]),
            ChordSet::MinorTriad => Some(&[0, 3, 7]),
            ChordSet::SeventhChord => Some(&[0, 4, 7, 10]),
            ChordSet::FifthChord => Some(&[0, 7]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpParams {
    pub mode: ArpMode,
    /// Sub-divisions per step.
    pub rate: u32,
    pub octaves: u32,
    pub chords: ChordSet,
}

impl ArpParams {
    pub fn rate_factor(&self) -> u32 {
        self.rate.max(1)
    }

    pub fn octave_span(&self) -> u32 {
        self.octaves.max(1)
    }

    /// Pitches to sound for sub-tick `index` of the cycle over `notes`.
    pub fn voice(&self, notes: &[u8], index: usize) -> Vec<u8> {
        calculate_arp_note(
            notes,
            index,
            self.mode,
            self.octave_span(),
            self.chords.intervals(),
        )
    }
}

impl Default for ArpParams {
    fn default() -> Self {
        Self {
            mode: ArpMode::Off,
            rate: 1,
            octaves: 2,
            chords: ChordSet::HeldNotes,
        }
    }
}

/// Octave expansion can push a pitch past the MIDI range; fold it back down
/// by whole octaves so the candidate count stays `notes * octaves`.
fn fold_into_range(pitch: u32) -> u8 {
    let mut pitch = pitch;
    while pitch > 127 {
        pitch -= 12;
    }
    pitch as u8
}

fn shuffle_seed(candidates: &[u8]) -> u64 {
    candidates.iter().fold(0xcbf2_9ce4_8422_2325, |hash, &pitch| {
        (hash ^ pitch as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

/// The ordered list an arp cycles through. Every mode is a permutation of the
/// same octave-expanded set, so its length is always `notes.len() * octaves`.
pub fn arp_candidates(notes: &[u8], mode: ArpMode, octaves: u32) -> Vec<u8> {
    let mut sorted = notes.to_vec();
    sorted.sort_unstable();

    let mut ascending = Vec::with_capacity(sorted.len() * octaves.max(1) as usize);
    for octave in 0..octaves.max(1) {
        for &note in &sorted {
            ascending.push(fold_into_range(note as u32 + 12 * octave));
        }
    }

    match mode {
        ArpMode::Off | ArpMode::Up => ascending,
        ArpMode::Down => {
            ascending.reverse();
            ascending
        }
        ArpMode::UpDown => {
            let rising = ascending.iter().step_by(2);
            let falling = ascending.iter().skip(1).step_by(2).rev();
            rising.chain(falling).copied().collect()
        }
        ArpMode::Random => {
            let mut rng = StdRng::seed_from_u64(shuffle_seed(&ascending));
            ascending.shuffle(&mut rng);
            ascending
        }
    }
}

/// Stacks `intervals` on top of `base`, dropping anything above 127.
pub fn chord_cluster(base: u8, intervals: &[u8]) -> Vec<u8> {
    intervals
        .iter()
        .map(|&interval| base as u32 + interval as u32)
        .filter(|&pitch| pitch <= 127)
        .map(|pitch| pitch as u8)
        .collect()
}

/// Pitches for one arp sub-tick. Empty when the arp is off or the pool is empty.
///
/// Periodic in `index` with period `notes.len() * octaves`.
pub fn calculate_arp_note(
    notes: &[u8],
    index: usize,
    mode: ArpMode,
    octaves: u32,
    chord: Option<&[u8]>,
) -> Vec<u8> {
    if !mode.is_on() || notes.is_empty() {
        return Vec::new();
    }
    let candidates = arp_candidates(notes, mode, octaves);
    let base = candidates[index % candidates.len()];
    match chord {
        Some(intervals) => chord_cluster(base, intervals),
        None => vec![base],
    }
}

/// Currently depressed input keys, ascending with no duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeldNotes {
    notes: Vec<u8>,
}

impl HeldNotes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the pitch was not already held.
    pub fn press(&mut self, pitch: u8) -> bool {
        match self.notes.binary_search(&pitch) {
            Ok(_) => false,
            Err(pos) => {
                self.notes.insert(pos, pitch);
                true
            }
        }
    }

    pub fn release(&mut self, pitch: u8) -> bool {
        match self.notes.binary_search(&pitch) {
            Ok(pos) => {
                self.notes.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.notes
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}
