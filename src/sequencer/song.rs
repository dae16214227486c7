/// Song mode - saved patterns chained back-to-back
use serde::{Deserialize, Serialize};

use super::arpeggiator::{ArpMode, ArpParams, ChordSet};
use super::scale::Scale;
use super::Grid;
use crate::error::SongError;

/// Transport and arp settings captured alongside a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternSettings {
    pub bpm: u32,
    pub scale_key: Scale,
    pub base_octave: u8,
    pub arp_mode: ArpMode,
    pub arp_rate: u32,
    pub arp_chords: ChordSet,
    pub arp_octaves: u32,
}

impl PatternSettings {
    pub fn arp(&self) -> ArpParams {
        ArpParams {
            mode: self.arp_mode,
            rate: self.arp_rate,
            octaves: self.arp_octaves,
            chords: self.arp_chords,
        }
    }
}

impl Default for PatternSettings {
    fn default() -> Self {
        let arp = ArpParams::default();
        Self {
            bpm: 120,
            scale_key: Scale::Major,
            base_octave: 60,
            arp_mode: arp.mode,
            arp_rate: arp.rate,
            arp_chords: arp.chords,
            arp_octaves: arp.octaves,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    pub name: String,
    pub settings: PatternSettings,
    pub sequence: Grid,
}

pub fn pattern_name(index: usize) -> String {
    match u8::try_from(index).ok().filter(|&i| i < 26) {
        Some(i) => format!("Pattern {}", (b'A' + i) as char),
        None => format!("Pattern {}", index + 1),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SongState {
    #[default]
    Stopped,
    Playing,
}

/// What the engine should do after a step-0 boundary in song mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// The pattern at this index is now pending.
    Queued(usize),
    /// The last pattern finished; the song is stopped.
    Finished,
}

/// What the engine should load after a pattern was deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    Kept,
    Reload(Pattern),
    Cleared,
}

#[derive(Debug, Clone, Default)]
pub struct Song {
    patterns: Vec<Pattern>,
    current: usize,
    pending: Option<usize>,
    state: SongState,
}

impl Song {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Pattern> {
        self.patterns.get(index)
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn pending_index(&self) -> Option<usize> {
        self.pending
    }

    pub fn state(&self) -> SongState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == SongState::Playing
    }

    /// Appends a snapshot and returns its index.
    pub fn save(&mut self, settings: PatternSettings, grid: &Grid) -> usize {
        let index = self.patterns.len();
        self.patterns.push(Pattern {
            name: pattern_name(index),
            settings,
            sequence: grid.clone(),
        });
        index
    }

    /// Marks `index` as the loaded pattern.
    pub fn select(&mut self, index: usize) -> Result<&Pattern, SongError> {
        if index >= self.patterns.len() {
            return Err(SongError::NoSuchPattern(index));
        }
        self.current = index;
        Ok(&self.patterns[index])
    }

    /// Stopped -> Playing, positioned on the first pattern.
    pub fn begin(&mut self) -> Result<&Pattern, SongError> {
        if self.patterns.is_empty() {
            return Err(SongError::NoPatterns);
        }
        self.state = SongState::Playing;
        self.current = 0;
        self.pending = None;
        Ok(&self.patterns[0])
    }

    pub fn advance(&mut self) -> Advance {
        if self.current + 1 >= self.patterns.len() {
            self.stop();
            return Advance::Finished;
        }
        self.current += 1;
        self.pending = Some(self.current);
        Advance::Queued(self.current)
    }

    pub fn take_pending(&mut self) -> Option<Pattern> {
        self.pending
            .take()
            .and_then(|index| self.patterns.get(index).cloned())
    }

    pub fn stop(&mut self) {
        self.state = SongState::Stopped;
        self.pending = None;
        self.current = 0;
    }

    pub fn remove(&mut self, index: usize) -> Result<Removal, SongError> {
        if self.is_playing() {
            return Err(SongError::DeleteWhilePlaying);
        }
        if index >= self.patterns.len() {
            return Err(SongError::NoSuchPattern(index));
        }
        self.patterns.remove(index);
        for (i, pattern) in self.patterns.iter_mut().enumerate().skip(index) {
            pattern.name = pattern_name(i);
        }

        if self.patterns.is_empty() {
            self.current = 0;
            return Ok(Removal::Cleared);
        }
        if index == self.current {
            self.current = 0;
            return Ok(Removal::Reload(self.patterns[0].clone()));
        }
        if index < self.current {
            self.current -= 1;
        }
        Ok(Removal::Kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song_of(count: usize) -> Song {
        let mut song = Song::new();
        for i in 0..count {
            let mut grid = Grid::new();
            grid.set(0, i, true);
            let settings = PatternSettings {
                bpm: 100 + i as u32,
                ..PatternSettings::default()
            };
            song.save(settings, &grid);
        }
        song
    }

    #[test]
    fn test_save_names_patterns_by_letter() {
        let song = song_of(3);
        let names: Vec<_> = song.patterns().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Pattern A", "Pattern B", "Pattern C"]);
        assert_eq!(pattern_name(26), "Pattern 27");
    }

    #[test]
    fn test_begin_requires_patterns() {
        let mut song = Song::new();
        assert_eq!(song.begin().unwrap_err(), SongError::NoPatterns);
        assert_eq!(song.state(), SongState::Stopped);
    }

    #[test]
    fn test_advance_queues_then_finishes() {
        let mut song = song_of(2);
        song.begin().unwrap();
        assert_eq!(song.advance(), Advance::Queued(1));
        assert_eq!(song.pending_index(), Some(1));
        assert_eq!(song.take_pending().unwrap().settings.bpm, 101);
        assert_eq!(song.pending_index(), None);

        assert_eq!(song.advance(), Advance::Finished);
        assert_eq!(song.state(), SongState::Stopped);
        assert_eq!(song.current_index(), 0);
    }

    #[test]
    fn test_stop_drops_pending() {
        let mut song = song_of(3);
        song.begin().unwrap();
        song.advance();
        song.stop();
        assert_eq!(song.pending_index(), None);
        assert_eq!(song.current_index(), 0);
    }

    #[test]
    fn test_remove_rejected_while_playing() {
        let mut song = song_of(2);
        song.begin().unwrap();
        assert_eq!(song.remove(1).unwrap_err(), SongError::DeleteWhilePlaying);
        assert_eq!(song.len(), 2);
    }

    #[test]
    fn test_remove_current_reloads_first() {
        let mut song = song_of(3);
        song.select(1).unwrap();
        let removal = song.remove(1).unwrap();
        assert_eq!(removal, Removal::Reload(song.get(0).unwrap().clone()));
        assert_eq!(song.current_index(), 0);
        assert_eq!(song.get(1).unwrap().name, "Pattern B");
        assert_eq!(song.get(1).unwrap().settings.bpm, 102);
    }

    #[test]
    fn test_remove_before_current_shifts_index() {
        let mut song = song_of(3);
        song.select(2).unwrap();
        assert_eq!(song.remove(0).unwrap(), Removal::Kept);
        assert_eq!(song.current_index(), 1);
        assert_eq!(song.get(1).unwrap().settings.bpm, 102);
    }

    #[test]
    fn test_remove_last_pattern_clears() {
        let mut song = song_of(1);
        assert_eq!(song.remove(0).unwrap(), Removal::Cleared);
        assert!(song.is_empty());
        assert_eq!(song.remove(0).unwrap_err(), SongError::NoSuchPattern(0));
    }
}
