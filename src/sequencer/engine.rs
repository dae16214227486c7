/// The playback engine: transport, per-tick note emission, the held-note
/// arpeggiator and song mode, all driven from one timer queue.
use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::arpeggiator::{ArpParams, HeldNotes};
use super::clock::{Periodic, Scheduler, Task};
use super::playback::{EngineObserver, PlaybackEvent};
use super::scale::{Scale, ScaleMapping};
use super::song::{Advance, Pattern, PatternSettings, Removal, Song};
use super::{gate, step_period, Grid, ROWS, STEPS};
use crate::error::SongError;
use crate::midi::{NoteMessage, NoteSink, DEFAULT_VELOCITY};

pub const BPM_RANGE: RangeInclusive<u32> = 20..=300;

/// User-facing settings the engine consults on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub bpm: u32,
    pub scale: Scale,
    /// Pitch of the lowest grid row.
    pub base_octave: u8,
    pub arp: ArpParams,
    pub tie_mode: bool,
    pub velocity: u8,
}

impl Settings {
    pub fn pattern_settings(&self) -> PatternSettings {
        PatternSettings {
            bpm: self.bpm,
            scale_key: self.scale,
            base_octave: self.base_octave,
            arp_mode: self.arp.mode,
            arp_rate: self.arp.rate,
            arp_chords: self.arp.chords,
            arp_octaves: self.arp.octaves,
        }
    }

    pub fn apply_pattern(&mut self, saved: &PatternSettings) {
        self.bpm = saved.bpm.clamp(*BPM_RANGE.start(), *BPM_RANGE.end());
        self.scale = saved.scale_key;
        self.base_octave = saved.base_octave.min(127);
        self.arp = saved.arp();
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bpm: 120,
            scale: Scale::Major,
            base_octave: 60,
            arp: ArpParams::default(),
            tie_mode: false,
            velocity: DEFAULT_VELOCITY,
        }
    }
}

pub struct Sequencer {
    grid: Grid,
    settings: Settings,
    mapping: ScaleMapping,
    current_step: usize,
    is_playing: bool,
    /// Pitch each row is sustaining in tie mode.
    tied: [Option<u8>; ROWS],
    held: HeldNotes,
    arp_index: usize,
    clock: Periodic,
    arp_clock: Periodic,
    scheduler: Scheduler,
    song: Song,
    now: Duration,
    sink: Option<Box<dyn NoteSink>>,
    observer: Option<Box<dyn EngineObserver>>,
    rng: StdRng,
}

impl Sequencer {
    pub fn new(settings: Settings) -> Self {
        Self {
            grid: Grid::new(),
            mapping: ScaleMapping::new(settings.scale, settings.base_octave),
            settings,
            current_step: 0,
            is_playing: false,
            tied: [None; ROWS],
            held: HeldNotes::new(),
            arp_index: 0,
            clock: Periodic::default(),
            arp_clock: Periodic::default(),
            scheduler: Scheduler::new(),
            song: Song::new(),
            now: Duration::ZERO,
            sink: None,
            observer: None,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn NoteSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn EngineObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn set_sink(&mut self, sink: Option<Box<dyn NoteSink>>) {
        self.sink = sink;
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn mapping(&self) -> &ScaleMapping {
        &self.mapping
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn song(&self) -> &Song {
        &self.song
    }

    pub fn held_notes(&self) -> &[u8] {
        self.held.as_slice()
    }

    pub fn is_arpeggiating(&self) -> bool {
        self.arp_clock.is_armed()
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn next_due(&self) -> Option<Duration> {
        self.scheduler.next_due()
    }

    /// Runs every deferred action due up to `now`, in due order.
    pub fn advance_to(&mut self, now: Duration) {
        while let Some((due, task)) = self.scheduler.pop_due(now) {
            self.now = self.now.max(due);
            self.dispatch(task);
        }
        self.now = self.now.max(now);
    }

    fn dispatch(&mut self, task: Task) {
        match task {
            Task::Tick { token } => {
                if !self.clock.is_current(token) {
                    return;
                }
                self.run_step();
                // A pattern swap or a stop inside the step re-arms or cancels.
                if self.clock.is_current(token) {
                    let due = self.now + step_period(self.settings.bpm);
                    self.scheduler.schedule(due, Task::Tick { token });
                }
            }
            Task::ArpTick { token } => self.arp_tick(token),
            Task::Strike { pitches, gate } => self.strike(&pitches, gate),
            Task::NoteOff { pitch } => self.note_off(pitch),
        }
    }

    // ---- transport ----

    /// Starts from step 0 with an immediate tick. No-op while playing.
    pub fn start(&mut self) {
        if self.is_playing {
            return;
        }
        self.stop_arpeggiator();
        self.is_playing = true;
        self.current_step = 0;
        self.tied = [None; ROWS];
        log::info!(target: "transport", "start at {} bpm", self.settings.bpm);
        self.emit(PlaybackEvent::TransportChanged { playing: true });

        let token = self.clock.arm();
        self.run_step();
        if self.clock.is_current(token) {
            let due = self.now + step_period(self.settings.bpm);
            self.scheduler.schedule(due, Task::Tick { token });
        }
    }

    /// Tears down the periodic tick and re-arms it one period from now,
    /// keeping the current step.
    fn rearm_clock(&mut self) {
        let token = self.clock.arm();
        let due = self.now + step_period(self.settings.bpm);
        self.scheduler.schedule(due, Task::Tick { token });
    }

    pub fn stop(&mut self) {
        self.is_playing = false;
        self.clock.cancel();
        // Deferred note-offs still in flight are left to fire; this sweep
        // covers anything they or the tie bookkeeping missed.
        for pitch in 0..=127u8 {
            self.note_off(pitch);
        }
        self.tied = [None; ROWS];
        self.current_step = 0;
        log::info!(target: "transport", "stop");
        self.emit(PlaybackEvent::TransportChanged { playing: false });

        if self.song.is_playing() {
            self.song.stop();
            self.emit_song();
        }
        self.sync_arpeggiator(true);
    }

    pub fn toggle_play(&mut self) -> Result<(), SongError> {
        if self.song.is_playing() {
            return self.reject(SongError::SongActive);
        }
        if self.is_playing {
            self.stop();
        } else {
            self.start();
        }
        Ok(())
    }

    // ---- tick evaluation ----

    fn run_step(&mut self) {
        if self.song.is_playing() && self.current_step == 0 {
            if let Some(pattern) = self.song.take_pending() {
                log::info!(target: "song", "swapping in {}", pattern.name);
                self.apply_pattern(&pattern);
                self.rearm_clock();
            }
        }

        let step = self.current_step;
        let prev = (step + STEPS - 1) % STEPS;
        let period = step_period(self.settings.bpm);
        self.emit(PlaybackEvent::StepAdvanced(step));

        let mut active: Vec<u8> = self
            .grid
            .column(step)
            .map(|row| self.mapping.pitch(row))
            .collect();
        active.sort_unstable();

        if self.settings.arp.mode.is_on() && !active.is_empty() {
            self.arpeggiate_step(step, prev, period, &active);
        } else {
            self.emit_step(step, period);
        }

        self.current_step = (step + 1) % STEPS;
        if self.song.is_playing() && self.current_step == 0 {
            self.advance_song();
        }
    }

    fn arpeggiate_step(&mut self, step: usize, prev: usize, period: Duration, active: &[u8]) {
        let mut releases: BTreeSet<u8> = self
            .grid
            .column(prev)
            .map(|row| self.mapping.pitch(row))
            .collect();
        releases.extend(self.tied.iter_mut().filter_map(Option::take));
        for pitch in releases {
            self.note_off(pitch);
        }

        let arp = self.settings.arp;
        let rate = arp.rate_factor();
        let sub = period / rate;
        for i in 0..rate {
            let pitches = arp.voice(active, step * rate as usize + i as usize);
            if pitches.is_empty() {
                continue;
            }
            if i == 0 {
                self.strike(&pitches, gate(sub));
            } else {
                self.scheduler.schedule(
                    self.now + sub * i,
                    Task::Strike {
                        pitches,
                        gate: gate(sub),
                    },
                );
            }
        }
    }

    fn emit_step(&mut self, step: usize, period: Duration) {
        let mut offs = Vec::new();
        let mut ons = Vec::new();

        for row in 0..ROWS {
            let pitch = self.mapping.pitch(row);
            let on = self.grid.get(row, step);
            if self.settings.tie_mode {
                match (self.tied[row], on) {
                    (None, true) => {
                        ons.push(pitch);
                        self.tied[row] = Some(pitch);
                    }
                    (Some(held), false) => {
                        offs.push(held);
                        self.tied[row] = None;
                    }
                    (Some(held), true) if held != pitch => {
                        offs.push(held);
                        ons.push(pitch);
                        self.tied[row] = Some(pitch);
                    }
                    _ => {}
                }
            } else {
                if let Some(held) = self.tied[row].take() {
                    offs.push(held);
                }
                if on {
                    ons.push(pitch);
                }
            }
        }

        for pitch in offs {
            self.note_off(pitch);
        }
        let release = gate(period);
        for pitch in ons {
            self.note_on(pitch);
            if !self.settings.tie_mode {
                self.scheduler
                    .schedule(self.now + release, Task::NoteOff { pitch });
            }
        }
    }

    fn strike(&mut self, pitches: &[u8], gate: Duration) {
        for &pitch in pitches {
            self.note_on(pitch);
            self.scheduler
                .schedule(self.now + gate, Task::NoteOff { pitch });
        }
    }

    fn note_on(&mut self, pitch: u8) {
        let velocity = self.settings.velocity;
        if let Some(sink) = self.sink.as_mut() {
            sink.send(&NoteMessage::NoteOn { pitch, velocity }.to_bytes());
        }
        self.emit(PlaybackEvent::NoteOn(pitch, velocity));
    }

    fn note_off(&mut self, pitch: u8) {
        if let Some(sink) = self.sink.as_mut() {
            sink.send(&NoteMessage::NoteOff { pitch }.to_bytes());
        }
        self.emit(PlaybackEvent::NoteOff(pitch));
    }

    // ---- held-note arpeggiator ----

    pub fn note_input_on(&mut self, pitch: u8) {
        if self.is_playing {
            return;
        }
        if !self.settings.arp.mode.is_on() {
            self.note_on(pitch);
        }
        if self.held.press(pitch) {
            self.sync_arpeggiator(false);
        }
    }

    pub fn note_input_off(&mut self, pitch: u8) {
        if !self.settings.arp.mode.is_on() {
            self.note_off(pitch);
        }
        if self.held.release(pitch) {
            self.sync_arpeggiator(false);
        }
    }

    /// Idle <-> Running. With `restart` a running arp starts over at index 0.
    fn sync_arpeggiator(&mut self, restart: bool) {
        let should_run =
            self.settings.arp.mode.is_on() && !self.held.is_empty() && !self.is_playing;
        if !should_run {
            self.stop_arpeggiator();
        } else if restart || !self.arp_clock.is_armed() {
            let token = self.arp_clock.arm();
            self.arp_index = 0;
            log::debug!(target: "arp", "arpeggiator running over {:?}", self.held.as_slice());
            self.arp_tick(token);
        }
    }

    /// Keys pressed while the arp was off sound directly; once the arp takes
    /// them over their release no longer sends a note-off, so send it now.
    fn release_direct_input(&mut self, was_on: bool) {
        if was_on || !self.settings.arp.mode.is_on() {
            return;
        }
        let held = self.held.as_slice().to_vec();
        for pitch in held {
            self.note_off(pitch);
        }
    }

    fn stop_arpeggiator(&mut self) {
        if self.arp_clock.is_armed() {
            self.arp_clock.cancel();
            log::debug!(target: "arp", "arpeggiator idle");
        }
    }

    fn arp_tick(&mut self, token: u64) {
        if !self.arp_clock.is_current(token) {
            return;
        }
        let sub = step_period(self.settings.bpm) / self.settings.arp.rate_factor();
        let pitches = self.settings.arp.voice(self.held.as_slice(), self.arp_index);
        self.arp_index = self.arp_index.wrapping_add(1);
        self.strike(&pitches, gate(sub));
        self.scheduler
            .schedule(self.now + sub, Task::ArpTick { token });
    }

    // ---- settings ----

    pub fn set_bpm(&mut self, bpm: u32) {
        let bpm = bpm.clamp(*BPM_RANGE.start(), *BPM_RANGE.end());
        if bpm == self.settings.bpm {
            return;
        }
        self.settings.bpm = bpm;
        if self.is_playing {
            self.rearm_clock();
        }
        self.emit(PlaybackEvent::SettingsChanged(self.settings));
    }

    pub fn set_scale(&mut self, scale: Scale) {
        self.settings.scale = scale;
        self.reload_scale();
        self.emit(PlaybackEvent::SettingsChanged(self.settings));
    }

    pub fn set_base_octave(&mut self, base: u8) {
        self.settings.base_octave = base.min(127);
        self.reload_scale();
        self.emit(PlaybackEvent::SettingsChanged(self.settings));
    }

    fn reload_scale(&mut self) {
        self.mapping = ScaleMapping::new(self.settings.scale, self.settings.base_octave);
        self.emit(PlaybackEvent::ScaleChanged(self.mapping));
    }

    pub fn set_tie_mode(&mut self, tie_mode: bool) {
        self.settings.tie_mode = tie_mode;
        self.emit(PlaybackEvent::SettingsChanged(self.settings));
    }

    pub fn set_velocity(&mut self, velocity: u8) {
        self.settings.velocity = velocity.min(127);
        self.emit(PlaybackEvent::SettingsChanged(self.settings));
    }

    pub fn set_arp(&mut self, arp: ArpParams) {
        let was_on = self.settings.arp.mode.is_on();
        self.settings.arp = ArpParams {
            rate: arp.rate_factor(),
            octaves: arp.octave_span(),
            ..arp
        };
        self.release_direct_input(was_on);
        self.sync_arpeggiator(true);
        self.emit(PlaybackEvent::SettingsChanged(self.settings));
    }

    // ---- grid ----

    pub fn toggle_cell(&mut self, row: usize, step: usize) {
        self.grid.toggle(row, step);
        self.emit(PlaybackEvent::GridChanged(self.grid.clone()));
    }

    pub fn set_cell(&mut self, row: usize, step: usize, on: bool) {
        self.grid.set(row, step, on);
        self.emit(PlaybackEvent::GridChanged(self.grid.clone()));
    }

    pub fn clear_grid(&mut self) {
        self.grid.clear();
        self.emit(PlaybackEvent::GridChanged(self.grid.clone()));
    }

    /// Fills `note_count` random distinct cells and picks a random scale.
    pub fn randomize(&mut self, note_count: usize) {
        self.grid.randomize(note_count, &mut self.rng);
        if let Some(&scale) = Scale::ALL.choose(&mut self.rng) {
            self.settings.scale = scale;
        }
        self.emit(PlaybackEvent::GridChanged(self.grid.clone()));
        self.reload_scale();
        self.emit(PlaybackEvent::SettingsChanged(self.settings));
    }

    // ---- patterns & song ----

    pub fn save_pattern(&mut self) -> usize {
        let index = self.song.save(self.settings.pattern_settings(), &self.grid);
        log::info!(target: "song", "saved pattern {}", index);
        self.emit_song();
        index
    }

    pub fn load_pattern(&mut self, index: usize) -> Result<(), SongError> {
        if self.song.get(index).is_none() {
            return self.reject(SongError::NoSuchPattern(index));
        }
        if self.is_playing {
            self.stop();
        }
        let pattern = match self.song.select(index) {
            Ok(pattern) => pattern.clone(),
            Err(e) => return self.reject(e),
        };
        self.apply_pattern(&pattern);
        self.sync_arpeggiator(true);
        self.emit_song();
        Ok(())
    }

    pub fn delete_pattern(&mut self, index: usize) -> Result<(), SongError> {
        match self.song.remove(index) {
            Err(e) => return self.reject(e),
            Ok(Removal::Reload(pattern)) => {
                let bpm = self.settings.bpm;
                self.apply_pattern(&pattern);
                if self.is_playing && self.settings.bpm != bpm {
                    self.rearm_clock();
                }
                self.sync_arpeggiator(true);
            }
            Ok(Removal::Cleared) => self.clear_grid(),
            Ok(Removal::Kept) => {}
        }
        log::info!(target: "song", "deleted pattern {}", index);
        self.emit_song();
        Ok(())
    }

    pub fn start_song(&mut self) -> Result<(), SongError> {
        if self.song.is_playing() {
            return Ok(());
        }
        if self.song.is_empty() {
            return self.reject(SongError::NoPatterns);
        }
        if self.is_playing {
            self.stop();
        }
        let first = match self.song.begin() {
            Ok(pattern) => pattern.clone(),
            Err(e) => return self.reject(e),
        };
        log::info!(target: "song", "song start with {} patterns", self.song.len());
        self.apply_pattern(&first);
        self.emit_song();
        self.start();
        Ok(())
    }

    pub fn stop_song(&mut self) {
        self.song.stop();
        self.emit_song();
        if self.is_playing {
            self.stop();
        }
    }

    pub fn toggle_song(&mut self) -> Result<(), SongError> {
        if self.song.is_playing() {
            self.stop_song();
            Ok(())
        } else {
            self.start_song()
        }
    }

    fn advance_song(&mut self) {
        match self.song.advance() {
            Advance::Queued(index) => {
                log::debug!(target: "song", "pattern {} pending", index);
                self.emit_song();
            }
            Advance::Finished => {
                log::info!(target: "song", "song finished");
                self.emit_song();
                self.stop();
            }
        }
    }

    fn apply_pattern(&mut self, pattern: &Pattern) {
        let was_on = self.settings.arp.mode.is_on();
        self.settings.apply_pattern(&pattern.settings);
        self.release_direct_input(was_on);
        self.grid = pattern.sequence.clone();
        self.mapping = ScaleMapping::new(self.settings.scale, self.settings.base_octave);
        self.emit(PlaybackEvent::SettingsChanged(self.settings));
        self.emit(PlaybackEvent::ScaleChanged(self.mapping));
        self.emit(PlaybackEvent::GridChanged(self.grid.clone()));
    }

    // ---- observer ----

    /// Pushes the full state to the observer, e.g. for a freshly attached UI.
    pub fn publish_state(&mut self) {
        self.emit(PlaybackEvent::SettingsChanged(self.settings));
        self.emit(PlaybackEvent::ScaleChanged(self.mapping));
        self.emit(PlaybackEvent::GridChanged(self.grid.clone()));
        self.emit(PlaybackEvent::TransportChanged {
            playing: self.is_playing,
        });
        self.emit_song();
    }

    fn emit_song(&mut self) {
        let event = PlaybackEvent::SongChanged {
            names: self.song.patterns().iter().map(|p| p.name.clone()).collect(),
            current: self.song.current_index(),
            pending: self.song.pending_index(),
            playing: self.song.is_playing(),
        };
        self.emit(event);
    }

    fn reject(&mut self, error: SongError) -> Result<(), SongError> {
        log::warn!(target: "song", "{}", error);
        self.emit(PlaybackEvent::Notice(error.to_string()));
        Err(error)
    }

    fn emit(&mut self, event: PlaybackEvent) {
        if let Some(observer) = self.observer.as_mut() {
            observer.on_event(self.now, event);
        }
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}
