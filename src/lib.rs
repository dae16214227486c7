/// SEQARP - step sequencer and arpeggiator for external MIDI gear
///
/// This library provides the core components:
/// - An 8x16 grid mapped onto a scale
/// - A step clock and timer queue driving note on/off pairs
/// - An arpeggiator for held keys or sequenced steps
/// - Song mode chaining saved patterns with gapless hand-off
/// - MIDI output through midir

pub mod config;
pub mod error;
pub mod midi;
pub mod sequencer;

// Re-export commonly used types
pub use config::Config;
pub use error::{ConfigError, MidiError, SongError};
pub use midi::{midi_note_name, MidiOutputDevice, NoteMessage, NoteSink};
pub use sequencer::arpeggiator::{calculate_arp_note, ArpMode, ArpParams, ChordSet};
pub use sequencer::engine::{Sequencer, Settings};
pub use sequencer::playback::{Command, EngineObserver, PlaybackEngine, PlaybackEvent};
pub use sequencer::scale::{Scale, ScaleMapping};
pub use sequencer::song::{Pattern, PatternSettings, Song};
pub use sequencer::{step_period, Grid, ROWS, STEPS};
