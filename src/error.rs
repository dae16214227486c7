/// Error types for the sequencer library
use thiserror::Error;

/// Song commands the engine refuses to carry out. State is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SongError {
    #[error("No patterns saved to play")]
    NoPatterns,

    #[error("Cannot delete patterns while song play is active")]
    DeleteWhilePlaying,

    #[error("No pattern at index {0}")]
    NoSuchPattern(usize),

    #[error("Stop song mode first")]
    SongActive,
}

#[derive(Debug, Error)]
pub enum MidiError {
    #[error("Failed to create MIDI output: {0}")]
    Init(String),

    #[error("Invalid port index {0}")]
    InvalidPort(usize),

    #[error("No MIDI port matching '{0}'")]
    NoMatchingPort(String),

    #[error("Failed to connect: {0}")]
    Connect(String),

    #[error("Failed to send: {0}")]
    Send(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed config: {0}")]
    Parse(#[from] toml::de::Error),
}
