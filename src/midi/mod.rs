/// MIDI output using midir
use std::sync::{Arc, Mutex};

use midir::{MidiOutput, MidiOutputConnection};

use crate::error::MidiError;

pub const DEFAULT_VELOCITY: u8 = 100;

const NOTE_ON: u8 = 0x90;
const NOTE_OFF: u8 = 0x80;
const CLIENT_NAME: &str = "SEQARP MIDI Output";

/// The two messages the sound-producing device understands. Channel 1 only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteMessage {
    NoteOn { pitch: u8, velocity: u8 },
    NoteOff { pitch: u8 },
}

impl NoteMessage {
    pub fn to_bytes(self) -> [u8; 3] {
        match self {
            NoteMessage::NoteOn { pitch, velocity } => [NOTE_ON, pitch & 0x7f, velocity & 0x7f],
            NoteMessage::NoteOff { pitch } => [NOTE_OFF, pitch & 0x7f, 0],
        }
    }
}

/// Fire-and-forget byte transport to a device.
///
/// Implementations never report failure back to the engine; a missing or
/// broken device simply swallows the message.
pub trait NoteSink: Send {
    fn send(&mut self, bytes: &[u8]);
}

impl<T: NoteSink> NoteSink for Arc<Mutex<T>> {
    fn send(&mut self, bytes: &[u8]) {
        match self.lock() {
            Ok(mut sink) => sink.send(bytes),
            Err(_) => log::warn!(target: "midi", "output lock poisoned, message dropped"),
        }
    }
}

pub struct MidiOutputDevice {
    connection: Option<MidiOutputConnection>,
    port_name: Option<String>,
}

impl MidiOutputDevice {
    pub fn new() -> Self {
        Self {
            connection: None,
            port_name: None,
        }
    }

    pub fn available_ports() -> Vec<String> {
        if let Ok(midi_out) = MidiOutput::new(CLIENT_NAME) {
            midi_out
                .ports()
                .iter()
                .filter_map(|p| midi_out.port_name(p).ok())
                .collect()
        } else {
            vec![]
        }
    }

    pub fn connect(&mut self, port_index: usize) -> Result<(), MidiError> {
        let midi_out =
            MidiOutput::new(CLIENT_NAME).map_err(|e| MidiError::Init(e.to_string()))?;

        let ports = midi_out.ports();
        let port = ports
            .get(port_index)
            .ok_or(MidiError::InvalidPort(port_index))?;
        let name = midi_out
            .port_name(port)
            .unwrap_or_else(|_| format!("MIDI Device {}", port_index));

        let connection = midi_out
            .connect(port, "seqarp")
            .map_err(|e| MidiError::Connect(e.to_string()))?;

        log::info!(target: "midi", "MIDI output selected: {}", name);
        self.connection = Some(connection);
        self.port_name = Some(name);
        Ok(())
    }

    /// Connects to the first port whose name contains `needle`, or the first
    /// port at all when `needle` is empty.
    pub fn connect_matching(&mut self, needle: &str) -> Result<(), MidiError> {
        let index = Self::available_ports()
            .iter()
            .position(|name| needle.is_empty() || name.contains(needle))
            .ok_or_else(|| MidiError::NoMatchingPort(needle.to_string()))?;
        self.connect(index)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    pub fn send_message(&mut self, message: NoteMessage) -> Result<(), MidiError> {
        if let Some(ref mut conn) = self.connection {
            conn.send(&message.to_bytes())
                .map_err(|e| MidiError::Send(e.to_string()))?;
        }
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close();
        }
        self.port_name = None;
    }
}

impl NoteSink for MidiOutputDevice {
    fn send(&mut self, bytes: &[u8]) {
        if let Some(ref mut conn) = self.connection {
            if let Err(e) = conn.send(bytes) {
                log::warn!(target: "midi", "send failed: {}", e);
            }
        }
    }
}

impl Default for MidiOutputDevice {
    fn default() -> Self {
        Self::new()
    }
}

pub fn midi_note_name(note: u8) -> String {
    let note_names = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
    let octave = (note / 12) as i32 - 1;
    let note_index = (note % 12) as usize;
    format!("{}{}", note_names[note_index], octave)
}
