/// Playback engine - runs the sequencer on its own thread and coordinates
/// commands in and events out
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::arpeggiator::ArpParams;
use super::engine::{Sequencer, Settings};
use super::scale::{Scale, ScaleMapping};
use super::Grid;
use crate::error::SongError;
use crate::midi::NoteSink;

/// How long the thread blocks on commands when nothing is scheduled.
const IDLE_WAIT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The step being sounded.
    StepAdvanced(usize),
    NoteOn(u8, u8), // note, velocity
    NoteOff(u8),    // note
    TransportChanged {
        playing: bool,
    },
    GridChanged(Grid),
    ScaleChanged(ScaleMapping),
    SettingsChanged(Settings),
    SongChanged {
        names: Vec<String>,
        current: usize,
        pending: Option<usize>,
        playing: bool,
    },
    /// A rejected user action, worth showing.
    Notice(String),
}

/// Redraw/notification hook handed to the engine at construction.
pub trait EngineObserver: Send {
    fn on_event(&mut self, at: Duration, event: PlaybackEvent);
}

impl EngineObserver for Sender<PlaybackEvent> {
    fn on_event(&mut self, _at: Duration, event: PlaybackEvent) {
        // Receiver gone means the UI is shutting down.
        let _ = self.send(event);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    TogglePlay,
    Stop,
    SetBpm(u32),
    SetScale(Scale),
    SetBaseOctave(u8),
    SetTieMode(bool),
    SetVelocity(u8),
    SetArp(ArpParams),
    ToggleCell { row: usize, step: usize },
    ClearGrid,
    Randomize(usize),
    NoteInputOn(u8),
    NoteInputOff(u8),
    SavePattern,
    LoadPattern(usize),
    DeletePattern(usize),
    ToggleSong,
    Shutdown,
}

impl Sequencer {
    /// Runs one user command. Rejections are also reported to the observer.
    pub fn apply(&mut self, command: Command) -> Result<(), SongError> {
        match command {
            Command::TogglePlay => return self.toggle_play(),
            Command::LoadPattern(index) => return self.load_pattern(index),
            Command::DeletePattern(index) => return self.delete_pattern(index),
            Command::ToggleSong => return self.toggle_song(),
            Command::Stop if self.song().is_playing() => self.stop_song(),
            Command::Stop => self.stop(),
            Command::SetBpm(bpm) => self.set_bpm(bpm),
            Command::SetScale(scale) => self.set_scale(scale),
            Command::SetBaseOctave(base) => self.set_base_octave(base),
            Command::SetTieMode(tie) => self.set_tie_mode(tie),
            Command::SetVelocity(velocity) => self.set_velocity(velocity),
            Command::SetArp(arp) => self.set_arp(arp),
            Command::ToggleCell { row, step } => self.toggle_cell(row, step),
            Command::ClearGrid => self.clear_grid(),
            Command::Randomize(count) => self.randomize(count),
            Command::NoteInputOn(pitch) => self.note_input_on(pitch),
            Command::NoteInputOff(pitch) => self.note_input_off(pitch),
            Command::SavePattern => {
                self.save_pattern();
            }
            Command::Shutdown => {}
        }
        Ok(())
    }
}

pub struct PlaybackEngine {
    sender: Sender<Command>,
    receiver: Receiver<PlaybackEvent>,
    handle: Option<JoinHandle<()>>,
}

impl PlaybackEngine {
    pub fn new(settings: Settings, sink: Box<dyn NoteSink>) -> Self {
        let (sender, commands) = channel();
        let (events, receiver) = channel();

        let mut sequencer = Sequencer::new(settings)
            .with_sink(sink)
            .with_observer(Box::new(events));
        sequencer.publish_state();

        let handle = thread::Builder::new()
            .name("seqarp-playback".into())
            .spawn(move || run(sequencer, commands))
            .map_err(|e| log::error!(target: "transport", "playback thread failed to start: {}", e))
            .ok();

        Self {
            sender,
            receiver,
            handle,
        }
    }

    pub fn send(&self, command: Command) {
        if self.sender.send(command).is_err() {
            log::warn!(target: "transport", "playback thread is gone, command dropped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn poll_events(&self) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        let _ = self.sender.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Single execution context: timer tasks and commands interleave here, so the
/// sequencer is never touched from two places at once.
fn run(mut sequencer: Sequencer, commands: Receiver<Command>) {
    let epoch = Instant::now();
    loop {
        sequencer.advance_to(epoch.elapsed());
        let wait = sequencer
            .next_due()
            .map(|due| due.saturating_sub(epoch.elapsed()))
            .unwrap_or(IDLE_WAIT);

        match commands.recv_timeout(wait) {
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(command) => {
                sequencer.advance_to(epoch.elapsed());
                if let Err(e) = sequencer.apply(command) {
                    log::debug!(target: "transport", "command rejected: {}", e);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
    if sequencer.is_playing() {
        sequencer.stop();
    }
    log::info!(target: "transport", "playback thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Capture(Vec<Vec<u8>>);

    impl NoteSink for Capture {
        fn send(&mut self, bytes: &[u8]) {
            self.0.push(bytes.to_vec());
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_apply_routes_commands() {
        let mut seq = Sequencer::default();
        seq.apply(Command::ToggleCell { row: 2, step: 3 }).unwrap();
        seq.apply(Command::SetBpm(90)).unwrap();
        seq.apply(Command::SetTieMode(true)).unwrap();
        assert!(seq.grid().get(2, 3));
        assert_eq!(seq.settings().bpm, 90);
        assert!(seq.settings().tie_mode);

        seq.apply(Command::TogglePlay).unwrap();
        assert!(seq.is_playing());
        seq.apply(Command::Stop).unwrap();
        assert!(!seq.is_playing());
    }

    #[test]
    fn test_rejected_command_leaves_state() {
        let mut seq = Sequencer::default();
        assert_eq!(seq.apply(Command::ToggleSong), Err(SongError::NoPatterns));
        assert!(!seq.is_playing());
        assert_eq!(
            seq.apply(Command::DeletePattern(3)),
            Err(SongError::NoSuchPattern(3))
        );
        assert!(seq.song().is_empty());
    }

    #[test]
    fn test_sink_receives_protocol_bytes() {
        let capture = Arc::new(Mutex::new(Capture::default()));
        let mut seq = Sequencer::default().with_sink(Box::new(capture.clone()));
        seq.set_cell(7, 0, true);
        seq.start();
        seq.advance_to(ms(120));

        let sent = capture.lock().unwrap().0.clone();
        assert_eq!(sent, vec![vec![0x90, 60, 100], vec![0x80, 60, 0]]);
    }

    #[test]
    fn test_missing_sink_is_silent() {
        let mut seq = Sequencer::default();
        seq.set_cell(7, 0, true);
        seq.start();
        seq.advance_to(ms(1000));
        assert_eq!(seq.current_step(), 9);
    }

    #[test]
    fn test_engine_thread_publishes_state_and_shuts_down() {
        let engine = PlaybackEngine::new(Settings::default(), Box::new(Capture::default()));
        engine.send(Command::ToggleCell { row: 0, step: 0 });

        let mut events = Vec::new();
        for _ in 0..100 {
            events.extend(engine.poll_events());
            if events
                .iter()
                .any(|e| matches!(e, PlaybackEvent::GridChanged(g) if g.get(0, 0)))
            {
                break;
            }
            thread::sleep(ms(10));
        }
        assert!(events
            .iter()
            .any(|e| matches!(e, PlaybackEvent::SettingsChanged(_))));
        assert!(events
            .iter()
            .any(|e| matches!(e, PlaybackEvent::GridChanged(g) if g.get(0, 0))));
        drop(engine);
    }
}
