use std::sync::{Arc, Mutex};
use std::time::Duration;

use seqarp::{
    Command, EngineObserver, Grid, NoteSink, Pattern, PlaybackEvent, Scale, Sequencer, ROWS,
    STEPS,
};

#[derive(Default)]
struct Wire(Vec<Vec<u8>>);

impl NoteSink for Wire {
    fn send(&mut self, bytes: &[u8]) {
        self.0.push(bytes.to_vec());
    }
}

type Log = Arc<Mutex<Vec<(Duration, PlaybackEvent)>>>;

struct Recorder(Log);

impl EngineObserver for Recorder {
    fn on_event(&mut self, at: Duration, event: PlaybackEvent) {
        self.0.lock().unwrap().push((at, event));
    }
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn rig() -> (Sequencer, Arc<Mutex<Wire>>, Log) {
    let wire = Arc::new(Mutex::new(Wire::default()));
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let seq = Sequencer::default()
        .with_sink(Box::new(wire.clone()))
        .with_observer(Box::new(Recorder(log.clone())))
        .with_seed(3);
    (seq, wire, log)
}

/// Pattern A: C4 on the downbeat at 120 bpm. Pattern B: Bb4 (minor) at 60 bpm.
fn two_pattern_song(seq: &mut Sequencer) {
    seq.apply(Command::ToggleCell { row: ROWS - 1, step: 0 })
        .unwrap();
    seq.apply(Command::SavePattern).unwrap();

    seq.apply(Command::ClearGrid).unwrap();
    seq.apply(Command::ToggleCell { row: 1, step: 0 }).unwrap();
    seq.apply(Command::SetScale(Scale::Minor)).unwrap();
    seq.apply(Command::SetBpm(60)).unwrap();
    seq.apply(Command::SavePattern).unwrap();
}

#[test]
fn song_plays_both_patterns_and_stops_on_the_wire() {
    let (mut seq, wire, log) = rig();
    two_pattern_song(&mut seq);

    seq.apply(Command::ToggleSong).unwrap();
    assert!(seq.is_playing());
    assert_eq!(seq.settings().bpm, 120);

    // 16 steps at 125ms, then 16 at 250ms; the song stops on B's last step.
    seq.advance_to(ms(2000));
    assert_eq!(seq.settings().bpm, 60);
    assert_eq!(seq.song().current_index(), 1);
    seq.advance_to(ms(6000));
    assert!(!seq.is_playing());
    assert!(!seq.song().is_playing());

    let sent = wire.lock().unwrap().0.clone();
    assert_eq!(
        &sent[..4],
        &[
            vec![0x90, 60, 100],
            vec![0x80, 60, 0],
            vec![0x90, 70, 100],
            vec![0x80, 70, 0],
        ]
    );
    assert_eq!(sent.len(), 4 + 128);
    assert!(sent[4..].iter().all(|msg| msg[0] == 0x80));

    let log = log.lock().unwrap();
    let on_70: Vec<Duration> = log
        .iter()
        .filter(|(_, e)| *e == PlaybackEvent::NoteOn(70, 100))
        .map(|(t, _)| *t)
        .collect();
    assert_eq!(on_70, vec![ms(2000)]);
    let stopped_at = log
        .iter()
        .find(|(_, e)| *e == PlaybackEvent::TransportChanged { playing: false })
        .map(|(t, _)| *t);
    assert_eq!(stopped_at, Some(ms(5750)));
}

#[test]
fn loading_a_pattern_stops_playback_and_restores_it() {
    let (mut seq, _wire, _log) = rig();
    two_pattern_song(&mut seq);

    seq.apply(Command::TogglePlay).unwrap();
    seq.advance_to(ms(300));
    seq.apply(Command::LoadPattern(0)).unwrap();

    assert!(!seq.is_playing());
    assert_eq!(seq.settings().bpm, 120);
    assert_eq!(seq.settings().scale, Scale::Major);
    assert!(seq.grid().get(ROWS - 1, 0));
    assert!(!seq.grid().get(1, 0));
    assert_eq!(seq.song().current_index(), 0);
}

#[test]
fn song_commands_rejected_while_song_plays() {
    let (mut seq, _wire, log) = rig();
    two_pattern_song(&mut seq);
    seq.apply(Command::ToggleSong).unwrap();

    assert!(seq.apply(Command::TogglePlay).is_err());
    assert!(seq.apply(Command::DeletePattern(0)).is_err());
    assert_eq!(seq.song().len(), 2);

    let notices = log
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, e)| matches!(e, PlaybackEvent::Notice(_)))
        .count();
    assert_eq!(notices, 2);

    // Stop during a song ends the song too.
    seq.apply(Command::Stop).unwrap();
    assert!(!seq.song().is_playing());
    assert!(!seq.is_playing());
}

#[test]
fn deleting_renames_later_patterns() {
    let (mut seq, _wire, _log) = rig();
    for _ in 0..3 {
        seq.apply(Command::SavePattern).unwrap();
    }
    seq.apply(Command::DeletePattern(0)).unwrap();

    let names: Vec<&str> = seq
        .song()
        .patterns()
        .iter()
        .map(|p| p.name.as_str())
        .collect();
    assert_eq!(names, vec!["Pattern A", "Pattern B"]);
}

#[test]
fn saved_pattern_has_the_documented_shape() {
    let (mut seq, _wire, _log) = rig();
    two_pattern_song(&mut seq);

    let value = serde_json::to_value(seq.song().get(1).unwrap()).unwrap();
    assert_eq!(value["name"], "Pattern B");

    let settings = &value["settings"];
    assert_eq!(settings["bpm"], 60);
    assert_eq!(settings["scaleKey"], "minor");
    assert_eq!(settings["baseOctave"], 60);
    assert_eq!(settings["arpMode"], "off");
    assert_eq!(settings["arpRate"], 1);
    assert_eq!(settings["arpChords"], "held_notes");
    assert_eq!(settings["arpOctaves"], 2);

    let rows = value["sequence"].as_array().unwrap();
    assert_eq!(rows.len(), ROWS);
    assert!(rows
        .iter()
        .all(|row| row.as_array().map(|r| r.len()) == Some(STEPS)));
    assert_eq!(rows[1][0], 1);
    assert_eq!(rows[0][0], 0);
}

#[test]
fn pattern_parses_from_json_and_rejects_bad_grids() {
    let mut sequence = vec![vec![0u8; STEPS]; ROWS];
    sequence[7][4] = 1;
    let json = serde_json::json!({
        "name": "Pattern A",
        "settings": {
            "bpm": 90,
            "scaleKey": "dorian",
            "baseOctave": 48,
            "arpMode": "up_down",
            "arpRate": 2,
            "arpChords": "fifth_chord",
            "arpOctaves": 1
        },
        "sequence": sequence
    });

    let pattern: Pattern = serde_json::from_value(json.clone()).unwrap();
    assert_eq!(pattern.settings.scale_key, Scale::Dorian);
    assert_eq!(pattern.settings.arp_rate, 2);
    assert!(pattern.sequence.get(7, 4));
    assert_eq!(pattern.sequence.active_count(), 1);

    let mut short = json;
    short["sequence"] = serde_json::json!([[0, 1], [1, 0]]);
    assert!(serde_json::from_value::<Pattern>(short).is_err());
    assert!(serde_json::from_str::<Grid>("[]").is_err());
}
