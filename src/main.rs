#[cfg(feature = "gui")]
use eframe::egui;

#[cfg(feature = "gui")]
use std::sync::{Arc, Mutex};

#[cfg(feature = "gui")]
use seqarp::{
    midi_note_name, sequencer::engine::BPM_RANGE, sequencer::song::pattern_name,
    sequencer::step_period_ms, ArpMode, ArpParams, ChordSet, Command, Config, Grid, MidiError,
    MidiOutputDevice, PlaybackEngine, PlaybackEvent, Scale, ScaleMapping, Settings, ROWS, STEPS,
};

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

#[cfg(feature = "gui")]
fn main() -> Result<(), eframe::Error> {
    init_logging();
    let config = Config::load();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([960.0, 820.0])
            .with_title("SEQARP - Step Sequencer & Arpeggiator"),
        ..Default::default()
    };

    eframe::run_native(
        "SEQARP",
        options,
        Box::new(move |_cc| Ok(Box::new(SequencerApp::new(&config)))),
    )
}

#[cfg(not(feature = "gui"))]
fn main() {
    init_logging();
    log::error!("This binary requires the 'gui' feature to be enabled");
    std::process::exit(1);
}

#[cfg(feature = "gui")]
const BASE_OCTAVES: [u8; 5] = [36, 48, 60, 72, 84];

#[cfg(feature = "gui")]
struct SequencerApp {
    engine: PlaybackEngine,
    midi_output: Arc<Mutex<MidiOutputDevice>>,

    // Mirrors of engine state, refreshed from events
    grid: Grid,
    mapping: ScaleMapping,
    settings: Settings,
    is_playing: bool,
    current_visual_step: usize,
    song_names: Vec<String>,
    song_current: usize,
    song_pending: Option<usize>,
    song_playing: bool,
    notice: Option<String>,

    // UI state
    available_midi_ports: Vec<String>,
    selected_port: Option<usize>,
    random_amount: usize,
    pressed_key: Option<u8>,
}

#[cfg(feature = "gui")]
impl SequencerApp {
    fn new(config: &Config) -> Self {
        let available_midi_ports = MidiOutputDevice::available_ports();
        let mut device = MidiOutputDevice::new();
        let mut selected_port = None;
        if !available_midi_ports.is_empty() {
            match device.connect_matching(config.midi_port()) {
                Ok(()) => {
                    selected_port = available_midi_ports
                        .iter()
                        .position(|name| Some(name.as_str()) == device.port_name());
                }
                Err(e) => log::warn!(target: "midi", "{}", e),
            }
        }

        let midi_output = Arc::new(Mutex::new(device));
        let settings = config.settings();
        let engine = PlaybackEngine::new(settings, Box::new(midi_output.clone()));

        Self {
            engine,
            midi_output,
            grid: Grid::new(),
            mapping: ScaleMapping::new(settings.scale, settings.base_octave),
            settings,
            is_playing: false,
            current_visual_step: 0,
            song_names: Vec::new(),
            song_current: 0,
            song_pending: None,
            song_playing: false,
            notice: None,
            available_midi_ports,
            selected_port,
            random_amount: config.random_amount(),
            pressed_key: None,
        }
    }

    fn handle_playback_events(&mut self) {
        for event in self.engine.poll_events() {
            match event {
                PlaybackEvent::StepAdvanced(step) => self.current_visual_step = step,
                PlaybackEvent::NoteOn(..) | PlaybackEvent::NoteOff(_) => {}
                PlaybackEvent::TransportChanged { playing } => self.is_playing = playing,
                PlaybackEvent::GridChanged(grid) => self.grid = grid,
                PlaybackEvent::ScaleChanged(mapping) => self.mapping = mapping,
                PlaybackEvent::SettingsChanged(settings) => self.settings = settings,
                PlaybackEvent::SongChanged {
                    names,
                    current,
                    pending,
                    playing,
                } => {
                    self.song_names = names;
                    self.song_current = current;
                    self.song_pending = pending;
                    self.song_playing = playing;
                }
                PlaybackEvent::Notice(message) => self.notice = Some(message),
            }
        }
    }

    fn set_arp(&self, arp: ArpParams) {
        self.engine.send(Command::SetArp(arp));
    }

    fn midi_port_ui(&mut self, ui: &mut egui::Ui) {
        let mut selected_port_changed = None;
        ui.horizontal(|ui| {
            ui.label("MIDI Output:");
            if self.available_midi_ports.is_empty() {
                ui.label("No MIDI ports available");
            } else {
                egui::ComboBox::from_id_source("midi_port")
                    .selected_text(
                        self.selected_port
                            .map(|i| self.available_midi_ports[i].as_str())
                            .unwrap_or("Select port..."),
                    )
                    .show_ui(ui, |ui| {
                        for (i, port_name) in self.available_midi_ports.iter().enumerate() {
                            if ui
                                .selectable_label(self.selected_port == Some(i), port_name)
                                .clicked()
                            {
                                selected_port_changed = Some(i);
                            }
                        }
                    });
            }
        });

        if let Some(port_idx) = selected_port_changed {
            let result = match self.midi_output.lock() {
                Ok(mut device) => device.connect(port_idx),
                Err(_) => Err(MidiError::Init("output lock poisoned".into())),
            };
            match result {
                Ok(()) => self.selected_port = Some(port_idx),
                Err(e) => self.notice = Some(e.to_string()),
            }
        }
    }

    fn transport_ui(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let label = if self.is_playing && !self.song_playing {
                "⏸ Pause"
            } else {
                "▶ Play"
            };
            if ui.button(label).clicked() {
                self.engine.send(Command::TogglePlay);
            }
            if ui.button("⏹ Stop").clicked() {
                self.engine.send(Command::Stop);
            }

            let mut tie = self.settings.tie_mode;
            let tie_label = if tie { "TIE: ON" } else { "TIE: OFF" };
            if ui.toggle_value(&mut tie, tie_label).changed() {
                self.engine.send(Command::SetTieMode(tie));
            }

            ui.add_space(20.0);
            ui.label("BPM:");
            let mut bpm = self.settings.bpm;
            if ui
                .add(egui::Slider::new(&mut bpm, BPM_RANGE))
                .changed()
            {
                self.engine.send(Command::SetBpm(bpm));
            }
            ui.label(format!("{:.1} ms/step", step_period_ms(self.settings.bpm)));

            ui.label("Velocity:");
            let mut velocity = self.settings.velocity;
            if ui.add(egui::Slider::new(&mut velocity, 1..=127)).changed() {
                self.engine.send(Command::SetVelocity(velocity));
            }
        });

        ui.horizontal(|ui| {
            ui.label("Scale:");
            egui::ComboBox::from_id_source("scale")
                .selected_text(self.settings.scale.name())
                .show_ui(ui, |ui| {
                    for scale in Scale::ALL {
                        if ui
                            .selectable_label(self.settings.scale == scale, scale.name())
                            .clicked()
                        {
                            self.engine.send(Command::SetScale(scale));
                        }
                    }
                });

            ui.label("Base:");
            egui::ComboBox::from_id_source("base_octave")
                .selected_text(midi_note_name(self.settings.base_octave))
                .show_ui(ui, |ui| {
                    for base in BASE_OCTAVES {
                        if ui
                            .selectable_label(self.settings.base_octave == base, midi_note_name(base))
                            .clicked()
                        {
                            self.engine.send(Command::SetBaseOctave(base));
                        }
                    }
                });

            ui.add_space(20.0);
            if ui.button("Clear").clicked() {
                self.engine.send(Command::ClearGrid);
            }
            if ui.button("Randomize").clicked() {
                self.engine.send(Command::Randomize(self.random_amount));
            }
            ui.add(egui::Slider::new(&mut self.random_amount, 1..=ROWS * STEPS).text("notes"));
        });
    }

    fn arp_ui(&mut self, ui: &mut egui::Ui) {
        let arp = self.settings.arp;
        ui.horizontal(|ui| {
            ui.label("Arp:");
            egui::ComboBox::from_id_source("arp_mode")
                .selected_text(arp.mode.name())
                .show_ui(ui, |ui| {
                    for mode in ArpMode::ALL {
                        if ui.selectable_label(arp.mode == mode, mode.name()).clicked() {
                            self.set_arp(ArpParams { mode, ..arp });
                        }
                    }
                });

            ui.label("Rate:");
            egui::ComboBox::from_id_source("arp_rate")
                .selected_text(format!("x{}", arp.rate))
                .show_ui(ui, |ui| {
                    for rate in 1..=4 {
                        if ui
                            .selectable_label(arp.rate == rate, format!("x{}", rate))
                            .clicked()
                        {
                            self.set_arp(ArpParams { rate, ..arp });
                        }
                    }
                });

            ui.label("Chords:");
            egui::ComboBox::from_id_source("arp_chords")
                .selected_text(arp.chords.name())
                .show_ui(ui, |ui| {
                    for chords in ChordSet::ALL {
                        if ui.selectable_label(arp.chords == chords, chords.name()).clicked() {
                            self.set_arp(ArpParams { chords, ..arp });
                        }
                    }
                });

            ui.label("Octaves:");
            egui::ComboBox::from_id_source("arp_octaves")
                .selected_text(arp.octaves.to_string())
                .show_ui(ui, |ui| {
                    for octaves in 1..=4 {
                        if ui
                            .selectable_label(arp.octaves == octaves, octaves.to_string())
                            .clicked()
                        {
                            self.set_arp(ArpParams { octaves, ..arp });
                        }
                    }
                });
        });
    }

    fn grid_ui(&mut self, ui: &mut egui::Ui) {
        ui.label(format!("16-Step Sequencer ({})", self.settings.scale.name()));
        ui.add_space(5.0);

        for row in 0..ROWS {
            ui.horizontal(|ui| {
                ui.add_sized([40.0, 30.0], egui::Label::new(midi_note_name(self.mapping.pitch(row))));
                for step in 0..STEPS {
                    let is_current = self.is_playing && self.current_visual_step == step;
                    let step_enabled = self.grid.get(row, step);

                    let button = egui::Button::new("")
                        .min_size(egui::vec2(42.0, 30.0))
                        .fill(if step_enabled && is_current {
                            egui::Color32::from_rgb(120, 220, 120)
                        } else if step_enabled {
                            egui::Color32::from_rgb(60, 60, 200)
                        } else if is_current {
                            egui::Color32::from_rgb(70, 90, 70)
                        } else if step % 4 == 0 {
                            egui::Color32::from_rgb(55, 55, 55)
                        } else {
                            egui::Color32::from_rgb(40, 40, 40)
                        });

                    if ui.add(button).clicked() {
                        self.engine.send(Command::ToggleCell { row, step });
                    }
                }
            });
        }
    }

    fn keyboard_ui(&mut self, ui: &mut egui::Ui) {
        let base = self.settings.base_octave;
        let mut down = None;
        ui.horizontal(|ui| {
            for offset in 0..=12u8 {
                let Some(pitch) = base.checked_add(offset).filter(|&p| p <= 127) else {
                    break;
                };
                let black = matches!(offset % 12, 1 | 3 | 6 | 8 | 10);
                let held = self.pressed_key == Some(pitch);
                let key = egui::Button::new(midi_note_name(pitch))
                    .min_size(egui::vec2(48.0, if black { 50.0 } else { 70.0 }))
                    .fill(if held {
                        egui::Color32::from_rgb(200, 160, 60)
                    } else if black {
                        egui::Color32::from_rgb(20, 20, 20)
                    } else {
                        egui::Color32::from_rgb(90, 90, 90)
                    });
                if ui.add(key).is_pointer_button_down_on() {
                    down = Some(pitch);
                }
            }
        });

        if down != self.pressed_key {
            if let Some(pitch) = self.pressed_key {
                self.engine.send(Command::NoteInputOff(pitch));
            }
            if let Some(pitch) = down {
                self.engine.send(Command::NoteInputOn(pitch));
            }
            self.pressed_key = down;
        }
    }

    fn song_ui(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let save_label = format!("SAVE {}", pattern_name(self.song_names.len()).to_uppercase());
            if ui.button(save_label).clicked() {
                self.engine.send(Command::SavePattern);
            }
            let song_label = if self.song_playing { "STOP SONG" } else { "PLAY SONG" };
            if ui.button(song_label).clicked() {
                self.engine.send(Command::ToggleSong);
            }
        });

        ui.horizontal_wrapped(|ui| {
            for (index, name) in self.song_names.iter().enumerate() {
                let is_current = index == self.song_current;
                let is_pending = self.song_pending == Some(index);
                let text = if is_pending {
                    format!("{} …", name)
                } else {
                    name.clone()
                };
                let tile = egui::Button::new(text).fill(if is_current {
                    egui::Color32::from_rgb(60, 120, 60)
                } else {
                    egui::Color32::from_rgb(45, 45, 60)
                });
                if ui.add(tile).clicked() {
                    self.engine.send(Command::LoadPattern(index));
                }
                if ui.small_button("✕").clicked() {
                    self.engine.send(Command::DeletePattern(index));
                }
            }
        });
    }
}

#[cfg(feature = "gui")]
impl eframe::App for SequencerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint();

        self.handle_playback_events();

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("SEQARP - Step Sequencer");
            ui.add_space(10.0);

            self.midi_port_ui(ui);
            ui.add_space(10.0);
            self.transport_ui(ui);
            self.arp_ui(ui);

            ui.add_space(20.0);
            self.grid_ui(ui);

            ui.add_space(20.0);
            self.keyboard_ui(ui);

            ui.separator();
            self.song_ui(ui);

            // Info
            ui.separator();
            ui.label("Click steps to enable/disable them");
            if let Some(notice) = &self.notice {
                ui.colored_label(egui::Color32::LIGHT_RED, notice);
            }
            let connected = self
                .midi_output
                .lock()
                .map(|device| device.is_connected())
                .unwrap_or(false);
            if !connected {
                ui.colored_label(
                    egui::Color32::YELLOW,
                    "⚠ No MIDI output connected - notes are swallowed",
                );
            }
        });
    }
}
