//! Stand-in devices for running without a window.
use chip8::{constants::*, prelude::*};
use log::{debug, info};

use crate::config::KeyEvent;

/// Keypad driven by a script of timed key events.
pub struct ScriptedKeypad {
    state: KeyState,
    events: Vec<KeyEvent>,
    cursor: usize,
}

impl ScriptedKeypad {
    /// Events must be sorted by frame.
    pub fn new(events: Vec<KeyEvent>) -> Self {
        Self {
            state: KeyState::default(),
            events,
            cursor: 0,
        }
    }

    /// Apply every event scheduled up to and including the given frame.
    pub fn advance(&mut self, frame: u64) {
        while let Some(event) = self.events.get(self.cursor) {
            if event.frame > frame {
                break;
            }
            debug!("frame {frame}: {} {}", event.key, if event.pressed { "down" } else { "up" });
            self.state.set(event.key, event.pressed);
            self.cursor += 1;
        }
    }
}

impl Keypad for ScriptedKeypad {
    fn is_pressed(&self, key: KeyCode) -> bool {
        self.state.get(key)
    }
}

/// Buzzer that only reports its transitions to the log.
#[derive(Debug, Default)]
pub struct LogAudio {
    playing: bool,
}

impl LogAudio {
    pub fn is_playing(&self) -> bool {
        self.playing
    }
}

impl AudioSink for LogAudio {
    fn play(&mut self) {
        if !self.playing {
            info!("buzzer on");
            self.playing = true;
        }
    }

    fn stop(&mut self) {
        if self.playing {
            info!("buzzer off");
            self.playing = false;
        }
    }
}

/// Keeps the most recently presented frame.
pub struct FrameCapture {
    frame: Box<Chip8DisplayBuffer>,
    presented: usize,
}

impl Default for FrameCapture {
    fn default() -> Self {
        Self {
            frame: Box::new([false; DISPLAY_BUFFER_SIZE]),
            presented: 0,
        }
    }
}

impl FrameCapture {
    /// Number of frames presented so far.
    pub fn presented(&self) -> usize {
        self.presented
    }

    /// Number of lit pixels in the last presented frame.
    pub fn lit(&self) -> usize {
        self.frame.iter().filter(|px| **px).count()
    }
}

impl DisplaySink for FrameCapture {
    fn present(&mut self, display: &Chip8DisplayBuffer) {
        self.frame.copy_from_slice(display);
        self.presented += 1;
    }
}
