//! Raw MIDI byte-stream listener
//!
//! Reads a character device such as `/dev/snd/midiC1D0` and forwards
//! note-on events. Handles running status, interleaved real-time bytes
//! and SysEx blocks.

use std::path::Path;

use anyhow::{Context, Result};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::Input;

/// Decoded channel voice message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    /// Includes note-on with velocity 0
    NoteOff { channel: u8, note: u8 },
    /// Any other channel message (control change, pitch bend, ...)
    Other { status: u8 },
}

/// Incremental decoder; feed it bytes as they arrive
#[derive(Debug, Default)]
pub struct MidiDecoder {
    running_status: Option<u8>,
    data: [u8; 2],
    len: usize,
    in_sysex: bool,
}

impl MidiDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes one byte; returns a message when one completes
    pub fn push(&mut self, byte: u8) -> Option<MidiMessage> {
        // real-time bytes may appear anywhere and change nothing
        if byte >= 0xF8 {
            return None;
        }

        if byte & 0x80 != 0 {
            self.len = 0;
            match byte {
                0xF0 => {
                    self.in_sysex = true;
                    self.running_status = None;
                }
                0xF7 => self.in_sysex = false,
                // system common: cancels running status, data is ignored
                0xF1..=0xF6 => {
                    self.in_sysex = false;
                    self.running_status = None;
                }
                _ => {
                    self.in_sysex = false;
                    self.running_status = Some(byte);
                }
            }
            return None;
        }

        if self.in_sysex {
            return None;
        }
        let status = self.running_status?;

        self.data[self.len] = byte;
        self.len += 1;
        if self.len < data_len(status) {
            return None;
        }
        self.len = 0;
        Some(decode(status, self.data))
    }

    /// Decodes a whole buffer
    pub fn feed<'a>(&'a mut self, bytes: &'a [u8]) -> impl Iterator<Item = MidiMessage> + 'a {
        bytes.iter().filter_map(move |&b| self.push(b))
    }
}

fn data_len(status: u8) -> usize {
    match status & 0xF0 {
        0xC0 | 0xD0 => 1,
        _ => 2,
    }
}

fn decode(status: u8, data: [u8; 2]) -> MidiMessage {
    let channel = status & 0x0F;
    match status & 0xF0 {
        0x90 if data[1] > 0 => MidiMessage::NoteOn {
            channel,
            note: data[0],
            velocity: data[1],
        },
        0x80 | 0x90 => MidiMessage::NoteOff {
            channel,
            note: data[0],
        },
        _ => MidiMessage::Other { status },
    }
}

/// Opens the device; failing here is a startup error
pub async fn open(device: &Path) -> Result<File> {
    File::open(device)
        .await
        .with_context(|| format!("cannot open MIDI device {}", device.display()))
}

/// Forwards note-on events until the device closes or the receiver goes away
pub async fn listen(mut device: File, tx: mpsc::Sender<Input>) -> Result<()> {
    let mut decoder = MidiDecoder::new();
    let mut buf = [0u8; 256];
    info!("MIDI listener started");

    loop {
        let n = device.read(&mut buf).await.context("reading MIDI device")?;
        if n == 0 {
            info!("MIDI device closed");
            return Ok(());
        }

        for message in decoder.feed(&buf[..n]) {
            trace!(?message, "midi message");
            let MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } = message
            else {
                continue;
            };
            debug!(midi_channel = channel, note, velocity, "note on");
            if tx.send(Input::Note { note, velocity }).await.is_err() {
                return Ok(());
            }
        }
    }
}
