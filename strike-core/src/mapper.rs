//! Channel mapper: external identifiers to channel indices

use crate::config::MappingConfig;
use crate::error::{CoreError, CoreResult};
use crate::types::{Channel, Trigger};

/// Highest MIDI note number
pub const MAX_NOTE: u8 = 127;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Pitch classes of the white keys
const DIATONIC: [u8; 7] = [0, 2, 4, 5, 7, 9, 11];

/// Scientific pitch name of a MIDI note (60 = "C4")
pub fn note_name(note: u8) -> String {
    let octave = note as i32 / 12 - 1;
    format!("{}{}", NOTE_NAMES[(note % 12) as usize], octave)
}

/// Whether the note is a white key
pub fn is_diatonic(note: u8) -> bool {
    DIATONIC.contains(&(note % 12))
}

/// Injective note to channel table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMapper {
    table: [Option<Channel>; MAX_NOTE as usize + 1],
    notes: Vec<u8>,
    channel_count: usize,
}

impl ChannelMapper {
    /// White keys from `low` to `high` inclusive, lowest on channel 0
    pub fn diatonic(low: u8, high: u8, channel_count: usize) -> CoreResult<Self> {
        if low > high || high > MAX_NOTE {
            return Err(CoreError::InvalidConfig(format!(
                "diatonic range {}..={} is not a valid MIDI range",
                low, high
            )));
        }
        let notes: Vec<u8> = (low..=high).filter(|n| is_diatonic(*n)).collect();
        Self::from_notes(&notes, channel_count)
    }

    /// Explicit table; channel `i` is driven by `notes[i]`
    pub fn from_notes(notes: &[u8], channel_count: usize) -> CoreResult<Self> {
        if notes.is_empty() {
            return Err(CoreError::InvalidConfig("note mapping is empty".into()));
        }
        if notes.len() > channel_count {
            return Err(CoreError::InvalidConfig(format!(
                "{} mapped notes but only {} channels",
                notes.len(),
                channel_count
            )));
        }

        let mut table = [None; MAX_NOTE as usize + 1];
        for (index, &note) in notes.iter().enumerate() {
            if note > MAX_NOTE {
                return Err(CoreError::InvalidConfig(format!(
                    "note {} is not a MIDI note",
                    note
                )));
            }
            let slot = &mut table[note as usize];
            if slot.is_some() {
                return Err(CoreError::InvalidConfig(format!(
                    "note {} ({}) mapped twice",
                    note,
                    note_name(note)
                )));
            }
            *slot = Some(Channel::new(index, channel_count)?);
        }

        Ok(Self {
            table,
            notes: notes.to_vec(),
            channel_count,
        })
    }

    /// Builds the table described by the `[mapping]` section
    pub fn from_config(mapping: &MappingConfig, channel_count: usize) -> CoreResult<Self> {
        match &mapping.notes {
            Some(notes) => Self::from_notes(notes, channel_count),
            None => Self::diatonic(mapping.low_note, mapping.high_note, channel_count),
        }
    }

    /// Channel for a note, `None` when unmapped
    pub fn lookup(&self, note: u8) -> Option<Channel> {
        self.table.get(note as usize).copied().flatten()
    }

    /// Channel for any trigger. Raw channel numbers only need to exist.
    pub fn resolve(&self, trigger: Trigger) -> Option<Channel> {
        match trigger {
            Trigger::Note(note) => self.lookup(note),
            Trigger::Channel(raw) => Channel::new(raw as usize, self.channel_count).ok(),
        }
    }

    /// Note driving a channel
    pub fn note_for(&self, channel: Channel) -> Option<u8> {
        self.notes.get(channel.index()).copied()
    }

    /// Mapped notes in channel order
    pub fn notes(&self) -> &[u8] {
        &self.notes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Channels on the surface (mapped or not)
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }
}
