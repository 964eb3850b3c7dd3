//! Shared data types: channels, triggers and dispatch requests

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Independently addressable actuator output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channel(u8);

impl Channel {
    /// Largest channel count a `Channel` can address
    pub const MAX_COUNT: usize = u8::MAX as usize + 1;

    /// Creates a channel, checking it against the number of channels in use
    pub fn new(index: usize, channel_count: usize) -> CoreResult<Self> {
        if index >= channel_count || index >= Self::MAX_COUNT {
            return Err(CoreError::OutOfRange(format!(
                "channel {} outside 0..{}",
                index, channel_count
            )));
        }
        Ok(Self(index as u8))
    }

    /// Index of the channel on the actuation surface
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u8> for Channel {
    fn from(index: u8) -> Self {
        Self(index)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// Raw identifier carried by an incoming event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trigger {
    /// MIDI note number from the protocol listener
    Note(u8),
    /// Bare channel number typed on the manual console
    Channel(u16),
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Note(note) => write!(f, "note {}", note),
            Trigger::Channel(channel) => write!(f, "channel {}", channel),
        }
    }
}

/// Event handed to the dispatcher; consumed by the channel mapper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchRequest {
    pub trigger: Trigger,
    /// Note velocity, when the source has one
    pub intensity: Option<u8>,
    pub received_at: Instant,
}

impl DispatchRequest {
    /// Note-on event from the protocol listener
    pub fn note(note: u8, velocity: u8) -> Self {
        Self {
            trigger: Trigger::Note(note),
            intensity: Some(velocity),
            received_at: Instant::now(),
        }
    }

    /// Channel typed on the manual console
    pub fn manual(channel: u16) -> Self {
        Self {
            trigger: Trigger::Channel(channel),
            intensity: None,
            received_at: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_new() {
        let ch = Channel::new(3, 16).unwrap();
        assert_eq!(ch.index(), 3);
        assert_eq!(ch.to_string(), "ch3");
    }

    #[test]
    fn test_request_records_arrival() {
        let before = Instant::now();
        let request = DispatchRequest::note(65, 90);
        assert!(request.received_at >= before);
        assert!(request.received_at <= Instant::now());
        assert_eq!(request.intensity, Some(90));
        assert_eq!(DispatchRequest::manual(3).intensity, None);
    }

    #[test]
    fn test_channel_out_of_range() {
        assert!(Channel::new(16, 16).is_err());
        assert!(Channel::new(300, 1000).is_err());
    }

    #[test]
    fn test_trigger_display() {
        assert_eq!(Trigger::Note(60).to_string(), "note 60");
        assert_eq!(Trigger::Channel(2).to_string(), "channel 2");
    }

    #[test]
    fn test_request_constructors() {
        let req = DispatchRequest::note(64, 100);
        assert_eq!(req.trigger, Trigger::Note(64));
        assert_eq!(req.intensity, Some(100));

        let req = DispatchRequest::manual(5);
        assert_eq!(req.trigger, Trigger::Channel(5));
        assert_eq!(req.intensity, None);
    }
}
