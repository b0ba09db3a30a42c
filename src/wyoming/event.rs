//! Wyoming event vocabulary
//!
//! The closed set of protocol events this server consumes and produces,
//! plus the JSON data blocks that ride inside them. Wire framing lives in
//! [`super::codec`]; this module only maps between typed events and the
//! `(type, data, payload)` triple the framing layer works with.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single Wyoming protocol event.
///
/// Inbound kinds drive the session state machine; `Info` and `Transcript`
/// are the only kinds this server ever writes back. Anything with an
/// unknown type string lands in `Unsupported` so the machine can ignore it
/// deliberately instead of falling through.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Capability query from the client
    Describe,

    /// Client requests a transcription for the upcoming audio stream
    Transcribe,

    /// Format declaration for the audio stream that follows
    AudioStart { rate: i64, width: i64, channels: i64 },

    /// A slice of raw PCM bytes
    AudioChunk { payload: Vec<u8> },

    /// End of the audio stream
    AudioStop,

    /// Capability description response
    Info(Info),

    /// Transcription result carrying the recognized text (possibly empty)
    Transcript { text: String },

    /// Any event type outside the vocabulary above
    Unsupported { event_type: String },
}

/// Data block of an `audio-start` event.
///
/// Values arrive unvalidated from the wire; missing fields decode as zero
/// and the session machine decides whether to accept the declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioStartData {
    #[serde(default)]
    pub rate: i64,
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub channels: i64,
}

/// Data block of a `transcript` event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptData {
    #[serde(default)]
    pub text: String,
}

/// Data block of an `info` event: the advertised speech programs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Info {
    #[serde(default)]
    pub asr: Vec<AsrProgram>,
}

/// One advertised speech-recognition program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsrProgram {
    pub name: String,
    pub description: String,
    pub attribution: Attribution,
    pub installed: bool,
    pub version: String,
    pub models: Vec<AsrModel>,
}

/// One model offered by a program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsrModel {
    pub name: String,
    pub description: String,
    pub attribution: Attribution,
    pub installed: bool,
    pub version: String,
    pub languages: Vec<String>,
}

/// Provenance metadata for a program or model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    pub name: String,
    pub url: String,
}

impl Event {
    /// Wire type string for this event
    pub fn event_type(&self) -> &str {
        match self {
            Event::Describe => "describe",
            Event::Transcribe => "transcribe",
            Event::AudioStart { .. } => "audio-start",
            Event::AudioChunk { .. } => "audio-chunk",
            Event::AudioStop => "audio-stop",
            Event::Info(_) => "info",
            Event::Transcript { .. } => "transcript",
            Event::Unsupported { event_type } => event_type,
        }
    }

    /// Build a typed event from the wire triple.
    ///
    /// Unknown type strings become `Unsupported`; a data block that fails to
    /// decode for a known type is a protocol violation and errors out.
    pub fn from_wire(
        event_type: &str,
        data: Option<Value>,
        payload: Vec<u8>,
    ) -> Result<Event, serde_json::Error> {
        let event = match event_type {
            "describe" => Event::Describe,
            "transcribe" => Event::Transcribe,
            "audio-start" => {
                let data: AudioStartData = decode_data(data)?;
                Event::AudioStart {
                    rate: data.rate,
                    width: data.width,
                    channels: data.channels,
                }
            }
            "audio-chunk" => Event::AudioChunk { payload },
            "audio-stop" => Event::AudioStop,
            "info" => Event::Info(decode_data(data)?),
            "transcript" => {
                let data: TranscriptData = decode_data(data)?;
                Event::Transcript { text: data.text }
            }
            other => Event::Unsupported {
                event_type: other.to_string(),
            },
        };
        Ok(event)
    }

    /// Decompose this event into the wire triple
    pub fn to_wire(&self) -> Result<(String, Option<Value>, Option<&[u8]>), serde_json::Error> {
        let wire = match self {
            Event::Describe | Event::Transcribe | Event::AudioStop => {
                (self.event_type().to_string(), None, None)
            }
            Event::AudioStart {
                rate,
                width,
                channels,
            } => {
                let data = AudioStartData {
                    rate: *rate,
                    width: *width,
                    channels: *channels,
                };
                ("audio-start".to_string(), Some(serde_json::to_value(data)?), None)
            }
            Event::AudioChunk { payload } => {
                ("audio-chunk".to_string(), None, Some(payload.as_slice()))
            }
            Event::Info(info) => ("info".to_string(), Some(serde_json::to_value(info)?), None),
            Event::Transcript { text } => {
                let data = TranscriptData { text: text.clone() };
                ("transcript".to_string(), Some(serde_json::to_value(data)?), None)
            }
            Event::Unsupported { event_type } => (event_type.clone(), None, None),
        };
        Ok(wire)
    }
}

/// Decode an optional data block, treating an absent block as all-defaults
fn decode_data<T: Default + serde::de::DeserializeOwned>(
    data: Option<Value>,
) -> Result<T, serde_json::Error> {
    match data {
        Some(value) => serde_json::from_value(value),
        None => Ok(T::default()),
    }
}
