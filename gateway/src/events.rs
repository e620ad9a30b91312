//! Shared event types for the GymGate hub.
//!
//! Events flow in from the loopback bridge as one JSON object per
//! connection and flow out to browsers as WebSocket text frames. The
//! wire format is a tagged union on the `type` field:
//!
//! ```json
//! {"type":"play_audio","sound":"count","count":7}
//! {"type":"connected","message":"ok"}
//! ```

use serde::{Deserialize, Serialize};

/// Sound effect identifier carried by a play-audio event.
///
/// A payload that omits `sound` defaults to [`Sound::Count`]; anything
/// outside this set fails deserialization and is dropped by the bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sound {
    #[default]
    Count,
    Milestone,
    Succeed,
}

/// A message exchanged with WebSocket clients, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Instructs connected browsers to play a sound effect.
    PlayAudio {
        #[serde(default)]
        sound: Sound,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<i64>,
    },
    /// Acknowledgment sent once after a successful WebSocket registration.
    Connected { message: String },
}

impl Event {
    /// Creates a play-audio event.
    pub fn play_audio(sound: Sound, count: Option<i64>) -> Self {
        Self::PlayAudio { sound, count }
    }

    /// The acknowledgment sent to a freshly registered client.
    pub fn connected() -> Self {
        Self::Connected {
            message: "ok".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_audio_serializes_with_count() {
        let event = Event::play_audio(Sound::Count, Some(7));
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"play_audio","sound":"count","count":7}"#);
    }

    #[test]
    fn play_audio_omits_absent_count() {
        let event = Event::play_audio(Sound::Succeed, None);
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"play_audio","sound":"succeed"}"#);
    }

    #[test]
    fn connected_ack_serializes() {
        let json = serde_json::to_string(&Event::connected()).unwrap();
        assert_eq!(json, r#"{"type":"connected","message":"ok"}"#);
    }

    #[test]
    fn play_audio_deserializes_all_sounds() {
        for (name, sound) in [
            ("count", Sound::Count),
            ("milestone", Sound::Milestone),
            ("succeed", Sound::Succeed),
        ] {
            let json = format!(r#"{{"type":"play_audio","sound":"{name}"}}"#);
            let event: Event = serde_json::from_str(&json).unwrap();
            assert_eq!(event, Event::play_audio(sound, None));
        }
    }

    #[test]
    fn missing_sound_defaults_to_count() {
        let event: Event = serde_json::from_str(r#"{"type":"play_audio","count":3}"#).unwrap();
        assert_eq!(event, Event::play_audio(Sound::Count, Some(3)));
    }

    #[test]
    fn unknown_sound_is_rejected() {
        let result = serde_json::from_str::<Event>(r#"{"type":"play_audio","sound":"gong"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_type_is_rejected() {
        let result = serde_json::from_str::<Event>(r#"{"type":"stop_audio"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn round_trip_preserves_event() {
        let event = Event::play_audio(Sound::Milestone, Some(10));
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
