use serde::Deserialize;

use crate::session::SpeakerInfo;

/// Classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum IngressFrame {
    /// A bot-side subscriber announcing itself; not an audio source
    Register(Registration),
    /// Speaker metadata; never forwarded to the provider
    Speaker(SpeakerInfo),
    /// Raw PCM audio
    Pcm,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Registration {
    #[serde(rename = "type")]
    kind: String,
    pub client: String,
}

impl Registration {
    pub fn is_bot(&self) -> bool {
        self.client == "bot"
    }
}

/// Classify one inbound payload.
///
/// Attempts a JSON parse of a UTF-8 view of the bytes; a payload that
/// parses and matches one of the structured shapes is treated as such,
/// anything else is PCM. The probe is cheap because PCM frames are
/// binary and virtually never parse as JSON; malformed JSON falls
/// through to PCM, which preserves forward compatibility.
pub fn classify(payload: &[u8]) -> IngressFrame {
    let Ok(text) = std::str::from_utf8(payload) else {
        return IngressFrame::Pcm;
    };

    if let Ok(registration) = serde_json::from_str::<Registration>(text) {
        if registration.kind == "register" {
            return IngressFrame::Register(registration);
        }
    }

    if let Ok(speakers) = serde_json::from_str::<Vec<SpeakerInfo>>(text) {
        if let Some(first) = speakers.into_iter().next() {
            return IngressFrame::Speaker(first);
        }
    }

    IngressFrame::Pcm
}
