use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The status code that opens the startup gate.
pub const STATUS_IN_CALL_NOT_RECORDING: &str = "in_call_not_recording";

/// Closed set of control event kinds delivered by the conferencing
/// platform. Anything else is rejected at the webhook boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlEventKind {
    BotJoining,
    BotInWaitingRoom,
    BotJoined,
    BotLeft,
    BotRecordingPermissionAllowed,
    BotRecordingPermissionDenied,
    RecordingStarted,
    RecordingReady,
    RecordingFailed,
    TranscriptionReady,
    TranscriptionFailed,
    MeetingEnded,
    BotStatusChange,
}

impl ControlEventKind {
    pub fn parse(name: &str) -> Option<Self> {
        use ControlEventKind::*;
        Some(match name {
            "bot.joining" => BotJoining,
            "bot.in_waiting_room" => BotInWaitingRoom,
            "bot.joined" => BotJoined,
            "bot.left" => BotLeft,
            "bot.recording_permission_allowed" => BotRecordingPermissionAllowed,
            "bot.recording_permission_denied" => BotRecordingPermissionDenied,
            "recording.started" => RecordingStarted,
            "recording.ready" => RecordingReady,
            "recording.failed" => RecordingFailed,
            "transcription.ready" => TranscriptionReady,
            "transcription.failed" => TranscriptionFailed,
            "meeting.ended" => MeetingEnded,
            "bot.status_change" => BotStatusChange,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        use ControlEventKind::*;
        match self {
            BotJoining => "bot.joining",
            BotInWaitingRoom => "bot.in_waiting_room",
            BotJoined => "bot.joined",
            BotLeft => "bot.left",
            BotRecordingPermissionAllowed => "bot.recording_permission_allowed",
            BotRecordingPermissionDenied => "bot.recording_permission_denied",
            RecordingStarted => "recording.started",
            RecordingReady => "recording.ready",
            RecordingFailed => "recording.failed",
            TranscriptionReady => "transcription.ready",
            TranscriptionFailed => "transcription.failed",
            MeetingEnded => "meeting.ended",
            BotStatusChange => "bot.status_change",
        }
    }
}

/// Raw webhook body: `{event, data, timestamp?}`.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// A decoded control event, ready for dispatch.
#[derive(Debug, Clone)]
pub struct ControlEvent {
    pub kind: ControlEventKind,
    pub bot_id: Option<String>,
    /// Status code from `bot.status_change`; either a bare string or
    /// the `code` field of a `{code, message}` object
    pub status_code: Option<String>,
    pub status_message: Option<String>,
    pub error: Option<String>,
    pub recording_url: Option<String>,
    pub transcript_url: Option<String>,
    pub data: Value,
}

impl ControlEvent {
    /// Whether this event opens the startup gate.
    pub fn opens_gate(&self) -> bool {
        self.kind == ControlEventKind::BotStatusChange
            && self.status_code.as_deref() == Some(STATUS_IN_CALL_NOT_RECORDING)
    }

    /// Whether this event ends the session without starting a bridge.
    pub fn ends_session(&self) -> bool {
        matches!(
            self.kind,
            ControlEventKind::MeetingEnded | ControlEventKind::BotRecordingPermissionDenied
        )
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unrecognized event kind: {0}")]
    UnknownKind(String),
}

/// Decode a webhook envelope into a control event.
///
/// The nested `status` of `bot.status_change` may be a plain string or
/// a `{code, message}` object; only the code is consulted downstream.
pub fn decode(envelope: WebhookEnvelope) -> Result<ControlEvent, DecodeError> {
    let kind = ControlEventKind::parse(&envelope.event)
        .ok_or_else(|| DecodeError::UnknownKind(envelope.event.clone()))?;

    let data = envelope.data;

    let bot_id = field_str(&data, "bot_id");
    let error = field_str(&data, "error");
    let recording_url = field_str(&data, "recording_url");
    let transcript_url = field_str(&data, "transcript_url");

    let (status_code, status_message) = match data.get("status") {
        Some(Value::String(code)) => (Some(code.clone()), None),
        Some(Value::Object(obj)) => (
            obj.get("code").and_then(Value::as_str).map(str::to_string),
            obj.get("message").and_then(Value::as_str).map(str::to_string),
        ),
        _ => (None, None),
    };

    Ok(ControlEvent {
        kind,
        bot_id,
        status_code,
        status_message,
        error,
        recording_url,
        transcript_url,
        data,
    })
}

fn field_str(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_string)
}
