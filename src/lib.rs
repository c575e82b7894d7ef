pub mod bridge;
pub mod config;
pub mod control;
pub mod http;
pub mod ingress;
pub mod provider;
pub mod recording;
pub mod session;
pub mod sink;

pub use config::{Config, SessionMode};
pub use control::{ControlDispatcher, ControlEvent, ControlEventKind};
pub use http::{create_router, AppState};
pub use session::{SessionOrchestrator, SessionState, SpeakerInfo, TranscriptEvent};
pub use sink::{ObserverEvent, TranscriptEnvelope, TranscriptSink};
