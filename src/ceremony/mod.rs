//! The relying-party ceremony core: challenge sessions and the begin/finish
//! state machine for registration and authentication.

pub mod engine;
pub mod session;
pub mod types;

pub use engine::CeremonyEngine;
pub use session::{sweep_task, ChallengeSession, MemorySessionStore, SessionStore};
pub use types::{
    CeremonyError, CeremonyKind, ClientStatus, CreationChallengeOptions, RequestChallengeOptions,
    SessionToken,
};
