//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `StreamSession`: One client's lifecycle and push loop
//! - `SessionRegistry`: Live session directory and shutdown broadcast

mod registry;
mod session;

pub use registry::{RegistryStats, SessionHandle, SessionRegistry, SessionSummary};
pub use session::{
    SHUTDOWN_NOTICE, SessionConfig, SessionError, StreamContext, StreamSession,
};
