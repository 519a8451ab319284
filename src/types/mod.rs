//! Data types for the MCP control plane
//!
//! Sessions, history samples, broadcast events and the error taxonomy.

mod error;
mod event;
mod history;
mod session;

pub use error::{ControlError, ControlResult};
pub use event::{ConnectionEvent, EventMessage};
pub use history::HistorySample;
pub use session::{Session, SessionStatus};
