// Client side of the chat system
//
// Everything that decides which broker resource a logical name maps to,
// tracks the session, manages group membership and moves chat envelopes.
// The REPL in main.rs is a thin shell over this module.

pub mod commands;
pub mod config;
pub mod directory;
pub mod envelope;
pub mod error;
pub mod membership;
pub mod naming;
pub mod receive;
pub mod session;
pub mod transfer;

pub use config::Config;
pub use directory::{AdminClient, Directory};
pub use envelope::{Envelope, FileMeta};
pub use error::ChatError;
pub use receive::InboundHandler;
pub use session::{ChatClient, SessionState, SharedSession};
