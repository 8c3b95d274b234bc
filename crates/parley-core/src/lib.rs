//! Parley core.
//!
//! Pieces shared by the server and the client that do no I/O:
//!
//! - [`env::Environment`]: time, randomness and sleeping, so protocol logic
//!   can run against real resources or a seeded simulation
//! - [`identity`]: connection identifiers, display-name rules and the
//!   self-marker the server uses for echoes

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod env;
pub mod identity;

pub use env::Environment;
pub use identity::{
    ConnectionId, DEFAULT_MAX_NAME_LEN, NameError, SELF_MARKER, normalize_name, normalize_text,
};
