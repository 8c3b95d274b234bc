//! Client
//!
//! Session reconciler for the Parley protocol. Keeps a local view of who is
//! online and what was said, consistent with the server despite reordered or
//! duplicated pushes and reconnects.
//!
//! # Architecture
//!
//! [`Client`] is Sans-IO: it receives [`ClientEvent`]s (frames, transport
//! signals, user intents) and returns [`ClientAction`]s for the caller to
//! execute. It never touches a socket or a clock of its own.
//!
//! [`Runtime`] drives a [`Client`] over any [`Driver`], owns the bounded
//! reconnect loop and exposes a [`RuntimeHandle`] for commands and updates.
//!
//! # Components
//!
//! - [`Client`]: peer view, conversation logs, pending buffers, selection
//! - [`Conversation`]: one append-only log with a duplicate guard
//! - [`Runtime`]: event loop with [`ReconnectPolicy`]
//!
//! # Transport (optional)
//!
//! With the `transport` feature enabled, this crate also provides
//! [`transport::QuicDriver`], a [`Driver`] over QUIC.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod conversation;
mod error;
mod event;
mod runtime;

#[cfg(feature = "transport")]
pub mod transport;

pub use client::{Client, ConnectionState, Peer};
pub use conversation::{Conversation, ConversationKey, Message};
pub use error::ClientError;
pub use event::{ClientAction, ClientEvent};
pub use parley_core::{ConnectionId, Environment};
pub use runtime::{Command, Driver, ReconnectPolicy, Runtime, RuntimeError, RuntimeHandle};
