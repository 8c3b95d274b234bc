//! Deterministic simulation harness for Parley protocol testing.
//!
//! Everything runs in memory from one seed: [`SimEnv`] supplies a virtual
//! clock and a ChaCha RNG, [`SimNetwork`] wires one [`ServerDriver`] to any
//! number of [`Client`]s and decides delivery order, and [`SimDriver`] lets
//! runtime tests script connection failures.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks what must be true after every step, not
//! specific scenarios. Use [`InvariantRegistry::standard()`] for properties
//! that hold at all times and [`InvariantRegistry::quiescent()`] once the
//! network has drained.
//!
//! [`ServerDriver`]: parley_server::ServerDriver
//! [`Client`]: parley_client::Client

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod sim_driver;
pub mod sim_env;
pub mod sim_network;

pub use invariants::{
    ClientSnapshot, Invariant, InvariantRegistry, InvariantResult, NoGhostLogs,
    OneConnectionPerIdentity, PeerViewExcludesSelf, RosterMatchesRegistry, SelectionInPeerView,
    SystemSnapshot, Violation,
};
pub use sim_driver::{SimDriver, SimDriverError, SimDriverHandle};
pub use sim_env::{SimEnv, SimInstant};
pub use sim_network::{Chaos, SimNetwork};
