//! Invariant checking for deterministic simulation testing.
//!
//! Invariants are properties that must always hold during execution. The
//! system is captured into a [`SystemSnapshot`] and every registered
//! [`Invariant`] runs against it.
//!
//! # Usage
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! registry.assert_all(&network.snapshot(), "after step 12");
//! ```

mod checks;
mod snapshot;

pub use checks::{
    NoGhostLogs, OneConnectionPerIdentity, PeerViewExcludesSelf, RosterMatchesRegistry,
    SelectionInPeerView,
};
pub use snapshot::{ClientSnapshot, SystemSnapshot};

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property checked against a [`SystemSnapshot`].
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// `Ok(())` if the invariant holds.
    fn check(&self, state: &SystemSnapshot) -> InvariantResult;
}

/// Registry of invariants to check.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Invariants that hold after every single step.
    ///
    /// Includes:
    /// - [`OneConnectionPerIdentity`]
    /// - [`PeerViewExcludesSelf`]
    /// - [`SelectionInPeerView`]
    /// - [`NoGhostLogs`]
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(OneConnectionPerIdentity);
        registry.add(PeerViewExcludesSelf);
        registry.add(SelectionInPeerView);
        registry.add(NoGhostLogs);
        registry
    }

    /// [`InvariantRegistry::standard`] plus [`RosterMatchesRegistry`], for a
    /// drained network with in-order delivery.
    pub fn quiescent() -> Self {
        let mut registry = Self::standard();
        registry.add(RosterMatchesRegistry);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Whether no invariants are registered.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }

    /// Check all invariants, collecting every violation.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking with every violation.
    ///
    /// Use this in tests where you want immediate failure with context.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &SystemSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("Invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }
}
