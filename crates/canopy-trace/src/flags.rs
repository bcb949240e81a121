//! Capability flags carried by every tree node.
//!
//! Nodes combine capabilities orthogonally (a node can be a composite, a
//! utility scorer and stateful all at once), so the flags are a plain `u32`
//! bitmask rather than a type hierarchy. The bit values are part of the wire
//! format produced by instrumented runtimes and must not be renumbered.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Bitmask of node capabilities.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(from = "u32", into = "u32")]
    pub struct NodeFlags: u32 {
        /// Has an ordered list of children.
        const COMPOSITE   = 1 << 0;
        /// Wraps exactly one child and alters its result.
        const DECORATOR   = 1 << 1;
        /// No children.
        const LEAF        = 1 << 2;
        /// Leaf that performs work.
        const ACTION      = 1 << 3;
        /// Leaf that only checks a predicate.
        const CONDITION   = 1 << 4;
        /// Composite running children in order until one fails.
        const SEQUENCE    = 1 << 5;
        /// Composite running children in order until one succeeds.
        const SELECTOR    = 1 << 6;
        /// Composite ticking every child each tick.
        const PARALLEL    = 1 << 7;
        /// Keeps state across ticks.
        const STATEFUL    = 1 << 8;
        /// Behavior depends on elapsed time (timeouts, delays, cooldowns).
        const TIME_BASED  = 1 << 9;
        /// Behavior depends on an execution count (repeat, retry, limit).
        const COUNT_BASED = 1 << 10;
        /// Utility scoring: composites rank children, decorators carry scores.
        const UTILITY     = 1 << 11;
        /// Resumes from the last running child instead of restarting.
        const MEMORY      = 1 << 12;
        /// Completes asynchronously over several ticks.
        const ASYNC       = 1 << 13;
        /// Gates its child on a condition.
        const GUARD       = 1 << 14;
        /// Enter/exit hooks only; never changes the child's result.
        const LIFECYCLE   = 1 << 15;
        /// Root of an embedded subtree.
        const SUBTREE     = 1 << 16;
        /// Re-runs its child.
        const REPEATING   = 1 << 17;
    }
}

impl From<u32> for NodeFlags {
    fn from(bits: u32) -> Self {
        // Unknown bits come from newer runtimes; keep them so they round-trip.
        NodeFlags::from_bits_retain(bits)
    }
}

impl From<NodeFlags> for u32 {
    fn from(flags: NodeFlags) -> Self {
        flags.bits()
    }
}

impl NodeFlags {
    /// Returns `true` for a composite that scores its children.
    pub fn is_utility_composite(self) -> bool {
        self.contains(NodeFlags::COMPOSITE | NodeFlags::UTILITY)
    }

    /// Returns `true` for a decorator that carries a utility score.
    pub fn is_utility_decorator(self) -> bool {
        self.contains(NodeFlags::DECORATOR | NodeFlags::UTILITY)
    }

    /// Returns `true` for a decorator that only observes its child's
    /// lifecycle. These are rendered in a separate row group.
    pub fn is_lifecycle_decorator(self) -> bool {
        self.contains(NodeFlags::DECORATOR | NodeFlags::LIFECYCLE)
    }
}
