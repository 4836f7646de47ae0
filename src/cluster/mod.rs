//! Cluster topology delivery.

pub mod events;
pub mod membership;

pub use events::{TopologyChangedEvent, TopologyListener};
pub use membership::{ListenerId, MembershipSource, TopologyNotifier};
