//! Mesh coordination: peer health tracking, gossip merge, and fire-and-forget
//! invalidation propagation (spec.md §4.2).

pub mod coordinator;
pub mod transport;
pub mod types;

pub use coordinator::{MeshConfig, MeshCoordinator, MeshSnapshot};
pub use transport::{HttpPeerTransport, MeshError, PeerTransport};
pub use types::{GossipPayload, PeerHealth, PeerInfo, PeerSummary};
