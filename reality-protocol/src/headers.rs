//! Custom response headers (§6): `X-Reality-Server` carries the responding
//! server's id, `X-Reality-Gossip` carries a JSON-encoded [`reality_mesh::GossipPayload`].

use reality_mesh::GossipPayload;

pub const SERVER_HEADER: &str = "X-Reality-Server";
pub const GOSSIP_HEADER: &str = "X-Reality-Gossip";

pub const CORS_ALLOWED_HEADERS: [&str; 3] = ["Content-Type", SERVER_HEADER, GOSSIP_HEADER];
pub const CORS_ALLOWED_METHODS: [&str; 3] = ["GET", "POST", "OPTIONS"];

/// Encodes a gossip payload for the `X-Reality-Gossip` header, falling back
/// to an empty object if it somehow fails to serialize (a header value must
/// never be allowed to fail a response that otherwise succeeded).
pub fn encode_gossip_header(payload: &GossipPayload) -> String {
    serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string())
}
