use std::net::SocketAddr;

/// Represents some _node/destination_ in the system.
pub type Endpoint = SocketAddr;
/// Per-node monotonically non-decreasing counter used to order status claims.
pub type Incarnation = u64;
/// Sequence number correlating probes with their acknowledgements.
pub type SeqNr = u64;
