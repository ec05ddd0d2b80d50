use crate::{common::Endpoint, membership::Status};
use serde::{Deserialize, Serialize};

/// A membership transition accepted by the local table, queued for
/// piggybacked dissemination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub node: Endpoint,
    pub status: Status,
}

impl Event {
    pub fn new(node: Endpoint, status: Status) -> Self {
        Self { node, status }
    }
}
