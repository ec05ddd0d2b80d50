use crate::{
    common::{Endpoint, SeqNr},
    dissemination::DisseminationQueue,
    error::{Error, Result},
    event::Event,
};
use serde::{Deserialize, Serialize};

/// Upper bound on an encoded datagram. Probe messages are tiny; the
/// remaining room is filled with piggybacked gossip events.
pub(crate) const MAX_DATAGRAM: usize = 1400;

/// The three wire messages of the probing protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Ping { seq: SeqNr },
    PingReq { seq: SeqNr, target: Endpoint },
    Ack { seq: SeqNr, from: Endpoint },
}

/// One datagram: a protocol message plus zero or more gossip events.
///
/// The gossip payload is opaque to the failure detector; it is packed here
/// at encode time and applied straight to the membership table on receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub message: Message,
    pub gossip: Vec<Event>,
}

/// Encode `message` into a datagram, draining as many gossip events from
/// `queue` as fit under [`MAX_DATAGRAM`]. An event that does not fit is put
/// back for the next datagram.
pub(crate) fn encode(message: Message, queue: &DisseminationQueue) -> Result<Vec<u8>> {
    let mut envelope = Envelope {
        message,
        gossip: Vec::new(),
    };

    let mut used = serialized_size(&envelope)?;

    while let Some(event) = queue.pop() {
        let size = serialized_size(&event)?;

        if used + size > MAX_DATAGRAM {
            queue.push_front(event);
            break;
        }

        used += size;
        envelope.gossip.push(event);
    }

    bincode::serialize(&envelope).map_err(|e| Error::new_encode(Some(e)))
}

pub(crate) fn decode(bytes: &[u8]) -> Result<Envelope> {
    bincode::deserialize(bytes).map_err(|e| Error::new_decode(Some(e)))
}

fn serialized_size<T: Serialize>(value: &T) -> Result<usize> {
    bincode::serialized_size(value)
        .map(|size| size as usize)
        .map_err(|e| Error::new_encode(Some(e)))
}
