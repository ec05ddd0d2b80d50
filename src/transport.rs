use crate::{
    common::Endpoint,
    detector::DetectorHandle,
    dissemination::DisseminationQueue,
    error::{Error, Result},
    membership::MembershipHandle,
    proto::{self, Message, MAX_DATAGRAM},
};
use std::sync::Arc;
use tokio::{
    net::UdpSocket,
    sync::{broadcast, mpsc},
};
use tracing::{debug, warn};

/// The UDP datagram channel. One socket serves both directions; the send
/// and receive loops run as independent tasks sharing it.
#[derive(Debug, Clone)]
pub(crate) struct Transport {
    socket: Arc<UdpSocket>,
}

impl Transport {
    pub(crate) async fn bind(addr: Endpoint) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| Error::new_bind(Some(Box::new(e))))?;

        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    pub(crate) fn local_addr(&self) -> Result<Endpoint> {
        self.socket
            .local_addr()
            .map_err(|e| Error::new_bind(Some(Box::new(e))))
    }

    /// Drain outbound frames, encoding each with as much piggybacked
    /// gossip as fits. Send failures are logged and forgotten; the next
    /// period re-probes naturally.
    pub(crate) fn spawn_sender(
        &self,
        mut outbound: mpsc::Receiver<(Endpoint, Message)>,
        gossip: DisseminationQueue,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let socket = self.socket.clone();

        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = shutdown.recv() => break,
                    frame = outbound.recv() => frame,
                };

                let (dest, message) = match frame {
                    Some(frame) => frame,
                    None => break,
                };

                let bytes = match proto::encode(message, &gossip) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(message = "failed to encode datagram", error = %e);
                        continue;
                    }
                };

                if let Err(e) = socket.send_to(&bytes, dest).await {
                    warn!(message = "failed to send datagram", %dest, error = %e);
                }
            }
        });
    }

    /// Decode incoming datagrams: piggybacked gossip goes straight to the
    /// membership table, the protocol message to the failure detector.
    /// Undecodable datagrams are discarded before the core sees them.
    pub(crate) fn spawn_receiver(
        &self,
        detector: DetectorHandle,
        membership: MembershipHandle,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let socket = self.socket.clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];

            loop {
                let incoming = tokio::select! {
                    _ = shutdown.recv() => break,
                    incoming = socket.recv_from(&mut buf) => incoming,
                };

                let (len, from) = match incoming {
                    Ok(incoming) => incoming,
                    Err(e) => {
                        warn!(message = "failed to receive datagram", error = %e);
                        continue;
                    }
                };

                let envelope = match proto::decode(&buf[..len]) {
                    Ok(envelope) => envelope,
                    Err(_) => {
                        debug!(message = "discarding undecodable datagram", %from, len);
                        continue;
                    }
                };

                for event in envelope.gossip {
                    membership.update(event.node, event.status).await;
                }

                detector.packet(from, envelope.message).await;
            }
        });
    }
}
