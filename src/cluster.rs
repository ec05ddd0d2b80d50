use crate::{
    common::{Endpoint, Incarnation, SeqNr},
    config::Config,
    detector::{Detector, DetectorHandle},
    dissemination::DisseminationQueue,
    error::Result,
    membership::{Membership, MembershipHandle},
    transport::Transport,
};
use rand::{rngs::SmallRng, SeedableRng};
use std::time::Duration;
use tokio::{
    sync::{broadcast, mpsc},
    time::{self, MissedTickBehavior},
};
use tracing::info;

const OUTBOUND_CAPACITY: usize = 1024;

/// A running cohort node: the membership table, failure detector, period
/// driver, and transport loops wired together over one UDP socket.
pub struct Cluster {
    local: Endpoint,
    handle: Handle,
    /// Subscribed at bind time so a shutdown signalled before `run` is
    /// not missed.
    shutdown: broadcast::Receiver<()>,
}

/// Cloneable surface for querying and stopping a running node.
#[derive(Debug, Clone)]
pub struct Handle {
    membership: MembershipHandle,
    shutdown: broadcast::Sender<()>,
}

impl Handle {
    /// Snapshot of the active members as `(node, incarnation)` pairs.
    pub async fn members(&self) -> Result<Vec<(Endpoint, Incarnation)>> {
        self.membership.members().await
    }

    pub async fn len(&self) -> Result<usize> {
        self.membership.len().await
    }

    pub async fn local(&self) -> Result<(Endpoint, Incarnation)> {
        self.membership.local().await
    }

    /// Signal every task of the node to stop. Scheduled timer deliveries
    /// still in flight are discarded on arrival.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}

impl Cluster {
    /// Bind the UDP socket and spawn the node's actors. `peers` seeds the
    /// membership table; there is no join handshake beyond this.
    pub async fn bind(config: Config, peers: Vec<Endpoint>) -> Result<Cluster> {
        config.validate()?;

        let transport = Transport::bind(config.bind_addr).await?;
        let local = transport.local_addr()?;

        info!(message = "starting cohort node", %local, peers = peers.len());

        let (shutdown, _) = broadcast::channel(1);
        let gossip = DisseminationQueue::new(config.event_queue_capacity);

        let membership = Membership::spawn(
            local,
            peers,
            config.suspect_timeout,
            gossip.clone(),
            shutdown.subscribe(),
        );

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let detector = Detector::spawn(
            local,
            membership.clone(),
            outbound_tx,
            config.ping_timeout,
            config.ping_request_group_size,
            SmallRng::from_entropy(),
            shutdown.subscribe(),
        );

        transport.spawn_sender(outbound_rx, gossip, shutdown.subscribe());
        transport.spawn_receiver(detector.clone(), membership.clone(), shutdown.subscribe());

        spawn_driver(detector, config.period_timeout, shutdown.subscribe());

        let handle = Handle {
            membership,
            shutdown: shutdown.clone(),
        };

        Ok(Cluster {
            local,
            handle,
            shutdown: shutdown.subscribe(),
        })
    }

    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// The bound endpoint forming this node's identity.
    pub fn local_node(&self) -> Endpoint {
        self.local
    }

    /// Park until [`Handle::shutdown`] is called.
    pub async fn run(mut self) {
        let _ = self.shutdown.recv().await;

        info!(message = "cohort node stopped", local = %self.local);
    }
}

/// The period driver: assigns each tick a fresh monotonic sequence number,
/// starting at zero.
fn spawn_driver(
    detector: DetectorHandle,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut seq: SeqNr = 0;

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = interval.tick() => {
                    detector.tick(seq).await;
                    seq += 1;
                }
            }
        }
    });
}
