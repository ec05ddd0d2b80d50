use crate::{
    common::{Endpoint, Incarnation, SeqNr},
    membership::{MembershipHandle, Status},
    proto::Message,
    timer,
};
use rand::{rngs::SmallRng, seq::SliceRandom};
use std::{collections::HashMap, time::Duration};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace};

const MAILBOX_CAPACITY: usize = 1024;

pub(crate) enum Msg {
    /// A new protocol period, carrying the driver's sequence number.
    Tick(SeqNr),
    /// A decoded wire message delivered by the transport.
    Packet { from: Endpoint, message: Message },
    /// Deferred self-message armed when a direct probe goes out.
    PingTimeout { target: Endpoint, seq: SeqNr },
}

#[derive(Debug, Clone)]
pub(crate) struct DetectorHandle {
    tx: mpsc::Sender<Msg>,
}

impl DetectorHandle {
    pub(crate) async fn tick(&self, seq: SeqNr) {
        let _ = self.tx.send(Msg::Tick(seq)).await;
    }

    pub(crate) async fn packet(&self, from: Endpoint, message: Message) {
        let _ = self.tx.send(Msg::Packet { from, message }).await;
    }
}

/// The direct probe issued this period, kept until an ack clears it or the
/// next tick escalates it to suspicion.
struct OutstandingPing {
    target: Endpoint,
    incarnation: Incarnation,
    seq: SeqNr,
}

/// The failure detector actor.
///
/// Once per period it probes one member in shuffled round-robin order,
/// falling back to indirect probes through `group_size` helpers when the
/// direct probe stays unacknowledged past the ping timeout. A probe still
/// unresolved when the next period starts marks the target suspect.
pub(crate) struct Detector {
    local: Endpoint,
    membership: MembershipHandle,
    outbound: mpsc::Sender<(Endpoint, Message)>,
    /// Remaining targets of the current round-robin pass, pre-shuffled.
    probe_order: Vec<(Endpoint, Incarnation)>,
    outstanding: Option<OutstandingPing>,
    /// Relays performed for other nodes: `(target, seq)` to the origin
    /// that asked us. Cleared on period rollover.
    pending_indirect: HashMap<(Endpoint, SeqNr), Endpoint>,
    rng: SmallRng,
    ping_timeout: Duration,
    group_size: usize,
    rx: mpsc::Receiver<Msg>,
    self_tx: mpsc::Sender<Msg>,
    shutdown: broadcast::Receiver<()>,
}

impl Detector {
    pub(crate) fn spawn(
        local: Endpoint,
        membership: MembershipHandle,
        outbound: mpsc::Sender<(Endpoint, Message)>,
        ping_timeout: Duration,
        group_size: usize,
        rng: SmallRng,
        shutdown: broadcast::Receiver<()>,
    ) -> DetectorHandle {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);

        let actor = Detector {
            local,
            membership,
            outbound,
            probe_order: Vec::new(),
            outstanding: None,
            pending_indirect: HashMap::new(),
            rng,
            ping_timeout,
            group_size,
            rx,
            self_tx: tx.clone(),
            shutdown,
        };

        tokio::spawn(actor.run());

        DetectorHandle { tx }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => break,
                msg = self.rx.recv() => match msg {
                    Some(msg) => self.handle(msg).await,
                    None => break,
                },
            }
        }
    }

    async fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Tick(seq) => self.on_tick(seq).await,
            Msg::Packet { from, message } => self.on_packet(from, message).await,
            Msg::PingTimeout { target, seq } => self.on_ping_timeout(target, seq).await,
        }
    }

    async fn on_tick(&mut self, seq: SeqNr) {
        // An unresolved probe from the previous period is the one and only
        // trigger for suspicion.
        if let Some(ping) = self.outstanding.take() {
            debug!(
                message = "probe went unacknowledged",
                target = %ping.target,
                seq = ping.seq,
            );
            self.membership
                .update(ping.target, Status::Suspect(ping.incarnation))
                .await;
        }

        self.pending_indirect.clear();

        let (target, incarnation) = match self.next_target().await {
            Some(next) => next,
            None => return,
        };

        trace!(message = "probing", %target, seq);

        self.outstanding = Some(OutstandingPing {
            target,
            incarnation,
            seq,
        });
        self.send(target, Message::Ping { seq }).await;

        timer::post_after(
            self.self_tx.clone(),
            self.ping_timeout,
            Msg::PingTimeout { target, seq },
        );
    }

    /// Pop the next round-robin target, refilling the order with a fresh
    /// shuffle of the current membership once exhausted.
    async fn next_target(&mut self) -> Option<(Endpoint, Incarnation)> {
        if self.probe_order.is_empty() {
            let mut members = match self.membership.members().await {
                Ok(members) => members,
                Err(_) => return None,
            };

            members.shuffle(&mut self.rng);
            self.probe_order = members;
        }

        self.probe_order.pop()
    }

    async fn on_ping_timeout(&mut self, target: Endpoint, seq: SeqNr) {
        let still_outstanding = self
            .outstanding
            .as_ref()
            .map_or(false, |ping| ping.target == target && ping.seq == seq);

        if !still_outstanding {
            return;
        }

        let members = match self.membership.members().await {
            Ok(members) => members,
            Err(_) => return,
        };

        let candidates: Vec<Endpoint> = members
            .into_iter()
            .map(|(node, _)| node)
            .filter(|node| *node != target && *node != self.local)
            .collect();

        debug!(
            message = "direct probe timed out, going indirect",
            %target,
            seq,
            helpers = self.group_size.min(candidates.len()),
        );

        // Fire-and-forget: no indirect timeout is armed. If none of the
        // helpers comes back with an ack, the next tick escalates.
        let helpers: Vec<Endpoint> = candidates
            .choose_multiple(&mut self.rng, self.group_size)
            .copied()
            .collect();

        for helper in helpers {
            self.send(helper, Message::PingReq { seq, target }).await;
        }
    }

    async fn on_packet(&mut self, from: Endpoint, message: Message) {
        match message {
            Message::Ping { seq } => {
                self.send(
                    from,
                    Message::Ack {
                        seq,
                        from: self.local,
                    },
                )
                .await;
            }
            Message::PingReq { seq, target } => {
                self.send(target, Message::Ping { seq }).await;
                self.pending_indirect.insert((target, seq), from);
            }
            Message::Ack { seq, from: subject } => {
                let acks_our_probe = self
                    .outstanding
                    .as_ref()
                    .map_or(false, |ping| ping.target == subject && ping.seq == seq)
                    && !self.pending_indirect.contains_key(&(subject, seq));

                if acks_our_probe {
                    if let Some(ping) = self.outstanding.take() {
                        self.membership
                            .update(subject, Status::Alive(ping.incarnation))
                            .await;
                    }
                } else if let Some(origin) = self.pending_indirect.remove(&(subject, seq)) {
                    self.send(origin, Message::Ack { seq, from: subject }).await;
                } else {
                    trace!(message = "dropping unmatched ack", %from, %subject, seq);
                }
            }
        }
    }

    async fn send(&self, dest: Endpoint, message: Message) {
        // The transport drains this queue; if it is gone the node is
        // shutting down and the frame is dropped.
        let _ = self.outbound.send((dest, message)).await;
    }
}
