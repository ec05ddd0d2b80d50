use crate::{
    common::{Endpoint, Incarnation},
    dissemination::DisseminationQueue,
    error::{Error, Result},
    event::Event,
    timer,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, trace};

const MAILBOX_CAPACITY: usize = 1024;

/// Membership status of a remote node, tagged with the incarnation the
/// claim was made under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Alive(Incarnation),
    Suspect(Incarnation),
    Dead(Incarnation),
}

impl Status {
    pub fn incarnation(&self) -> Incarnation {
        match self {
            Status::Alive(i) | Status::Suspect(i) | Status::Dead(i) => *i,
        }
    }
}

pub(crate) enum Msg {
    Update {
        node: Endpoint,
        claim: Status,
    },
    Members {
        reply: oneshot::Sender<Vec<(Endpoint, Incarnation)>>,
    },
    Len {
        reply: oneshot::Sender<usize>,
    },
    Local {
        reply: oneshot::Sender<(Endpoint, Incarnation)>,
    },
}

/// Narrow interface to the membership actor. Cheap to clone; every method
/// enqueues one mailbox message.
#[derive(Debug, Clone)]
pub struct MembershipHandle {
    tx: mpsc::Sender<Msg>,
}

impl MembershipHandle {
    /// Apply a status claim for `node`. Stale claims are dropped inside
    /// the actor; the post itself cannot fail observably.
    pub(crate) async fn update(&self, node: Endpoint, claim: Status) {
        let _ = self.tx.send(Msg::Update { node, claim }).await;
    }

    /// Snapshot of the active members as `(node, incarnation)` pairs. The
    /// local node is never included.
    pub async fn members(&self) -> Result<Vec<(Endpoint, Incarnation)>> {
        let (reply, rx) = oneshot::channel();

        self.tx
            .send(Msg::Members { reply })
            .await
            .map_err(|_| Error::new_broken_pipe(None))?;

        rx.await.map_err(|_| Error::new_broken_pipe(None))
    }

    pub async fn len(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();

        self.tx
            .send(Msg::Len { reply })
            .await
            .map_err(|_| Error::new_broken_pipe(None))?;

        rx.await.map_err(|_| Error::new_broken_pipe(None))
    }

    pub async fn local(&self) -> Result<(Endpoint, Incarnation)> {
        let (reply, rx) = oneshot::channel();

        self.tx
            .send(Msg::Local { reply })
            .await
            .map_err(|_| Error::new_broken_pipe(None))?;

        rx.await.map_err(|_| Error::new_broken_pipe(None))
    }
}

/// The membership table actor.
///
/// Owns the authoritative local view of the cluster and applies the SWIM
/// reconciliation rules to every incoming claim, local or remote-sourced.
/// Accepted transitions are pushed to the dissemination queue before the
/// triggering message is considered handled.
pub(crate) struct Membership {
    local: Endpoint,
    incarnation: Incarnation,
    /// Active members only; a node in here is `Alive` or `Suspect`.
    active: IndexMap<Endpoint, Status>,
    /// Tombstones for confirmed-dead nodes, keyed to the incarnation the
    /// death was declared under. Consulted so a dead node cannot slip
    /// back in without a strictly newer claim.
    dead: HashMap<Endpoint, Incarnation>,
    events: DisseminationQueue,
    suspect_timeout: Duration,
    rx: mpsc::Receiver<Msg>,
    self_tx: mpsc::Sender<Msg>,
    shutdown: broadcast::Receiver<()>,
}

impl Membership {
    /// Spawn the actor with the given seed peers, which enter the table
    /// as `Alive(0)` without emitting events.
    pub(crate) fn spawn(
        local: Endpoint,
        peers: Vec<Endpoint>,
        suspect_timeout: Duration,
        events: DisseminationQueue,
        shutdown: broadcast::Receiver<()>,
    ) -> MembershipHandle {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);

        let active = peers
            .into_iter()
            .filter(|peer| *peer != local)
            .map(|peer| (peer, Status::Alive(0)))
            .collect();

        let actor = Membership {
            local,
            incarnation: 0,
            active,
            dead: HashMap::new(),
            events,
            suspect_timeout,
            rx,
            self_tx: tx.clone(),
            shutdown,
        };

        tokio::spawn(actor.run());

        MembershipHandle { tx }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => break,
                msg = self.rx.recv() => match msg {
                    Some(msg) => self.handle(msg),
                    None => break,
                },
            }
        }
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Update { node, claim } => self.update(node, claim),
            Msg::Members { reply } => {
                let _ = reply.send(self.members());
            }
            Msg::Len { reply } => {
                let _ = reply.send(self.active.len());
            }
            Msg::Local { reply } => {
                let _ = reply.send((self.local, self.incarnation));
            }
        }
    }

    fn update(&mut self, node: Endpoint, claim: Status) {
        if node == self.local {
            self.refute(claim);
            return;
        }

        let current = self
            .active
            .get(&node)
            .copied()
            .or_else(|| self.dead.get(&node).map(|&i| Status::Dead(i)));

        let next = match reconcile(current, claim) {
            Some(next) => next,
            None => {
                trace!(message = "dropping stale claim", %node, ?claim, ?current);
                return;
            }
        };

        match next {
            Status::Alive(_) => {
                self.active.insert(node, next);
            }
            Status::Suspect(incarnation) => {
                self.active.insert(node, next);
                // The timer is never cancelled; a stale firing is dropped
                // by reconciliation once the status has advanced.
                timer::post_after(
                    self.self_tx.clone(),
                    self.suspect_timeout,
                    Msg::Update {
                        node,
                        claim: Status::Dead(incarnation),
                    },
                );
            }
            Status::Dead(incarnation) => {
                self.active.swap_remove(&node);
                self.dead.insert(node, incarnation);
            }
        }

        debug!(message = "membership transition", %node, from = ?current, to = ?next);
        self.events.push(Event::new(node, next));
    }

    /// A claim against the local node bypasses reconciliation entirely:
    /// suspicion or death is refuted by outbidding the claimed incarnation
    /// and announcing the new one.
    fn refute(&mut self, claim: Status) {
        let claimed = match claim {
            Status::Alive(_) => return,
            Status::Suspect(i) | Status::Dead(i) => i,
        };

        self.incarnation = self.incarnation.max(claimed) + 1;

        info!(
            message = "refuting claim against local node",
            ?claim,
            incarnation = self.incarnation,
        );

        self.events
            .push(Event::new(self.local, Status::Alive(self.incarnation)));
    }

    fn members(&self) -> Vec<(Endpoint, Incarnation)> {
        self.active
            .iter()
            .map(|(node, status)| (*node, status.incarnation()))
            .collect()
    }
}

/// The SWIM reconciliation rules: given the currently stored status (if
/// any) and an incoming claim, return the status to install, or `None` if
/// the claim is stale and must be dropped.
///
/// A claim for an unknown node inserts it unless it claims death, which
/// needs a prior record to confirm. Suspicion and death override an alive
/// status at equal incarnation; everything else must strictly advance.
pub(crate) fn reconcile(current: Option<Status>, claim: Status) -> Option<Status> {
    use Status::*;

    match (current, claim) {
        (None, Alive(_)) | (None, Suspect(_)) => Some(claim),
        (None, Dead(_)) => None,
        (Some(Alive(j)), Alive(i)) if i > j => Some(claim),
        (Some(Alive(j)), Suspect(i)) if i >= j => Some(claim),
        (Some(Alive(j)), Dead(i)) if i >= j => Some(claim),
        (Some(Suspect(j)), Alive(i)) if i > j => Some(claim),
        (Some(Suspect(j)), Suspect(i)) if i > j => Some(claim),
        (Some(Suspect(j)), Dead(i)) if i >= j => Some(claim),
        (Some(Dead(j)), Dead(i)) if i > j => Some(claim),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time;

    const SUSPECT_TIMEOUT: Duration = Duration::from_secs(10);

    fn endpoint(port: u16) -> Endpoint {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    fn drain(events: &DisseminationQueue) -> Vec<Event> {
        let mut drained = Vec::new();
        while let Some(event) = events.pop() {
            drained.push(event);
        }
        drained
    }

    struct Harness {
        membership: MembershipHandle,
        events: DisseminationQueue,
        _shutdown: broadcast::Sender<()>,
    }

    fn spawn(peers: &[Endpoint]) -> Harness {
        let (shutdown, _) = broadcast::channel(1);
        let events = DisseminationQueue::new(64);
        let membership = Membership::spawn(
            endpoint(1),
            peers.to_vec(),
            SUSPECT_TIMEOUT,
            events.clone(),
            shutdown.subscribe(),
        );

        Harness {
            membership,
            events,
            _shutdown: shutdown,
        }
    }

    mod reconcile_rules {
        use super::*;
        use Status::*;

        #[test]
        fn unknown_node_inserts_alive_and_suspect() {
            assert_eq!(reconcile(None, Alive(0)), Some(Alive(0)));
            assert_eq!(reconcile(None, Suspect(2)), Some(Suspect(2)));
        }

        #[test]
        fn death_of_unknown_node_needs_prior_record() {
            assert_eq!(reconcile(None, Dead(5)), None);
        }

        #[test]
        fn alive_requires_strict_advance() {
            assert_eq!(reconcile(Some(Alive(3)), Alive(4)), Some(Alive(4)));
            assert_eq!(reconcile(Some(Alive(3)), Alive(3)), None);
            assert_eq!(reconcile(Some(Alive(3)), Alive(2)), None);
        }

        #[test]
        fn suspicion_overrides_alive_at_equal_incarnation() {
            assert_eq!(reconcile(Some(Alive(3)), Suspect(3)), Some(Suspect(3)));
            assert_eq!(reconcile(Some(Alive(3)), Suspect(2)), None);
        }

        #[test]
        fn refutation_needs_newer_incarnation() {
            assert_eq!(reconcile(Some(Suspect(3)), Alive(3)), None);
            assert_eq!(reconcile(Some(Suspect(3)), Alive(4)), Some(Alive(4)));
        }

        #[test]
        fn dead_overrides_suspect_at_equal_incarnation() {
            assert_eq!(reconcile(Some(Suspect(7)), Dead(7)), Some(Dead(7)));
        }

        #[test]
        fn dead_is_terminal_short_of_newer_death() {
            assert_eq!(reconcile(Some(Dead(3)), Alive(9)), None);
            assert_eq!(reconcile(Some(Dead(3)), Suspect(9)), None);
            assert_eq!(reconcile(Some(Dead(3)), Dead(3)), None);
            assert_eq!(reconcile(Some(Dead(3)), Dead(4)), Some(Dead(4)));
        }

        #[test]
        fn applying_a_claim_twice_equals_applying_it_once() {
            let once = reconcile(Some(Alive(1)), Suspect(1)).unwrap();
            assert_eq!(reconcile(Some(once), Suspect(1)), None);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_contact_inserts_alive() {
        let h = spawn(&[]);
        let node = endpoint(2);

        h.membership.update(node, Status::Alive(3)).await;

        assert_eq!(h.membership.members().await.unwrap(), vec![(node, 3)]);
        assert_eq!(h.membership.len().await.unwrap(), 1);
        assert_eq!(drain(&h.events), vec![Event::new(node, Status::Alive(3))]);
    }

    #[tokio::test(start_paused = true)]
    async fn seeded_peers_are_alive_without_events() {
        let peers = vec![endpoint(2), endpoint(3)];
        let h = spawn(&peers);

        let mut members = h.membership.members().await.unwrap();
        members.sort();

        assert_eq!(members, vec![(endpoint(2), 0), (endpoint(3), 0)]);
        assert!(drain(&h.events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_claim_is_idempotent() {
        let h = spawn(&[]);
        let node = endpoint(2);

        h.membership.update(node, Status::Alive(3)).await;
        h.membership.update(node, Status::Alive(3)).await;

        assert_eq!(h.membership.members().await.unwrap(), vec![(node, 3)]);
        assert_eq!(drain(&h.events).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_is_stable_between_updates() {
        let h = spawn(&[endpoint(2), endpoint(3)]);

        let first = h.membership.members().await.unwrap();
        let second = h.membership.members().await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn suspect_expires_to_dead() {
        let h = spawn(&[endpoint(2)]);
        let node = endpoint(2);

        h.membership.update(node, Status::Suspect(0)).await;
        assert_eq!(h.membership.members().await.unwrap(), vec![(node, 0)]);

        time::sleep(SUSPECT_TIMEOUT * 2).await;

        assert!(h.membership.members().await.unwrap().is_empty());
        assert_eq!(h.membership.len().await.unwrap(), 0);
        assert_eq!(
            drain(&h.events),
            vec![Event::new(node, Status::Dead(0))],
            "the suspect event was superseded in the queue by the death",
        );
    }

    #[tokio::test(start_paused = true)]
    async fn refuted_suspect_outlives_its_timer() {
        let h = spawn(&[endpoint(2)]);
        let node = endpoint(2);

        h.membership.update(node, Status::Suspect(3)).await;
        h.membership.update(node, Status::Alive(4)).await;

        // The suspect timer fires a Dead(3) claim; reconciliation drops it.
        time::sleep(SUSPECT_TIMEOUT * 2).await;

        assert_eq!(h.membership.members().await.unwrap(), vec![(node, 4)]);
        assert_eq!(drain(&h.events), vec![Event::new(node, Status::Alive(4))]);
    }

    #[tokio::test(start_paused = true)]
    async fn dead_overrides_suspect_and_stays_out() {
        let h = spawn(&[endpoint(2)]);
        let node = endpoint(2);

        h.membership.update(node, Status::Suspect(7)).await;
        h.membership.update(node, Status::Dead(7)).await;

        assert!(h.membership.members().await.unwrap().is_empty());
        assert_eq!(drain(&h.events), vec![Event::new(node, Status::Dead(7))]);

        // No resurrection without a strictly newer death first.
        h.membership.update(node, Status::Alive(7)).await;
        assert!(h.membership.members().await.unwrap().is_empty());
        assert!(drain(&h.events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn claims_against_self_are_refuted() {
        let h = spawn(&[endpoint(2)]);
        let local = endpoint(1);

        h.membership.update(local, Status::Suspect(0)).await;

        assert_eq!(h.membership.local().await.unwrap(), (local, 1));
        assert_eq!(
            drain(&h.events),
            vec![Event::new(local, Status::Alive(1))],
        );

        // The local node never appears in its own table.
        assert_eq!(h.membership.members().await.unwrap(), vec![(endpoint(2), 0)]);

        // A dead claim with a higher incarnation is outbid, not stored.
        h.membership.update(local, Status::Dead(5)).await;
        assert_eq!(h.membership.local().await.unwrap(), (local, 6));
        assert_eq!(
            drain(&h.events),
            vec![Event::new(local, Status::Alive(6))],
        );
    }

    #[tokio::test(start_paused = true)]
    async fn alive_claim_about_self_is_ignored() {
        let h = spawn(&[]);
        let local = endpoint(1);

        h.membership.update(local, Status::Alive(9)).await;

        assert_eq!(h.membership.local().await.unwrap(), (local, 0));
        assert!(h.membership.members().await.unwrap().is_empty());
        assert!(drain(&h.events).is_empty());
    }
}
