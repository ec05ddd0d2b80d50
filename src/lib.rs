//! Cohort membership library.
//!
//! An eventually-consistent view of which nodes in a group are reachable,
//! maintained by a SWIM-style probe-based failure detector. Membership
//! updates ride along on probe traffic as piggybacked gossip.

pub mod cluster;
pub mod config;
pub mod proto;

mod common;
mod detector;
mod dissemination;
mod error;
mod event;
mod membership;
mod timer;
mod transport;

pub use self::cluster::{Cluster, Handle};
pub use self::common::{Endpoint, Incarnation, SeqNr};
pub use self::config::Config;
pub use self::error::{Error, Result};
pub use self::event::Event;
pub use self::membership::Status;
