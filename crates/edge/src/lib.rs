//! Connection handling for ferry: the orchestrating [`LoadBalancer`],
//! the acceptor that routes new clients, and the [`SessionsWorker`]
//! pool that relays bytes for established sessions.

mod acceptor;
mod balancer;
mod error;
mod router;
mod worker;

pub use balancer::{InstanceSlot, LoadBalancer, State};
pub use error::{EdgeError, EdgeResult};
pub use worker::{SessionObserver, SessionsWorker};
