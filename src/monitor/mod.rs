//! Health monitors: silent sensors and the serial link.

pub mod dead_man;
pub mod link;

pub use dead_man::{DeadManMonitor, DeadManReport};
pub use link::{link_present, LinkAlert, LinkHealthMonitor, LinkState};
