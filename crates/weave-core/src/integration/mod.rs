//! Integration layer - the boundary towards the transport.

pub mod bot;

pub use bot::{Bot, BoxedOutbound, DisabledOutbound, Outbound, Target};
