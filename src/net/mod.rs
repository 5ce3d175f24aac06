//! Client-facing networking: text protocol, fan-out and the TCP transport

pub mod broadcast;
pub mod protocol;
pub mod transport;
