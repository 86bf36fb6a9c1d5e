//! The replay side of the engine: reshaping the capture's timing, routing
//! packets to per-client workers, sending the queries at a resolver under
//! test over UDP, TCP, TLS or HTTP/2, and accounting the answers.

pub mod client;
pub mod ipsplit;
pub mod respdiff;
pub mod stats;
pub mod timing;
pub mod trie;
