//! Decoding of captured DNS traffic: PCAP file I/O, the link/network/
//! transport layer walk, and the DNS wire parser. Everything here operates
//! on views over the original packet bytes; owning copies are made only at
//! thread boundaries via [`object::Chain::copy`].

pub mod dns;
pub mod layer;
pub mod object;
pub mod pcap;
