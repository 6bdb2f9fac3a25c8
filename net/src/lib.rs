#![no_std]

extern crate alloc;

pub mod bytes;
pub mod ipv4;
pub mod netdev;
pub mod packetbuf;
pub mod route;
pub mod tcp;
pub mod types;

#[cfg(feature = "builtin-tests")]
pub mod tcp_tests;

pub use packetbuf::Buffer;
pub use types::{Ipv4Addr, NetError, Port};
