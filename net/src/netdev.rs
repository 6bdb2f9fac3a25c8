//! Network interface handle. Trimmed from `drivers/src/net/netdev.rs`'s
//! `NetDevice` trait + `DeviceHandle` registry down to a single struct: this
//! crate has no device registry, polling loop or link-layer stats, only the
//! capability TCP/IPv4 actually need — a source address and somewhere to
//! hand finished frames off to.

use crate::packetbuf::Buffer;
use crate::types::Ipv4Addr;

/// Hands a fully-built IPv4 datagram to whatever sits below (a real NIC
/// driver, a loopback shim, or — in tests — a capture queue). `None` means
/// the interface is transmit-less (e.g. a route with no egress configured).
pub type TxHook = fn(&Buffer);

pub struct NetInterface {
    pub name: &'static str,
    pub ip_addr: Ipv4Addr,
    tx: Option<TxHook>,
}

impl NetInterface {
    pub const fn new(name: &'static str, ip_addr: Ipv4Addr) -> Self {
        NetInterface {
            name,
            ip_addr,
            tx: None,
        }
    }

    pub const fn with_tx(name: &'static str, ip_addr: Ipv4Addr, tx: TxHook) -> Self {
        NetInterface {
            name,
            ip_addr,
            tx: Some(tx),
        }
    }

    pub fn transmit(&self, buf: &Buffer) {
        if let Some(tx) = self.tx {
            tx(buf);
        }
    }
}
