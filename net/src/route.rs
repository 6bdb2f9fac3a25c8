//! Route table. Grounded on `drivers/src/net/route.rs`'s `RouteEntry` shape
//! and longest-prefix-match `lookup`; the teacher buckets entries by prefix
//! length across 33 slots for O(32) lookup on a table that can hold
//! thousands of routes. This crate's routing is a handful of static entries
//! set up once at boot, so a flat linear scan is simpler and just as fast in
//! practice — the bucketing would be paying for scale this crate never
//! reaches.

use alloc::vec::Vec;
use wispos_lib::IrqMutex;

use crate::netdev::NetInterface;
use crate::types::Ipv4Addr;

pub struct RouteEntry {
    pub prefix: Ipv4Addr,
    pub prefix_len: u8,
    pub gateway: Option<Ipv4Addr>,
    pub interface: &'static NetInterface,
}

impl RouteEntry {
    fn mask(&self) -> u32 {
        prefix_len_to_mask(self.prefix_len)
    }

    fn matches(&self, addr: Ipv4Addr) -> bool {
        let mask = self.mask();
        (addr.to_u32() & mask) == (self.prefix.to_u32() & mask)
    }

    /// The address to hand to the link layer for this destination: the
    /// configured gateway, or the destination itself when the route is
    /// directly connected.
    pub fn next_hop(&self, dst: Ipv4Addr) -> Ipv4Addr {
        self.gateway.unwrap_or(dst)
    }
}

fn prefix_len_to_mask(len: u8) -> u32 {
    if len == 0 {
        0
    } else {
        u32::MAX << (32 - len as u32)
    }
}

pub struct RouteTable {
    entries: IrqMutex<Vec<RouteEntry>>,
}

impl RouteTable {
    pub const fn new() -> Self {
        RouteTable {
            entries: IrqMutex::new(Vec::new()),
        }
    }

    pub fn add(&self, entry: RouteEntry) {
        self.entries.lock().push(entry);
    }

    pub fn remove_all(&self) {
        self.entries.lock().clear();
    }

    pub fn route_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Longest-prefix match: the most specific matching entry wins.
    pub fn lookup(&self, dst: Ipv4Addr) -> Option<(Ipv4Addr, &'static NetInterface)> {
        let entries = self.entries.lock();
        let mut best: Option<&RouteEntry> = None;
        for entry in entries.iter() {
            if !entry.matches(dst) {
                continue;
            }
            if best.is_none_or(|b| entry.prefix_len > b.prefix_len) {
                best = Some(entry);
            }
        }
        best.map(|entry| (entry.next_hop(dst), entry.interface))
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

pub static ROUTE_TABLE: RouteTable = RouteTable::new();

/// Install a route. `gateway` is `None` for a directly-connected route (e.g.
/// the loopback minimum route, 127.0.0.1/32 with no gateway).
pub fn net_add_route(
    prefix: Ipv4Addr,
    prefix_len: u8,
    gateway: Option<Ipv4Addr>,
    interface: &'static NetInterface,
) {
    ROUTE_TABLE.add(RouteEntry {
        prefix,
        prefix_len,
        gateway,
        interface,
    });
}
