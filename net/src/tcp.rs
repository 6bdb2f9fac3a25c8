//! TCP segment codec and connection engine. Grounded on
//! `drivers/src/net/tcp.rs` almost throughout — header parse/write, flags,
//! sequence-number comparisons, the ephemeral port allocator, the ISN
//! generator and the connection-table shape all carry over close to
//! verbatim. Two deliberate departures from the teacher:
//!
//! - Connection creation is split into `tcp_create` (reserve a slot, stay
//!   `CLOSED`) and `tcp_connect` (active open on an existing slot), where
//!   the teacher's `tcp_connect` does both in one call. `TcpHandle` plays
//!   the role the teacher's bare `usize` index does.
//! - The codec writes directly into a [`crate::packetbuf::Buffer`] rather
//!   than building a `TcpOutSegment` and serializing it later — there's no
//!   separate serialization pass here, `encode`/`decode` work on the buffer
//!   in place.
//!
//! `process_listen` (passive open) is dropped: nothing in this crate ever
//! puts a connection into `Listen`, so the variant exists for completeness
//! of the state enum but is never entered.

use core::sync::atomic::{AtomicU16, AtomicU32, Ordering};

use bitflags::bitflags;
use wispos_lib::{clock, klog_debug};

use crate::bytes::{checksum_accumulate, checksum_finalize};
use crate::ipv4::{self, Ipv4Header};
use crate::netdev::NetInterface;
use crate::packetbuf::Buffer;
use crate::route::ROUTE_TABLE;
use crate::types::{IpProtocol, Ipv4Addr, NetError, Port};

pub const TCP_HEADER_LEN: usize = 20;
pub const TCP_WINDOW_SIZE: u16 = 8192;
pub const MAX_CONNECTIONS: usize = 64;
pub const EPHEMERAL_PORT_BASE: u16 = 49152;
pub const TIME_WAIT_MS: u64 = 60_000;

const ISN_SEED: u32 = 0x4F50_534C; // "OPSL"
const ISN_STRIDE: u32 = 64_000;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct TcpFlags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const PSH = 0x08;
        const ACK = 0x10;
        const URG = 0x20;
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TcpState {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TcpError {
    TableFull,
    NotFound,
    InvalidState,
    AddrInUse,
    ConnectionReset,
    InvalidSegment,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct TcpTuple {
    pub local_ip: Ipv4Addr,
    pub local_port: Port,
    pub remote_ip: Ipv4Addr,
    pub remote_port: Port,
}

#[derive(Clone, Copy, Debug)]
pub struct TcpHeader {
    pub src_port: Port,
    pub dst_port: Port,
    pub seq: u32,
    pub ack: u32,
    pub flags: TcpFlags,
    pub window: u16,
    pub checksum: u16,
    pub urgent: u16,
}

// ---------------------------------------------------------------------
// C4: segment codec
// ---------------------------------------------------------------------

/// Write `header` at `buf`'s current start, growing the buffer backward by
/// [`TCP_HEADER_LEN`]. Must be called after any payload has already been
/// appended to `buf`'s tail.
pub fn encode(header: &TcpHeader, buf: &mut Buffer) {
    let bytes = buf.push_header(TCP_HEADER_LEN);
    bytes[0..2].copy_from_slice(&header.src_port.get().to_be_bytes());
    bytes[2..4].copy_from_slice(&header.dst_port.get().to_be_bytes());
    bytes[4..8].copy_from_slice(&header.seq.to_be_bytes());
    bytes[8..12].copy_from_slice(&header.ack.to_be_bytes());
    bytes[12] = 5 << 4; // data_offset = 5 words, reserved bits zero
    bytes[13] = header.flags.bits();
    bytes[14..16].copy_from_slice(&header.window.to_be_bytes());
    bytes[16..18].copy_from_slice(&header.checksum.to_be_bytes());
    bytes[18..20].copy_from_slice(&header.urgent.to_be_bytes());
}

/// Parse the 20-byte header at `buf`'s start without consuming it — the
/// checksum pass still needs the header bytes present in the payload.
pub fn decode(buf: &Buffer) -> Result<TcpHeader, TcpError> {
    let bytes = buf.payload();
    if bytes.len() < TCP_HEADER_LEN {
        return Err(TcpError::InvalidSegment);
    }
    Ok(TcpHeader {
        src_port: Port(u16::from_be_bytes([bytes[0], bytes[1]])),
        dst_port: Port(u16::from_be_bytes([bytes[2], bytes[3]])),
        seq: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        ack: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        flags: TcpFlags::from_bits_truncate(bytes[13]),
        window: u16::from_be_bytes([bytes[14], bytes[15]]),
        checksum: u16::from_be_bytes([bytes[16], bytes[17]]),
        urgent: u16::from_be_bytes([bytes[18], bytes[19]]),
    })
}

/// Checksum over the pseudo-header (source/dest IP, zero, protocol 6,
/// segment length) followed by the segment itself. The pseudo-header is
/// never written into `buf` — it's accumulated from a stack-local array, so
/// it needs no buffer headroom of its own.
pub fn checksum_segment(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, buf: &Buffer) -> u16 {
    let segment = buf.payload();
    let mut pseudo = [0u8; 12];
    pseudo[0..4].copy_from_slice(&src_ip.octets());
    pseudo[4..8].copy_from_slice(&dst_ip.octets());
    pseudo[8] = 0;
    pseudo[9] = IpProtocol::Tcp as u8;
    pseudo[10..12].copy_from_slice(&(segment.len() as u16).to_be_bytes());

    let acc = checksum_accumulate(&pseudo, 0);
    let acc = checksum_accumulate(segment, acc);
    checksum_finalize(acc)
}

fn write_checksum(buf: &mut Buffer, checksum: u16) {
    buf.payload_mut()[16..18].copy_from_slice(&checksum.to_be_bytes());
}

// ---------------------------------------------------------------------
// Sequence-number modular arithmetic
// ---------------------------------------------------------------------

#[inline]
pub fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

#[inline]
pub fn seq_le(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) <= 0
}

#[inline]
pub fn seq_gt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

#[inline]
pub fn seq_ge(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) >= 0
}

// ---------------------------------------------------------------------
// C5: connection engine
// ---------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
struct Connection {
    tuple: TcpTuple,
    state: TcpState,
    iss: u32,
    snd_una: u32,
    snd_nxt: u32,
    snd_wnd: u16,
    irs: u32,
    rcv_nxt: u32,
    rcv_wnd: u16,
    interface: Option<&'static NetInterface>,
    in_use: bool,
    time_wait_deadline: u64,
}

impl Connection {
    const fn empty() -> Self {
        Connection {
            tuple: TcpTuple {
                local_ip: Ipv4Addr([0, 0, 0, 0]),
                local_port: Port(0),
                remote_ip: Ipv4Addr([0, 0, 0, 0]),
                remote_port: Port(0),
            },
            state: TcpState::Closed,
            iss: 0,
            snd_una: 0,
            snd_nxt: 0,
            snd_wnd: TCP_WINDOW_SIZE,
            irs: 0,
            rcv_nxt: 0,
            rcv_wnd: TCP_WINDOW_SIZE,
            interface: None,
            in_use: false,
            time_wait_deadline: 0,
        }
    }
}

type ConnTable = [Connection; MAX_CONNECTIONS];

static CONN_TABLE: wispos_lib::IrqMutex<ConnTable> =
    wispos_lib::IrqMutex::new([Connection::empty(); MAX_CONNECTIONS]);

static NEXT_EPHEMERAL_PORT: AtomicU16 = AtomicU16::new(EPHEMERAL_PORT_BASE);
static ISN_COUNTER: AtomicU32 = AtomicU32::new(ISN_SEED);

fn alloc_ephemeral_port() -> Port {
    loop {
        let current = NEXT_EPHEMERAL_PORT.load(Ordering::Relaxed);
        let next = if current == u16::MAX {
            EPHEMERAL_PORT_BASE
        } else {
            current + 1
        };
        if NEXT_EPHEMERAL_PORT
            .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            return Port(current);
        }
    }
}

fn generate_isn() -> u32 {
    ISN_COUNTER.fetch_add(ISN_STRIDE, Ordering::Relaxed)
}

/// True if some other member of the active set is already bound to
/// `(local_ip, port)`. Grounded on the teacher's `ConnTable::port_in_use`:
/// `tcp_connect` retries `alloc_ephemeral_port` against this check rather
/// than trusting the counter never wraps into a live port.
fn port_in_use(table: &ConnTable, local_ip: Ipv4Addr, port: Port) -> bool {
    table.iter().any(|c| {
        c.in_use
            && c.state != TcpState::Closed
            && c.tuple.local_ip == local_ip
            && c.tuple.local_port == port
    })
}

/// Opaque reference into the connection table. Stands in for the
/// by-value `Connection` a caller might expect: the active set exclusively
/// owns connection storage (see the ownership note in the design docs), so
/// what travels between the caller and the engine is this handle, not the
/// struct itself — the same shape as the teacher's bare table index, just
/// named.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TcpHandle(usize);

/// Reserve a connection slot in `CLOSED`, not yet part of the active set.
/// Fatal if the table is exhausted — with the table reset between test
/// cases, running out of 64 slots means a caller leaked a connection, so
/// this panics (`TcpError::TableFull`'s only conceivable site) rather than
/// handing back a `Result` nothing in this crate would recover from.
pub fn tcp_create() -> TcpHandle {
    let mut table = CONN_TABLE.lock();
    for (index, slot) in table.iter_mut().enumerate() {
        if !slot.in_use {
            *slot = Connection::empty();
            slot.in_use = true;
            return TcpHandle(index);
        }
    }
    panic!("tcp connection table exhausted");
}

/// Locked half of `tcp_connect`: validates the slot, allocates a local port
/// that's actually free within the active set, and arms the connection.
/// Mirrors the teacher's `tcp_connect`, which returns `Result<_, TcpError>`
/// straight through — this crate's public `tcp_connect` collapses that to
/// `bool` per `spec.md`'s literal signature, but the fallible internals stay
/// `Result`-shaped so the failure reason isn't lost before it's discarded.
fn try_connect(
    conn: TcpHandle,
    interface: &'static NetInterface,
    remote_ip: Ipv4Addr,
    remote_port: Port,
) -> Result<(TcpTuple, u32), TcpError> {
    let mut table = CONN_TABLE.lock();
    if !table[conn.0].in_use {
        return Err(TcpError::NotFound);
    }
    if table[conn.0].state != TcpState::Closed {
        return Err(TcpError::InvalidState);
    }

    // Retry against the active set instead of trusting the counter never
    // wraps into a port some other connection still holds.
    let mut local_port = None;
    for _ in 0..=u16::MAX {
        let candidate = alloc_ephemeral_port();
        if !port_in_use(&table, interface.ip_addr, candidate) {
            local_port = Some(candidate);
            break;
        }
    }
    let local_port = local_port.ok_or(TcpError::AddrInUse)?;
    let iss = generate_isn();

    let c = &mut table[conn.0];
    c.tuple = TcpTuple {
        local_ip: interface.ip_addr,
        local_port,
        remote_ip,
        remote_port,
    };
    c.iss = iss;
    c.snd_una = iss;
    c.snd_nxt = iss.wrapping_add(1);
    c.snd_wnd = TCP_WINDOW_SIZE;
    c.irs = 0;
    c.rcv_nxt = 0;
    c.rcv_wnd = TCP_WINDOW_SIZE;
    c.interface = Some(interface);
    c.state = TcpState::SynSent;
    Ok((c.tuple, iss))
}

/// Active open: picks an ephemeral port unique within the active set and a
/// route to `remote_ip`, sends a SYN and transitions to `SYN_SENT`. Returns
/// `false` if no route exists, the connection slot isn't idle, or every
/// ephemeral port is already bound to this local address.
pub fn tcp_connect(conn: TcpHandle, remote_ip: Ipv4Addr, remote_port: Port) -> bool {
    let Some((_, interface)) = ROUTE_TABLE.lookup(remote_ip) else {
        return false;
    };

    match try_connect(conn, interface, remote_ip, remote_port) {
        Ok((tuple, iss)) => {
            let _ = send_segment(interface, tuple, iss, 0, TcpFlags::SYN);
            true
        }
        Err(err) => {
            klog_debug!("tcp_connect failed: {:?}", err);
            false
        }
    }
}

/// Closes the connection per the state diagram. Idempotent: a no-op unless
/// the connection is in a state with a defined close-initiating transition
/// (`SYN_SENT`, `ESTABLISHED`, `CLOSE_WAIT`).
pub fn tcp_close(conn: TcpHandle) {
    enum Action {
        None,
        AbortSilently,
        SendFin(&'static NetInterface, TcpTuple, u32, u32),
    }

    let action = {
        let mut table = CONN_TABLE.lock();
        let c = &mut table[conn.0];
        if !c.in_use {
            Action::None
        } else {
            match c.state {
                TcpState::SynSent => {
                    c.state = TcpState::Closed;
                    c.in_use = false;
                    Action::AbortSilently
                }
                TcpState::Established => {
                    let seq = c.snd_nxt;
                    c.snd_nxt = c.snd_nxt.wrapping_add(1);
                    c.state = TcpState::FinWait1;
                    Action::SendFin(c.interface.unwrap(), c.tuple, seq, c.rcv_nxt)
                }
                TcpState::CloseWait => {
                    let seq = c.snd_nxt;
                    c.snd_nxt = c.snd_nxt.wrapping_add(1);
                    c.state = TcpState::LastAck;
                    Action::SendFin(c.interface.unwrap(), c.tuple, seq, c.rcv_nxt)
                }
                _ => Action::None,
            }
        }
    };

    if let Action::SendFin(interface, tuple, seq, ack) = action {
        let _ = send_segment(interface, tuple, seq, ack, TcpFlags::FIN | TcpFlags::ACK);
    }
}

pub fn tcp_get_state(conn: TcpHandle) -> Option<TcpState> {
    let table = CONN_TABLE.lock();
    let c = &table[conn.0];
    c.in_use.then_some(c.state)
}

/// Number of connections that are members of the active set, i.e. every
/// occupied slot not in `CLOSED`.
pub fn tcp_active_count() -> usize {
    CONN_TABLE
        .lock()
        .iter()
        .filter(|c| c.in_use && c.state != TcpState::Closed)
        .count()
}

/// Reaps `TIME_WAIT` connections whose 2MSL deadline has passed.
pub fn tcp_timer_tick(now_ms: u64) {
    let mut table = CONN_TABLE.lock();
    for c in table.iter_mut() {
        if c.in_use && c.state == TcpState::TimeWait && now_ms >= c.time_wait_deadline {
            c.state = TcpState::Closed;
            c.in_use = false;
        }
    }
}

/// Test-only: clears every slot and rewinds the port/ISN generators so
/// scenarios are reproducible across test cases.
pub fn tcp_reset_all() {
    let mut table = CONN_TABLE.lock();
    for c in table.iter_mut() {
        *c = Connection::empty();
    }
    drop(table);
    NEXT_EPHEMERAL_PORT.store(EPHEMERAL_PORT_BASE, Ordering::Relaxed);
    ISN_COUNTER.store(ISN_SEED, Ordering::Relaxed);
}

fn send_segment(
    interface: &'static NetInterface,
    tuple: TcpTuple,
    seq: u32,
    ack: u32,
    flags: TcpFlags,
) -> Result<(), NetError> {
    let mut buf = Buffer::alloc();
    let header = TcpHeader {
        src_port: tuple.local_port,
        dst_port: tuple.remote_port,
        seq,
        ack,
        flags,
        window: TCP_WINDOW_SIZE,
        checksum: 0,
        urgent: 0,
    };
    encode(&header, &mut buf);
    let checksum = checksum_segment(tuple.local_ip, tuple.remote_ip, &buf);
    write_checksum(&mut buf, checksum);

    let next_hop = ROUTE_TABLE
        .lookup(tuple.remote_ip)
        .map(|(hop, _)| hop)
        .unwrap_or(tuple.remote_ip);
    ipv4::ipv4_tx(interface, next_hop, tuple.remote_ip, IpProtocol::Tcp, buf)
}

fn seg_len(header: &TcpHeader, buf: &Buffer) -> u32 {
    let data_len = buf.len().saturating_sub(TCP_HEADER_LEN) as u32;
    let syn = header.flags.contains(TcpFlags::SYN) as u32;
    let fin = header.flags.contains(TcpFlags::FIN) as u32;
    data_len + syn + fin
}

/// Delivers a validated IPv4/TCP segment: checksum, decode, look up the
/// owning connection by 4-tuple, and either reply per the closed-state
/// rules or dispatch to the matching state handler.
pub fn tcp_rx(intf: &'static NetInterface, ip_hdr: &Ipv4Header, buf: Buffer) {
    if checksum_segment(ip_hdr.src, ip_hdr.dst, &buf) != 0 {
        return;
    }
    let header = match decode(&buf) {
        Ok(header) => header,
        Err(err) => {
            klog_debug!("tcp_rx: {:?}", err);
            return;
        }
    };

    let incoming = TcpTuple {
        local_ip: ip_hdr.dst,
        local_port: header.dst_port,
        remote_ip: ip_hdr.src,
        remote_port: header.src_port,
    };

    let mut table = CONN_TABLE.lock();
    let found = table
        .iter()
        .position(|c| c.in_use && c.state != TcpState::Closed && c.tuple == incoming);

    match found {
        None => {
            drop(table);
            closed_state_reply(intf, incoming, &header, &buf);
        }
        Some(index) => {
            let result = match table[index].state {
                TcpState::SynSent => process_syn_sent(&mut table, index, &header),
                TcpState::SynReceived => process_syn_received(&mut table, index, &header),
                TcpState::Listen | TcpState::Closed => Ok(()),
                _ => process_open_connection(&mut table, index, &header),
            };
            if let Err(err) = result {
                klog_debug!("tcp_rx: connection {} aborted: {:?}", index, err);
            }
        }
    }
}

fn closed_state_reply(
    intf: &'static NetInterface,
    incoming: TcpTuple,
    header: &TcpHeader,
    buf: &Buffer,
) {
    if header.flags.contains(TcpFlags::RST) {
        return;
    }
    let (seq, ack, flags) = if header.flags.contains(TcpFlags::ACK) {
        (header.ack, 0, TcpFlags::RST)
    } else {
        (
            0,
            header.seq.wrapping_add(seg_len(header, buf)),
            TcpFlags::RST | TcpFlags::ACK,
        )
    };
    let _ = send_segment(intf, incoming, seq, ack, flags);
}

fn process_syn_sent(table: &mut ConnTable, index: usize, header: &TcpHeader) -> Result<(), TcpError> {
    let tuple;
    let interface;
    let mut emit: Option<(u32, u32, TcpFlags)> = None;
    let mut result = Ok(());

    {
        let c = &mut table[index];
        tuple = c.tuple;
        interface = c.interface.unwrap();
        let ack_acceptable =
            header.flags.contains(TcpFlags::ACK) && header.ack == c.iss.wrapping_add(1);

        if header.flags.contains(TcpFlags::ACK) && !ack_acceptable {
            if !header.flags.contains(TcpFlags::RST) {
                emit = Some((header.ack, 0, TcpFlags::RST));
            }
        } else if header.flags.contains(TcpFlags::RST) {
            if ack_acceptable {
                c.state = TcpState::Closed;
                c.in_use = false;
                result = Err(TcpError::ConnectionReset);
            }
        } else if header.flags.contains(TcpFlags::SYN) {
            c.irs = header.seq;
            c.rcv_nxt = header.seq.wrapping_add(1);
            if ack_acceptable {
                c.snd_una = header.ack;
                c.state = TcpState::Established;
                emit = Some((c.snd_nxt, c.rcv_nxt, TcpFlags::ACK));
            } else {
                c.state = TcpState::SynReceived;
                emit = Some((c.iss, c.rcv_nxt, TcpFlags::SYN | TcpFlags::ACK));
            }
        }
    }

    if let Some((seq, ack, flags)) = emit {
        let _ = send_segment(interface, tuple, seq, ack, flags);
    }
    result
}

fn process_syn_received(table: &mut ConnTable, index: usize, header: &TcpHeader) -> Result<(), TcpError> {
    let c = &mut table[index];
    if header.flags.contains(TcpFlags::RST) {
        c.state = TcpState::Closed;
        c.in_use = false;
        return Err(TcpError::ConnectionReset);
    }
    if header.flags.contains(TcpFlags::ACK) && header.ack == c.snd_nxt {
        c.snd_una = header.ack;
        c.state = TcpState::Established;
    }
    Ok(())
}

/// Handles `ESTABLISHED`, `CLOSE_WAIT`, `FIN_WAIT_1`, `FIN_WAIT_2`,
/// `CLOSING`, `LAST_ACK` and `TIME_WAIT` — everything past the handshake.
/// `CLOSING` (simultaneous close) is reachable in the enum but never
/// entered: this crate's close path always goes through the sequential
/// `FIN_WAIT_1 -> FIN_WAIT_2 -> TIME_WAIT` tail.
fn process_open_connection(
    table: &mut ConnTable,
    index: usize,
    header: &TcpHeader,
) -> Result<(), TcpError> {
    let tuple;
    let interface;
    let mut emit: Option<(u32, u32, TcpFlags)> = None;
    let mut result = Ok(());

    {
        let c = &mut table[index];
        tuple = c.tuple;
        interface = c.interface.unwrap();

        if header.flags.contains(TcpFlags::RST) {
            c.state = TcpState::Closed;
            c.in_use = false;
            result = Err(TcpError::ConnectionReset);
        } else {
            match c.state {
                TcpState::Established if header.flags.contains(TcpFlags::FIN | TcpFlags::ACK) => {
                    c.rcv_nxt = c.rcv_nxt.wrapping_add(1);
                    c.state = TcpState::CloseWait;
                    emit = Some((c.snd_nxt, c.rcv_nxt, TcpFlags::ACK));
                }
                TcpState::FinWait1
                    if header.flags.contains(TcpFlags::ACK)
                        && !header.flags.contains(TcpFlags::FIN)
                        && header.ack == c.snd_nxt =>
                {
                    c.state = TcpState::FinWait2;
                }
                TcpState::FinWait2 if header.flags.contains(TcpFlags::FIN) => {
                    c.rcv_nxt = c.rcv_nxt.wrapping_add(1);
                    c.time_wait_deadline = clock::now_ms() + TIME_WAIT_MS;
                    c.state = TcpState::TimeWait;
                    emit = Some((c.snd_nxt, c.rcv_nxt, TcpFlags::ACK));
                }
                TcpState::LastAck
                    if header.flags.contains(TcpFlags::ACK) && header.ack == c.snd_nxt =>
                {
                    c.state = TcpState::Closed;
                    c.in_use = false;
                }
                _ => {}
            }
        }
    }

    if let Some((seq, ack, flags)) = emit {
        let _ = send_segment(interface, tuple, seq, ack, flags);
    }
    result
}
