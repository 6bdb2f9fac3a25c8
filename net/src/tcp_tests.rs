//! In-crate conformance tests for the checksum/codec primitives and the TCP
//! connection engine, in the `TestResult`-returning style from
//! `wispos_lib::testing` rather than `#[test]` (this crate builds with
//! `test = false`, same as the teacher's kernel crates). Grounded on the
//! scenario shape of `drivers/src/tcp_tests.rs`: a loopback-ish interface
//! with a capturing transmit hook standing in for a real NIC, one
//! `TestResult` function per scenario, rolled up by `define_test_suite!`.

use alloc::vec::Vec;

use wispos_lib::testing::TestResult;
use wispos_lib::{IrqMutex, assert_eq_test, assert_test, define_test_suite, pass};

use crate::ipv4::Ipv4Header;
use crate::netdev::NetInterface;
use crate::packetbuf::Buffer;
use crate::route::{self, net_add_route};
use crate::tcp::{self, TcpFlags, TcpHandle, TcpHeader, TcpState};
use crate::types::{IpProtocol, Ipv4Addr, Port};

static CAPTURED: IrqMutex<Vec<Vec<u8>>> = IrqMutex::new(Vec::new());

fn capture_tx(buf: &Buffer) {
    CAPTURED.lock().push(buf.payload().to_vec());
}

const LOCAL_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const PEER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

static LOCAL_INTF: NetInterface = NetInterface::with_tx("test0", LOCAL_IP, capture_tx);

fn test_case_begin() {
    CAPTURED.lock().clear();
    tcp::tcp_reset_all();
    route::ROUTE_TABLE.remove_all();
    net_add_route(Ipv4Addr::LOOPBACK, 32, None, &LOCAL_INTF);
    net_add_route(Ipv4Addr::new(10, 0, 0, 0), 24, None, &LOCAL_INTF);
}

fn test_case_end() -> TestResult {
    assert_eq_test!(CAPTURED.lock().len(), 0, "undrained segments at test end");
    assert_eq_test!(tcp::tcp_active_count(), 0, "connections left in active set");
    pass!()
}

/// Pop the oldest captured IPv4 datagram and parse its TCP header. Strips
/// the fixed 20-byte IPv4 header captured alongside it by `ipv4_tx`.
fn take_segment() -> TcpHeader {
    let datagram = CAPTURED.lock().remove(0);
    let buf = Buffer::from_raw(&datagram[20..]).expect("captured segment too large");
    tcp::decode(&buf).expect("captured datagram too short for a TCP header")
}

fn build_inbound(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, header: TcpHeader) -> Buffer {
    let mut buf = Buffer::alloc();
    tcp::encode(&header, &mut buf);
    let checksum = tcp::checksum_segment(src_ip, dst_ip, &buf);
    buf.payload_mut()[16..18].copy_from_slice(&checksum.to_be_bytes());
    buf
}

fn deliver(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, header: TcpHeader) {
    let buf = build_inbound(src_ip, dst_ip, header);
    let ip_hdr = Ipv4Header {
        src: src_ip,
        dst: dst_ip,
        protocol: IpProtocol::Tcp,
    };
    tcp::tcp_rx(&LOCAL_INTF, &ip_hdr, buf);
}

/// Drives an active open to `ESTABLISHED` and returns the handle along with
/// the ISS and local port the engine chose, read back from the SYN it
/// actually transmitted rather than peeked out of private state.
fn connect_and_establish() -> (TcpHandle, u32, Port) {
    let conn = tcp::tcp_create();
    assert!(tcp::tcp_connect(conn, PEER_IP, Port(7)));

    let syn = take_segment();
    assert_eq!(syn.flags, TcpFlags::SYN);
    let iss = syn.seq;
    let local_port = syn.src_port;

    deliver(
        PEER_IP,
        LOCAL_IP,
        TcpHeader {
            src_port: Port(7),
            dst_port: local_port,
            seq: 1000,
            ack: iss.wrapping_add(1),
            flags: TcpFlags::SYN | TcpFlags::ACK,
            window: tcp::TCP_WINDOW_SIZE,
            checksum: 0,
            urgent: 0,
        },
    );
    let _ = take_segment(); // the ACK completing the handshake
    (conn, iss, local_port)
}

// ---------------------------------------------------------------------
// Byte-order / checksum primitives (C1)
// ---------------------------------------------------------------------

fn test_checksum_finalize_folds_to_zero() -> TestResult {
    use crate::bytes::{checksum_accumulate, checksum_finalize};
    let acc = checksum_accumulate(&[0x00, 0x01, 0xFF, 0xFE], 0);
    assert_eq_test!(checksum_finalize(acc), 0x0000);
    pass!()
}

fn test_checksum_accumulate_chunking_is_associative() -> TestResult {
    use crate::bytes::checksum_accumulate;
    let whole = checksum_accumulate(&[0x12, 0x34, 0x56, 0x78], 0);
    let split = checksum_accumulate(&[0x56, 0x78], checksum_accumulate(&[0x12, 0x34], 0));
    assert_eq_test!(whole, split);
    pass!()
}

// ---------------------------------------------------------------------
// Packet buffer (C2)
// ---------------------------------------------------------------------

fn test_buffer_push_pull_append_round_trip() -> TestResult {
    let mut buf = Buffer::alloc();
    assert_test!(buf.is_empty());

    buf.append(&[0xAA, 0xBB, 0xCC]).unwrap();
    assert_eq_test!(buf.len(), 3);

    let header = buf.push_header(4);
    header.copy_from_slice(&[1, 2, 3, 4]);
    assert_eq_test!(buf.len(), 7);
    assert_eq_test!(buf.payload()[0..4].to_vec(), alloc::vec![1u8, 2, 3, 4]);

    let pulled = buf.pull_header(4).unwrap().to_vec();
    assert_eq_test!(pulled, alloc::vec![1u8, 2, 3, 4]);
    assert_eq_test!(buf.payload().to_vec(), alloc::vec![0xAAu8, 0xBB, 0xCC]);
    pass!()
}

// ---------------------------------------------------------------------
// TCP codec round-trip law
// ---------------------------------------------------------------------

fn test_encode_decode_round_trip() -> TestResult {
    let header = TcpHeader {
        src_port: Port(55123),
        dst_port: Port(80),
        seq: 0xDEAD_BEEF,
        ack: 0x1234_5678,
        flags: TcpFlags::SYN | TcpFlags::ACK,
        window: tcp::TCP_WINDOW_SIZE,
        checksum: 0,
        urgent: 0,
    };
    let mut buf = Buffer::alloc();
    tcp::encode(&header, &mut buf);
    let decoded = tcp::decode(&buf).unwrap();

    assert_eq_test!(decoded.src_port, header.src_port);
    assert_eq_test!(decoded.dst_port, header.dst_port);
    assert_eq_test!(decoded.seq, header.seq);
    assert_eq_test!(decoded.ack, header.ack);
    assert_eq_test!(decoded.flags, header.flags);
    assert_eq_test!(decoded.window, header.window);
    pass!()
}

// ---------------------------------------------------------------------
// Concrete scenarios (spec section 8)
// ---------------------------------------------------------------------

fn test_closed_rst_dropped() -> TestResult {
    test_case_begin();
    deliver(
        PEER_IP,
        LOCAL_IP,
        TcpHeader {
            src_port: Port(100),
            dst_port: Port(101),
            seq: 1,
            ack: 2,
            flags: TcpFlags::RST,
            window: tcp::TCP_WINDOW_SIZE,
            checksum: 0,
            urgent: 0,
        },
    );
    assert_eq_test!(CAPTURED.lock().len(), 0);
    test_case_end()
}

fn test_closed_ack_gets_rst_reply() -> TestResult {
    test_case_begin();
    deliver(
        PEER_IP,
        LOCAL_IP,
        TcpHeader {
            src_port: Port(100),
            dst_port: Port(101),
            seq: 1,
            ack: 2,
            flags: TcpFlags::ACK,
            window: tcp::TCP_WINDOW_SIZE,
            checksum: 0,
            urgent: 0,
        },
    );
    let reply = take_segment();
    assert_eq_test!(reply.src_port, Port(101));
    assert_eq_test!(reply.dst_port, Port(100));
    assert_eq_test!(reply.seq, 2);
    assert_eq_test!(reply.ack, 0);
    assert_eq_test!(reply.flags, TcpFlags::RST);
    test_case_end()
}

fn test_closed_bare_segment_gets_rst_ack_reply() -> TestResult {
    test_case_begin();
    deliver(
        PEER_IP,
        LOCAL_IP,
        TcpHeader {
            src_port: Port(100),
            dst_port: Port(101),
            seq: 1,
            ack: 2,
            flags: TcpFlags::empty(),
            window: tcp::TCP_WINDOW_SIZE,
            checksum: 0,
            urgent: 0,
        },
    );
    let reply = take_segment();
    assert_eq_test!(reply.src_port, Port(101));
    assert_eq_test!(reply.dst_port, Port(100));
    assert_eq_test!(reply.seq, 0);
    assert_eq_test!(reply.ack, 1);
    assert_eq_test!(reply.flags, TcpFlags::RST | TcpFlags::ACK);
    test_case_end()
}

fn test_syn_sent_bad_ack_no_rst() -> TestResult {
    test_case_begin();
    let conn = tcp::tcp_create();
    assert_test!(tcp::tcp_connect(conn, PEER_IP, Port(7)));
    let syn = take_segment();
    assert_test!(syn.src_port.get() >= 49152, "opening port constraint");
    let iss = syn.seq;

    deliver(
        PEER_IP,
        LOCAL_IP,
        TcpHeader {
            src_port: Port(7),
            dst_port: syn.src_port,
            seq: 1000,
            ack: iss,
            flags: TcpFlags::ACK,
            window: tcp::TCP_WINDOW_SIZE,
            checksum: 0,
            urgent: 0,
        },
    );

    let reply = take_segment();
    assert_eq_test!(reply.seq, iss);
    assert_eq_test!(reply.ack, 0);
    assert_eq_test!(reply.flags, TcpFlags::RST);
    assert_eq_test!(tcp::tcp_get_state(conn), Some(TcpState::SynSent));

    tcp::tcp_close(conn);
    test_case_end()
}

fn test_syn_sent_rst_ack_acceptable_resets() -> TestResult {
    test_case_begin();
    let conn = tcp::tcp_create();
    assert_test!(tcp::tcp_connect(conn, PEER_IP, Port(7)));
    let syn = take_segment();
    let iss = syn.seq;

    deliver(
        PEER_IP,
        LOCAL_IP,
        TcpHeader {
            src_port: Port(7),
            dst_port: syn.src_port,
            seq: 1000,
            ack: iss.wrapping_add(1),
            flags: TcpFlags::RST | TcpFlags::ACK,
            window: tcp::TCP_WINDOW_SIZE,
            checksum: 0,
            urgent: 0,
        },
    );

    assert_eq_test!(CAPTURED.lock().len(), 0);
    assert_eq_test!(tcp::tcp_get_state(conn), None);
    test_case_end()
}

fn test_syn_sent_syn_ack_reaches_established() -> TestResult {
    test_case_begin();
    let conn = tcp::tcp_create();
    assert_test!(tcp::tcp_connect(conn, PEER_IP, Port(7)));
    let syn = take_segment();
    let iss = syn.seq;

    deliver(
        PEER_IP,
        LOCAL_IP,
        TcpHeader {
            src_port: Port(7),
            dst_port: syn.src_port,
            seq: 1000,
            ack: iss.wrapping_add(1),
            flags: TcpFlags::SYN | TcpFlags::ACK,
            window: tcp::TCP_WINDOW_SIZE,
            checksum: 0,
            urgent: 0,
        },
    );

    let reply = take_segment();
    assert_eq_test!(reply.seq, iss.wrapping_add(1));
    assert_eq_test!(reply.ack, 1001);
    assert_eq_test!(reply.flags, TcpFlags::ACK);
    assert_eq_test!(tcp::tcp_get_state(conn), Some(TcpState::Established));

    tcp::tcp_close(conn);
    let _fin = take_segment();
    deliver(
        PEER_IP,
        LOCAL_IP,
        TcpHeader {
            src_port: Port(7),
            dst_port: syn.src_port,
            seq: 1001,
            ack: iss.wrapping_add(2),
            flags: TcpFlags::ACK,
            window: tcp::TCP_WINDOW_SIZE,
            checksum: 0,
            urgent: 0,
        },
    );
    assert_eq_test!(tcp::tcp_get_state(conn), Some(TcpState::FinWait2));

    deliver(
        PEER_IP,
        LOCAL_IP,
        TcpHeader {
            src_port: Port(7),
            dst_port: syn.src_port,
            seq: 1001,
            ack: iss.wrapping_add(2),
            flags: TcpFlags::FIN | TcpFlags::ACK,
            window: tcp::TCP_WINDOW_SIZE,
            checksum: 0,
            urgent: 0,
        },
    );
    let _time_wait_ack = take_segment();
    assert_eq_test!(tcp::tcp_get_state(conn), Some(TcpState::TimeWait));

    tcp::tcp_timer_tick(u64::MAX);
    assert_eq_test!(tcp::tcp_get_state(conn), None);
    test_case_end()
}

fn test_syn_sent_bare_syn_reaches_syn_received() -> TestResult {
    test_case_begin();
    let conn = tcp::tcp_create();
    assert_test!(tcp::tcp_connect(conn, PEER_IP, Port(7)));
    let syn = take_segment();
    let iss = syn.seq;

    deliver(
        PEER_IP,
        LOCAL_IP,
        TcpHeader {
            src_port: Port(7),
            dst_port: syn.src_port,
            seq: 1000,
            ack: 0,
            flags: TcpFlags::SYN,
            window: tcp::TCP_WINDOW_SIZE,
            checksum: 0,
            urgent: 0,
        },
    );

    let reply = take_segment();
    assert_eq_test!(reply.seq, iss);
    assert_eq_test!(reply.ack, 1001);
    assert_eq_test!(reply.flags, TcpFlags::SYN | TcpFlags::ACK);
    assert_eq_test!(tcp::tcp_get_state(conn), Some(TcpState::SynReceived));

    // Abort it rather than driving a second handshake through to
    // completion — the scenario only asserts the SYN_RECEIVED transition.
    deliver(
        PEER_IP,
        LOCAL_IP,
        TcpHeader {
            src_port: Port(7),
            dst_port: syn.src_port,
            seq: 1001,
            ack: 0,
            flags: TcpFlags::RST,
            window: tcp::TCP_WINDOW_SIZE,
            checksum: 0,
            urgent: 0,
        },
    );
    assert_eq_test!(tcp::tcp_get_state(conn), None);
    test_case_end()
}

fn test_graceful_passive_close_from_established() -> TestResult {
    test_case_begin();
    let (conn, iss, local_port) = connect_and_establish();
    let snd_nxt = iss.wrapping_add(1);
    let rcv_nxt = 1001u32;

    deliver(
        PEER_IP,
        LOCAL_IP,
        TcpHeader {
            src_port: Port(7),
            dst_port: local_port,
            seq: rcv_nxt,
            ack: snd_nxt,
            flags: TcpFlags::FIN | TcpFlags::ACK,
            window: tcp::TCP_WINDOW_SIZE,
            checksum: 0,
            urgent: 0,
        },
    );

    let ack_reply = take_segment();
    assert_eq_test!(ack_reply.seq, snd_nxt);
    assert_eq_test!(ack_reply.ack, rcv_nxt + 1);
    assert_eq_test!(ack_reply.flags, TcpFlags::ACK);
    assert_eq_test!(tcp::tcp_get_state(conn), Some(TcpState::CloseWait));

    tcp::tcp_close(conn);
    let fin_reply = take_segment();
    assert_eq_test!(fin_reply.seq, snd_nxt);
    assert_eq_test!(fin_reply.ack, rcv_nxt + 1);
    assert_eq_test!(fin_reply.flags, TcpFlags::FIN | TcpFlags::ACK);
    assert_eq_test!(tcp::tcp_get_state(conn), Some(TcpState::LastAck));

    deliver(
        PEER_IP,
        LOCAL_IP,
        TcpHeader {
            src_port: Port(7),
            dst_port: local_port,
            seq: rcv_nxt + 1,
            ack: snd_nxt + 1,
            flags: TcpFlags::ACK,
            window: tcp::TCP_WINDOW_SIZE,
            checksum: 0,
            urgent: 0,
        },
    );
    assert_eq_test!(tcp::tcp_get_state(conn), None);
    test_case_end()
}

define_test_suite!(
    run_tcp_suite,
    "tcp",
    [
        test_checksum_finalize_folds_to_zero,
        test_checksum_accumulate_chunking_is_associative,
        test_buffer_push_pull_append_round_trip,
        test_encode_decode_round_trip,
        test_closed_rst_dropped,
        test_closed_ack_gets_rst_reply,
        test_closed_bare_segment_gets_rst_ack_reply,
        test_syn_sent_bad_ack_no_rst,
        test_syn_sent_rst_ack_acceptable_resets,
        test_syn_sent_syn_ack_reaches_established,
        test_syn_sent_bare_syn_reaches_syn_received,
        test_graceful_passive_close_from_established,
    ]
);
