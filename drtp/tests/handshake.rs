//! Integration tests for the handshake and teardown.
//!
//! Each test binds real loopback sockets.  Where exact wire bytes matter the
//! peer is a bare `tokio::net::UdpSocket` so the test controls every
//! datagram.

use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use drtp::{
    config::ConfigError,
    connection::{ConnError, Connection},
    packet::{self, flags, Packet},
    socket::Socket,
    state::ConnectionState,
    timer::TimerConfig,
    ReliabilityMode, TransferConfig,
};
use tokio::net::UdpSocket;

const WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

async fn bind() -> (Socket, SocketAddr) {
    let socket = Socket::bind(loopback()).await.expect("bind socket");
    let addr = socket.local_addr;
    (socket, addr)
}

fn fast_config() -> TransferConfig {
    TransferConfig {
        timer: TimerConfig::with_rtt(Duration::from_millis(25)),
        ..TransferConfig::default()
    }
}

/// `true` if nothing arrives on `sock` for `quiet`.
async fn stays_silent(sock: &UdpSocket, quiet: Duration) -> bool {
    let mut buf = [0u8; packet::MAX_PACKET];
    tokio::time::timeout(quiet, sock.recv_from(&mut buf))
        .await
        .is_err()
}

/// Receive one raw datagram and decode its header.
async fn recv_raw(sock: &UdpSocket) -> (packet::Header, Vec<u8>, SocketAddr) {
    let mut buf = [0u8; packet::MAX_PACKET];
    let (n, from) = tokio::time::timeout(WAIT, sock.recv_from(&mut buf))
        .await
        .expect("raw recv timed out")
        .expect("raw recv failed");
    let (header, payload) = packet::decode(&buf[..n]).expect("decode");
    (header, payload.to_vec(), from)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Both sides should reach `Established` after a clean handshake on loopback.
#[tokio::test]
async fn handshake_both_sides_reach_established() {
    init_logging();
    let (server_socket, server_addr) = bind().await;

    let server_task =
        tokio::spawn(async move { Connection::accept(server_socket, fast_config()).await });

    let (client_socket, client_addr) = bind().await;
    let client = tokio::time::timeout(
        WAIT,
        Connection::connect(client_socket, server_addr, fast_config()),
    )
    .await
    .expect("client connect timed out")
    .expect("client connect failed");

    let server = tokio::time::timeout(WAIT, server_task)
        .await
        .expect("server accept timed out")
        .expect("server task panicked")
        .expect("server accept failed");

    assert_eq!(client.state, ConnectionState::Established);
    assert_eq!(server.state, ConnectionState::Established);
    assert_eq!(client.peer(), server_addr);
    assert_eq!(server.peer(), client_addr);
}

/// SYN is `seq=0 ack=0 flags=0x8 win=0`; the reply to `0xC` is a bare `0x4`.
#[tokio::test]
async fn client_handshake_wire_format() {
    init_logging();
    let fake_server = UdpSocket::bind(loopback()).await.unwrap();
    let server_addr = fake_server.local_addr().unwrap();

    let (client_socket, _) = bind().await;
    let client_task = tokio::spawn(async move {
        Connection::connect(client_socket, server_addr, fast_config()).await
    });

    let mut buf = [0u8; 64];
    let (n, client_addr) = tokio::time::timeout(WAIT, fake_server.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], &[0, 0, 0, 0, 0, 0, 0, 0, 0, 0x08, 0, 0]);

    let syn_ack = packet::encode(0, 0, flags::SYN | flags::ACK, 0, &[]);
    fake_server.send_to(&syn_ack, client_addr).await.unwrap();

    let (ack, payload, _) = recv_raw(&fake_server).await;
    assert_eq!(ack.flags, flags::ACK);
    assert_eq!((ack.seq, ack.ack), (0, 0));
    assert!(payload.is_empty());

    let client = tokio::time::timeout(WAIT, client_task)
        .await
        .unwrap()
        .unwrap()
        .expect("connect failed");
    assert_eq!(client.state, ConnectionState::Established);
}

/// Nobody answers the SYN: the client gives up after one timeout.
#[tokio::test]
async fn connect_to_silent_peer_fails_with_handshake_timeout() {
    init_logging();
    // Bound but never read from, so the SYN goes unanswered.
    let silent = UdpSocket::bind(loopback()).await.unwrap();
    let silent_addr = silent.local_addr().unwrap();

    let (client_socket, _) = bind().await;
    let result = tokio::time::timeout(
        WAIT,
        Connection::connect(client_socket, silent_addr, fast_config()),
    )
    .await
    .expect("connect should fail on its own, not hang");

    assert!(matches!(result, Err(ConnError::HandshakeTimeout)));
}

/// The client's SYN-ACK arrives, then nothing: no ACK and no data.  The
/// server gives up after one timeout without retrying, and the same socket
/// can go straight back to listening for the next client.
#[tokio::test]
async fn accept_times_out_when_handshake_ack_never_comes() {
    init_logging();
    let (server_socket, server_addr) = bind().await;
    let server_socket = Arc::new(server_socket);
    let listener = Arc::clone(&server_socket);
    let server_task =
        tokio::spawn(async move { Connection::accept(listener, fast_config()).await });

    let ghost = UdpSocket::bind(loopback()).await.unwrap();
    ghost
        .send_to(&Packet::syn().encode(), server_addr)
        .await
        .unwrap();
    let (syn_ack, _, _) = recv_raw(&ghost).await;
    assert_eq!(syn_ack.flags, flags::SYN | flags::ACK);

    let result = tokio::time::timeout(WAIT, server_task)
        .await
        .expect("accept should fail on its own, not hang")
        .unwrap();
    assert!(matches!(result, Err(ConnError::HandshakeTimeout)));
    // Closed, not SYN_RCVD: the SYN-ACK is never repeated.
    assert!(stays_silent(&ghost, Duration::from_millis(300)).await);

    let listener = Arc::clone(&server_socket);
    let server_task =
        tokio::spawn(async move { Connection::accept(listener, fast_config()).await });
    let (client_socket, client_addr) = bind().await;
    let client = Connection::connect(client_socket, server_addr, fast_config())
        .await
        .expect("second client connect");
    let server = tokio::time::timeout(WAIT, server_task)
        .await
        .unwrap()
        .unwrap()
        .expect("second accept");
    assert_eq!(client.state, ConnectionState::Established);
    assert_eq!(server.state, ConnectionState::Established);
    assert_eq!(server.peer(), client_addr);
}

/// A config no strategy can run with is refused before the SYN goes out.
#[tokio::test]
async fn zero_window_is_rejected_before_anything_is_sent() {
    init_logging();
    let fake_server = UdpSocket::bind(loopback()).await.unwrap();
    let server_addr = fake_server.local_addr().unwrap();

    let config = TransferConfig {
        mode: ReliabilityMode::GoBackN,
        window: 0,
        ..fast_config()
    };
    let (client_socket, _) = bind().await;
    let result = tokio::time::timeout(
        WAIT,
        drtp::run_client_transfer(client_socket, server_addr, config, Cursor::new(vec![1u8; 64])),
    )
    .await
    .expect("bad config should fail fast");

    assert!(matches!(
        result,
        Err(ConnError::BadConfig(ConfigError::ZeroWindow))
    ));
    assert!(stays_silent(&fake_server, Duration::from_millis(200)).await);
}

/// `accept` validates before it starts listening, so it returns even with
/// no client around.
#[tokio::test]
async fn accept_rejects_zero_timeout() {
    init_logging();
    let (server_socket, _) = bind().await;
    let config = TransferConfig {
        timer: TimerConfig::with_rtt(Duration::ZERO),
        ..fast_config()
    };

    let result = tokio::time::timeout(WAIT, Connection::accept(server_socket, config))
        .await
        .expect("bad config should fail fast");
    assert!(matches!(
        result,
        Err(ConnError::BadConfig(ConfigError::ZeroTimeout { .. }))
    ));
}

/// A stray datagram from a third party does not disturb the handshake.
#[tokio::test]
async fn client_ignores_strangers_during_handshake() {
    init_logging();
    let fake_server = UdpSocket::bind(loopback()).await.unwrap();
    let server_addr = fake_server.local_addr().unwrap();
    let stranger = UdpSocket::bind(loopback()).await.unwrap();

    let (client_socket, _) = bind().await;
    let client_task = tokio::spawn(async move {
        Connection::connect(client_socket, server_addr, fast_config()).await
    });

    let (syn, _, client_addr) = recv_raw(&fake_server).await;
    assert_eq!(syn.flags, flags::SYN);

    stranger
        .send_to(&Packet::syn_ack().encode(), client_addr)
        .await
        .unwrap();
    fake_server
        .send_to(&Packet::syn_ack().encode(), client_addr)
        .await
        .unwrap();

    let client = tokio::time::timeout(WAIT, client_task)
        .await
        .unwrap()
        .unwrap()
        .expect("connect failed");
    assert_eq!(client.peer(), server_addr);
}

/// A repeated SYN while in SYN_RCVD gets a second SYN-ACK.
#[tokio::test]
async fn server_resends_syn_ack_on_duplicate_syn() {
    init_logging();
    let (server_socket, server_addr) = bind().await;
    let server_task =
        tokio::spawn(async move { Connection::accept(server_socket, fast_config()).await });

    let fake_client = UdpSocket::bind(loopback()).await.unwrap();
    let syn = Packet::syn().encode();

    fake_client.send_to(&syn, server_addr).await.unwrap();
    let (first, _, _) = recv_raw(&fake_client).await;
    assert_eq!(first.flags, flags::SYN | flags::ACK);

    fake_client.send_to(&syn, server_addr).await.unwrap();
    let (second, _, _) = recv_raw(&fake_client).await;
    assert_eq!(second.flags, flags::SYN | flags::ACK);

    fake_client
        .send_to(&Packet::handshake_ack().encode(), server_addr)
        .await
        .unwrap();

    let server = tokio::time::timeout(WAIT, server_task)
        .await
        .unwrap()
        .unwrap()
        .expect("accept failed");
    assert_eq!(server.state, ConnectionState::Established);
}

/// The handshake ACK is lost; the first data packet completes the handshake
/// and is not lost itself.
#[tokio::test]
async fn data_packet_stands_in_for_lost_handshake_ack() {
    init_logging();
    let (server_socket, server_addr) = bind().await;
    let server_task = tokio::spawn(async move {
        drtp::run_server_transfer(server_socket, fast_config()).await
    });

    let fake_client = UdpSocket::bind(loopback()).await.unwrap();
    fake_client
        .send_to(&Packet::syn().encode(), server_addr)
        .await
        .unwrap();
    let (syn_ack, _, _) = recv_raw(&fake_client).await;
    assert_eq!(syn_ack.flags, flags::SYN | flags::ACK);

    // Skip the ACK and go straight to data.
    let data = Packet::data(1, b"hi".to_vec(), true).encode();
    fake_client.send_to(&data, server_addr).await.unwrap();
    let (ack, _, _) = recv_raw(&fake_client).await;
    assert_eq!(ack.flags, flags::ACK);
    assert_eq!(ack.ack, 1);

    fake_client
        .send_to(&Packet::fin().encode(), server_addr)
        .await
        .unwrap();
    let (fin_ack, _, _) = recv_raw(&fake_client).await;
    assert_eq!(fin_ack.flags, flags::FIN | flags::ACK);
    assert_eq!(fin_ack.ack, 0);

    let received = tokio::time::timeout(WAIT, server_task)
        .await
        .unwrap()
        .unwrap()
        .expect("server transfer failed");
    assert_eq!(received, b"hi");
}

/// A datagram shorter than the header is discarded without ending the
/// connection attempt.
#[tokio::test]
async fn server_skips_malformed_datagrams() {
    init_logging();
    let (server_socket, server_addr) = bind().await;
    let server_task =
        tokio::spawn(async move { Connection::accept(server_socket, fast_config()).await });

    let fake_client = UdpSocket::bind(loopback()).await.unwrap();
    fake_client.send_to(&[0x00, 0x08], server_addr).await.unwrap();
    fake_client
        .send_to(&Packet::syn().encode(), server_addr)
        .await
        .unwrap();
    let (syn_ack, _, _) = recv_raw(&fake_client).await;
    assert_eq!(syn_ack.flags, flags::SYN | flags::ACK);

    fake_client
        .send_to(&Packet::handshake_ack().encode(), server_addr)
        .await
        .unwrap();
    let server = tokio::time::timeout(WAIT, server_task)
        .await
        .unwrap()
        .unwrap()
        .expect("accept failed");
    assert_eq!(server.state, ConnectionState::Established);
}

/// The server never answers the FIN: close retries, then reports how many
/// FINs it sent.
#[tokio::test]
async fn teardown_gives_up_after_retry_budget() {
    init_logging();
    let fake_server = UdpSocket::bind(loopback()).await.unwrap();
    let server_addr = fake_server.local_addr().unwrap();

    let config = TransferConfig {
        teardown_retries: 3,
        ..fast_config()
    };
    let (client_socket, _) = bind().await;
    let client_task = tokio::spawn(async move {
        let mut conn = Connection::connect(client_socket, server_addr, config)
            .await
            .expect("connect");
        conn.close().await.map(|()| conn.state)
    });

    let (_, _, client_addr) = recv_raw(&fake_server).await;
    fake_server
        .send_to(&Packet::syn_ack().encode(), client_addr)
        .await
        .unwrap();
    let (ack, _, _) = recv_raw(&fake_server).await;
    assert_eq!(ack.flags, flags::ACK);

    for _ in 0..3 {
        let (fin, _, _) = recv_raw(&fake_server).await;
        assert_eq!(fin.flags, flags::FIN);
        assert_eq!(fin.seq, 0);
    }

    let result = tokio::time::timeout(WAIT, client_task)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        result,
        Err(ConnError::TeardownTimeout { attempts: 3 })
    ));
}

/// A lost FIN-ACK is recovered by the client's FIN retry.
#[tokio::test]
async fn teardown_survives_one_lost_fin_ack() {
    init_logging();
    let fake_server = UdpSocket::bind(loopback()).await.unwrap();
    let server_addr = fake_server.local_addr().unwrap();

    let (client_socket, _) = bind().await;
    let client_task = tokio::spawn(async move {
        let mut conn = Connection::connect(client_socket, server_addr, fast_config())
            .await
            .expect("connect");
        conn.close().await.map(|()| conn.state)
    });

    let (_, _, client_addr) = recv_raw(&fake_server).await;
    fake_server
        .send_to(&Packet::syn_ack().encode(), client_addr)
        .await
        .unwrap();
    recv_raw(&fake_server).await;

    // First FIN: pretend our FIN-ACK was lost by not answering.
    let (fin, _, _) = recv_raw(&fake_server).await;
    assert_eq!(fin.flags, flags::FIN);
    let (fin, _, _) = recv_raw(&fake_server).await;
    assert_eq!(fin.flags, flags::FIN);
    fake_server
        .send_to(&Packet::fin_ack().encode(), client_addr)
        .await
        .unwrap();

    let state = tokio::time::timeout(WAIT, client_task)
        .await
        .unwrap()
        .unwrap()
        .expect("close failed");
    assert_eq!(state, ConnectionState::Closed);
}

/// A bare ACK (`0x4`, `ack=0`) is as good a FIN reply as FIN-ACK.
#[tokio::test]
async fn teardown_accepts_plain_ack_reply() {
    init_logging();
    let fake_server = UdpSocket::bind(loopback()).await.unwrap();
    let server_addr = fake_server.local_addr().unwrap();

    let (client_socket, _) = bind().await;
    let client_task = tokio::spawn(async move {
        let mut conn = Connection::connect(client_socket, server_addr, fast_config())
            .await
            .expect("connect");
        conn.close().await.map(|()| conn.state)
    });

    let (_, _, client_addr) = recv_raw(&fake_server).await;
    fake_server
        .send_to(&Packet::syn_ack().encode(), client_addr)
        .await
        .unwrap();
    recv_raw(&fake_server).await;

    let (fin, _, _) = recv_raw(&fake_server).await;
    assert_eq!(fin.flags, flags::FIN);
    let plain_ack = packet::encode(0, 0, flags::ACK, 0, &[]);
    fake_server.send_to(&plain_ack, client_addr).await.unwrap();

    let state = tokio::time::timeout(WAIT, client_task)
        .await
        .unwrap()
        .unwrap()
        .expect("close failed");
    assert_eq!(state, ConnectionState::Closed);
    // One FIN was enough.
    assert!(stays_silent(&fake_server, Duration::from_millis(300)).await);
}

/// Data-phase calls are rejected on the wrong side.
#[tokio::test]
async fn wrong_role_is_bad_state() {
    init_logging();
    let (server_socket, server_addr) = bind().await;
    let server_task =
        tokio::spawn(async move { Connection::accept(server_socket, fast_config()).await });

    let (client_socket, _) = bind().await;
    let mut client = Connection::connect(client_socket, server_addr, fast_config())
        .await
        .unwrap();
    let mut server = tokio::time::timeout(WAIT, server_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert!(matches!(
        client.receive_payload().await,
        Err(ConnError::BadState(ConnectionState::Established))
    ));
    assert!(matches!(
        server.close().await,
        Err(ConnError::BadState(ConnectionState::Established))
    ));
}
