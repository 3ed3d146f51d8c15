//! End-to-end scenarios from spec.md §8, driven as a fake client talking
//! real UDP to a real `server::run` instance, exercised against both
//! dispatcher modes.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use tftpd::cli::{Cli, DebugLevel};
use tftpd::config::ServerConfig;
use tftpd::server;
use tftpd::tftp::packet::Packet;
use tftpd::tftp::ErrorCode;

const LOOPBACK: IpAddr = IpAddr::V4(std::net::Ipv4Addr::LOCALHOST);

async fn free_loopback_port() -> u16 {
	let probe = UdpSocket::bind((LOOPBACK, 0)).await.unwrap();
	probe.local_addr().unwrap().port()
}

/// Start a real server instance on its own ephemeral loopback port, with
/// `dir` as its served directory. Returns the server's bound address and a
/// token the caller can cancel to shut it down.
async fn spawn_server(dir: &Path, single_port: bool, timeout_secs: u64) -> (SocketAddr, CancellationToken) {
	let port = free_loopback_port().await;
	let cli = Cli {
		bind: LOOPBACK,
		port,
		root: dir.to_path_buf(),
		block_size: 512,
		timeout: timeout_secs,
		retries: 3,
		single_port,
		debug: DebugLevel::Off,
	};
	let config = Arc::new(ServerConfig::try_from(cli).unwrap());
	let cancel = CancellationToken::new();
	let run_cancel = cancel.clone();
	tokio::spawn(async move {
		let _ = server::run(config, run_cancel).await;
	});
	// Give the listener a moment to bind before the first datagram is sent.
	tokio::time::sleep(Duration::from_millis(50)).await;
	(SocketAddr::from((LOOPBACK, port)), cancel)
}

async fn send(sock: &UdpSocket, addr: SocketAddr, pkt: &Packet) {
	sock.send_to(&pkt.encode(), addr).await.unwrap();
}

async fn recv(sock: &UdpSocket) -> (Packet, SocketAddr) {
	let mut buf = vec![0u8; 1024];
	let (n, from) = tokio::time::timeout(Duration::from_secs(3), sock.recv_from(&mut buf))
		.await
		.expect("timed out waiting for a reply")
		.unwrap();
	(Packet::decode(&buf[..n]).expect("server sent an unparseable packet"), from)
}

/// Scenario 1 (spec.md §8): small file, one data block plus the empty
/// terminator block.
async fn scenario_small_file(single_port: bool) {
	let dir = tempfile::tempdir().unwrap();
	std::fs::write(dir.path().join("hello.txt"), b"HELLO\n").unwrap();
	let (server_addr, _cancel) = spawn_server(dir.path(), single_port, 1).await;

	let client = UdpSocket::bind((LOOPBACK, 0)).await.unwrap();
	send(&client, server_addr, &Packet::Rrq { filename: "hello.txt".into(), mode: "octet".into() }).await;

	let (pkt, from) = recv(&client).await;
	assert_eq!(pkt, Packet::Data { block: 1, payload: b"HELLO\n".to_vec() });

	send(&client, from, &Packet::Ack { block: 1 }).await;
	let (pkt, _) = recv(&client).await;
	assert_eq!(pkt, Packet::Data { block: 2, payload: Vec::new() }, "exact-multiple-of-zero file still needs an empty terminator block");

	send(&client, from, &Packet::Ack { block: 2 }).await;
}

/// Scenario 2 (spec.md §8): a file whose length is an exact multiple of the
/// block size sends a trailing empty DATA block.
async fn scenario_exact_multiple_file(single_port: bool) {
	let dir = tempfile::tempdir().unwrap();
	let contents = vec![0xABu8; 1024];
	std::fs::write(dir.path().join("blob.bin"), &contents).unwrap();
	let (server_addr, _cancel) = spawn_server(dir.path(), single_port, 1).await;

	let client = UdpSocket::bind((LOOPBACK, 0)).await.unwrap();
	send(&client, server_addr, &Packet::Rrq { filename: "blob.bin".into(), mode: "octet".into() }).await;

	let mut from = server_addr;
	let mut received = Vec::new();
	let mut data_packets = 0;
	loop {
		let (pkt, peer) = recv(&client).await;
		from = peer;
		match pkt {
			Packet::Data { block, payload } => {
				data_packets += 1;
				let done = payload.len() < 512;
				received.extend_from_slice(&payload);
				send(&client, from, &Packet::Ack { block }).await;
				if done {
					break;
				}
			}
			other => panic!("expected DATA, got {other:?}"),
		}
	}

	assert_eq!(received, contents);
	assert_eq!(data_packets, 3, "1024 bytes at block size 512 is exactly two full blocks plus one empty terminator");
}

/// Scenario 3 (spec.md §8): requesting a file that does not exist.
async fn scenario_file_not_found(single_port: bool) {
	let dir = tempfile::tempdir().unwrap();
	let (server_addr, _cancel) = spawn_server(dir.path(), single_port, 1).await;

	let client = UdpSocket::bind((LOOPBACK, 0)).await.unwrap();
	send(&client, server_addr, &Packet::Rrq { filename: "missing".into(), mode: "octet".into() }).await;

	let (pkt, _) = recv(&client).await;
	assert_eq!(pkt, Packet::Error { code: ErrorCode::NotFound, message: "File missing not found".into() });
}

/// Scenario 4 (spec.md §8): a write request is always rejected.
async fn scenario_write_rejected(single_port: bool) {
	let dir = tempfile::tempdir().unwrap();
	let (server_addr, _cancel) = spawn_server(dir.path(), single_port, 1).await;

	let client = UdpSocket::bind((LOOPBACK, 0)).await.unwrap();
	send(&client, server_addr, &Packet::Wrq { filename: "anything".into(), mode: "octet".into() }).await;

	let (pkt, _) = recv(&client).await;
	assert_eq!(pkt, Packet::Error { code: ErrorCode::IllegalOperation, message: "Write requests are not supported yet".into() });
}

/// Scenario 5 (spec.md §8): a dropped DATA packet is resent after the
/// retransmit timeout, and the transfer completes once the client finally
/// ACKs it.
async fn scenario_retry_then_success(single_port: bool) {
	let dir = tempfile::tempdir().unwrap();
	std::fs::write(dir.path().join("hello.txt"), b"HELLO\n").unwrap();
	let (server_addr, _cancel) = spawn_server(dir.path(), single_port, 1).await;

	let client = UdpSocket::bind((LOOPBACK, 0)).await.unwrap();
	send(&client, server_addr, &Packet::Rrq { filename: "hello.txt".into(), mode: "octet".into() }).await;

	let (first, from) = recv(&client).await;
	assert_eq!(first, Packet::Data { block: 1, payload: b"HELLO\n".to_vec() });

	// Drop it: don't ACK. The server's 1s retransmit timer should resend
	// the identical block without advancing.
	let (resent, _) = recv(&client).await;
	assert_eq!(resent, first, "resent block must be identical to the original, not the next block");

	send(&client, from, &Packet::Ack { block: 1 }).await;
	let (last, _) = recv(&client).await;
	assert_eq!(last, Packet::Data { block: 2, payload: Vec::new() });
	send(&client, from, &Packet::Ack { block: 2 }).await;
}

/// Scenario 6 (spec.md §8): in ephemeral mode, a datagram from a peer other
/// than the transfer's actual client gets ERROR(UNKNOWN_TID) and does not
/// disturb the real transfer. Single-port mode has no analogous check
/// (spec.md §4.4): the table key IS the source tuple, so there is nothing
/// for a rogue peer to collide with.
#[tokio::test]
async fn scenario_rogue_peer_gets_unknown_tid_ephemeral_mode_only() {
	let dir = tempfile::tempdir().unwrap();
	std::fs::write(dir.path().join("hello.txt"), b"HELLO\n").unwrap();
	let (server_addr, _cancel) = spawn_server(dir.path(), false, 1).await;

	let client = UdpSocket::bind((LOOPBACK, 0)).await.unwrap();
	send(&client, server_addr, &Packet::Rrq { filename: "hello.txt".into(), mode: "octet".into() }).await;
	let (first, transfer_addr) = recv(&client).await;
	assert_eq!(first, Packet::Data { block: 1, payload: b"HELLO\n".to_vec() });
	assert_ne!(transfer_addr, server_addr, "ephemeral mode replies from a fresh port, not the listener");

	let rogue = UdpSocket::bind((LOOPBACK, 0)).await.unwrap();
	send(&rogue, transfer_addr, &Packet::Ack { block: 99 }).await;
	let (reply, _) = recv(&rogue).await;
	assert_eq!(reply, Packet::Error { code: ErrorCode::UnknownTid, message: "Unexpected client address".into() });

	// The legitimate transfer's state is untouched: it still expects an ACK
	// of block 1, not block 99, and still completes normally.
	send(&client, transfer_addr, &Packet::Ack { block: 1 }).await;
	let (last, _) = recv(&client).await;
	assert_eq!(last, Packet::Data { block: 2, payload: Vec::new() });
}

#[tokio::test]
async fn small_file_ephemeral_mode() {
	scenario_small_file(false).await;
}

#[tokio::test]
async fn small_file_single_port_mode() {
	scenario_small_file(true).await;
}

#[tokio::test]
async fn exact_multiple_file_ephemeral_mode() {
	scenario_exact_multiple_file(false).await;
}

#[tokio::test]
async fn exact_multiple_file_single_port_mode() {
	scenario_exact_multiple_file(true).await;
}

#[tokio::test]
async fn file_not_found_ephemeral_mode() {
	scenario_file_not_found(false).await;
}

#[tokio::test]
async fn file_not_found_single_port_mode() {
	scenario_file_not_found(true).await;
}

#[tokio::test]
async fn write_rejected_ephemeral_mode() {
	scenario_write_rejected(false).await;
}

#[tokio::test]
async fn write_rejected_single_port_mode() {
	scenario_write_rejected(true).await;
}

#[tokio::test]
async fn retry_then_success_ephemeral_mode() {
	scenario_retry_then_success(false).await;
}

#[tokio::test]
async fn retry_then_success_single_port_mode() {
	scenario_retry_then_success(true).await;
}
