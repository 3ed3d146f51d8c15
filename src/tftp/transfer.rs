use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::tftp::error::TransferError;
use crate::tftp::files::{FetchError, FileProvider, SourceKind};
use crate::tftp::packet::Packet;
use crate::tftp::{ErrorCode, TransferPhase};

/// Block numbers wrap at this boundary (spec.md §3/§4.4): the wire field is
/// `u16`, so the 65536th DATA packet (`n = 65536`) re-encodes as block 0.
const BLOCK_MODULUS: u64 = 1 << 16;

/// Fixed parameters a transfer is constructed with, carried over from
/// `ServerConfig` rather than re-read from it on every block.
#[derive(Debug, Clone, Copy)]
pub struct TransferLimits {
	pub block_size: u16,
	pub timeout: Duration,
	pub retries: u8,
}

/// How a `Transfer` gets the next datagram meant for it. Ephemeral transfers
/// own their socket outright and validate the peer themselves (spec.md
/// §4.4's TID check); single-port transfers are fed pre-filtered payloads by
/// the dispatcher, which already demultiplexed by source address via the
/// `ClientTable`, so no further TID check is needed there (spec.md §4.4:
/// "Single-port mode has no analogous check because the table key IS the
/// source tuple").
enum Inbox {
	Ephemeral(Arc<UdpSocket>),
	Routed(mpsc::Receiver<Vec<u8>>),
}

/// Where a `Transfer` sends its replies.
struct Transport {
	socket: Arc<UdpSocket>,
	peer: SocketAddr,
}

impl Transport {
	async fn send(&self, pkt: &Packet) {
		if let Err(e) = self.socket.send_to(&pkt.encode(), self.peer).await {
			warn!("failed to send to {}: {e}", self.peer);
		}
	}

	async fn send_to(&self, addr: SocketAddr, pkt: &Packet) {
		if let Err(e) = self.socket.send_to(&pkt.encode(), addr).await {
			warn!("failed to send to {addr}: {e}");
		}
	}
}

/// Outcome of waiting for the next event relevant to this transfer: either
/// a datagram from the legitimate peer, a timeout, or the routed channel
/// closing out from under a single-port transfer.
enum Event {
	Datagram(Vec<u8>),
	Timeout,
	/// The routed channel closed (dispatcher dropped this entry, e.g. on
	/// `ClientTable` eviction). Treated like an unparseable datagram: the
	/// transfer just stops.
	Closed,
}

impl Inbox {
	/// Wait for the next datagram addressed to this transfer, up to
	/// `deadline`. In ephemeral mode, datagrams from any address other than
	/// `peer` are answered inline with `ERROR(UNKNOWN_TID)` per spec.md
	/// §4.4 and otherwise ignored — they do not count as activity and do
	/// not move `deadline`, so a flood of rogue traffic cannot indefinitely
	/// stall the real transfer's retry timer.
	async fn next_event(&mut self, transport: &Transport, deadline: Instant, scratch: &mut [u8]) -> Event {
		match self {
			Inbox::Ephemeral(socket) => loop {
				let remaining = deadline.saturating_duration_since(Instant::now());
				match tokio::time::timeout(remaining, socket.recv_from(scratch)).await {
					Err(_) => return Event::Timeout,
					Ok(Err(e)) => {
						warn!("recv error on ephemeral socket for {}: {e}", transport.peer);
						return Event::Timeout;
					}
					Ok(Ok((n, addr))) => {
						if addr != transport.peer {
							warn!("datagram from unexpected address {addr}, expected {}", transport.peer);
							transport
								.send_to(addr, &Packet::Error { code: ErrorCode::UnknownTid, message: "Unexpected client address".into() })
								.await;
							continue;
						}
						return Event::Datagram(scratch[..n].to_vec());
					}
				}
			},
			Inbox::Routed(rx) => {
				let remaining = deadline.saturating_duration_since(Instant::now());
				match tokio::time::timeout(remaining, rx.recv()).await {
					Err(_) => Event::Timeout,
					Ok(None) => Event::Closed,
					Ok(Some(bytes)) => Event::Datagram(bytes),
				}
			}
		}
	}
}

/// One read transfer, driving the state machine from spec.md §4.4. Shared
/// between both dispatcher modes; only how its `Inbox`/`Transport` obtain
/// and deliver datagrams differs.
pub struct Transfer {
	peer: SocketAddr,
	filename: String,
	limits: TransferLimits,
	phase: TransferPhase,
	/// 1-indexed sequence number of the DATA packet most recently sent
	/// (the one this transfer is currently waiting for an ACK of). Kept as
	/// a `u64` so the wrap-to-0 wire encoding (`% 65536`) is a pure
	/// function of this counter instead of two-branch arithmetic that
	/// special-cases the first overflow.
	pending_n: u64,
	retries: u8,
	file_data: Option<Arc<Vec<u8>>>,
	transport: Transport,
	inbox: Inbox,
}

impl Transfer {
	fn new(peer: SocketAddr, limits: TransferLimits, transport: Transport, inbox: Inbox, filename: String) -> Self {
		Self {
			peer,
			filename,
			limits,
			phase: TransferPhase::Initial,
			pending_n: 0,
			retries: 0,
			file_data: None,
			transport,
			inbox,
		}
	}

	/// Spawn an ephemeral-mode transfer: binds a fresh, unconnected UDP
	/// socket and drives it to completion on its own task. Per spec.md
	/// §4.3, a bind failure here is logged and the initial datagram is
	/// dropped; it is not retried.
	pub fn spawn_ephemeral(
		bind_host: std::net::IpAddr,
		peer: SocketAddr,
		initial_data: Vec<u8>,
		limits: TransferLimits,
		files: Arc<FileProvider>,
		cancel: tokio_util::sync::CancellationToken,
	) {
		tokio::spawn(async move {
			let socket = match UdpSocket::bind((bind_host, 0)).await {
				Ok(s) => Arc::new(s),
				Err(e) => {
					error!("failed to bind ephemeral socket for {peer}: {e}");
					return;
				}
			};
			info!("ephemeral transfer for {peer} bound to {:?}", socket.local_addr());
			let transport = Transport { socket: socket.clone(), peer };
			let inbox = Inbox::Ephemeral(socket);
			let transfer = Transfer::new(peer, limits, transport, inbox, String::new());
			tokio::select! {
				_ = transfer.run(initial_data, files) => {}
				_ = cancel.cancelled() => {}
			}
		});
	}

	/// Spawn a single-port-mode transfer: reuses the dispatcher's listening
	/// socket and receives further datagrams over `rx`, which the
	/// dispatcher feeds from its own `recv_from` loop after routing by
	/// peer address through the `ClientTable`.
	pub fn spawn_shared(
		socket: Arc<UdpSocket>,
		peer: SocketAddr,
		initial_data: Vec<u8>,
		rx: mpsc::Receiver<Vec<u8>>,
		limits: TransferLimits,
		files: Arc<FileProvider>,
		cancel: tokio_util::sync::CancellationToken,
	) {
		tokio::spawn(async move {
			let transport = Transport { socket, peer };
			let inbox = Inbox::Routed(rx);
			let transfer = Transfer::new(peer, limits, transport, inbox, String::new());
			tokio::select! {
				_ = transfer.run(initial_data, files) => {}
				_ = cancel.cancelled() => {}
			}
		});
	}

	/// Drive this transfer to completion: interpret the initial datagram,
	/// then loop sending/retrying DATA blocks until the final ACK arrives,
	/// the peer goes quiet past the retry budget, or a protocol error ends
	/// the transfer early.
	async fn run(mut self, initial_data: Vec<u8>, files: Arc<FileProvider>) {
		if let Err(err) = self.handle_initial(initial_data, &files).await {
			self.transport.send(&Packet::Error { code: err.code, message: err.message }).await;
			return;
		}
		if !matches!(self.phase, TransferPhase::RrqActive | TransferPhase::Kill) {
			return;
		}

		let mut scratch = vec![0u8; 4 + self.limits.block_size as usize + 64];
		loop {
			let deadline = Instant::now() + self.limits.timeout;
			match self.inbox.next_event(&self.transport, deadline, &mut scratch).await {
				Event::Closed => return,
				Event::Timeout => {
					if !self.handle_timeout().await {
						return;
					}
				}
				Event::Datagram(bytes) => match Packet::decode(&bytes) {
					Err(e) => {
						warn!("unparseable datagram from {}: {e}", self.peer);
						return;
					}
					Ok(pkt) => {
						if !self.handle_datagram(pkt).await {
							return;
						}
					}
				},
			}
		}
	}

	/// Interpret the very first datagram of the transfer: RRQ fetches and
	/// starts streaming, WRQ and any other opcode end the transfer (spec.md
	/// §4.4's INITIAL row).
	async fn handle_initial(&mut self, initial_data: Vec<u8>, files: &FileProvider) -> Result<(), TransferError> {
		let pkt = match Packet::decode(&initial_data) {
			Ok(p) => p,
			Err(e) => {
				warn!("unparseable initial datagram from {}: {e}", self.peer);
				self.phase = TransferPhase::Error;
				return Ok(());
			}
		};
		match pkt {
			Packet::Rrq { filename, mode } => {
				if Packet::parsed_mode(&mode).is_none() {
					self.phase = TransferPhase::Error;
					return Err(TransferError::illegal_operation(format!("unsupported transfer mode '{mode}'")));
				}
				if filename.is_empty() {
					self.phase = TransferPhase::Error;
					return Err(TransferError::illegal_operation("empty filename"));
				}
				self.filename = filename;
				info!("RRQ from {} for '{}' ({mode})", self.peer, self.filename);
				match files.fetch(SourceKind::OnDisk, &self.filename).await {
					Ok(data) => {
						self.file_data = Some(data);
						self.phase = TransferPhase::RrqActive;
						self.send_next_block().await;
						Ok(())
					}
					Err(FetchError::AccessViolation) => {
						self.phase = TransferPhase::Error;
						Err(TransferError::new(ErrorCode::AccessViolation, "path escapes the served directory"))
					}
					Err(FetchError::NotFound) | Err(FetchError::Unsupported) => {
						self.phase = TransferPhase::Error;
						Err(TransferError::not_found(&self.filename))
					}
				}
			}
			Packet::Wrq { .. } => {
				self.phase = TransferPhase::Error;
				Err(TransferError::illegal_operation("Write requests are not supported yet"))
			}
			_ => {
				warn!("unexpected opcode as initial datagram from {}", self.peer);
				self.phase = TransferPhase::Error;
				Ok(())
			}
		}
	}

	/// Handle one datagram arriving while `RrqActive` or `Kill`. Returns
	/// `false` when the transfer should stop.
	async fn handle_datagram(&mut self, pkt: Packet) -> bool {
		match (&self.phase, pkt) {
			(TransferPhase::RrqActive, Packet::Ack { block }) => {
				if !self.is_expected_ack(block) {
					warn!("stale or duplicate ACK {block} from {}, ignoring", self.peer);
					return true;
				}
				self.retries = 0;
				self.pending_n += 1;
				self.send_next_block().await;
				true
			}
			(TransferPhase::Kill, Packet::Ack { block }) => {
				if self.is_expected_ack(block) {
					info!("transfer to {} complete", self.peer);
					false
				} else {
					warn!("stale or duplicate ACK {block} from {} while closing, ignoring", self.peer);
					true
				}
			}
			(_, _other) => {
				warn!("unexpected opcode in state {:?} from {}", self.phase, self.peer);
				self.transport
					.send(&Packet::Error { code: ErrorCode::IllegalOperation, message: "Unexpected state for received data".into() })
					.await;
				false
			}
		}
	}

	async fn handle_timeout(&mut self) -> bool {
		self.retries += 1;
		if self.retries > self.limits.retries {
			warn!("retry budget exhausted for {}, closing", self.peer);
			return false;
		}
		warn!("timeout waiting on {}, resending block {}", self.peer, self.pending_n);
		self.resend_current_block().await;
		true
	}

	/// The ACK block number that acknowledges `pending_n`, wrapped per
	/// spec.md §3/§4.4's 16-bit block field.
	fn is_expected_ack(&self, block: u16) -> bool {
		(self.pending_n % BLOCK_MODULUS) as u16 == block
	}

	/// Compute and send the `pending_n`th DATA packet, per spec.md §4.4:
	/// `slice = file_data[(n-1)*B : n*B]`, truncated at EOF. `pending_n`
	/// must already point at the block to send (set by `handle_initial` for
	/// the first block, and advanced by `handle_datagram` for later ones).
	async fn send_next_block(&mut self) {
		let n = self.pending_n.max(1);
		self.pending_n = n;
		self.send_block(n).await;
	}

	async fn resend_current_block(&mut self) {
		let n = self.pending_n.max(1);
		self.send_block(n).await;
	}

	async fn send_block(&mut self, n: u64) {
		let data = self.file_data.as_ref().expect("file_data set before first send");
		let (payload, is_final) = block_slice(data, self.limits.block_size as u64, n);
		let wire_block = (n % BLOCK_MODULUS) as u16;

		self.transport.send(&Packet::Data { block: wire_block, payload }).await;
		self.phase = if is_final { TransferPhase::Kill } else { TransferPhase::RrqActive };
	}
}

/// Pure block-slicing arithmetic from spec.md §4.4: for the `n`th DATA
/// packet (1-indexed), `slice = file_data[(n-1)*B : n*B]`, truncated at EOF.
/// Returns the slice to send and whether this is the final block (the one
/// that ends the transfer, possibly empty if the file length is an exact
/// multiple of the block size).
fn block_slice(file_data: &[u8], block_size: u64, n: u64) -> (Vec<u8>, bool) {
	let start = (n - 1) * block_size;
	let end = start + block_size;
	let file_size = file_data.len() as u64;
	let payload = if start < file_size { file_data[start as usize..end.min(file_size) as usize].to_vec() } else { Vec::new() };
	(payload, end >= file_size)
}
