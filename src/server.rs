use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::tftp::files::FileProvider;
use crate::tftp::transfer::{Transfer, TransferLimits};
use crate::tftp::consts;

/// A live single-port-mode client, keyed by its source address (spec.md
/// §3's `ClientTable`). `sender` feeds datagrams to the task running that
/// client's `Transfer`; `last_seen` backs the TTL sweep.
struct ClientEntry {
	sender: mpsc::Sender<Vec<u8>>,
	last_seen: Instant,
}

/// Bounded, TTL-evicting table mapping peer address to an in-flight
/// single-port transfer, per spec.md §3's `ClientTable` and the Python
/// original's `ExpiringDict(max_len=1000)`. Only the listener task touches
/// this, matching spec.md §5's "ClientTable is mutated only by the
/// listener task."
struct ClientTable {
	entries: HashMap<SocketAddr, ClientEntry>,
	capacity: usize,
	ttl: Duration,
}

impl ClientTable {
	fn new(capacity: usize, ttl: Duration) -> Self {
		Self { entries: HashMap::new(), capacity, ttl }
	}

	/// Insert a newly-spawned client's channel, evicting the stalest entry
	/// first if the table is already at capacity.
	fn insert(&mut self, addr: SocketAddr, sender: mpsc::Sender<Vec<u8>>) {
		if self.entries.len() >= self.capacity {
			if let Some(&stalest) = self.entries.iter().min_by_key(|(_, e)| e.last_seen).map(|(addr, _)| addr) {
				debug!("client table at capacity, evicting {stalest}");
				self.entries.remove(&stalest);
			}
		}
		self.entries.insert(addr, ClientEntry { sender, last_seen: Instant::now() });
	}

	fn sweep(&mut self) {
		let ttl = self.ttl;
		self.entries.retain(|addr, e| {
			let alive = e.last_seen.elapsed() < ttl;
			if !alive {
				debug!("expiring idle single-port client {addr}");
			}
			alive
		});
	}
}


/// Run the listener/dispatcher until `cancel` fires. Binds the well-known
/// TFTP endpoint once; a bind failure here is a startup error, not a
/// per-datagram one (spec.md §4.3/§4.5).
pub async fn run(config: Arc<ServerConfig>, cancel: CancellationToken) -> io::Result<()> {
	let listen_addr = SocketAddr::from((config.bind, config.port));
	let socket = Arc::new(UdpSocket::bind(listen_addr).await?);
	info!("listening on {listen_addr} ({} mode)", if config.single_port { "single-port" } else { "ephemeral" });

	let files = Arc::new(FileProvider::new(config.file_directory.clone()));
	let limits = TransferLimits {
		block_size: config.block_size,
		timeout: Duration::from_secs(config.timeout_secs),
		retries: config.retries,
	};

	if config.single_port {
		run_single_port(socket, files, limits, cancel).await
	} else {
		run_ephemeral(socket, config.bind, files, limits, cancel).await
	}
}

/// RFC-canonical dispatch: spawn a fresh ephemeral socket and `Transfer`
/// task per request, then stop watching it (spec.md §4.3's "the listener
/// no longer sees them").
async fn run_ephemeral(
	socket: Arc<UdpSocket>,
	bind_host: std::net::IpAddr,
	files: Arc<FileProvider>,
	limits: TransferLimits,
	cancel: CancellationToken,
) -> io::Result<()> {
	let mut buf = vec![0u8; 4 + limits.block_size as usize + 64];
	loop {
		tokio::select! {
			biased;
			_ = cancel.cancelled() => {
				warn!("listener cancelled, shutting down");
				return Ok(());
			}
			recv = socket.recv_from(&mut buf) => {
				let (n, peer) = match recv {
					Ok(v) => v,
					Err(e) => { error!("recv error on listening socket: {e}"); continue; }
				};
				debug!("received {n} bytes from {peer}, spawning ephemeral transfer");
				Transfer::spawn_ephemeral(bind_host, peer, buf[..n].to_vec(), limits, files.clone(), cancel.clone());
			}
		}
	}
}

/// Single-port dispatch: keep the one listening socket, route by peer
/// address through a `ClientTable`, per spec.md §4.3.
async fn run_single_port(
	socket: Arc<UdpSocket>,
	files: Arc<FileProvider>,
	limits: TransferLimits,
	cancel: CancellationToken,
) -> io::Result<()> {
	let mut table = ClientTable::new(consts::CLIENT_TABLE_CAPACITY, Duration::from_secs(consts::CLIENT_TABLE_ENTRY_TTL_SECS));
	let mut sweep = tokio::time::interval(Duration::from_secs(consts::CLIENT_TABLE_ENTRY_TTL_SECS) / 4);
	let mut buf = vec![0u8; 4 + limits.block_size as usize + 64];

	loop {
		tokio::select! {
			biased;
			_ = cancel.cancelled() => {
				warn!("listener cancelled, shutting down");
				return Ok(());
			}
			_ = sweep.tick() => {
				table.sweep();
			}
			recv = socket.recv_from(&mut buf) => {
				let (n, peer) = match recv {
					Ok(v) => v,
					Err(e) => { error!("recv error on listening socket: {e}"); continue; }
				};
				let data = buf[..n].to_vec();
				if let Some(entry) = table.entries.get_mut(&peer) {
					entry.last_seen = Instant::now();
					if entry.sender.try_send(data).is_err() {
						debug!("dropping datagram from {peer}: its transfer task is gone or backed up");
						table.entries.remove(&peer);
					}
				} else {
					debug!("new single-port client {peer}");
					let (tx, rx) = mpsc::channel(16);
					table.insert(peer, tx);
					Transfer::spawn_shared(socket.clone(), peer, data, rx, limits, files.clone(), cancel.clone());
				}
			}
		}
	}
}
