use std::fmt::Display;

pub mod consts {
	pub const TFTP_LISTEN_PORT: u16 = 69;
	pub const DEFAULT_BLOCK_SIZE: u16 = 512;
	pub const DEFAULT_TIMEOUT_SECS: u64 = 1;
	pub const DEFAULT_RETRIES: u8 = 3;
	pub const DEFAULT_ROOT: &str = "/tmp/tftp";

	pub const OPCODE_RRQ: u16 = 1;
	pub const OPCODE_WRQ: u16 = 2;
	pub const OPCODE_DATA: u16 = 3;
	pub const OPCODE_ACK: u16 = 4;
	pub const OPCODE_ERROR: u16 = 5;

	/// Block numbers are transmitted as u16 and wrap at this boundary.
	pub const MAX_BLOCK_VALUE: u16 = u16::MAX;

	/// Bounded capacity of the single-port mode client table.
	pub const CLIENT_TABLE_CAPACITY: usize = 1_000;
	/// How long an idle single-port client entry survives before eviction.
	pub const CLIENT_TABLE_ENTRY_TTL_SECS: u64 = 30;

	/// Bounded capacity of the file provider's LRU memoization cache.
	pub const FILE_CACHE_CAPACITY: usize = 128;
}

pub mod error;
pub mod packet;
pub mod files;
pub mod transfer;

/// Which of the two request kinds a datagram carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RequestKind {
	Rrq = consts::OPCODE_RRQ,
	Wrq = consts::OPCODE_WRQ,
}

/// RFC 1350 error codes. `NotDefined` (0) is not listed among spec.md's
/// data model but the wire format reserves it; see SPEC_FULL.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
	NotDefined = 0,
	NotFound = 1,
	AccessViolation = 2,
	DiskFull = 3,
	IllegalOperation = 4,
	UnknownTid = 5,
	FileExists = 6,
	NoSuchUser = 7,
}
impl Display for ErrorCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", *self as u16)
	}
}

/// Transfer mode requested by the client. Parsing is case-insensitive;
/// an unrecognized mode is not a framing error (see packet::Packet::decode)
/// but is rejected later by the transfer engine with ILLEGAL_OPERATION.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
	NetAscii,
	Octet,
}
impl Mode {
	pub fn parse(input: &str) -> Option<Self> {
		match input.to_ascii_lowercase().as_str() {
			"netascii" => Some(Self::NetAscii),
			"octet" => Some(Self::Octet),
			_ => None,
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			Self::NetAscii => "netascii",
			Self::Octet => "octet",
		}
	}
}
impl Display for Mode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.as_str())
	}
}

/// Per-transfer protocol state, per spec.md §4.4's state table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
	Initial,
	RrqActive,
	/// Reserved: a WRQ always transitions straight to `Error`, this phase
	/// is never actually entered, it exists to name the transition in
	/// spec.md §3's TransferPhase enum.
	WrqActive,
	Error,
	/// Final block was sent; the transfer is waiting for the matching ACK
	/// before closing.
	Kill,
}
