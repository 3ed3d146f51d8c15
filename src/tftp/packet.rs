use std::ffi::CStr;

use thiserror::Error;

use crate::tftp::{consts, ErrorCode, Mode, RequestKind};

/// Failure to frame a datagram as a well-formed TFTP packet. Per spec.md
/// §4.1, this is always a fatal, non-retried protocol error for whichever
/// transfer hit it.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
	#[error("datagram shorter than any valid TFTP packet")]
	UnexpectedEof,
	#[error("opcode {0} is not one of RRQ/WRQ/DATA/ACK/ERROR")]
	UnknownOpcode(u16),
	#[error("filename or mode field is missing its NUL terminator")]
	NotNullTerminated,
	#[error("field is not valid UTF-8")]
	InvalidUtf8,
}

/// A fully decoded TFTP packet (RFC 1350). Owned: every variant holds its
/// own `String`/`Vec<u8>` rather than borrowing the source datagram, since
/// nothing in this server needs zero-copy parsing of requests this small.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
	Rrq { filename: String, mode: String },
	Wrq { filename: String, mode: String },
	Data { block: u16, payload: Vec<u8> },
	Ack { block: u16 },
	Error { code: ErrorCode, message: String },
}

impl Packet {
	/// Decode a raw UDP datagram per spec.md §4.1's decoding contract.
	pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
		if buf.len() < 2 {
			return Err(PacketError::UnexpectedEof);
		}
		let opcode = u16::from_be_bytes([buf[0], buf[1]]);
		match opcode {
			consts::OPCODE_RRQ => decode_request(&buf[2..]).map(|(filename, mode)| Packet::Rrq { filename, mode }),
			consts::OPCODE_WRQ => decode_request(&buf[2..]).map(|(filename, mode)| Packet::Wrq { filename, mode }),
			consts::OPCODE_DATA => decode_data(buf),
			consts::OPCODE_ACK => decode_ack(buf),
			consts::OPCODE_ERROR => decode_error(buf),
			other => Err(PacketError::UnknownOpcode(other)),
		}
	}

	/// Encode this packet to its wire representation.
	pub fn encode(&self) -> Vec<u8> {
		match self {
			Packet::Rrq { filename, mode } => encode_request(consts::OPCODE_RRQ, filename, mode),
			Packet::Wrq { filename, mode } => encode_request(consts::OPCODE_WRQ, filename, mode),
			Packet::Data { block, payload } => {
				let mut buf = Vec::with_capacity(4 + payload.len());
				buf.extend_from_slice(&consts::OPCODE_DATA.to_be_bytes());
				buf.extend_from_slice(&block.to_be_bytes());
				buf.extend_from_slice(payload);
				buf
			}
			Packet::Ack { block } => {
				let mut buf = Vec::with_capacity(4);
				buf.extend_from_slice(&consts::OPCODE_ACK.to_be_bytes());
				buf.extend_from_slice(&block.to_be_bytes());
				buf
			}
			Packet::Error { code, message } => {
				let mut buf = Vec::with_capacity(5 + message.len());
				buf.extend_from_slice(&consts::OPCODE_ERROR.to_be_bytes());
				buf.extend_from_slice(&(*code as u16).to_be_bytes());
				buf.extend_from_slice(message.as_bytes());
				buf.push(0);
				buf
			}
		}
	}

	pub fn request_kind(&self) -> Option<RequestKind> {
		match self {
			Packet::Rrq { .. } => Some(RequestKind::Rrq),
			Packet::Wrq { .. } => Some(RequestKind::Wrq),
			_ => None,
		}
	}

	/// Parse `mode` per spec.md §3: case-insensitive, must be "octet" or
	/// "netascii". This is separate from `decode` because an unrecognized
	/// mode is a transfer-level ILLEGAL_OPERATION, not a framing error.
	pub fn parsed_mode(mode: &str) -> Option<Mode> {
		Mode::parse(mode)
	}
}

fn read_cstr(buf: &[u8]) -> Result<(&str, &[u8]), PacketError> {
	let cstr = CStr::from_bytes_until_nul(buf).map_err(|_| PacketError::NotNullTerminated)?;
	let s = cstr.to_str().map_err(|_| PacketError::InvalidUtf8)?;
	Ok((s, &buf[cstr.to_bytes_with_nul().len()..]))
}

fn decode_request(rest: &[u8]) -> Result<(String, String), PacketError> {
	let (filename, rest) = read_cstr(rest)?;
	let (mode, _rest) = read_cstr(rest)?;
	Ok((filename.to_string(), mode.to_string()))
}

fn decode_data(buf: &[u8]) -> Result<Packet, PacketError> {
	if buf.len() < 4 {
		return Err(PacketError::UnexpectedEof);
	}
	let block = u16::from_be_bytes([buf[2], buf[3]]);
	Ok(Packet::Data { block, payload: buf[4..].to_vec() })
}

fn decode_ack(buf: &[u8]) -> Result<Packet, PacketError> {
	if buf.len() < 4 {
		return Err(PacketError::UnexpectedEof);
	}
	let block = u16::from_be_bytes([buf[2], buf[3]]);
	Ok(Packet::Ack { block })
}

fn decode_error(buf: &[u8]) -> Result<Packet, PacketError> {
	if buf.len() < 4 {
		return Err(PacketError::UnexpectedEof);
	}
	let raw_code = u16::from_be_bytes([buf[2], buf[3]]);
	let code = error_code_from_u16(raw_code);
	let msg_bytes = &buf[4..];
	let end = msg_bytes.iter().position(|&b| b == 0).unwrap_or(msg_bytes.len());
	let message = std::str::from_utf8(&msg_bytes[..end])
		.map_err(|_| PacketError::InvalidUtf8)?
		.to_string();
	Ok(Packet::Error { code, message })
}

fn error_code_from_u16(value: u16) -> ErrorCode {
	match value {
		1 => ErrorCode::NotFound,
		2 => ErrorCode::AccessViolation,
		3 => ErrorCode::DiskFull,
		4 => ErrorCode::IllegalOperation,
		5 => ErrorCode::UnknownTid,
		6 => ErrorCode::FileExists,
		7 => ErrorCode::NoSuchUser,
		_ => ErrorCode::NotDefined,
	}
}

fn encode_request(opcode: u16, filename: &str, mode: &str) -> Vec<u8> {
	let mut buf = Vec::with_capacity(4 + filename.len() + mode.len());
	buf.extend_from_slice(&opcode.to_be_bytes());
	buf.extend_from_slice(filename.as_bytes());
	buf.push(0);
	buf.extend_from_slice(mode.as_bytes());
	buf.push(0);
	buf
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trip_rrq() {
		let pkt = Packet::Rrq { filename: "hello.txt".into(), mode: "octet".into() };
		let decoded = Packet::decode(&pkt.encode()).unwrap();
		assert_eq!(decoded, pkt);
	}

	#[test]
	fn round_trip_wrq() {
		let pkt = Packet::Wrq { filename: "upload.bin".into(), mode: "netascii".into() };
		let decoded = Packet::decode(&pkt.encode()).unwrap();
		assert_eq!(decoded, pkt);
	}

	#[test]
	fn round_trip_data() {
		let pkt = Packet::Data { block: 42, payload: vec![1, 2, 3] };
		let decoded = Packet::decode(&pkt.encode()).unwrap();
		assert_eq!(decoded, pkt);
	}

	#[test]
	fn round_trip_data_empty_payload() {
		let pkt = Packet::Data { block: 7, payload: vec![] };
		let decoded = Packet::decode(&pkt.encode()).unwrap();
		assert_eq!(decoded, pkt);
	}

	#[test]
	fn round_trip_ack() {
		let pkt = Packet::Ack { block: 65535 };
		let decoded = Packet::decode(&pkt.encode()).unwrap();
		assert_eq!(decoded, pkt);
	}

	#[test]
	fn round_trip_error() {
		let pkt = Packet::Error { code: ErrorCode::NotFound, message: "File missing not found".into() };
		let decoded = Packet::decode(&pkt.encode()).unwrap();
		assert_eq!(decoded, pkt);
	}

	#[test]
	fn decode_rejects_truncated_datagram() {
		assert_eq!(Packet::decode(&[0x00]), Err(PacketError::UnexpectedEof));
		assert_eq!(Packet::decode(&consts::OPCODE_DATA.to_be_bytes()), Err(PacketError::UnexpectedEof));
	}

	#[test]
	fn decode_rejects_unknown_opcode() {
		assert_eq!(Packet::decode(&[0x00, 0x09, 0x00, 0x00]), Err(PacketError::UnknownOpcode(9)));
	}

	#[test]
	fn decode_rejects_request_missing_mode() {
		let mut buf = consts::OPCODE_RRQ.to_be_bytes().to_vec();
		buf.extend_from_slice(b"onlyfilename\0");
		assert_eq!(Packet::decode(&buf), Err(PacketError::NotNullTerminated));
	}

	#[test]
	fn mode_parsing_is_case_insensitive() {
		assert_eq!(Packet::parsed_mode("OCTET"), Some(Mode::Octet));
		assert_eq!(Packet::parsed_mode("NetASCII"), Some(Mode::NetAscii));
		assert_eq!(Packet::parsed_mode("bogus"), None);
	}

	#[test]
	fn error_decode_strips_trailing_nul() {
		let pkt = Packet::Error { code: ErrorCode::IllegalOperation, message: "bad mode".into() };
		let bytes = pkt.encode();
		assert_eq!(*bytes.last().unwrap(), 0);
		let decoded = Packet::decode(&bytes).unwrap();
		match decoded {
			Packet::Error { message, .. } => assert_eq!(message, "bad mode"),
			_ => panic!("expected Error"),
		}
	}
}
