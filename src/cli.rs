use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use simple_logger::SimpleLogger;

use crate::tftp::consts;

/// A read-only TFTP (RFC 1350) server.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Cli {
	#[arg(short, long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED), help = "Address to bind the listening socket to")]
	pub bind: IpAddr,

	#[arg(short, long, default_value_t = consts::TFTP_LISTEN_PORT, help = "UDP port to listen on")]
	pub port: u16,

	#[arg(short, long, default_value = consts::DEFAULT_ROOT, help = "Directory served to clients")]
	pub root: PathBuf,

	#[arg(long = "block-size", default_value_t = consts::DEFAULT_BLOCK_SIZE, help = "DATA payload size in bytes")]
	pub block_size: u16,

	#[arg(long, default_value_t = consts::DEFAULT_TIMEOUT_SECS, help = "Retransmission timeout in seconds")]
	pub timeout: u64,

	#[arg(long, default_value_t = consts::DEFAULT_RETRIES, help = "Retransmissions attempted before giving up on a transfer")]
	pub retries: u8,

	#[arg(long = "single-port", default_value_t = false, help = "Multiplex all transfers on the listening port instead of RFC-canonical ephemeral ports")]
	pub single_port: bool,

	#[arg(value_enum, short, long, default_value_t = DebugLevel::Warn, help = "Debug level to determine which messages are printed")]
	pub debug: DebugLevel,
}

#[derive(Debug, Clone, ValueEnum, Default)]
pub enum DebugLevel {
	Off = 0,
	Error,

	#[default]
	Warn,
	Info,
	Debug,
	Trace,
}
impl From<DebugLevel> for log::LevelFilter {
	fn from(value: DebugLevel) -> Self {
		match value {
			DebugLevel::Off => Self::Off,
			DebugLevel::Error => Self::Error,
			DebugLevel::Warn => Self::Warn,
			DebugLevel::Info => Self::Info,
			DebugLevel::Debug => Self::Debug,
			DebugLevel::Trace => Self::Trace,
		}
	}
}

pub fn init_logger(debug_level: DebugLevel) {
	SimpleLogger::new().with_level(debug_level.into()).env().init().unwrap();
}
