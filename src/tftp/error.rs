use thiserror::Error;

use super::ErrorCode;

/// A protocol-level failure that ends a transfer with an ERROR packet on
/// the wire, per spec.md §7's error taxonomy.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct TransferError {
	pub code: ErrorCode,
	pub message: String,
}

impl TransferError {
	pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
		Self { code, message: message.into() }
	}

	pub fn not_found(filename: &str) -> Self {
		Self::new(ErrorCode::NotFound, format!("File {filename} not found"))
	}

	pub fn illegal_operation(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::IllegalOperation, message)
	}
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("port must be an integer between 0 and 65535")]
	InvalidPort,
	#[error("max block size must be a positive integer")]
	InvalidBlockSize,
	#[error("timeout must be a positive integer")]
	InvalidTimeout,
	#[error("file directory '{0}' does not exist or is not readable")]
	InvalidDirectory(String),
}
