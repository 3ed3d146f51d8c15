use std::net::IpAddr;
use std::path::PathBuf;

use crate::cli::Cli;
use crate::tftp::error::ConfigError;

/// Validated server configuration. Constructed once at startup via
/// `TryFrom<Cli>`; every field here is already known-good, so the rest of
/// the crate never re-checks these invariants.
#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub bind: IpAddr,
	pub port: u16,
	pub file_directory: PathBuf,
	pub block_size: u16,
	pub timeout_secs: u64,
	pub retries: u8,
	pub single_port: bool,
}

impl TryFrom<Cli> for ServerConfig {
	type Error = ConfigError;

	/// Mirrors `examples/original_source/tftp_server/config.py`'s
	/// `TftpConfig.__post_init__`: a positive block size, a positive
	/// timeout, and a readable, existing file directory. `clap` already
	/// enforces the port is a valid `u16` at the type level, so there is no
	/// separate "port out of range" check to perform here; `InvalidPort` is
	/// kept for symmetry with the Python original and in case a future CLI
	/// surface accepts the port as a looser type.
	fn try_from(cli: Cli) -> Result<Self, Self::Error> {
		if cli.block_size == 0 {
			return Err(ConfigError::InvalidBlockSize);
		}
		if cli.timeout == 0 {
			return Err(ConfigError::InvalidTimeout);
		}
		if !is_directory_valid(&cli.root) {
			return Err(ConfigError::InvalidDirectory(cli.root.display().to_string()));
		}

		Ok(Self {
			bind: cli.bind,
			port: cli.port,
			file_directory: cli.root,
			block_size: cli.block_size,
			timeout_secs: cli.timeout,
			retries: cli.retries,
			single_port: cli.single_port,
		})
	}
}

/// Mirrors `config.py`'s `is_directory_valid`: the path must be a
/// directory, and actually readable rather than merely present (a
/// directory with its execute/read bit stripped reports as existing but
/// fails `read_dir`).
fn is_directory_valid(path: &std::path::Path) -> bool {
	match std::fs::metadata(path) {
		Ok(metadata) if metadata.is_dir() => std::fs::read_dir(path).is_ok(),
		_ => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cli::DebugLevel;

	fn base_cli(root: PathBuf) -> Cli {
		Cli {
			bind: IpAddr::from([0, 0, 0, 0]),
			port: 69,
			root,
			block_size: 512,
			timeout: 1,
			retries: 3,
			single_port: false,
			debug: DebugLevel::Warn,
		}
	}

	#[test]
	fn accepts_a_valid_configuration() {
		let dir = tempfile::tempdir().unwrap();
		let config = ServerConfig::try_from(base_cli(dir.path().to_path_buf())).unwrap();
		assert_eq!(config.block_size, 512);
		assert!(!config.single_port);
	}

	#[test]
	fn rejects_zero_block_size() {
		let dir = tempfile::tempdir().unwrap();
		let mut cli = base_cli(dir.path().to_path_buf());
		cli.block_size = 0;
		assert!(matches!(ServerConfig::try_from(cli), Err(ConfigError::InvalidBlockSize)));
	}

	#[test]
	fn rejects_zero_timeout() {
		let dir = tempfile::tempdir().unwrap();
		let mut cli = base_cli(dir.path().to_path_buf());
		cli.timeout = 0;
		assert!(matches!(ServerConfig::try_from(cli), Err(ConfigError::InvalidTimeout)));
	}

	#[test]
	fn rejects_missing_directory() {
		let mut cli = base_cli(PathBuf::from("/nonexistent-tftp-root-for-tests"));
		cli.root = PathBuf::from("/nonexistent-tftp-root-for-tests");
		assert!(matches!(ServerConfig::try_from(cli), Err(ConfigError::InvalidDirectory(_))));
	}

	#[test]
	fn rejects_a_plain_file_as_root() {
		let dir = tempfile::tempdir().unwrap();
		let file_path = dir.path().join("not-a-directory");
		std::fs::write(&file_path, b"").unwrap();
		let cli = base_cli(file_path);
		assert!(matches!(ServerConfig::try_from(cli), Err(ConfigError::InvalidDirectory(_))));
	}
}
