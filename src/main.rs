use std::sync::Arc;

use clap::Parser;
use log::{error, info};
use tokio_util::sync::CancellationToken;

use tftpd::cli;
use tftpd::config::ServerConfig;
use tftpd::server;

#[tokio::main]
async fn main() {
	let cli = cli::Cli::parse();

	/* Initialize logging facility; can unwrap here because it has a default value */
	cli::init_logger(cli.debug.clone());

	let config = match ServerConfig::try_from(cli) {
		Ok(config) => Arc::new(config),
		Err(e) => return error!("invalid configuration: {e}"),
	};

	let cancel_token = CancellationToken::new();
	let sigint_token = cancel_token.clone();

	/* Let's handle SIGINT on our own to gracefully shutdown all tasks */
	ctrlc::set_handler(move || {
		info!("Received SIGINT");
		sigint_token.cancel();
	})
	.unwrap();

	if let Err(e) = server::run(config, cancel_token).await {
		error!("{e}");
	}

	// Moving the above part after setting the SIGINT handler into a task and then awaiting it breaks the logger somehow!
	// Messages are extremely delayed, probably due to blocking the main task somehow.
}
