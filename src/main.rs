use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use sshdog::cli::{self, Cli};
use sshdog::config::types::DEBUG_FILE;
use sshdog::config::ConfigDir;
use sshdog::server::Server;
use sshdog::{daemon, lifecycle, logging};

fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            eprint!("{}", e);
            std::process::exit(cli::exit_code(&e));
        }
    };

    if let Some(password) = &cli.hash_password {
        println!("{}", sshdog::auth::password::hash_password(password)?);
        return Ok(());
    }

    if cli.stop {
        logging::setup_logging(cli.log_level.as_deref().unwrap_or("warn"), cli.log_format);
        return stop_running_instances();
    }

    let dir = match ConfigDir::open(&cli.config) {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("{:#}", e);
            eprintln!("must create a `config` dir, use -h for help");
            std::process::exit(1);
        }
    };

    // The debug switch picks the log level, so it is read before the rest.
    let default_level = if dir.exists(DEBUG_FILE) { "debug" } else { "warn" };
    let level = cli.log_level.clone().unwrap_or_else(|| default_level.to_string());
    logging::setup_logging(&level, cli.log_format);

    let settings = dir.load_settings(cli.port.as_deref());
    let store = dir.load_credentials(&settings, cli.persist_host_key)?;
    let server = Server::new(store)?;

    if settings.daemonize {
        daemon::daemonize(settings.debug)?;
    }
    if settings.setuid {
        daemon::try_setuid_root();
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building async runtime")?;
    runtime.block_on(serve(Arc::new(server), settings.port))
}

async fn serve(server: Arc<Server>, port: u16) -> Result<()> {
    server.listen_and_serve(&format!("0.0.0.0:{}", port)).await?;

    let stopper = server.clone();
    lifecycle::register_exit_handler(move || stopper.stop())?;

    server.wait().await;
    info!("Server stopped");
    Ok(())
}

fn stop_running_instances() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building async runtime")?;
    match runtime.block_on(lifecycle::send_exit_signal()) {
        Ok(true) => eprintln!("running instance stopped"),
        Ok(false) => eprintln!("no running instance stopped"),
        Err(e) => eprintln!("cannot signal running instances: {}", e),
    }
    Ok(())
}
