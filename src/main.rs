use easyshell::{serve, RelayState};
use esh_core::{init_logging, Error, RelayConfig, Result};
use esh_ssh::Ssh2Backend;
use esh_transport::EmbeddedTransport;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

const USAGE: &str = "usage: easyshell-relay [--config <path>]";

fn config_arg<I: Iterator<Item = String>>(mut args: I) -> Result<Option<PathBuf>> {
    let mut path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => match args.next() {
                Some(value) => path = Some(PathBuf::from(value)),
                None => return Err(Error::Config(format!("--config needs a path\n{}", USAGE))),
            },
            other => {
                if let Some(value) = other.strip_prefix("--config=") {
                    path = Some(PathBuf::from(value));
                } else {
                    return Err(Error::Config(format!("unknown argument '{}'\n{}", other, USAGE)));
                }
            }
        }
    }
    Ok(path)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn run() -> Result<()> {
    let config_path = config_arg(std::env::args().skip(1))?;
    let config = RelayConfig::load(config_path.as_deref())?;
    init_logging(&config.log)?;

    let transport = EmbeddedTransport::new(
        Arc::new(Ssh2Backend::new()),
        config.ssh.clone(),
        config.transfer.clone(),
    );
    let state = RelayState::new(transport);

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Transport(format!("Failed to bind {}: {}", addr, e)))?;
    info!(
        "Starting EasyShell relay {} on {}",
        env!("CARGO_PKG_VERSION"),
        addr
    );

    serve(listener, state, shutdown_signal()).await
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("easyshell-relay: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> std::vec::IntoIter<String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn config_flag_forms() {
        assert_eq!(config_arg(args(&[])).unwrap(), None);
        assert_eq!(
            config_arg(args(&["--config", "/etc/easyshell.json"])).unwrap(),
            Some(PathBuf::from("/etc/easyshell.json"))
        );
        assert_eq!(
            config_arg(args(&["--config=relay.json"])).unwrap(),
            Some(PathBuf::from("relay.json"))
        );
    }

    #[test]
    fn bad_arguments_are_config_errors() {
        assert!(matches!(config_arg(args(&["--config"])), Err(Error::Config(_))));
        assert!(matches!(config_arg(args(&["--verbose"])), Err(Error::Config(_))));
    }
}
