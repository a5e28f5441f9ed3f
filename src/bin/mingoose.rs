//! Process shell around the `mingoose` library: argument parsing, logging
//! setup, signal-driven graceful shutdown, and privilege drop.
//!
//! Serving actual file content, CGI, or authentication is out of scope here
//! (see [`mingoose::Handler`]) — this binary wires up a placeholder handler
//! so the server is runnable standalone, but real deployments are expected
//! to depend on the library and supply their own [`Handler`](mingoose::Handler).

use clap::{CommandFactory, Parser as ClapParser};
use mingoose::{
    limits::{ConnLimits, ServerLimits},
    settings::Settings,
    Handled, Handler, Request, Response, Server, StatusCode,
};
use std::{collections::HashMap, process::ExitCode};
use tokio::net::TcpListener;

#[derive(ClapParser, Debug)]
#[command(name = "mingoose", version, about = "A small, security-first HTTP server", disable_help_flag = true)]
struct Cli {
    /// Print usage and exit.
    #[arg(short = 'h', long = "help", action = clap::ArgAction::SetTrue)]
    help: bool,

    /// The `[ipv4:]port` address to listen on (e.g. `8080` or `0.0.0.0:8080`).
    #[arg(long, required_unless_present = "help")]
    listen: String,

    /// Number of worker tasks servicing the accept queue.
    #[arg(long)]
    worker_count: Option<usize>,

    /// Per-request socket read timeout, in milliseconds.
    #[arg(long)]
    request_timeout_ms: Option<u64>,

    /// Disable HTTP/1.1 keep-alive entirely.
    #[arg(long)]
    disable_keep_alive: bool,

    /// Sustained per-connection write-rate cap, in bytes per second.
    #[arg(long)]
    throttle_bytes_per_sec: Option<u64>,

    /// Comma-separated filename glob patterns that are never served.
    #[arg(long)]
    hidden_file_patterns: Option<String>,

    /// Unix account to drop privileges to after binding.
    #[arg(long)]
    run_as_user: Option<String>,

    /// Root directory handlers may serve files from.
    #[arg(long)]
    document_root: Option<String>,

    /// Path to a global htpasswd-style file gating every request.
    #[arg(long)]
    global_auth_file: Option<String>,
}

impl Cli {
    fn into_settings_map(self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("listen".to_string(), self.listen);
        map.insert("enable_keep_alive".to_string(), (!self.disable_keep_alive).to_string());

        if let Some(v) = self.worker_count {
            map.insert("worker_count".to_string(), v.to_string());
        }
        if let Some(v) = self.request_timeout_ms {
            map.insert("request_timeout_ms".to_string(), v.to_string());
        }
        if let Some(v) = self.throttle_bytes_per_sec {
            map.insert("throttle_bytes_per_sec".to_string(), v.to_string());
        }
        if let Some(v) = self.hidden_file_patterns {
            map.insert("hidden_file_patterns".to_string(), v);
        }
        if let Some(v) = self.run_as_user {
            map.insert("run_as_user".to_string(), v);
        }
        if let Some(v) = self.document_root {
            map.insert("document_root".to_string(), v);
        }
        if let Some(v) = self.global_auth_file {
            map.insert("global_auth_file".to_string(), v);
        }

        map
    }
}

struct PlaceholderHandler;

impl Handler for PlaceholderHandler {
    async fn handle(&self, _: &mut (), _: &Request, resp: &mut Response) -> Handled {
        resp.status(StatusCode::NotFound)
            .body("no handler installed; embed mingoose as a library and supply one")
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // SIGPIPE defaults to terminating the process; a write to a peer that
    // already closed its read side must surface as an `io::Error` instead.
    #[cfg(unix)]
    if let Err(err) = unsafe { nix::sys::signal::signal(nix::sys::signal::Signal::SIGPIPE, nix::sys::signal::SigHandler::SigIgn) } {
        tracing::error!(%err, "failed to ignore SIGPIPE");
        return ExitCode::FAILURE;
    }

    let cli = Cli::parse();
    if cli.help {
        // Deliberately exits 1 rather than the Unix convention of 0, matching
        // this server's historical CLI behavior.
        Cli::command().print_help().ok();
        println!();
        return ExitCode::FAILURE;
    }

    let settings = match Settings::build(&cli.into_settings_map()) {
        Ok(settings) => settings,
        Err(err) => {
            tracing::error!(%err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let listen = settings.listen;
    let listener = match TcpListener::bind((listen.addr, listen.port)).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%err, addr = %listen.addr, port = listen.port, "failed to bind listener");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(addr = %listen.addr, port = listen.port, "listening");

    #[cfg(unix)]
    if let Some(user) = &settings.run_as_user {
        if let Err(err) = drop_privileges(user) {
            tracing::error!(%err, "failed to drop privileges");
            return ExitCode::FAILURE;
        }
        tracing::info!(user, "dropped privileges");
    }

    let server = Server::builder()
        .listener(listener)
        .handler(PlaceholderHandler)
        .server_limits(ServerLimits {
            max_connections: settings.worker_count,
            enable_keep_alive: settings.enable_keep_alive,
            ..ServerLimits::default()
        })
        .connection_limits(ConnLimits {
            socket_read_timeout: settings.request_timeout,
            throttle_bytes_per_sec: settings.throttle_bytes_per_sec,
            ..ConnLimits::default()
        })
        .build();

    let handle = server.handle();

    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received, draining connections");
        handle.stop();
    });

    server.launch().await;

    ExitCode::SUCCESS
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {},
        _ = sigint.recv() => {},
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(unix)]
fn drop_privileges(user: &str) -> Result<(), mingoose::ServerError> {
    use nix::unistd::{setgid, setuid, User};

    let user = User::from_name(user)
        .map_err(|e| mingoose::ServerError::PrivilegeDrop(e.to_string()))?
        .ok_or_else(|| mingoose::ServerError::Config(mingoose::ConfigError::UnknownUser(user.to_string())))?;

    // Supplementary groups are intentionally left alone here (no `initgroups`).
    setgid(user.gid).map_err(|e| mingoose::ServerError::PrivilegeDrop(e.to_string()))?;
    setuid(user.uid).map_err(|e| mingoose::ServerError::PrivilegeDrop(e.to_string()))?;

    Ok(())
}
