//! WebSocket server running stream sessions with in-memory collaborators.
//!
//! Each connection carries one session. The user is identified by the
//! `x-user-id` handshake header (the peer address otherwise), and the
//! `x-openai-key` / `x-replicate-key` headers supply the caller's own keys.
//!
//! Usage:
//!   gateway-core [--config <FILE>] [--listen <ADDR>]

use clap::Parser;
use futures::StreamExt;
use gateway_core::collaborators::in_memory::{
    InMemoryLedger, InMemoryMemoryStore, StaticContentSource, TracingEventRecorder,
};
use gateway_core::collaborators::AuthContext;
use gateway_core::config::{self, GatewayConfig};
use gateway_core::error::GatewayError;
use gateway_core::logging;
use gateway_core::orchestrator::Orchestrator;
use gateway_core::provider::{HttpBackends, ProviderKind};
use gateway_core::session::StreamSession;
use gateway_core::transport::FrameSink;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

#[derive(Debug, Parser)]
#[command(name = "gateway-core", version, about = "LLM generation gateway")]
struct Cli {
    /// Configuration file; the default search paths are used when absent
    #[arg(long, env = "GATEWAY_CORE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, overriding `server.listen`
    #[arg(long, env = "GATEWAY_CORE_LISTEN")]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.config.as_deref() {
        Some(path) => config::from_path(path),
        None => config::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("gateway-core: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init(&config.logging) {
        eprintln!("gateway-core: {}", e);
    }

    let listen = cli
        .listen
        .unwrap_or_else(|| config.server.listen.clone());

    match serve(&config, &listen).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server stopped");
            ExitCode::FAILURE
        }
    }
}

fn build_session(config: &GatewayConfig) -> StreamSession {
    let orchestrator = Orchestrator::new(
        Arc::new(HttpBackends::new(config)),
        Arc::new(InMemoryLedger::new(config.server.credits_per_user)),
        Arc::new(InMemoryMemoryStore::new()),
        Arc::new(StaticContentSource::empty()),
    )
    .with_max_chars_per_source(config.content.max_chars_per_source);

    StreamSession::new(orchestrator, Arc::new(TracingEventRecorder))
}

async fn serve(config: &GatewayConfig, listen: &str) -> Result<(), GatewayError> {
    let listener = TcpListener::bind(listen)
        .await
        .map_err(|e| GatewayError::configuration("server.listen", e.to_string()))?;
    tracing::info!(listen, "listening for sessions");

    let session = build_session(config);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let session = session.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer, session).await {
                        tracing::debug!(peer = %peer, error = %e, "connection ended with error");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                return Ok(());
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    session: StreamSession,
) -> Result<(), GatewayError> {
    let mut auth = AuthContext::new(peer.to_string());

    let ws = tokio_tungstenite::accept_hdr_async(
        stream,
        |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            auth = auth_from_headers(request, &auth.user_id);
            Ok(response)
        },
    )
    .await
    .map_err(|e| GatewayError::transport(e.to_string()))?;

    let (mut sink, source) = ws.split();
    session.run(&auth, &mut sink, source).await?;
    FrameSink::close(&mut sink).await
}

fn header<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn auth_from_headers(request: &Request, fallback_user: &str) -> AuthContext {
    let mut auth = AuthContext::new(header(request, "x-user-id").unwrap_or(fallback_user));
    if let Some(key) = header(request, "x-openai-key") {
        auth = auth.with_key(ProviderKind::OpenAI, key);
    }
    if let Some(key) = header(request, "x-replicate-key") {
        auth = auth.with_key(ProviderKind::Replicate, key);
    }
    auth
}
