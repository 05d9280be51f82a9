//! Standalone admission server.
//!
//! A small HTTP service intended to sit behind a reverse proxy's
//! auth-subrequest hook (e.g. nginx `auth_request`): every inbound request
//! is checked against the configured limits for its path and answered with
//! 204 No Content plus the rate-limit headers when allowed, or a full 429
//! when not. The authenticated user id, if any, is read from the
//! `x-user-id` header set by the upstream auth layer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tollgate::{
    apply_rate_limit_headers, spawn_sweep, too_many_requests, Config, RateLimiter, RuntimeConfig,
};
use tracing::{info, warn};

const CONFIG_FILE_PATH: &str = "./Config.yml";

/// Interval between background expiry sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tollgate=info".into()),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| CONFIG_FILE_PATH.to_owned());

    let config = Config::load_from_file(&config_path)
        .and_then(Config::into_runtime)
        .unwrap_or_else(|e| {
            eprintln!("fatal: {e}");
            std::process::exit(1);
        });
    let config = Arc::new(config);

    let limiter = RateLimiter::new();
    spawn_sweep(limiter.clone(), SWEEP_INTERVAL);

    let listener = match TcpListener::bind(config.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("fatal: failed to bind {}: {e}", config.listen);
            std::process::exit(1);
        }
    };

    info!(listen = %config.listen, "admission server listening");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(%e, "failed to accept connection");
                        continue;
                    }
                };

                let config = Arc::clone(&config);
                let limiter = limiter.clone();

                tokio::spawn(async move {
                    let svc = service_fn(move |req: Request<Incoming>| {
                        let config = Arc::clone(&config);
                        let limiter = limiter.clone();
                        async move {
                            Ok::<_, std::convert::Infallible>(admit(&req, &limiter, &config, peer))
                        }
                    });

                    if let Err(e) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), svc)
                        .await
                    {
                        warn!(%e, "connection error");
                    }
                });
            }
            () = &mut shutdown => {
                info!("shutting down, no longer accepting connections");
                break;
            }
        }
    }
}

/// Runs the rate limit check for one request and shapes the verdict.
fn admit(
    req: &Request<Incoming>,
    limiter: &RateLimiter,
    config: &RuntimeConfig,
    peer: SocketAddr,
) -> Response<Full<Bytes>> {
    let mut opts = config.options_for(req.uri().path());
    opts.user_id = req
        .headers()
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let outcome = limiter.check(req, Some(peer), &opts);
    if !outcome.ok {
        return too_many_requests(&outcome);
    }

    let mut resp = Response::new(Full::new(Bytes::new()));
    *resp.status_mut() = StatusCode::NO_CONTENT;
    apply_rate_limit_headers(resp.headers_mut(), &outcome);
    resp
}

/// Awaits a shutdown signal (SIGINT or SIGTERM on Unix, Ctrl+C on all
/// platforms). Returns once the first signal is received.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, initiating graceful shutdown"),
            _ = sigterm.recv() => info!("received SIGTERM, initiating graceful shutdown"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("received Ctrl+C, initiating graceful shutdown");
    }
}
