mod api;
mod delivery;
mod error;
mod messages;
mod state;
mod ws;

use std::net::SocketAddr;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use log::{error, info};

use crate::state::{CallState, SharedState};

const DEFAULT_PORT: u16 = 5002;
const DEFAULT_CONSULTATION_TTL_SECS: i64 = 900;
const SWEEP_INTERVAL_SECS: u64 = 60;

fn configured_port() -> u16 {
    std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

fn configured_consultation_ttl() -> chrono::Duration {
    let secs = std::env::var("CONSULTATION_TTL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_CONSULTATION_TTL_SECS);
    chrono::Duration::seconds(secs)
}

fn with_cors(mut resp: Response<Body>) -> Response<Body> {
    let headers = resp.headers_mut();
    headers.insert("Access-Control-Allow-Origin", "*".parse().unwrap());
    headers.insert(
        "Access-Control-Allow-Methods",
        "GET, POST, OPTIONS".parse().unwrap(),
    );
    headers.insert("Access-Control-Allow-Headers", "Content-Type".parse().unwrap());
    resp
}

async fn handle_request(
    mut req: Request<Body>,
    state: SharedState,
) -> Result<Response<Body>, hyper::Error> {
    let path = req.uri().path().to_string();

    // CORS preflight for the browser dashboards.
    if req.method() == Method::OPTIONS {
        return Ok(with_cors(
            Response::builder()
                .status(StatusCode::NO_CONTENT)
                .header("Access-Control-Max-Age", "86400")
                .body(Body::empty())
                .unwrap(),
        ));
    }

    if path == "/health" {
        return Ok(with_cors(
            Response::builder()
                .status(StatusCode::OK)
                .body(Body::from("ok"))
                .unwrap(),
        ));
    }

    if path.starts_with("/api/") {
        let resp = api::handle_api_request(req, state).await?;
        return Ok(with_cors(resp));
    }

    // Everything else is a WebSocket upgrade or a miss.
    if hyper_tungstenite::is_upgrade_request(&req) {
        match hyper_tungstenite::upgrade(&mut req, None) {
            Ok((response, websocket)) => {
                tokio::spawn(async move {
                    match websocket.await {
                        Ok(ws) => ws::handle_connection(ws, state).await,
                        Err(e) => error!("websocket handshake failed: {}", e),
                    }
                });
                return Ok(response);
            }
            Err(e) => {
                error!("websocket upgrade error: {}", e);
                return Ok(Response::builder()
                    .status(StatusCode::BAD_REQUEST)
                    .body(Body::from("Invalid WebSocket upgrade request"))
                    .unwrap());
            }
        }
    }

    Ok(Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Body::from(
            "Not found. Use /health, /api/* for REST, or upgrade to WebSocket.",
        ))
        .unwrap())
}

#[tokio::main]
async fn main() {
    let port = configured_port();

    // Healthcheck mode: exit 0 if the server is running (port in use).
    if std::env::args().any(|a| a == "--healthcheck") {
        match std::net::TcpListener::bind(("127.0.0.1", port)) {
            Ok(_) => std::process::exit(1),
            Err(_) => std::process::exit(0),
        }
    }

    env_logger::init();

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let state = CallState::new_shared();

    // Periodic sweep: stale buffered signals and never-answered
    // consultation requests.
    let sweep_state = state.clone();
    let consultation_ttl = configured_consultation_ttl();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS)).await;
            let now = chrono::Utc::now();
            let mut st = sweep_state.lock().await;
            let swept = st.signals.sweep(now);
            let expired = st.consultations.expire_stale(consultation_ttl, now);
            if swept > 0 {
                info!("swept {} stale buffered signals", swept);
            }
            if !expired.is_empty() {
                info!(
                    "expired {} unanswered consultations: {:?}",
                    expired.len(),
                    expired
                );
            }
        }
    });

    let make_svc = make_service_fn(move |_conn| {
        let state = state.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| handle_request(req, state.clone())))
        }
    });

    let server = Server::bind(&addr).serve(make_svc);

    info!("unified call server listening on http://{}", addr);
    info!("websocket endpoint: ws://{}", addr);
    info!("rest api: http://{}/api/calls/... and /api/webrtc/...", addr);
    info!("health check: http://{}/health", addr);

    if let Err(e) = server.await {
        error!("server error: {}", e);
    }
}
