//! Webhook listener step.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value as JsonValue};
use stagecraft_core::step::{step_channels, StepChannels};
use stagecraft_core::{
    default_output, Error, EventId, Result, Step, StepConfig, StepInput, StepOutput,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Receives HTTP requests and propagates them into the pipeline.
///
/// Two modes:
///
/// - `continuous: true` - an entry point that emits one event per matching
///   request, each with a fresh event id, until cancellation.
/// - `continuous: false` (default) - mid-pipeline: for each upstream
///   envelope the listener accepts exactly one matching request and emits it
///   with the triggering envelope's event id; requests arriving in between
///   are answered with 503.
///
/// # Configuration
///
/// ```yaml
/// step_type: webhook
/// step_config:
///   host: 127.0.0.1
///   port: 8080
///   path: /orders
///   method: POST
///   continuous: true
/// ```
pub struct WebhookStep {
    host: String,
    port: u16,
    path: String,
    method: Method,
    continuous: bool,
}

/// Create a `webhook` step from configuration.
pub fn factory(config: &StepConfig) -> Result<Arc<dyn Step>> {
    let host = config.get_str("host").unwrap_or("127.0.0.1").to_string();
    let port = match config.get_i64("port") {
        Some(port) if (1..=65535).contains(&port) => port as u16,
        Some(port) => {
            return Err(Error::InvalidConfig {
                key: "port".to_string(),
                cause: format!("port must be between 1 and 65535, got {}", port),
            })
        }
        None => 8080,
    };
    let path = config.get_str("path").unwrap_or("/webhook").to_string();
    let method_str = config.get_str("method").unwrap_or("POST").to_uppercase();
    let method = Method::from_bytes(method_str.as_bytes()).map_err(|_| Error::InvalidConfig {
        key: "method".to_string(),
        cause: format!("invalid HTTP method '{}'", method_str),
    })?;
    let continuous = config.get_bool("continuous").unwrap_or(false);

    Ok(Arc::new(WebhookStep {
        host,
        port,
        path,
        method,
        continuous,
    }))
}

impl Step for WebhookStep {
    fn kind(&self) -> &str {
        "webhook"
    }

    fn is_continuous(&self) -> bool {
        self.continuous
    }

    fn run(&self, cancel: CancellationToken, mut inputs: mpsc::Receiver<StepInput>) -> StepChannels {
        let host = self.host.clone();
        let port = self.port;
        let path = self.path.clone();
        let method = self.method.clone();
        let continuous = self.continuous;
        let (out_tx, err_tx, channels) = step_channels();

        tokio::spawn(async move {
            let (event_tx, mut event_rx) = mpsc::channel::<JsonValue>(10);
            // Continuous listeners accept from the start; one-shot listeners
            // only while an upstream envelope is waiting.
            let active = Arc::new(AtomicBool::new(continuous));

            let addr = format!("{}:{}", host, port);
            let listener = match TcpListener::bind(&addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    let _ = err_tx
                        .send(Error::step(format!(
                            "failed to bind webhook listener on {}: {}",
                            addr, e
                        )))
                        .await;
                    return;
                }
            };
            tracing::info!(addr = %addr, path = %path, "webhook listening");

            let accept_task = tokio::spawn(accept_loop(
                listener,
                method.clone(),
                path.clone(),
                active.clone(),
                event_tx,
                cancel.clone(),
            ));

            if continuous {
                loop {
                    tokio::select! {
                        event = event_rx.recv() => {
                            let Some(payload) = event else { break };
                            let output = StepOutput::new(default_output(payload), EventId::new());
                            tokio::select! {
                                _ = out_tx.send(output) => {}
                                _ = cancel.cancelled() => break,
                            }
                        }
                        _ = cancel.cancelled() => break,
                    }
                }
            } else {
                while let Some(input) = inputs.recv().await {
                    active.store(true, Ordering::SeqCst);
                    tokio::select! {
                        event = event_rx.recv() => {
                            active.store(false, Ordering::SeqCst);
                            let Some(payload) = event else { break };
                            let output = StepOutput::new(default_output(payload), input.event_id);
                            tokio::select! {
                                _ = out_tx.send(output) => {}
                                _ = cancel.cancelled() => break,
                            }
                        }
                        _ = cancel.cancelled() => {
                            active.store(false, Ordering::SeqCst);
                            let _ = err_tx.send(Error::Cancelled).await;
                            break;
                        }
                    }
                }
            }

            accept_task.abort();
        });

        channels
    }
}

async fn accept_loop(
    listener: TcpListener,
    method: Method,
    path: String,
    active: Arc<AtomicBool>,
    events: mpsc::Sender<JsonValue>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _peer)) => {
                        let io = TokioIo::new(stream);
                        let method = method.clone();
                        let path = path.clone();
                        let active = active.clone();
                        let events = events.clone();
                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                handle_request(
                                    req,
                                    method.clone(),
                                    path.clone(),
                                    active.clone(),
                                    events.clone(),
                                )
                            });
                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await
                            {
                                tracing::debug!(error = %e, "webhook connection error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "webhook accept failed");
                    }
                }
            }
            _ = cancel.cancelled() => return,
        }
    }
}

async fn handle_request(
    req: Request<Incoming>,
    method: Method,
    path: String,
    active: Arc<AtomicBool>,
    events: mpsc::Sender<JsonValue>,
) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
    if !active.load(Ordering::SeqCst) {
        return Ok(text_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "webhook handler not active",
        ));
    }

    if req.method() != method {
        return Ok(text_response(
            StatusCode::METHOD_NOT_ALLOWED,
            format!("method {} not allowed, expected {}", req.method(), method),
        ));
    }

    if req.uri().path() != path {
        return Ok(text_response(StatusCode::NOT_FOUND, "no such path"));
    }

    let request_method = req.method().to_string();
    let request_path = req.uri().path().to_string();
    let query = parse_query(req.uri().query());

    let body_bytes = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return Ok(text_response(
                StatusCode::BAD_REQUEST,
                format!("failed to read body: {}", e),
            ))
        }
    };

    let body = if body_bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&body_bytes)
            .unwrap_or_else(|_| JsonValue::String(String::from_utf8_lossy(&body_bytes).into_owned()))
    };

    let payload = json!({
        "method": request_method,
        "path": request_path,
        "query": query,
        "body": body,
    });

    match events.try_send(payload) {
        Ok(()) => Ok(text_response(StatusCode::OK, "event received")),
        Err(_) => Ok(text_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "handler busy, try again later",
        )),
    }
}

fn parse_query(query: Option<&str>) -> JsonValue {
    let mut map = serde_json::Map::new();
    if let Some(query) = query {
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            map.insert(key.to_string(), JsonValue::String(value.to_string()));
        }
    }
    JsonValue::Object(map)
}

fn text_response(status: StatusCode, body: impl Into<String>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body.into())))
        .expect("static response parts are valid")
}
