//! Runtime control surface.
//!
//! Two concurrent activities share state: the sampling cycle on the engine
//! thread, and the inbound command path, served here as a small loopback
//! HTTP endpoint. Everything they share lives in `ControlState` — atomics
//! for the flags, mutexes for the snapshot and counters — so neither side
//! ever touches the other's owned structures (the `LiveSource` in
//! particular stays single-owner on the engine thread; the command path
//! requests captures through a flag instead of reaching for the handle).
//!
//! Endpoints (GET): /health, /status, /detection/on, /detection/off,
//! /capture, /snapshot.jpg. The full notification-channel command surface
//! (chat commands, menus) is a collaborator outside this crate.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::frame::SourceProperties;
use crate::scheduler::EngineStats;
use crate::source::SourceStatus;

const MAX_REQUEST_BYTES: usize = 8192;

/// State shared between the engine thread and the command path.
pub struct ControlState {
    detection_enabled: AtomicBool,
    capture_requested: AtomicBool,
    shutdown: Arc<AtomicBool>,
    snapshot: Mutex<Option<Vec<u8>>>,
    stats: Mutex<EngineStats>,
    source_status: Mutex<SourceStatus>,
    source_properties: Mutex<Option<SourceProperties>>,
}

impl ControlState {
    pub fn new(detection_enabled: bool) -> Self {
        Self {
            detection_enabled: AtomicBool::new(detection_enabled),
            capture_requested: AtomicBool::new(false),
            shutdown: Arc::new(AtomicBool::new(false)),
            snapshot: Mutex::new(None),
            stats: Mutex::new(EngineStats::default()),
            source_status: Mutex::new(SourceStatus::Disconnected),
            source_properties: Mutex::new(None),
        }
    }

    pub fn detection_enabled(&self) -> bool {
        self.detection_enabled.load(Ordering::SeqCst)
    }

    pub fn set_detection_enabled(&self, enabled: bool) {
        self.detection_enabled.store(enabled, Ordering::SeqCst);
        log::info!(
            "detection {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn request_capture(&self) {
        self.capture_requested.store(true, Ordering::SeqCst);
    }

    /// Consume a pending capture request, if any.
    pub fn take_capture_request(&self) -> bool {
        self.capture_requested.swap(false, Ordering::SeqCst)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// The shutdown flag itself, shared with `LiveSource` so backoff sleeps
    /// observe cancellation without going through `ControlState`.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn store_snapshot(&self, jpeg: Vec<u8>) {
        let mut snapshot = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
        *snapshot = Some(jpeg);
    }

    pub fn latest_snapshot(&self) -> Option<Vec<u8>> {
        self.snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn with_stats(&self, mutate: impl FnOnce(&mut EngineStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        mutate(&mut stats);
    }

    pub fn stats_snapshot(&self) -> EngineStats {
        self.stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_source_status(&self, status: SourceStatus) {
        let mut current = self
            .source_status
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *current = status;
    }

    pub fn source_status(&self) -> SourceStatus {
        *self
            .source_status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_source_properties(&self, properties: SourceProperties) {
        let mut current = self
            .source_properties
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *current = Some(properties);
    }

    pub fn source_properties(&self) -> Option<SourceProperties> {
        *self
            .source_properties
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

/// Configuration for the control server.
#[derive(Clone, Debug)]
pub struct ControlConfig {
    pub addr: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8970".to_string(),
        }
    }
}

/// Handle to a running control server.
#[derive(Debug)]
pub struct ControlHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ControlHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("control server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ControlServer {
    cfg: ControlConfig,
    state: Arc<ControlState>,
}

impl ControlServer {
    pub fn new(cfg: ControlConfig, state: Arc<ControlState>) -> Self {
        Self { cfg, state }
    }

    pub fn spawn(self) -> Result<ControlHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "control server configured for loopback address '{}', but bound to '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let state = self.state.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_control(listener, state, shutdown_thread) {
                log::error!("control server stopped: {}", err);
            }
        });

        Ok(ControlHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_control(
    listener: TcpListener,
    state: Arc<ControlState>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) || state.shutdown_requested() {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, &state) {
                    log::warn!("control request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, state: &Arc<ControlState>) -> Result<()> {
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let (method, path) = read_request_line(&mut stream)?;
    if method != "GET" {
        write_json(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }

    match path.as_str() {
        "/health" => write_json(&mut stream, 200, r#"{"status":"ok"}"#),
        "/status" => {
            let body = serde_json::json!({
                "source": state.source_status(),
                "properties": state.source_properties(),
                "detection_enabled": state.detection_enabled(),
                "stats": state.stats_snapshot(),
            });
            write_json(&mut stream, 200, &body.to_string())
        }
        "/detection/on" => {
            state.set_detection_enabled(true);
            write_json(&mut stream, 200, r#"{"detection_enabled":true}"#)
        }
        "/detection/off" => {
            state.set_detection_enabled(false);
            write_json(&mut stream, 200, r#"{"detection_enabled":false}"#)
        }
        "/capture" => {
            state.request_capture();
            write_json(&mut stream, 200, r#"{"capture":"requested"}"#)
        }
        "/snapshot.jpg" => match state.latest_snapshot() {
            Some(jpeg) => write_response(&mut stream, 200, "image/jpeg", &jpeg),
            None => write_json(&mut stream, 404, r#"{"error":"no_snapshot"}"#),
        },
        _ => write_json(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

fn read_request_line(stream: &mut TcpStream) -> Result<(String, String)> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text
        .split("\r\n")
        .next()
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path);
    Ok((method.to_string(), path.to_string()))
}

fn write_json(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\n\r\n",
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_flag_toggles() {
        let state = ControlState::new(true);
        assert!(state.detection_enabled());
        state.set_detection_enabled(false);
        assert!(!state.detection_enabled());
    }

    #[test]
    fn capture_request_is_consumed_once() {
        let state = ControlState::new(true);
        assert!(!state.take_capture_request());

        state.request_capture();
        assert!(state.take_capture_request());
        assert!(!state.take_capture_request());
    }

    #[test]
    fn snapshot_roundtrips() {
        let state = ControlState::new(true);
        assert!(state.latest_snapshot().is_none());
        state.store_snapshot(vec![1, 2, 3]);
        assert_eq!(state.latest_snapshot(), Some(vec![1, 2, 3]));
    }

    fn request(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        let req = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        stream.write_all(req.as_bytes()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut response = String::new();
        let _ = stream.read_to_string(&mut response);
        response
    }

    #[test]
    fn control_server_serves_health_and_toggles_detection() {
        let state = Arc::new(ControlState::new(true));
        let handle = ControlServer::new(
            ControlConfig {
                addr: "127.0.0.1:0".to_string(),
            },
            state.clone(),
        )
        .spawn()
        .unwrap();
        let addr = handle.addr;

        let health = request(addr, "/health");
        assert!(health.contains("200 OK"));
        assert!(health.contains("\"ok\""));

        let off = request(addr, "/detection/off");
        assert!(off.contains("\"detection_enabled\":false"));
        assert!(!state.detection_enabled());

        let missing = request(addr, "/snapshot.jpg");
        assert!(missing.contains("404"));

        handle.stop().unwrap();
    }
}
