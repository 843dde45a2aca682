//! TCP gateway translating an external newline-delimited JSON stream
//! into fabric envelopes and back.
//!
//! Each accepted connection becomes a session with its own reply id: a
//! pull link bound at `com_format % id` forwards fabric envelopes to the
//! TCP peer, and every inbound line is dispatched — `inference` requests
//! fan in through the registry's per-unit publisher, everything else
//! becomes an RPC call on the unit named by `work_id`.

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};
use unitmesh_frame::pack;
use unitmesh_link::{unit_call, Link};
use unitmesh_node::{codes, work_id_name, Envelope, ErrorBody, SystemService};
use unitmesh_transport::{fill_port, Endpoint};

use crate::exit::{io_error, CliResult};

/// Reply ids roll through this range, one per session.
const COM_ID_FIRST: u32 = 8000;
const COM_ID_LAST: u32 = 65535;

const SESSION_POLL: Duration = Duration::from_millis(500);

/// Shared state handed to every session.
pub struct BridgeContext {
    pub registry: Arc<SystemService>,
    /// Template reply addresses are allocated from.
    pub com_format: String,
    /// Override for resolving a unit name to its RPC address (`%s` is
    /// the unit name). `None` uses the default RPC namespace.
    pub unit_rpc_format: Option<String>,
    next_com_id: AtomicU32,
}

impl BridgeContext {
    pub fn new(
        registry: Arc<SystemService>,
        com_format: impl Into<String>,
        unit_rpc_format: Option<String>,
    ) -> Self {
        Self {
            registry,
            com_format: com_format.into(),
            unit_rpc_format,
            next_com_id: AtomicU32::new(COM_ID_FIRST),
        }
    }

    fn allocate_com_id(&self) -> u32 {
        let id = self.next_com_id.fetch_add(1, Ordering::SeqCst);
        if id >= COM_ID_LAST {
            self.next_com_id.store(COM_ID_FIRST, Ordering::SeqCst);
        }
        id
    }

    fn unit_address(&self, unit: &str) -> String {
        match &self.unit_rpc_format {
            Some(template) => template.replacen("%s", unit, 1),
            None => unit.to_string(),
        }
    }
}

/// The bridge server: accept loop plus one thread per session.
pub struct Bridge {
    stop: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
    local_port: u16,
}

impl Bridge {
    /// Bind the TCP listener and start accepting sessions.
    pub fn start(listen_port: u16, context: Arc<BridgeContext>) -> CliResult<Self> {
        let listener = TcpListener::bind(("0.0.0.0", listen_port))
            .map_err(|err| io_error("bridge bind failed", err))?;
        let local_port = listener
            .local_addr()
            .map_err(|err| io_error("bridge bind failed", err))?
            .port();
        let stop = Arc::new(AtomicBool::new(false));

        let accept_thread = {
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || accept_loop(listener, context, stop))
        };

        info!(port = local_port, "bridge listening");
        Ok(Self {
            stop,
            accept_thread: Some(accept_thread),
            local_port,
        })
    }

    /// The bound TCP port (useful when started with port 0).
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Stop accepting, close all sessions, join threads.
    pub fn stop(&mut self) {
        if let Some(thread) = self.accept_thread.take() {
            self.stop.store(true, Ordering::SeqCst);
            let _ = TcpStream::connect(("127.0.0.1", self.local_port));
            let _ = thread.join();
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(listener: TcpListener, context: Arc<BridgeContext>, stop: Arc<AtomicBool>) {
    let mut sessions = Vec::new();
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                debug!(%peer, "bridge session opened");
                let context = Arc::clone(&context);
                let stop = Arc::clone(&stop);
                sessions.push(std::thread::spawn(move || {
                    if let Err(err) = run_session(stream, &context, &stop) {
                        debug!(%err, "bridge session ended");
                    }
                }));
            }
            Err(err) => {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                warn!(%err, "bridge accept failed");
            }
        }
    }
    for session in sessions {
        let _ = session.join();
    }
}

fn run_session(
    stream: TcpStream,
    context: &BridgeContext,
    stop: &AtomicBool,
) -> std::io::Result<()> {
    let com_id = context.allocate_com_id();
    let reply_url = fill_port(&context.com_format, com_id as u16);

    // Fabric → TCP: a pull inbox at the session's reply address.
    let writer = Arc::new(Mutex::new(stream.try_clone()?));
    let inbox_writer = Arc::clone(&writer);
    let endpoint = Endpoint::parse(&reply_url)
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    let _inbox = Link::pull(
        &endpoint,
        Arc::new(move |payload| {
            let mut writer = inbox_writer.lock().unwrap();
            let _ = writer.write_all(payload.as_ref());
            let _ = writer.flush();
        }),
    )
    .map_err(|err| std::io::Error::other(err.to_string()))?;

    // TCP → fabric: newline-delimited JSON dispatch.
    stream.set_read_timeout(Some(SESSION_POLL))?;
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    while !stop.load(Ordering::Relaxed) {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break, // peer closed
            Ok(_) => {
                let trimmed = line.trim_end_matches(['\n', '\r']);
                if !trimmed.is_empty() {
                    dispatch(context, &reply_url, trimmed);
                }
            }
            Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                continue;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Route one external request line.
///
/// Malformed JSON or missing `request_id`/`work_id`/`action` answers the
/// standard error envelope on the session's reply path; `inference`
/// requests are forwarded (tagged with the reply address) through the
/// registry publisher; everything else becomes an RPC call
/// `action(pack(reply_url, json))` on the unit named by `work_id`.
fn dispatch(context: &BridgeContext, reply_url: &str, line: &str) {
    let parsed: serde_json::Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(_) => {
            report_error(reply_url, "0", "sys", codes::JSON_FORMAT, "json format error");
            return;
        }
    };

    let request_id = match parsed["request_id"].as_str() {
        Some(id) => id.to_string(),
        None => {
            report_error(reply_url, "0", "sys", codes::JSON_FORMAT, "json format error");
            return;
        }
    };
    let work_id = match parsed["work_id"].as_str() {
        Some("") => "sys".to_string(),
        Some(id) => id.to_string(),
        None => {
            report_error(reply_url, "0", "sys", codes::JSON_FORMAT, "json format error");
            return;
        }
    };
    let action = match parsed["action"].as_str() {
        Some(action) => action.to_string(),
        None => {
            report_error(reply_url, "0", "sys", codes::JSON_FORMAT, "json format error");
            return;
        }
    };

    if action == "inference" {
        let mut tagged = parsed.clone();
        tagged["zmq_com"] = serde_json::Value::String(reply_url.to_string());
        let mut forwarded = tagged.to_string();
        forwarded.push('\n');
        if let Err(err) = context.registry.publish_to_unit(&work_id, &forwarded) {
            warn!(%work_id, %err, "inference forward failed");
            report_error(
                reply_url,
                &request_id,
                &work_id,
                codes::INFERENCE_PUSH,
                "inference data push false",
            );
        }
        return;
    }

    let unit = context.unit_address(work_id_name(&work_id));
    let call = pack(reply_url.as_bytes(), line.as_bytes()).and_then(|params| {
        unit_call(&unit, &action, &params).map_err(|err| {
            warn!(%unit, %action, %err, "unit call failed");
            unitmesh_frame::FrameError::Io(std::io::Error::other(err.to_string()))
        })
    });
    if call.is_err() {
        report_error(
            reply_url,
            &request_id,
            &work_id,
            codes::UNIT_CALL,
            "unit call false",
        );
    }
}

/// Push a standard error envelope back to the requester.
fn report_error(reply_url: &str, request_id: &str, work_id: &str, code: i64, message: &str) {
    let envelope = Envelope::error_reply(request_id, work_id, ErrorBody::new(code, message));
    let line = match envelope.to_wire_line() {
        Ok(line) => line,
        Err(err) => {
            warn!(%err, "error envelope serialization failed");
            return;
        }
    };
    let delivery = Endpoint::parse(reply_url)
        .map_err(|err| err.to_string())
        .and_then(|endpoint| Link::push(&endpoint).map_err(|err| err.to_string()))
        .and_then(|link| link.send(line.as_bytes()).map_err(|err| err.to_string()));
    if let Err(err) = delivery {
        warn!(%reply_url, %err, "error envelope delivery failed");
    }
}
