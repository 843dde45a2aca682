use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, error};
use unitmesh_frame::{FrameConfig, FrameReader, FrameWriter};
use unitmesh_transport::{connect, Endpoint};

use crate::error::{LinkError, Result};
use crate::link::{Dispatcher, Link, DEFAULT_TIMEOUT};

/// Sentinel reply for an unknown action or a failed handler. A reply must
/// always be sent or the calling peer blocks until its timeout.
pub const NOT_ACTION: &str = "NotAction";

/// A named RPC handler: parameter payload in, reply payload out.
pub type ActionHandler = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

type ActionTable = Mutex<HashMap<String, ActionHandler>>;

enum ServeState {
    Uninitialized,
    Ready(Link),
    Closed,
}

/// The named-action dispatch table attached to an rpc-serve link.
///
/// The underlying link is created lazily: a server may be declared long
/// before it is known whether it will ever serve, and binding only
/// happens once the first action is registered. The first registration
/// also installs the built-in `list_action` introspection handler.
pub struct RpcServer {
    name: String,
    timeout: Duration,
    actions: Arc<ActionTable>,
    state: Mutex<ServeState>,
}

impl RpcServer {
    /// Declare a server for `name` without allocating any resources.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeout: DEFAULT_TIMEOUT,
            actions: Arc::new(Mutex::new(HashMap::new())),
            state: Mutex::new(ServeState::Uninitialized),
        }
    }

    /// The server name (resolves under the RPC namespace).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register or replace an action handler.
    ///
    /// The first registration binds the serve link and installs
    /// `list_action`. Replacing an existing action never creates a
    /// duplicate entry.
    pub fn register(&self, action: &str, handler: ActionHandler) -> Result<()> {
        let mut actions = self.actions.lock().unwrap();
        if actions.is_empty() {
            self.ensure_bound()?;
            let table = Arc::downgrade(&self.actions);
            actions.insert(
                "list_action".to_string(),
                Arc::new(move |_params: &[u8]| list_actions_json(&table)),
            );
        }
        actions.insert(action.to_string(), handler);
        Ok(())
    }

    /// Remove an action. Removing the last handler does not tear down the
    /// link; only [`RpcServer::close`] does.
    pub fn unregister(&self, action: &str) {
        self.actions.lock().unwrap().remove(action);
    }

    /// Names of all currently registered actions.
    pub fn actions(&self) -> Vec<String> {
        self.actions.lock().unwrap().keys().cloned().collect()
    }

    /// Shut down the serve link. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        if let ServeState::Ready(link) = &mut *state {
            link.close();
        }
        *state = ServeState::Closed;
    }

    fn ensure_bound(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match &*state {
            ServeState::Ready(_) => Ok(()),
            ServeState::Closed => Err(LinkError::Closed),
            ServeState::Uninitialized => {
                let endpoint = Endpoint::for_rpc(&self.name)?;
                let table = Arc::clone(&self.actions);
                let dispatcher: Dispatcher =
                    Arc::new(move |action, params| dispatch(&table, action, params));
                let link = Link::rpc_serve(&endpoint, dispatcher, self.timeout)?;
                debug!(name = %self.name, endpoint = %link.endpoint(), "rpc server bound");
                *state = ServeState::Ready(link);
                Ok(())
            }
        }
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Look up and invoke an action, folding every failure into the sentinel.
fn dispatch(table: &ActionTable, action: &str, params: &[u8]) -> Vec<u8> {
    let handler = table.lock().unwrap().get(action).cloned();
    match handler {
        Some(handler) => {
            match std::panic::catch_unwind(AssertUnwindSafe(|| handler(params))) {
                Ok(reply) => reply,
                Err(_) => {
                    error!(action, "action handler panicked");
                    NOT_ACTION.as_bytes().to_vec()
                }
            }
        }
        None => NOT_ACTION.as_bytes().to_vec(),
    }
}

fn list_actions_json(table: &Weak<ActionTable>) -> Vec<u8> {
    let names: Vec<String> = match table.upgrade() {
        Some(table) => table.lock().unwrap().keys().cloned().collect(),
        None => Vec::new(),
    };
    serde_json::json!({ "actions": names }).to_string().into_bytes()
}

/// A single-shot RPC caller.
///
/// Declared lazily with just the server name; the socket only exists for
/// the duration of [`RpcClient::call`], which consumes the client — one
/// call, one socket lifetime.
pub struct RpcClient {
    server: String,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Perform one synchronous round trip: send the action name and the
    /// parameter payload as two message parts, then block for the single
    /// reply, bounded by the configured timeout.
    ///
    /// For filesystem-addressed servers the backing socket file is
    /// checked before connecting, so a never-started server fast-fails
    /// instead of blocking.
    pub fn call(self, action: &str, data: &[u8]) -> Result<Bytes> {
        let endpoint = Endpoint::for_rpc(&self.server)?;
        let stream = connect(&endpoint)?;
        let reader_stream = stream.try_clone()?;

        let config = FrameConfig {
            read_timeout: Some(self.timeout),
            write_timeout: Some(self.timeout),
            ..FrameConfig::default()
        };
        let mut reader = FrameReader::with_config_stream(reader_stream, config.clone())
            .map_err(|err| LinkError::from_frame_at(err, &endpoint, self.timeout))?;
        let mut writer = FrameWriter::with_config_stream(stream, config)
            .map_err(|err| LinkError::from_frame_at(err, &endpoint, self.timeout))?;

        writer
            .send(action.as_bytes(), true)
            .and_then(|()| writer.send(data, false))
            .map_err(|err| LinkError::from_frame_at(err, &endpoint, self.timeout))?;

        let reply = reader
            .read_frame()
            .map_err(|err| LinkError::from_frame_at(err, &endpoint, self.timeout))?;
        Ok(reply.payload)
    }
}

/// Call `action` on the server named `unit` and return the raw reply.
pub fn unit_call(unit: &str, action: &str, data: &[u8]) -> Result<Bytes> {
    RpcClient::new(unit).call(action, data)
}

/// [`unit_call`] for textual replies.
pub fn unit_call_str(unit: &str, action: &str, data: &str) -> Result<String> {
    let reply = unit_call(unit, action, data.as_bytes())?;
    Ok(String::from_utf8_lossy(reply.as_ref()).into_owned())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use super::*;

    fn scoped_server(tag: &str) -> RpcServer {
        // Address the server by explicit URL to keep tests out of the
        // shared /tmp namespace.
        let dir = std::env::temp_dir().join(format!("unitmesh-rpc-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        RpcServer::new(format!("ipc://{}", dir.join("rpc.sock").display()))
    }

    #[test]
    fn call_roundtrip() {
        let server = scoped_server("roundtrip");
        server
            .register(
                "echo",
                Arc::new(|params| {
                    format!("echo:{}", String::from_utf8_lossy(params)).into_bytes()
                }),
            )
            .unwrap();

        let reply = unit_call_str(server.name(), "echo", "hello").unwrap();
        assert_eq!(reply, "echo:hello");
    }

    #[test]
    fn unknown_action_yields_sentinel_and_loop_survives() {
        let server = scoped_server("sentinel");
        server.register("real", Arc::new(|_| b"ok".to_vec())).unwrap();

        assert_eq!(unit_call_str(server.name(), "missing", "").unwrap(), NOT_ACTION);
        // The serve loop must still answer after a miss.
        assert_eq!(unit_call_str(server.name(), "real", "").unwrap(), "ok");
    }

    #[test]
    fn panicking_handler_yields_sentinel() {
        let server = scoped_server("panic");
        server
            .register("boom", Arc::new(|_| panic!("handler exploded")))
            .unwrap();
        assert_eq!(unit_call_str(server.name(), "boom", "").unwrap(), NOT_ACTION);
        // The serve loop survives the panic.
        let reply = unit_call_str(server.name(), "list_action", "").unwrap();
        assert!(reply.contains("\"boom\""));
    }

    #[test]
    fn list_action_enumerates_each_name_once() {
        let server = scoped_server("list");
        server.register("alpha", Arc::new(|_| Vec::new())).unwrap();
        server.register("beta", Arc::new(|_| Vec::new())).unwrap();
        // Re-register must replace, not duplicate.
        server.register("alpha", Arc::new(|_| Vec::new())).unwrap();

        let reply = unit_call_str(server.name(), "list_action", "").unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&reply).unwrap();
        let mut names: Vec<String> = parsed["actions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["alpha", "beta", "list_action"]);
    }

    #[test]
    fn registration_replaces_handler() {
        let server = scoped_server("replace");
        let hits = Arc::new(AtomicUsize::new(0));
        let first_hits = Arc::clone(&hits);
        server
            .register("act", Arc::new(move |_| {
                first_hits.fetch_add(1, Ordering::SeqCst);
                b"first".to_vec()
            }))
            .unwrap();
        server.register("act", Arc::new(|_| b"second".to_vec())).unwrap();

        assert_eq!(unit_call_str(server.name(), "act", "").unwrap(), "second");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn call_fast_fails_on_missing_socket_file() {
        let started = Instant::now();
        let err = RpcClient::new("ipc:///tmp/unitmesh-definitely-absent.sock")
            .call("anything", b"")
            .unwrap_err();
        assert!(matches!(
            err,
            LinkError::Transport(unitmesh_transport::TransportError::MissingSocketFile(_))
        ));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn unregister_keeps_link_alive() {
        let server = scoped_server("unregister");
        server.register("gone", Arc::new(|_| b"x".to_vec())).unwrap();
        server.unregister("gone");
        // The link still serves; the action is simply unknown now.
        assert_eq!(unit_call_str(server.name(), "gone", "").unwrap(), NOT_ACTION);
    }

    #[test]
    fn params_roundtrip_through_call() {
        let server = scoped_server("params");
        server
            .register(
                "swap",
                Arc::new(|params| {
                    let p0 = unitmesh_frame::unpack_str(params, 0).unwrap().to_string();
                    let p1 = unitmesh_frame::unpack_str(params, 1).unwrap().to_string();
                    format!("{p1}|{p0}").into_bytes()
                }),
            )
            .unwrap();

        let packed = unitmesh_frame::pack(b"first", b"second").unwrap();
        let reply = unit_call(server.name(), "swap", &packed).unwrap();
        assert_eq!(reply.as_ref(), b"second|first");
    }
}
