use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use bytes::Bytes;
use tracing::{debug, warn};
use unitmesh_frame::unpack_str;
use unitmesh_link::{unit_call, ActionHandler, RpcServer};

use crate::error::Result;
use crate::scan::json_str_get;

/// Placeholder reply sent by control actions; the real result is
/// delivered asynchronously over the send path.
pub const PLACEHOLDER_REPLY: &str = "None";

/// A control event queued from an RPC receive thread.
///
/// The payload is the packed (reply address, JSON body) parameter pair of
/// the originating call.
#[derive(Debug, Clone)]
pub enum ControlEvent {
    None,
    Setup(Bytes),
    Pause(Bytes),
    Exit(Bytes),
    TaskInfo(Bytes),
}

/// Per-event routing context handed to the unit handler.
#[derive(Debug, Clone, Default)]
pub struct ControlContext {
    /// Requester's reply (push) address.
    pub reply_url: String,
    /// `request_id` extracted from the event body.
    pub request_id: String,
}

/// The capability contract a worker unit implements.
///
/// Handlers run on the event loop thread only, strictly in arrival
/// order — two handlers never run concurrently, even though the
/// triggering RPC calls arrive on concurrent receive threads.
pub trait UnitHandler: Send + Sync {
    fn setup(&self, ctx: &ControlContext, body: &str) {
        let _ = (ctx, body);
        warn!("setup not implemented by this unit");
    }

    fn pause(&self, ctx: &ControlContext, body: &str) {
        let _ = (ctx, body);
    }

    fn exit(&self, ctx: &ControlContext, body: &str) {
        let _ = (ctx, body);
    }

    fn taskinfo(&self, ctx: &ControlContext, body: &str) {
        let _ = (ctx, body);
    }
}

#[derive(Default)]
struct EventQueue {
    events: Mutex<VecDeque<ControlEvent>>,
    ready: Condvar,
}

impl EventQueue {
    fn push(&self, event: ControlEvent) {
        self.events.lock().unwrap().push_back(event);
        self.ready.notify_one();
    }

    fn pop_blocking(&self) -> ControlEvent {
        let mut events = self.events.lock().unwrap();
        loop {
            if let Some(event) = events.pop_front() {
                return event;
            }
            events = self.ready.wait(events).unwrap();
        }
    }
}

/// The control surface of one worker unit.
///
/// Registers the `setup`/`pause`/`exit`/`taskinfo` RPC actions; each
/// enqueues a tagged event and replies immediately with the placeholder,
/// so handlers never run inline on a receive loop. A dedicated loop
/// thread replays the events in order against the [`UnitHandler`].
pub struct UnitFlow {
    unit_name: String,
    rpc: RpcServer,
    queue: Arc<EventQueue>,
    exit_flag: Arc<AtomicBool>,
    status: Arc<AtomicI32>,
    loop_thread: Option<JoinHandle<()>>,
}

impl UnitFlow {
    /// Bring up the control surface for `unit_name`.
    pub fn start(unit_name: &str, handler: Arc<dyn UnitHandler>) -> Result<Self> {
        let rpc = RpcServer::new(unit_name);
        let queue = Arc::new(EventQueue::default());
        let exit_flag = Arc::new(AtomicBool::new(false));
        let status = Arc::new(AtomicI32::new(0));

        rpc.register("setup", enqueue_action(&queue, ControlEvent::Setup))?;
        rpc.register("pause", enqueue_action(&queue, ControlEvent::Pause))?;
        rpc.register("exit", enqueue_action(&queue, ControlEvent::Exit))?;
        rpc.register("taskinfo", enqueue_action(&queue, ControlEvent::TaskInfo))?;

        let loop_thread = {
            let queue = Arc::clone(&queue);
            let exit_flag = Arc::clone(&exit_flag);
            let status = Arc::clone(&status);
            let unit = unit_name.to_string();
            std::thread::spawn(move || event_loop(&unit, &queue, &exit_flag, &status, handler))
        };
        status.store(1, Ordering::SeqCst);

        Ok(Self {
            unit_name: unit_name.to_string(),
            rpc,
            queue,
            exit_flag,
            status,
            loop_thread: Some(loop_thread),
        })
    }

    pub fn unit_name(&self) -> &str {
        &self.unit_name
    }

    /// The RPC server, for units that register extra actions of their
    /// own next to the control set.
    pub fn rpc(&self) -> &RpcServer {
        &self.rpc
    }

    /// Gate handler execution without tearing anything down; events
    /// arriving while paused are consumed and dropped.
    pub fn set_active(&self, active: bool) {
        self.status.store(if active { 1 } else { 0 }, Ordering::SeqCst);
    }

    /// Stop the loop: set the exit flag, enqueue a wake-up no-op, join.
    pub fn shutdown(&mut self) {
        if let Some(thread) = self.loop_thread.take() {
            self.exit_flag.store(true, Ordering::SeqCst);
            self.queue.push(ControlEvent::None);
            let _ = thread.join();
        }
        self.rpc.close();
    }
}

impl Drop for UnitFlow {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn enqueue_action(
    queue: &Arc<EventQueue>,
    tag: fn(Bytes) -> ControlEvent,
) -> ActionHandler {
    let queue = Arc::clone(queue);
    Arc::new(move |params: &[u8]| {
        queue.push(tag(Bytes::copy_from_slice(params)));
        PLACEHOLDER_REPLY.as_bytes().to_vec()
    })
}

fn event_loop(
    unit: &str,
    queue: &EventQueue,
    exit_flag: &AtomicBool,
    status: &AtomicI32,
    handler: Arc<dyn UnitHandler>,
) {
    debug!(%unit, "event loop running");
    while !exit_flag.load(Ordering::SeqCst) {
        let event = queue.pop_blocking();
        if exit_flag.load(Ordering::SeqCst) {
            break;
        }
        if status.load(Ordering::SeqCst) == 0 {
            continue;
        }
        let (name, params) = match &event {
            ControlEvent::None => continue,
            ControlEvent::Setup(params) => ("setup", params),
            ControlEvent::Pause(params) => ("pause", params),
            ControlEvent::Exit(params) => ("exit", params),
            ControlEvent::TaskInfo(params) => ("taskinfo", params),
        };
        let ctx = match decode_context(params) {
            Ok(ctx) => ctx,
            Err(err) => {
                warn!(%unit, event = name, %err, "dropping malformed control event");
                continue;
            }
        };
        let body = match unpack_str(params, 1) {
            Ok(body) => body.to_string(),
            Err(err) => {
                warn!(%unit, event = name, %err, "dropping malformed control event");
                continue;
            }
        };
        match event {
            ControlEvent::Setup(_) => handler.setup(&ctx, &body),
            ControlEvent::Pause(_) => handler.pause(&ctx, &body),
            ControlEvent::Exit(_) => handler.exit(&ctx, &body),
            ControlEvent::TaskInfo(_) => handler.taskinfo(&ctx, &body),
            ControlEvent::None => {}
        }
    }
    debug!(%unit, "event loop stopped");
}

fn decode_context(params: &[u8]) -> Result<ControlContext> {
    let reply_url = unpack_str(params, 0)?.to_string();
    let body = unpack_str(params, 1)?;
    let request_id = json_str_get(body, "request_id").unwrap_or_default();
    Ok(ControlContext {
        reply_url,
        request_id,
    })
}

/// Ask the registry to release this unit's work id, the way a unit tears
/// itself down.
pub fn release_unit(registry_name: &str, work_id: &str) -> Result<()> {
    unit_call(registry_name, "release_unit", work_id.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use unitmesh_frame::pack;

    use super::*;

    fn scoped_name(tag: &str) -> String {
        let dir = std::env::temp_dir().join(format!("unitmesh-ev-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        format!("ipc://{}", dir.join("unit.sock").display())
    }

    struct Recorder {
        tx: Mutex<mpsc::Sender<String>>,
    }

    impl Recorder {
        fn new() -> (Arc<Self>, mpsc::Receiver<String>) {
            let (tx, rx) = mpsc::channel();
            (Arc::new(Self { tx: Mutex::new(tx) }), rx)
        }

        fn record(&self, what: String) {
            let _ = self.tx.lock().unwrap().send(what);
        }
    }

    impl UnitHandler for Recorder {
        fn setup(&self, ctx: &ControlContext, body: &str) {
            self.record(format!("setup:{}:{}:{}", ctx.reply_url, ctx.request_id, body));
        }

        fn pause(&self, _ctx: &ControlContext, _body: &str) {
            // Hold the loop long enough that a concurrent event must wait.
            std::thread::sleep(Duration::from_millis(100));
            self.record("pause".to_string());
        }

        fn exit(&self, _ctx: &ControlContext, _body: &str) {
            self.record("exit".to_string());
        }
    }

    #[test]
    fn control_actions_reply_placeholder_and_run_async() {
        let name = scoped_name("async");
        let (handler, rx) = Recorder::new();
        let _flow = UnitFlow::start(&name, handler).unwrap();

        let params = pack(
            b"ipc:///tmp/reply.sock",
            br#"{"request_id": "r-1", "action": "setup"}"#,
        )
        .unwrap();
        let reply = unit_call(&name, "setup", &params).unwrap();
        assert_eq!(reply.as_ref(), PLACEHOLDER_REPLY.as_bytes());

        let seen = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(
            seen,
            "setup:ipc:///tmp/reply.sock:r-1:{\"request_id\": \"r-1\", \"action\": \"setup\"}"
        );
    }

    #[test]
    fn events_are_replayed_strictly_in_order() {
        let name = scoped_name("order");
        let (handler, rx) = Recorder::new();
        let _flow = UnitFlow::start(&name, handler).unwrap();

        let slow = pack(b"url", b"{}").unwrap();
        // Enqueue from two different caller threads: pause first, then
        // exit while pause's handler is still sleeping.
        let n1 = name.clone();
        let p1 = slow.clone();
        let t1 = std::thread::spawn(move || {
            unit_call(&n1, "pause", &p1).unwrap();
        });
        t1.join().unwrap();
        let n2 = name.clone();
        let t2 = std::thread::spawn(move || {
            unit_call(&n2, "exit", &pack(b"url", b"{}").unwrap()).unwrap();
        });
        t2.join().unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "pause");
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "exit");
    }

    #[test]
    fn paused_unit_drops_events() {
        let name = scoped_name("inactive");
        let (handler, rx) = Recorder::new();
        let flow = UnitFlow::start(&name, handler).unwrap();
        flow.set_active(false);

        unit_call(&name, "exit", &pack(b"url", b"{}").unwrap()).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());

        flow.set_active(true);
        unit_call(&name, "exit", &pack(b"url", b"{}").unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "exit");
    }

    #[test]
    fn shutdown_joins_the_loop() {
        let name = scoped_name("shutdown");
        let (handler, _rx) = Recorder::new();
        let mut flow = UnitFlow::start(&name, handler).unwrap();
        flow.shutdown();
        flow.shutdown(); // idempotent
    }
}
