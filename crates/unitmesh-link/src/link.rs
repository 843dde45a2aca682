use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, trace, warn};
use unitmesh_frame::{FrameConfig, FrameReader, FrameWriter};
use unitmesh_transport::{connect, Endpoint, FabListener, FabStream};

use crate::error::{LinkError, Result};
use crate::role::LinkRole;

/// Default send/receive timeout for links and RPC calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Reconnect backoff bounds for connecting roles.
pub(crate) const RECONNECT_INITIAL: Duration = Duration::from_millis(100);
pub(crate) const RECONNECT_MAX: Duration = Duration::from_millis(1000);

/// Bounded retry for transient socket-allocation failures. The original
/// design retried forever; exhaustion now surfaces as an error.
const BIND_ATTEMPTS: usize = 5;
const BIND_BACKOFF: Duration = Duration::from_millis(10);

/// Poll granularity for receive loops, so shutdown never waits on a
/// blocked read.
const LOOP_POLL: Duration = Duration::from_millis(200);

/// Callback invoked by receive loops with each inbound payload.
pub type FrameCallback = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Dispatch hook for the rpc-serve role: (action, parameters) → reply.
pub(crate) type Dispatcher = Arc<dyn Fn(&str, &[u8]) -> Vec<u8> + Send + Sync>;

/// A single-role fabric socket.
///
/// Identity is (role, address). Receiving roles own a background loop
/// thread; dropping the link stops the loop, joins it, and releases the
/// socket (including the backing file for bound filesystem addresses).
pub struct Link {
    role: LinkRole,
    endpoint: Endpoint,
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
    subscribers: Option<Arc<Mutex<Vec<FrameWriter<FabStream>>>>>,
    writer: Option<Mutex<FrameWriter<FabStream>>>,
    closed: bool,
}

impl Link {
    /// Bind a publish link. Subscribers are accepted in the background;
    /// `send` fans out to every live subscriber.
    pub fn publish(endpoint: &Endpoint) -> Result<Self> {
        let listener = bind_with_retry(endpoint)?;
        let bound = listener.endpoint();
        let subscribers: Arc<Mutex<Vec<FrameWriter<FabStream>>>> =
            Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let thread = {
            let subscribers = Arc::clone(&subscribers);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || accept_subscribers(listener, subscribers, stop))
        };

        debug!(endpoint = %bound, "publish link ready");
        Ok(Self {
            role: LinkRole::Publish,
            endpoint: bound,
            stop,
            threads: vec![thread],
            subscribers: Some(subscribers),
            writer: None,
            closed: false,
        })
    }

    /// Connect a subscribe link. The receive loop reconnects with a
    /// bounded backoff (100 ms → 1000 ms) whenever the publisher is
    /// unreachable, so a subscription may be declared before its
    /// publisher exists.
    pub fn subscribe(endpoint: &Endpoint, callback: FrameCallback) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let endpoint = endpoint.clone();
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || subscribe_loop(endpoint, callback, stop))
        };
        Ok(Self {
            role: LinkRole::Subscribe,
            endpoint: endpoint.clone(),
            stop,
            threads: vec![thread],
            subscribers: None,
            writer: None,
            closed: false,
        })
    }

    /// Connect a push link (fire-and-forget, no receive loop). Connection
    /// attempts retry with the reconnect backoff until `timeout` elapses.
    pub fn push(endpoint: &Endpoint) -> Result<Self> {
        Self::push_with_timeout(endpoint, DEFAULT_TIMEOUT)
    }

    /// [`Link::push`] with an explicit connect/send timeout.
    pub fn push_with_timeout(endpoint: &Endpoint, timeout: Duration) -> Result<Self> {
        let deadline = Instant::now() + timeout;
        let mut backoff = RECONNECT_INITIAL;
        let stream = loop {
            match connect(endpoint) {
                Ok(stream) => break stream,
                Err(err) => {
                    if Instant::now() + backoff >= deadline {
                        trace!(%endpoint, %err, "push connect gave up");
                        return Err(LinkError::Timeout {
                            endpoint: endpoint.to_string(),
                            timeout,
                        });
                    }
                    std::thread::sleep(backoff);
                    backoff = (backoff * 2).min(RECONNECT_MAX);
                }
            }
        };
        let config = FrameConfig {
            write_timeout: Some(timeout),
            ..FrameConfig::default()
        };
        let writer = FrameWriter::with_config_stream(stream, config)?;
        Ok(Self {
            role: LinkRole::Push,
            endpoint: endpoint.clone(),
            stop: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
            subscribers: None,
            writer: Some(Mutex::new(writer)),
            closed: false,
        })
    }

    /// Bind a pull link. Pushers are accepted in the background and every
    /// inbound frame is dispatched to `callback`.
    pub fn pull(endpoint: &Endpoint, callback: FrameCallback) -> Result<Self> {
        let listener = bind_with_retry(endpoint)?;
        let bound = listener.endpoint();
        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || pull_accept_loop(listener, callback, stop))
        };
        debug!(endpoint = %bound, "pull link ready");
        Ok(Self {
            role: LinkRole::Pull,
            endpoint: bound,
            stop,
            threads: vec![thread],
            subscribers: None,
            writer: None,
            closed: false,
        })
    }

    /// Bind an rpc-serve link. Each accepted peer sends a two-part
    /// request (action, then parameters) and receives exactly one reply
    /// from `dispatcher`; peers are single-shot.
    pub(crate) fn rpc_serve(
        endpoint: &Endpoint,
        dispatcher: Dispatcher,
        timeout: Duration,
    ) -> Result<Self> {
        let listener = bind_with_retry(endpoint)?;
        let bound = listener.endpoint();
        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || rpc_serve_loop(listener, dispatcher, timeout, stop))
        };
        debug!(endpoint = %bound, "rpc serve link ready");
        Ok(Self {
            role: LinkRole::RpcServe,
            endpoint: bound,
            stop,
            threads: vec![thread],
            subscribers: None,
            writer: None,
            closed: false,
        })
    }

    /// Send one payload.
    ///
    /// Publish fans out to all connected subscribers (dead ones are
    /// dropped); push writes to the single destination. Other roles do
    /// not send.
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        if self.closed {
            return Err(LinkError::Closed);
        }
        match self.role {
            LinkRole::Publish => {
                let Some(subscribers) = &self.subscribers else {
                    return Err(LinkError::Closed);
                };
                let mut subscribers = subscribers.lock().unwrap();
                subscribers.retain_mut(|writer| match writer.send(payload, false) {
                    Ok(()) => true,
                    Err(err) => {
                        debug!(%err, "dropping dead subscriber");
                        false
                    }
                });
                Ok(())
            }
            LinkRole::Push => {
                let Some(writer) = &self.writer else {
                    return Err(LinkError::Closed);
                };
                writer.lock().unwrap().send(payload, false)?;
                Ok(())
            }
            role => Err(LinkError::InvalidRole { role, op: "send" }),
        }
    }

    /// The link's role.
    pub fn role(&self) -> LinkRole {
        self.role
    }

    /// The link's address. For bound roles this is the resolved address
    /// (a `:0` TCP bind reports its real port).
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Number of currently connected subscribers (publish role only).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .as_ref()
            .map(|subs| subs.lock().unwrap().len())
            .unwrap_or(0)
    }

    /// Stop loops, join threads and release the socket. Idempotent.
    ///
    /// The receive loop is unblocked before the resource is released:
    /// releasing first would hand the loop thread a dead socket.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stop.store(true, Ordering::SeqCst);
        if self.role.binds() {
            // Wake a blocked accept; the loop observes the stop flag and
            // exits, dropping the listener (which unlinks any socket file).
            let _ = connect(&self.endpoint);
        }
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
        self.subscribers = None;
        self.writer = None;
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("role", &self.role)
            .field("endpoint", &self.endpoint.to_string())
            .field("closed", &self.closed)
            .finish()
    }
}

fn bind_with_retry(endpoint: &Endpoint) -> Result<FabListener> {
    let mut attempt = 0;
    loop {
        match FabListener::bind(endpoint) {
            Ok(listener) => return Ok(listener),
            Err(err) => {
                attempt += 1;
                if attempt >= BIND_ATTEMPTS {
                    return Err(err.into());
                }
                warn!(%endpoint, %err, attempt, "bind failed, retrying");
                std::thread::sleep(BIND_BACKOFF);
            }
        }
    }
}

fn poll_config() -> FrameConfig {
    FrameConfig {
        read_timeout: Some(LOOP_POLL),
        ..FrameConfig::default()
    }
}

fn is_poll_timeout(err: &unitmesh_frame::FrameError) -> bool {
    matches!(
        err,
        unitmesh_frame::FrameError::Io(io)
            if matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            )
    )
}

fn sleep_unless_stopped(duration: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline && !stop.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn accept_subscribers(
    listener: FabListener,
    subscribers: Arc<Mutex<Vec<FrameWriter<FabStream>>>>,
    stop: Arc<AtomicBool>,
) {
    loop {
        match listener.accept() {
            Ok(stream) => {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                let config = FrameConfig {
                    write_timeout: Some(DEFAULT_TIMEOUT),
                    ..FrameConfig::default()
                };
                match FrameWriter::with_config_stream(stream, config) {
                    Ok(writer) => subscribers.lock().unwrap().push(writer),
                    Err(err) => debug!(%err, "subscriber setup failed"),
                }
            }
            Err(err) => {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                warn!(%err, "publish accept failed");
                sleep_unless_stopped(BIND_BACKOFF, &stop);
            }
        }
    }
}

fn subscribe_loop(endpoint: Endpoint, callback: FrameCallback, stop: Arc<AtomicBool>) {
    let mut backoff = RECONNECT_INITIAL;
    while !stop.load(Ordering::Relaxed) {
        let stream = match connect(&endpoint) {
            Ok(stream) => stream,
            Err(err) => {
                trace!(%endpoint, %err, "subscribe connect failed, backing off");
                sleep_unless_stopped(backoff, &stop);
                backoff = (backoff * 2).min(RECONNECT_MAX);
                continue;
            }
        };
        backoff = RECONNECT_INITIAL;
        let mut reader = match FrameReader::with_config_stream(stream, poll_config()) {
            Ok(reader) => reader,
            Err(_) => continue,
        };
        debug!(%endpoint, "subscribed");
        loop {
            if stop.load(Ordering::Relaxed) {
                return;
            }
            match reader.read_frame() {
                Ok(frame) => callback(frame.payload),
                Err(err) if is_poll_timeout(&err) => continue,
                Err(err) => {
                    trace!(%endpoint, %err, "subscription dropped, reconnecting");
                    break;
                }
            }
        }
    }
}

fn pull_accept_loop(listener: FabListener, callback: FrameCallback, stop: Arc<AtomicBool>) {
    let mut readers = Vec::new();
    loop {
        match listener.accept() {
            Ok(stream) => {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                let callback = Arc::clone(&callback);
                let stop = Arc::clone(&stop);
                readers.push(std::thread::spawn(move || {
                    pull_reader(stream, callback, stop)
                }));
            }
            Err(err) => {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                warn!(%err, "pull accept failed");
                sleep_unless_stopped(BIND_BACKOFF, &stop);
            }
        }
    }
    for reader in readers {
        let _ = reader.join();
    }
}

fn pull_reader(stream: FabStream, callback: FrameCallback, stop: Arc<AtomicBool>) {
    let mut reader = match FrameReader::with_config_stream(stream, poll_config()) {
        Ok(reader) => reader,
        Err(_) => return,
    };
    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        match reader.read_frame() {
            Ok(frame) => callback(frame.payload),
            Err(err) if is_poll_timeout(&err) => continue,
            Err(_) => return,
        }
    }
}

fn rpc_serve_loop(
    listener: FabListener,
    dispatcher: Dispatcher,
    timeout: Duration,
    stop: Arc<AtomicBool>,
) {
    loop {
        let stream = match listener.accept() {
            Ok(stream) => stream,
            Err(err) => {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                warn!(%err, "rpc accept failed");
                sleep_unless_stopped(BIND_BACKOFF, &stop);
                continue;
            }
        };
        if stop.load(Ordering::Relaxed) {
            break;
        }
        if let Err(err) = serve_one(stream, &dispatcher, timeout) {
            trace!(%err, "rpc request aborted");
        }
    }
}

/// Serve exactly one request on an accepted connection.
///
/// A reply is always sent for a well-formed request — the dispatcher
/// converts lookup misses and handler failures into a sentinel string, so
/// the peer is never left blocking on a missing reply.
fn serve_one(
    stream: FabStream,
    dispatcher: &Dispatcher,
    timeout: Duration,
) -> std::result::Result<(), unitmesh_frame::FrameError> {
    let reader_stream = stream.try_clone().map_err(|err| {
        unitmesh_frame::FrameError::Io(std::io::Error::other(err.to_string()))
    })?;
    let config = FrameConfig {
        read_timeout: Some(timeout),
        write_timeout: Some(timeout),
        ..FrameConfig::default()
    };
    let mut reader = FrameReader::with_config_stream(reader_stream, config.clone())?;
    let mut writer = FrameWriter::with_config_stream(stream, config)?;

    let action_frame = reader.read_frame()?;
    let params = if action_frame.more {
        reader.read_frame()?.payload
    } else {
        Bytes::new()
    };
    let action = String::from_utf8_lossy(action_frame.payload.as_ref()).into_owned();

    let reply = dispatcher(&action, params.as_ref());
    writer.send(&reply, false)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    use super::*;

    fn temp_ipc(tag: &str) -> Endpoint {
        let dir = std::env::temp_dir().join(format!("unitmesh-link-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        Endpoint::Ipc(dir.join("link.sock"))
    }

    fn wait_for_subscriber(link: &Link) {
        for _ in 0..100 {
            if link.subscriber_count() > 0 {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("subscriber never connected");
    }

    #[test]
    fn publish_subscribe_delivers_in_order() {
        let endpoint = temp_ipc("pubsub");
        let publisher = Link::publish(&endpoint).unwrap();

        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let _subscriber = Link::subscribe(
            publisher.endpoint(),
            Arc::new(move |payload| {
                let _ = tx.send(payload.to_vec());
            }),
        )
        .unwrap();

        wait_for_subscriber(&publisher);
        for i in 0..8u32 {
            publisher.send(format!("ev-{i}").as_bytes()).unwrap();
        }
        for i in 0..8u32 {
            let got = rx.recv_timeout(Duration::from_secs(2)).unwrap();
            assert_eq!(got, format!("ev-{i}").into_bytes());
        }
    }

    #[test]
    fn subscriber_declared_before_publisher_recovers() {
        let endpoint = temp_ipc("late-pub");
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let _subscriber = Link::subscribe(
            &endpoint,
            Arc::new(move |payload| {
                let _ = tx.send(payload.to_vec());
            }),
        )
        .unwrap();

        // Publisher comes up after the subscription was declared.
        std::thread::sleep(Duration::from_millis(150));
        let publisher = Link::publish(&endpoint).unwrap();
        wait_for_subscriber(&publisher);
        publisher.send(b"late").unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(3)).unwrap(), b"late");
    }

    #[test]
    fn push_pull_fan_in() {
        let endpoint = temp_ipc("pushpull");
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let counter_cb = Arc::clone(&counter);
        let puller = Link::pull(
            &endpoint,
            Arc::new(move |payload| {
                counter_cb.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(payload.to_vec());
            }),
        )
        .unwrap();

        let pusher_a = Link::push(puller.endpoint()).unwrap();
        let pusher_b = Link::push(puller.endpoint()).unwrap();
        pusher_a.send(b"from-a").unwrap();
        pusher_b.send(b"from-b").unwrap();

        let mut got = vec![
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
        ];
        got.sort();
        assert_eq!(got, vec![b"from-a".to_vec(), b"from-b".to_vec()]);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn push_times_out_without_listener() {
        let endpoint = temp_ipc("push-timeout");
        let timeout = Duration::from_millis(300);
        let started = Instant::now();
        let err = Link::push_with_timeout(&endpoint, timeout).unwrap_err();
        assert!(matches!(err, LinkError::Timeout { .. }));
        assert!(started.elapsed() < timeout + Duration::from_millis(500));
    }

    #[test]
    fn send_is_invalid_on_receiving_roles() {
        let endpoint = temp_ipc("badrole");
        let puller = Link::pull(&endpoint, Arc::new(|_| {})).unwrap();
        assert!(matches!(
            puller.send(b"nope"),
            Err(LinkError::InvalidRole { .. })
        ));
    }

    #[test]
    fn close_unlinks_socket_file_and_is_idempotent() {
        let endpoint = temp_ipc("close");
        let mut publisher = Link::publish(&endpoint).unwrap();
        let path = endpoint.socket_path().unwrap().to_path_buf();
        assert!(path.exists());

        publisher.close();
        publisher.close();
        assert!(!path.exists(), "socket file should be gone after close");
    }
}
