use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};
use unitmesh_frame::pack;
use unitmesh_link::{Link, RpcServer};
use unitmesh_transport::{fill_port, scan_port, Endpoint};

use crate::error::{NodeError, Result};
use crate::scan::make_work_id;
use crate::store::{KvStore, KvValue, PortPool};

/// The RPC identity of the work-unit registry.
pub const SYSTEM_UNIT: &str = "sys";

/// Sentinel replies for the string-based RPC surface.
const REPLY_OK: &str = "Success";
const REPLY_FAIL: &str = "False";

/// Startup parameters for the registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// RPC server name; resolves under the RPC namespace unless it
    /// carries a scheme.
    pub service_name: String,
    /// Printf-style template unit addresses are allocated from.
    pub unit_format: String,
    /// First work-id handed out by the counter.
    pub first_work_id: u64,
    /// Port pool bounds, `[port_min, port_max)`.
    pub port_min: u16,
    pub port_max: u16,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            service_name: SYSTEM_UNIT.to_string(),
            unit_format: "tcp://*:%d".to_string(),
            first_work_id: 1000,
            port_min: 5010,
            port_max: 5110,
        }
    }
}

struct UnitRecord {
    output_url: String,
    inference_url: String,
    /// Publisher bound at the inference address; the bridge forwards
    /// user inference requests through it to the unit's subscribe side.
    publisher: Link,
}

struct SysState {
    store: Arc<KvStore>,
    ports: PortPool,
    counter: AtomicU64,
    units: Mutex<HashMap<String, UnitRecord>>,
    unit_format: String,
}

/// The central work-unit registry, exposed as the `sys` RPC service.
///
/// Actions: `register_unit`, `release_unit`, `sql_select`, `sql_set`,
/// `sql_unset`.
pub struct SystemService {
    state: Arc<SysState>,
    rpc: RpcServer,
}

impl SystemService {
    /// Bind the registry and register its five actions.
    pub fn start(store: Arc<KvStore>, config: RegistryConfig) -> Result<Self> {
        let state = Arc::new(SysState {
            store,
            ports: PortPool::new(config.port_min, config.port_max),
            counter: AtomicU64::new(config.first_work_id),
            units: Mutex::new(HashMap::new()),
            unit_format: config.unit_format.clone(),
        });
        let rpc = RpcServer::new(config.service_name.clone());

        {
            let state = Arc::clone(&state);
            rpc.register(
                "register_unit",
                Arc::new(move |params| {
                    let unit = String::from_utf8_lossy(params);
                    match state.allocate_unit(unit.trim()) {
                        Ok(reply) => reply,
                        Err(err) => {
                            warn!(%unit, %err, "unit registration refused");
                            REPLY_FAIL.as_bytes().to_vec()
                        }
                    }
                }),
            )?;
        }
        {
            let state = Arc::clone(&state);
            rpc.register(
                "release_unit",
                Arc::new(move |params| {
                    let work_id = String::from_utf8_lossy(params);
                    match state.release_unit(work_id.trim()) {
                        Ok(()) => REPLY_OK.as_bytes().to_vec(),
                        Err(err) => {
                            warn!(%work_id, %err, "unit release failed");
                            REPLY_FAIL.as_bytes().to_vec()
                        }
                    }
                }),
            )?;
        }
        {
            let state = Arc::clone(&state);
            rpc.register(
                "sql_select",
                Arc::new(move |params| {
                    let key = String::from_utf8_lossy(params);
                    state.store.get_text(key.trim()).into_bytes()
                }),
            )?;
        }
        {
            let state = Arc::clone(&state);
            rpc.register(
                "sql_set",
                Arc::new(move |params| {
                    let body = String::from_utf8_lossy(params);
                    let key = crate::scan::json_str_get(&body, "key");
                    let val = crate::scan::json_str_get(&body, "val").unwrap_or_default();
                    match key {
                        Some(key) if !key.is_empty() => {
                            state.store.set(key, KvValue::Str(val));
                            REPLY_OK.as_bytes().to_vec()
                        }
                        _ => REPLY_FAIL.as_bytes().to_vec(),
                    }
                }),
            )?;
        }
        {
            let state = Arc::clone(&state);
            rpc.register(
                "sql_unset",
                Arc::new(move |params| {
                    let key = String::from_utf8_lossy(params);
                    state.store.unset(key.trim());
                    REPLY_OK.as_bytes().to_vec()
                }),
            )?;
        }

        info!(service = %rpc.name(), "work-unit registry serving");
        Ok(Self { state, rpc })
    }

    /// The registry's RPC name, for callers constructing their own calls.
    pub fn rpc_name(&self) -> &str {
        self.rpc.name()
    }

    /// Forward one envelope line to a unit's inference subscribers.
    pub fn publish_to_unit(&self, work_id: &str, line: &str) -> Result<()> {
        let units = self.state.units.lock().unwrap();
        let record = units
            .get(work_id)
            .ok_or_else(|| NodeError::UnknownWorkId(work_id.to_string()))?;
        record.publisher.send(line.as_bytes())?;
        Ok(())
    }

    /// Number of live unit records.
    pub fn unit_count(&self) -> usize {
        self.state.units.lock().unwrap().len()
    }
}

impl SysState {
    /// Allocate a work id, two ports and their addresses, persist the
    /// record, and build the packed RPC reply
    /// `pack(port, pack(output_url, inference_url))`.
    fn allocate_unit(&self, unit: &str) -> Result<Vec<u8>> {
        let number = self.counter.fetch_add(1, Ordering::SeqCst);
        let work_id = make_work_id(unit, number);

        let out_port = self.ports.allocate().ok_or(NodeError::PortsExhausted)?;
        let inference_port = match self.ports.allocate() {
            Some(port) => port,
            None => {
                self.ports.release(out_port)?;
                return Err(NodeError::PortsExhausted);
            }
        };

        let output_url = fill_port(&self.unit_format, out_port);
        let inference_url = fill_port(&self.unit_format, inference_port);

        let publisher = match Endpoint::parse(&inference_url)
            .map_err(NodeError::from)
            .and_then(|ep| Link::publish(&ep).map_err(NodeError::from))
        {
            Ok(publisher) => publisher,
            Err(err) => {
                // No partial state on refusal.
                self.ports.release(out_port)?;
                self.ports.release(inference_port)?;
                return Err(err);
            }
        };

        self.store
            .set(work_id.clone(), KvValue::Str(output_url.clone()));
        self.store.set(
            format!("{work_id}.out_port"),
            KvValue::Str(output_url.clone()),
        );
        self.units.lock().unwrap().insert(
            work_id.clone(),
            UnitRecord {
                output_url: output_url.clone(),
                inference_url: inference_url.clone(),
                publisher,
            },
        );

        info!(%work_id, %output_url, %inference_url, "unit registered");
        let inner = pack(output_url.as_bytes(), inference_url.as_bytes())?;
        Ok(pack(out_port.to_string().as_bytes(), &inner)?)
    }

    /// Tear down a unit record: ports are parsed back out of the stored
    /// addresses with the inverse of the template substitution and
    /// returned to the pool, both registry keys are removed.
    fn release_unit(&self, work_id: &str) -> Result<()> {
        let record = self
            .units
            .lock()
            .unwrap()
            .remove(work_id)
            .ok_or_else(|| NodeError::UnknownWorkId(work_id.to_string()))?;

        for url in [&record.output_url, &record.inference_url] {
            match scan_port(&self.unit_format, url) {
                Some(port) => self.ports.release(port)?,
                None => warn!(%url, "address does not match the allocation template"),
            }
        }
        self.store.unset(work_id);
        self.store.unset(&format!("{work_id}.out_port"));
        info!(%work_id, "unit released");
        Ok(())
    }
}
