//! Work-unit registry, channel router and control-event plumbing.
//!
//! This is the "unit side" of the fabric: the system service that
//! allocates work identifiers and addresses ([`registry`]), the per-unit
//! hub that fans messages across publish/push/subscribe links
//! ([`router`]), the single-consumer queue that orders control callbacks
//! ([`events`]) and the chunked-stream reassembler ([`stream`]).

pub mod envelope;
pub mod error;
pub mod events;
pub mod registry;
pub mod router;
pub mod scan;
pub mod store;
pub mod stream;

pub use envelope::{codes, Envelope, ErrorBody};
pub use error::{NodeError, Result};
pub use events::{ControlContext, ControlEvent, UnitFlow, UnitHandler};
pub use registry::{RegistryConfig, SystemService, SYSTEM_UNIT};
pub use router::{ChannelRouter, RequestContext, RouterCallback};
pub use scan::{json_str_get, make_work_id, work_id_name, work_id_num};
pub use store::{KvStore, KvValue, PortPool};
pub use stream::{feed, StreamBuffer};
