use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, warn};
use unitmesh_link::{unit_call_str, FrameCallback, Link};
use unitmesh_transport::Endpoint;

use crate::envelope::{Envelope, ErrorBody};
use crate::error::{NodeError, Result};
use crate::registry::SYSTEM_UNIT;
use crate::scan::{has_action_key, json_str_get, work_id_num};

/// Business callback invoked with the envelope's `object` and `data`
/// fields.
pub type RouterCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Routing metadata captured from the most recent inspected envelope.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub request_id: String,
    pub work_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SubKey {
    WorkId(u64),
    Url(String),
}

/// Per-unit hub multiplexing one publish link, one retargetable push link
/// and any number of subscribe links keyed by work id or URL.
pub struct ChannelRouter {
    unit_name: String,
    inference_url: String,
    registry_name: String,
    publish: Mutex<Link>,
    push: Mutex<Option<(String, Link)>>,
    subs: Mutex<HashMap<SubKey, Link>>,
    ctx: Mutex<RequestContext>,
    output_enabled: AtomicBool,
    stream_enabled: AtomicBool,
}

impl ChannelRouter {
    /// Create the hub for one registered unit: binds the publish link
    /// immediately, leaves push and subscriptions dynamic.
    pub fn new(publisher_url: &str, inference_url: &str, unit_name: &str) -> Result<Arc<Self>> {
        Self::with_registry(publisher_url, inference_url, unit_name, SYSTEM_UNIT)
    }

    /// [`ChannelRouter::new`] resolving work-id subscriptions against a
    /// registry under a non-default name.
    pub fn with_registry(
        publisher_url: &str,
        inference_url: &str,
        unit_name: &str,
        registry_name: &str,
    ) -> Result<Arc<Self>> {
        let publish = Link::publish(&Endpoint::parse(publisher_url)?)?;
        Ok(Arc::new(Self {
            unit_name: unit_name.to_string(),
            inference_url: inference_url.to_string(),
            registry_name: registry_name.to_string(),
            publish: Mutex::new(publish),
            push: Mutex::new(None),
            subs: Mutex::new(HashMap::new()),
            ctx: Mutex::new(RequestContext::default()),
            output_enabled: AtomicBool::new(true),
            stream_enabled: AtomicBool::new(false),
        }))
    }

    pub fn unit_name(&self) -> &str {
        &self.unit_name
    }

    /// The address the publish link is bound to.
    pub fn publisher_endpoint(&self) -> Endpoint {
        self.publish.lock().unwrap().endpoint().clone()
    }

    pub fn set_output(&self, enabled: bool) {
        self.output_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn output(&self) -> bool {
        self.output_enabled.load(Ordering::SeqCst)
    }

    pub fn set_stream(&self, enabled: bool) {
        self.stream_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn stream(&self) -> bool {
        self.stream_enabled.load(Ordering::SeqCst)
    }

    /// The routing metadata of the last inspected envelope.
    pub fn context(&self) -> RequestContext {
        self.ctx.lock().unwrap().clone()
    }

    /// Subscribe to another unit's output by work id.
    ///
    /// A `name.number` id is resolved through the registry's
    /// `<work_id>.out_port` key — an empty answer fails the
    /// subscription. Any other id subscribes the unit's own inference
    /// address under slot 0. Inbound envelopes pass through the
    /// inspection adapter before `callback`.
    pub fn subscribe_work_id(
        self: &Arc<Self>,
        work_id: &str,
        callback: RouterCallback,
    ) -> Result<()> {
        let (key, url) = match work_id_num(work_id) {
            Some(number) => {
                let answer = unit_call_str(
                    &self.registry_name,
                    "sql_select",
                    &format!("{work_id}.out_port"),
                )?;
                if answer.is_empty() {
                    return Err(NodeError::UnresolvedWorkId(work_id.to_string()));
                }
                (SubKey::WorkId(number), answer)
            }
            None => (SubKey::WorkId(0), self.inference_url.clone()),
        };

        let router = Arc::downgrade(self);
        let adapter: FrameCallback = Arc::new(move |payload| {
            if let Some(router) = Weak::upgrade(&router) {
                router.inspect_inbound(&callback, payload);
            }
        });
        self.install(key, &url, adapter)
    }

    /// Drop the subscription created for `work_id`.
    pub fn unsubscribe_work_id(&self, work_id: &str) {
        let key = SubKey::WorkId(work_id_num(work_id).unwrap_or(0));
        self.subs.lock().unwrap().remove(&key);
    }

    /// Subscribe to an explicit URL with a raw frame callback (no
    /// envelope inspection).
    pub fn subscribe(self: &Arc<Self>, url: &str, callback: FrameCallback) -> Result<()> {
        self.install(SubKey::Url(url.to_string()), url, callback)
    }

    /// Drop the subscription for `url`; an empty key clears every
    /// subscription.
    pub fn unsubscribe(&self, url: &str) {
        let mut subs = self.subs.lock().unwrap();
        if url.is_empty() {
            subs.clear();
        } else {
            subs.remove(&SubKey::Url(url.to_string()));
        }
    }

    fn install(&self, key: SubKey, url: &str, callback: FrameCallback) -> Result<()> {
        // At most one active link per key: release the old one first,
        // never reuse it for the new address.
        if let Some(mut old) = self.subs.lock().unwrap().remove(&key) {
            old.close();
        }
        let link = Link::subscribe(&Endpoint::parse(url)?, callback)?;
        self.subs.lock().unwrap().insert(key, link);
        debug!(unit = %self.unit_name, %url, "subscription installed");
        Ok(())
    }

    /// Envelope inspection: a literal scan for an unescaped `"action"`
    /// key. When present, `zmq_com` retargets the push link and
    /// `request_id`/`work_id` refresh the request context. The business
    /// callback always runs with whatever `object`/`data` extraction
    /// yields.
    fn inspect_inbound(&self, callback: &RouterCallback, payload: Bytes) {
        let raw = String::from_utf8_lossy(payload.as_ref());
        if has_action_key(&raw) {
            if let Some(destination) = json_str_get(&raw, "zmq_com") {
                if !destination.is_empty() {
                    if let Err(err) = self.set_push_url(&destination) {
                        warn!(%destination, %err, "push retarget failed");
                    }
                }
            }
            let mut ctx = self.ctx.lock().unwrap();
            ctx.request_id = json_str_get(&raw, "request_id").unwrap_or_default();
            ctx.work_id = json_str_get(&raw, "work_id").unwrap_or_default();
        }
        let object = json_str_get(&raw, "object").unwrap_or_default();
        let data = json_str_get(&raw, "data").unwrap_or_default();
        callback(&object, &data);
    }

    /// Point the push link at a requester's reply address. The link is
    /// recreated only when the destination actually changes; a link is
    /// never reused across two different addresses.
    pub fn set_push_url(&self, url: &str) -> Result<()> {
        let mut push = self.push.lock().unwrap();
        if push.as_ref().is_some_and(|(current, _)| current == url) {
            return Ok(());
        }
        if let Some((_, mut old)) = push.take() {
            old.close();
        }
        let link = Link::push(&Endpoint::parse(url)?)?;
        *push = Some((url.to_string(), link));
        Ok(())
    }

    /// Drop the push link.
    pub fn clear_push_url(&self) {
        if let Some((_, mut old)) = self.push.lock().unwrap().take() {
            old.close();
        }
    }

    /// Build the standard envelope, always publish it, and additionally
    /// push it to the requester when output is enabled for this channel.
    pub fn send(
        &self,
        object: &str,
        data: Value,
        error: Option<ErrorBody>,
        work_id: Option<&str>,
    ) -> Result<()> {
        let ctx = self.context();
        let work_id = match work_id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => ctx.work_id,
        };
        let line = Envelope::new(ctx.request_id, work_id, object, data, error).to_wire_line()?;

        self.send_raw_to_pub(&line)?;
        if self.output() {
            self.send_raw_to_user(&line)?;
        }
        Ok(())
    }

    /// Publish a raw line to this unit's subscribers.
    pub fn send_raw_to_pub(&self, raw: &str) -> Result<()> {
        self.publish.lock().unwrap().send(raw.as_bytes())?;
        Ok(())
    }

    /// Push a raw line to the current requester. Fails when no push
    /// destination has been set.
    pub fn send_raw_to_user(&self, raw: &str) -> Result<()> {
        match &*self.push.lock().unwrap() {
            Some((_, link)) => {
                link.send(raw.as_bytes())?;
                Ok(())
            }
            None => Err(NodeError::NoPushDestination),
        }
    }

    /// One-shot push of a raw line to an arbitrary address.
    pub fn send_raw_for_url(url: &str, raw: &str) -> Result<()> {
        let link = Link::push(&Endpoint::parse(url)?)?;
        link.send(raw.as_bytes())?;
        Ok(())
    }
}
