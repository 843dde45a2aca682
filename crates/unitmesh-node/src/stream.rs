//! Chunked-stream reassembly.
//!
//! Streaming producers emit JSON chunks of the form
//! `{"index": 0, "delta": "He", "finish": "true"}`; `finish` carries the
//! more-chunks marker (`"true"` = more to come, `"false"` = terminal).
//! Chunks are buffered by index and flushed in ascending order when the
//! terminal chunk arrives.

use std::collections::BTreeMap;

use crate::error::{NodeError, Result};
use crate::scan::json_str_get;

/// Buffered chunks of one logical stream, keyed by index.
#[derive(Debug, Default)]
pub struct StreamBuffer {
    chunks: BTreeMap<u64, String>,
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Feed one raw chunk into the buffer.
///
/// Returns `Ok(Some(assembled))` when the terminal chunk completes the
/// stream (the buffer is cleared), `Ok(None)` while more chunks are
/// expected. Indices must be contiguous from 0 by the time the terminal
/// chunk arrives: a gap abandons the stream — the buffer is cleared and
/// [`NodeError::IndexGap`] returned.
pub fn feed(raw: &str, buffer: &mut StreamBuffer) -> Result<Option<String>> {
    let index: u64 = json_str_get(raw, "index")
        .ok_or_else(|| NodeError::MalformedChunk("missing index".to_string()))?
        .parse()
        .map_err(|_| NodeError::MalformedChunk("index is not a number".to_string()))?;
    let finish = json_str_get(raw, "finish")
        .ok_or_else(|| NodeError::MalformedChunk("missing finish".to_string()))?;
    let delta = json_str_get(raw, "delta").unwrap_or_default();

    buffer.chunks.insert(index, delta);

    if finish.contains('t') {
        return Ok(None); // more chunks expected
    }

    let highest = *buffer
        .chunks
        .keys()
        .next_back()
        .expect("buffer holds at least the chunk just inserted");
    if highest + 1 != buffer.chunks.len() as u64 {
        let have = buffer.chunks.len();
        buffer.chunks.clear();
        return Err(NodeError::IndexGap { have, highest });
    }

    let assembled = std::mem::take(&mut buffer.chunks).into_values().collect();
    Ok(Some(assembled))
}
