use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use unitmesh_transport::FabStream;

use crate::codec::{encode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::reader::transport_to_frame_error;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames to any `Write` stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Write a complete frame (blocking).
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(frame.payload.as_ref(), frame.more)
    }

    /// Encode and send a payload, optionally marking more parts to follow.
    pub fn send(&mut self, payload: &[u8], more: bool) -> Result<()> {
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        encode_frame(payload, more, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl FrameWriter<FabStream> {
    /// Create a frame writer for `FabStream` and apply the configured
    /// write timeout.
    pub fn with_config_stream(inner: FabStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }

    /// Shut down the underlying stream, unblocking any reader clone.
    pub fn shutdown(&self) -> Result<()> {
        self.inner.shutdown().map_err(transport_to_frame_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::FrameReader;

    #[test]
    fn payload_over_limit_is_rejected() {
        let config = FrameConfig {
            max_payload_size: 8,
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config(Vec::new(), config);
        assert!(matches!(
            writer.send(b"way too large", false),
            Err(FrameError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn multi_frame_stream() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = FrameWriter::new(left);
        let mut reader = FrameReader::new(right);

        for i in 0..16u32 {
            writer.send(format!("msg-{i}").as_bytes(), false).unwrap();
        }
        for i in 0..16u32 {
            let frame = reader.read_frame().unwrap();
            assert_eq!(frame.payload.as_ref(), format!("msg-{i}").as_bytes());
        }
    }
}
