//! The fixed two-slot parameter codec used by RPC payloads.
//!
//! Wire layout: `[len(param0): 1 byte][param0 bytes][param1 bytes]`.
//! This is a degenerate two-field record, not a general tuple codec:
//! slot 0 is the length-prefixed first field, any other index yields the
//! remainder of the buffer.

use crate::error::{FrameError, Result};

/// Pack two values into one buffer.
///
/// `param0` must fit the one-byte length prefix; longer inputs are an
/// error rather than a silent truncation.
pub fn pack(param0: &[u8], param1: &[u8]) -> Result<Vec<u8>> {
    if param0.len() > u8::MAX as usize {
        return Err(FrameError::ParamTooLong(param0.len()));
    }
    let mut out = Vec::with_capacity(1 + param0.len() + param1.len());
    out.push(param0.len() as u8);
    out.extend_from_slice(param0);
    out.extend_from_slice(param1);
    Ok(out)
}

/// Extract a slot from a packed buffer.
///
/// Index 0 yields `param0`; any other index yields `param1` (the
/// remainder). A buffer shorter than its own length prefix claims is an
/// error.
pub fn unpack(buf: &[u8], index: usize) -> Result<&[u8]> {
    let len0 = *buf.first().ok_or(FrameError::ParamTruncated {
        need: 1,
        have: 0,
    })? as usize;
    if buf.len() < 1 + len0 {
        return Err(FrameError::ParamTruncated {
            need: 1 + len0,
            have: buf.len(),
        });
    }
    if index == 0 {
        Ok(&buf[1..1 + len0])
    } else {
        Ok(&buf[1 + len0..])
    }
}

/// [`unpack`] for text slots.
pub fn unpack_str(buf: &[u8], index: usize) -> Result<&str> {
    Ok(std::str::from_utf8(unpack(buf, index)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let packed = pack(b"hello", b"world").unwrap();
        assert_eq!(packed[0], 5);
        assert_eq!(unpack(&packed, 0).unwrap(), b"hello");
        assert_eq!(unpack(&packed, 1).unwrap(), b"world");
    }

    #[test]
    fn roundtrip_across_lengths() {
        for len0 in [0usize, 1, 17, 255] {
            let param0 = vec![b'a'; len0];
            let param1 = b"remainder \x00 bytes".to_vec();
            let packed = pack(&param0, &param1).unwrap();
            assert_eq!(unpack(&packed, 0).unwrap(), param0.as_slice());
            assert_eq!(unpack(&packed, 1).unwrap(), param1.as_slice());
        }
    }

    #[test]
    fn any_nonzero_index_yields_remainder() {
        let packed = pack(b"a", b"bc").unwrap();
        assert_eq!(unpack(&packed, 1).unwrap(), b"bc");
        assert_eq!(unpack(&packed, 7).unwrap(), b"bc");
    }

    #[test]
    fn empty_param1() {
        let packed = pack(b"only", b"").unwrap();
        assert_eq!(unpack(&packed, 0).unwrap(), b"only");
        assert_eq!(unpack(&packed, 1).unwrap(), b"");
    }

    #[test]
    fn oversized_param0_is_rejected() {
        let too_long = vec![0u8; 256];
        assert!(matches!(
            pack(&too_long, b""),
            Err(FrameError::ParamTooLong(256))
        ));
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        assert!(matches!(
            unpack(&[], 0),
            Err(FrameError::ParamTruncated { .. })
        ));
        // Claims 10 bytes of param0 but only carries 3.
        assert!(matches!(
            unpack(&[10, b'a', b'b', b'c'], 0),
            Err(FrameError::ParamTruncated { need: 11, have: 4 })
        ));
    }

    #[test]
    fn nested_pack() {
        // The registry reply nests a pack inside slot 1.
        let inner = pack(b"tcp://*:5001", b"tcp://*:5002").unwrap();
        let outer = pack(b"5001", &inner).unwrap();
        assert_eq!(unpack_str(&outer, 0).unwrap(), "5001");
        let inner_out = unpack(&outer, 1).unwrap();
        assert_eq!(unpack_str(inner_out, 0).unwrap(), "tcp://*:5001");
        assert_eq!(unpack_str(inner_out, 1).unwrap(), "tcp://*:5002");
    }
}
