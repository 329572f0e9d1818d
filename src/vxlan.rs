//! VXLAN decapsulation
//!
//! Mirrored traffic arrives as UDP datagrams whose payload is a fixed
//! 8-byte VXLAN header (RFC 7348) followed by the original Ethernet frame.
//! Header layout: 1 byte flags, 3 reserved, 3 bytes VNI (big-endian),
//! 1 reserved.

use thiserror::Error;

/// VXLAN header length in bytes
pub const HEADER_LEN: usize = 8;

/// Flag bit that marks the VNI field as valid (RFC 7348 "I" bit)
pub const FLAG_VNI_VALID: u8 = 0x08;

/// Decapsulation failure
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecapError {
    #[error("datagram too short for VXLAN header ({0} bytes)")]
    Truncated(usize),
    #[error("VNI-valid flag not set (flags={0:#04x})")]
    UnsupportedFlags(u8),
}

/// Split a UDP payload into its inner Ethernet frame and VNI.
///
/// Validation is strict: datagrams without the VNI-valid flag are rejected
/// so the error counter separates stray UDP traffic from mirrored frames.
pub fn decapsulate(datagram: &[u8]) -> Result<(&[u8], u32), DecapError> {
    if datagram.len() < HEADER_LEN {
        return Err(DecapError::Truncated(datagram.len()));
    }
    let flags = datagram[0];
    if flags & FLAG_VNI_VALID == 0 {
        return Err(DecapError::UnsupportedFlags(flags));
    }
    let vni = u32::from_be_bytes([0, datagram[4], datagram[5], datagram[6]]);
    Ok((&datagram[HEADER_LEN..], vni))
}

/// Wrap an Ethernet frame in a VXLAN header with the given VNI.
pub fn encapsulate(vni: u32, inner: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + inner.len());
    let vni_be = vni.to_be_bytes();
    out.push(FLAG_VNI_VALID);
    out.extend_from_slice(&[0, 0, 0]);
    out.extend_from_slice(&[vni_be[1], vni_be[2], vni_be[3]]);
    out.push(0);
    out.extend_from_slice(inner);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decapsulate_roundtrip() {
        let inner = b"\x01\x02\x03\x04\x05\x06inner frame bytes";
        let datagram = encapsulate(0x00ab_cdef, inner);

        let (frame, vni) = decapsulate(&datagram).unwrap();
        assert_eq!(frame, inner);
        assert_eq!(vni, 0x00ab_cdef);
    }

    #[test]
    fn test_decapsulate_max_vni() {
        let datagram = encapsulate(0x00ff_ffff, b"x");
        let (_, vni) = decapsulate(&datagram).unwrap();
        assert_eq!(vni, 0x00ff_ffff);
    }

    #[test]
    fn test_decapsulate_truncated() {
        assert_eq!(decapsulate(&[0x08, 0, 0]), Err(DecapError::Truncated(3)));
        assert_eq!(decapsulate(&[]), Err(DecapError::Truncated(0)));
    }

    #[test]
    fn test_decapsulate_rejects_missing_vni_flag() {
        let mut datagram = encapsulate(7, b"payload");
        datagram[0] = 0x00;
        assert_eq!(
            decapsulate(&datagram),
            Err(DecapError::UnsupportedFlags(0x00))
        );
    }

    #[test]
    fn test_decapsulate_empty_inner() {
        let datagram = encapsulate(1, b"");
        let (frame, vni) = decapsulate(&datagram).unwrap();
        assert!(frame.is_empty());
        assert_eq!(vni, 1);
    }
}
