//! Inner frame parsing
//!
//! Decapsulated VXLAN payloads carry the mirrored Ethernet frame. This
//! module decodes it into an explicit sum type: either an IPv4 packet with
//! an optional TCP/UDP transport header, or a non-IP frame (ARP, IPv6,
//! truncated garbage). Parsing never fails; unrecognized frames degrade to
//! [`InnerPayload::NonIp`] so a single malformed frame cannot drop
//! telemetry.

use std::net::Ipv4Addr;

use etherparse::{InternetSlice, SlicedPacket, TransportSlice};

/// Transport header of an IPv4 inner frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp { src_port: u16, dst_port: u16 },
    Udp { src_port: u16, dst_port: u16 },
    /// IP protocol without port semantics (ICMP, GRE, ...)
    Other,
}

/// Decoded inner frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InnerPayload {
    /// No recognized network layer
    NonIp,
    Ipv4 {
        src: Ipv4Addr,
        dst: Ipv4Addr,
        /// IP protocol number
        protocol: u8,
        transport: Transport,
    },
}

/// Parse an inner Ethernet frame.
pub fn parse_inner(frame: &[u8]) -> InnerPayload {
    let sliced = match SlicedPacket::from_ethernet(frame) {
        Ok(sliced) => sliced,
        Err(_) => return InnerPayload::NonIp,
    };

    let ipv4 = match &sliced.net {
        Some(InternetSlice::Ipv4(ipv4)) => ipv4.header(),
        _ => return InnerPayload::NonIp,
    };

    let transport = match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => Transport::Tcp {
            src_port: tcp.source_port(),
            dst_port: tcp.destination_port(),
        },
        Some(TransportSlice::Udp(udp)) => Transport::Udp {
            src_port: udp.source_port(),
            dst_port: udp.destination_port(),
        },
        _ => Transport::Other,
    };

    InnerPayload::Ipv4 {
        src: ipv4.source_addr(),
        dst: ipv4.destination_addr(),
        protocol: ipv4.protocol().0,
        transport,
    }
}
