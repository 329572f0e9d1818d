//! Flow identification
//!
//! Maps decapsulated frames onto per-tenant flow keys and hosts the
//! window store that accumulates per-flow observations.
//!
//! A flow is `(tenant, src, dst, proto, src_port, dst_port)`. The tenant
//! comes from the VXLAN VNI through a pluggable [`TenantMapper`]; inner
//! frames without a recognized IP layer collapse onto a per-tenant
//! sentinel key instead of being dropped.

pub mod window;

pub use window::WindowStore;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::frame::{InnerPayload, Transport};

/// Sentinel used for address and protocol fields of non-IP flows
pub const NONIP: &str = "NONIP";

/// Identity of one mirrored traffic stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    pub tenant: String,
    pub src: String,
    pub dst: String,
    pub proto: String,
    pub src_port: u16,
    pub dst_port: u16,
}

impl FlowKey {
    /// Derive the key for a parsed inner frame. Never fails: frames without
    /// a usable network layer map to the sentinel key, since mis-keying a
    /// malformed frame is preferable to losing it.
    pub fn derive(payload: &InnerPayload, tenant: &str) -> Self {
        match payload {
            InnerPayload::NonIp => Self::non_ip(tenant),
            InnerPayload::Ipv4 {
                src,
                dst,
                protocol,
                transport,
            } => {
                let (proto, src_port, dst_port) = match transport {
                    Transport::Tcp { src_port, dst_port } => {
                        ("TCP".to_string(), *src_port, *dst_port)
                    }
                    Transport::Udp { src_port, dst_port } => {
                        ("UDP".to_string(), *src_port, *dst_port)
                    }
                    Transport::Other => (format!("P{}", protocol), 0, 0),
                };
                Self {
                    tenant: tenant.to_string(),
                    src: src.to_string(),
                    dst: dst.to_string(),
                    proto,
                    src_port,
                    dst_port,
                }
            }
        }
    }

    /// Sentinel key for frames with no recognized network layer
    pub fn non_ip(tenant: &str) -> Self {
        Self {
            tenant: tenant.to_string(),
            src: NONIP.to_string(),
            dst: NONIP.to_string(),
            proto: NONIP.to_string(),
            src_port: 0,
            dst_port: 0,
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{} -> {}:{} ({})",
            self.tenant, self.src, self.src_port, self.dst, self.dst_port, self.proto
        )
    }
}

/// Maps a VXLAN VNI onto a tenant identifier.
///
/// Production deployments resolve the VNI against a tenant registry; the
/// default mapper just formats the VNI.
pub trait TenantMapper: Send + Sync {
    fn tenant_for(&self, vni: u32) -> String;
}

/// Default mapping: `TENANT#<vni>`
#[derive(Debug, Default, Clone, Copy)]
pub struct VniTenantMapper;

impl TenantMapper for VniTenantMapper {
    fn tenant_for(&self, vni: u32) -> String {
        format!("TENANT#{}", vni)
    }
}
