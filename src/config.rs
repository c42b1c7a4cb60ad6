//! Proxy configuration, loaded from a JSON file.  Every field has a default, so `{}` is a valid
//! configuration.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::packet::VLAN_MAX;

/// How controller-originated FLOW_MOD and PACKET_OUT messages are rewritten on their way to a
/// switch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VlanPolicy {
    /// Insert the connection's VLAN tag into untagged PACKET_OUT frames.
    pub auto_tag_packet_out: bool,
    /// Add `dl_vlan = <connection VLAN>` to FLOW_MOD matches that do not name a VLAN.
    pub auto_tag_flow_mod: bool,
    /// Forward a FLOW_MOD DELETE with no VLAN in its match (the "clear all flows" a controller
    /// sends when it starts).
    pub allow_clear_all_flows: bool,
}

impl Default for VlanPolicy {
    fn default() -> VlanPolicy {
        VlanPolicy {
            auto_tag_packet_out: true,
            auto_tag_flow_mod: true,
            allow_clear_all_flows: false,
        }
    }
}

/// A switch port carrying both tagged traffic and untagged traffic of one implicit VLAN.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HybridPort {
    pub vlan: u16,
    pub handle_untagged: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmocConfig {
    pub switch_listen_addr: String,
    pub management_addr: String,
    pub default_controller_url: Option<String>,
    pub probe_interval_ms: u64,
    pub controller_retry_interval_ms: u64,
    pub read_timeout_ms: u64,
    pub packet_cache_timeout_secs: u64,
    pub vlan_policy: VlanPolicy,
    /// Keyed by switch port number.
    pub hybrid_ports: BTreeMap<u16, HybridPort>,
}

impl Default for VmocConfig {
    fn default() -> VmocConfig {
        VmocConfig {
            switch_listen_addr: "0.0.0.0:6633".to_string(),
            management_addr: "127.0.0.1:7001".to_string(),
            default_controller_url: None,
            probe_interval_ms: 5000,
            controller_retry_interval_ms: 1000,
            read_timeout_ms: 5000,
            packet_cache_timeout_secs: 300,
            vlan_policy: VlanPolicy::default(),
            hybrid_ports: BTreeMap::new(),
        }
    }
}

impl VmocConfig {
    pub fn load(path: &Path) -> Result<VmocConfig, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: VmocConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (&port, hybrid) in &self.hybrid_ports {
            if hybrid.vlan > VLAN_MAX {
                return Err(ConfigError::BadHybridVlan {
                    port,
                    vlan: hybrid.vlan,
                });
            }
        }
        Ok(())
    }

    /// Implicit VLAN of untagged traffic arriving on `port`, if the port is hybrid and handles
    /// untagged frames.
    pub fn untagged_vlan(&self, port: u16) -> Option<u16> {
        self.hybrid_ports
            .get(&port)
            .filter(|h| h.handle_untagged)
            .map(|h| h.vlan)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn controller_retry_interval(&self) -> Duration {
        Duration::from_millis(self.controller_retry_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn packet_cache_timeout(&self) -> Duration {
        Duration::from_secs(self.packet_cache_timeout_secs)
    }
}
