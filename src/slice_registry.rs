//! Which slice owns which VLAN, and which controller speaks for it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write as _};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::RegistryError;
use crate::packet::VLAN_MAX;

/// A VLAN owned by a slice and the controller for it, if the tenant has supplied one.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VlanConfiguration {
    #[serde(alias = "vlan")]
    pub vlan_tag: u16,
    #[serde(default)]
    pub controller_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceConfiguration {
    pub slice_id: String,
    #[serde(alias = "vlan_configurations")]
    pub vlan_configs: Vec<VlanConfiguration>,
}

impl SliceConfiguration {
    pub fn new(slice_id: &str, vlan_configs: Vec<VlanConfiguration>) -> SliceConfiguration {
        SliceConfiguration {
            slice_id: slice_id.to_string(),
            vlan_configs,
        }
    }

    pub fn vlans(&self) -> impl Iterator<Item = u16> + '_ {
        self.vlan_configs.iter().map(|vc| vc.vlan_tag)
    }

    /// Does this slice map `vlan` to `url`?
    pub fn contains(&self, url: &str, vlan: u16) -> bool {
        self.vlan_configs
            .iter()
            .any(|vc| vc.vlan_tag == vlan && vc.controller_url.as_deref() == Some(url))
    }

    /// `(url, vlan)` for every VLAN that has a controller.
    pub fn controllers(&self) -> impl Iterator<Item = (&str, u16)> + '_ {
        self.vlan_configs
            .iter()
            .filter_map(|vc| vc.controller_url.as_deref().map(|url| (url, vc.vlan_tag)))
    }
}

impl fmt::Display for SliceConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} [", self.slice_id)?;
        for (i, vc) in self.vlan_configs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match vc.controller_url {
                Some(ref url) => write!(f, "{} -> {}", vc.vlan_tag, url)?,
                None => write!(f, "{} -> (none)", vc.vlan_tag)?,
            }
        }
        write!(f, "]")
    }
}

#[derive(Default)]
struct Indices {
    by_slice_id: BTreeMap<String, SliceConfiguration>,
    by_vlan: BTreeMap<u16, String>,
    by_url: BTreeMap<String, BTreeSet<String>>,
}

/// Slice registry.  One lock guards every index; lookups return clones so callers never hold
/// it.
#[derive(Default)]
pub struct SliceRegistry {
    inner: Mutex<Indices>,
}

impl SliceRegistry {
    pub fn new() -> SliceRegistry {
        SliceRegistry::default()
    }

    fn lock(&self) -> MutexGuard<'_, Indices> {
        // A panic while holding the lock leaves the indices as they were before the panicking
        // operation started mutating, since every mutation validates first.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stores `config`, replacing any earlier configuration of the same slice.  Fails without
    /// changing anything if one of its VLANs is not a 12-bit VLAN id, belongs to another slice
    /// or is listed twice.
    pub fn register(&self, config: SliceConfiguration) -> Result<(), RegistryError> {
        let mut idx = self.lock();
        let mut seen = BTreeSet::new();
        for vlan in config.vlans() {
            if vlan > VLAN_MAX {
                let err = RegistryError::VlanOutOfRange {
                    slice_id: config.slice_id.clone(),
                    vlan,
                };
                error!("{}", err);
                return Err(err);
            }
            if !seen.insert(vlan) {
                let err = RegistryError::DuplicateVlan {
                    slice_id: config.slice_id.clone(),
                    vlan,
                };
                error!("{}", err);
                return Err(err);
            }
            if let Some(owner) = idx.by_vlan.get(&vlan) {
                if *owner != config.slice_id {
                    let err = RegistryError::VlanInUse {
                        vlan,
                        owner: owner.clone(),
                        slice_id: config.slice_id.clone(),
                    };
                    error!("{}", err);
                    return Err(err);
                }
            }
        }
        if let Some(old) = idx.by_slice_id.remove(&config.slice_id) {
            debug!(slice = %old.slice_id, "replacing registration");
            Indices::forget(&mut idx, &old);
        }
        for vlan in config.vlans() {
            idx.by_vlan.insert(vlan, config.slice_id.clone());
        }
        for (url, _) in config.controllers() {
            idx.by_url
                .entry(url.to_string())
                .or_default()
                .insert(config.slice_id.clone());
        }
        info!(slice = %config, "slice registered");
        idx.by_slice_id.insert(config.slice_id.clone(), config);
        Ok(())
    }

    pub fn unregister(&self, slice_id: &str) -> Result<SliceConfiguration, RegistryError> {
        let mut idx = self.lock();
        match idx.by_slice_id.remove(slice_id) {
            Some(old) => {
                Indices::forget(&mut idx, &old);
                info!(slice = %slice_id, "slice unregistered");
                Ok(old)
            }
            None => {
                let err = RegistryError::UnknownSlice(slice_id.to_string());
                error!("{}", err);
                Err(err)
            }
        }
    }

    pub fn is_registered(&self, config: &SliceConfiguration) -> bool {
        self.lock().by_slice_id.contains_key(&config.slice_id)
    }

    pub fn lookup_by_controller_url(&self, url: &str) -> Vec<SliceConfiguration> {
        let idx = self.lock();
        idx.by_url
            .get(url)
            .into_iter()
            .flatten()
            .filter_map(|id| idx.by_slice_id.get(id).cloned())
            .collect()
    }

    pub fn lookup_by_slice_id(&self, slice_id: &str) -> Option<SliceConfiguration> {
        self.lock().by_slice_id.get(slice_id).cloned()
    }

    pub fn lookup_by_vlan(&self, vlan: u16) -> Option<SliceConfiguration> {
        let idx = self.lock();
        idx.by_vlan
            .get(&vlan)
            .and_then(|id| idx.by_slice_id.get(id).cloned())
    }

    /// Is `vlan` currently mapped to the controller at `url`?
    pub fn maps(&self, vlan: u16, url: &str) -> bool {
        let idx = self.lock();
        idx.by_vlan
            .get(&vlan)
            .and_then(|id| idx.by_slice_id.get(id))
            .map_or(false, |config| config.contains(url, vlan))
    }

    pub fn slice_configs(&self) -> Vec<SliceConfiguration> {
        self.lock().by_slice_id.values().cloned().collect()
    }

    pub fn dump(&self) -> String {
        let idx = self.lock();
        let mut out = String::from("Slice registry:\n");
        for config in idx.by_slice_id.values() {
            let _ = writeln!(out, "  {}", config);
        }
        for (url, slices) in &idx.by_url {
            let ids: Vec<&str> = slices.iter().map(String::as_str).collect();
            let _ = writeln!(out, "  {}: {}", url, ids.join(" "));
        }
        for (vlan, slice_id) in &idx.by_vlan {
            let _ = writeln!(out, "  vlan {}: {}", vlan, slice_id);
        }
        out
    }
}

impl Indices {
    fn forget(idx: &mut Indices, old: &SliceConfiguration) {
        for vlan in old.vlans() {
            idx.by_vlan.remove(&vlan);
        }
        for (url, _) in old.controllers() {
            if let Some(slices) = idx.by_url.get_mut(url) {
                slices.remove(&old.slice_id);
                if slices.is_empty() {
                    idx.by_url.remove(url);
                }
            }
        }
    }
}
