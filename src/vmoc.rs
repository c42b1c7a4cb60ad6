use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

use tracing::info;

use crate::config::VmocConfig;
use crate::error::{RegistryError, Result};
use crate::management_interface;
use crate::ofp_controller::{self, OfpController, SwitchSink};
use crate::openflow0x01::SwitchFeatures;
use crate::slice_registry::{SliceConfiguration, SliceRegistry};
use crate::switch_connection::{SwitchConnection, SwitchEvent};
use crate::switch_controller_map::SwitchControllerMap;

/// The proxy: a controller to physical switches, a switch to tenant controllers.
pub struct Vmoc {
    config: Arc<VmocConfig>,
    registry: Arc<SliceRegistry>,
    map: Arc<SwitchControllerMap>,
}

impl Vmoc {
    pub fn new(config: VmocConfig) -> Vmoc {
        let config = Arc::new(config);
        let registry = Arc::new(SliceRegistry::new());
        let map = SwitchControllerMap::new(registry.clone(), config.clone());
        Vmoc {
            config,
            registry,
            map,
        }
    }

    pub fn config(&self) -> &VmocConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SliceRegistry> {
        &self.registry
    }

    pub fn map(&self) -> &Arc<SwitchControllerMap> {
        &self.map
    }

    /// Registers or re-registers a slice and connects its controllers to every switch.  VLANs
    /// without a controller URL get the default one, if configured.  On error nothing changes.
    pub fn register_slice(&self, mut config: SliceConfiguration) -> Result<(), RegistryError> {
        if let Some(ref default_url) = self.config.default_controller_url {
            for vc in &mut config.vlan_configs {
                if vc.controller_url.is_none() {
                    vc.controller_url = Some(default_url.clone());
                }
            }
        }
        let previous = self.registry.lookup_by_slice_id(&config.slice_id);
        self.registry.register(config.clone())?;
        if let Some(previous) = previous {
            self.map.remove_controllers_for_vlans(previous.vlans());
        }
        for (url, vlan) in config.controllers() {
            self.map.add_controller(url, vlan);
        }
        Ok(())
    }

    /// Forgets the slice, then closes its controller connections.
    pub fn unregister_slice(&self, slice_id: &str) -> Result<(), RegistryError> {
        let config = self.registry.unregister(slice_id)?;
        self.map.remove_controllers_for_slice(&config);
        Ok(())
    }

    pub fn dump(&self) -> String {
        format!("{}{}", self.registry.dump(), self.map.dump())
    }

    /// Binds the management and switch listeners and serves both until the switch listener
    /// fails.
    pub fn run(self: Arc<Self>) -> Result<()> {
        let management = TcpListener::bind(&self.config.management_addr)?;
        let switches = TcpListener::bind(&self.config.switch_listen_addr)?;
        self.run_with(management, switches)
    }

    /// Like `run`, with listeners the caller has already bound.
    pub fn run_with(self: Arc<Self>, management: TcpListener, switches: TcpListener) -> Result<()> {
        info!(
            management = %management.local_addr()?,
            switches = %switches.local_addr()?,
            "vmoc starting"
        );
        let vmoc = self.clone();
        thread::Builder::new()
            .name("management".to_string())
            .spawn(move || management_interface::serve(&vmoc, management))?;
        let read_timeout = self.config.read_timeout();
        ofp_controller::serve(self, switches, read_timeout)?;
        Ok(())
    }
}

impl OfpController for Vmoc {
    fn switch_connected(
        &self,
        sink: Box<dyn SwitchSink>,
        features: SwitchFeatures,
        features_body: Vec<u8>,
    ) -> Arc<SwitchConnection> {
        let switch = Arc::new(SwitchConnection::new(
            self.map.next_id(),
            features,
            features_body,
            sink,
            self.config.clone(),
        ));
        self.map.add_switch(switch.clone());
        switch
    }

    fn switch_event(&self, switch: &Arc<SwitchConnection>, event: SwitchEvent) {
        switch.handle_event(&self.map, event)
    }
}
