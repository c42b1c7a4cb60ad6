//! Join table between physical switches and the controller connections opened on their
//! behalf, and the machinery that opens and re-opens those connections.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;

use tracing::{debug, error, info, warn};

use crate::config::VmocConfig;
use crate::controller_connection::{resolve_controller_url, ControllerConnection, ControllerId};
use crate::slice_registry::{SliceConfiguration, SliceRegistry};
use crate::switch_connection::{SwitchConnection, SwitchId};

#[derive(Default)]
struct MapState {
    switches: BTreeMap<SwitchId, Arc<SwitchConnection>>,
    controllers: BTreeMap<ControllerId, Arc<ControllerConnection>>,
    controllers_by_switch: BTreeMap<SwitchId, BTreeSet<ControllerId>>,
    controllers_by_vlan: BTreeMap<u16, BTreeSet<ControllerId>>,
    switch_by_controller: BTreeMap<ControllerId, SwitchId>,
    /// Connection attempts in progress, by (switch, vlan, url).
    connecting: BTreeSet<(SwitchId, u16, String)>,
}

impl MapState {
    fn has_controller(&self, switch: SwitchId, vlan: u16) -> bool {
        self.controllers_by_switch
            .get(&switch)
            .into_iter()
            .flatten()
            .filter_map(|id| self.controllers.get(id))
            .any(|c| c.vlan() == vlan)
    }

    fn unlink(&mut self, id: ControllerId) -> Option<Arc<ControllerConnection>> {
        let conn = self.controllers.remove(&id)?;
        if let Some(switch) = self.switch_by_controller.remove(&id) {
            if let Some(ids) = self.controllers_by_switch.get_mut(&switch) {
                ids.remove(&id);
            }
        }
        if let Some(ids) = self.controllers_by_vlan.get_mut(&conn.vlan()) {
            ids.remove(&id);
            if ids.is_empty() {
                self.controllers_by_vlan.remove(&conn.vlan());
            }
        }
        Some(conn)
    }
}

pub struct SwitchControllerMap {
    registry: Arc<SliceRegistry>,
    config: Arc<VmocConfig>,
    state: Mutex<MapState>,
    next_id: AtomicU64,
    this: Weak<SwitchControllerMap>,
}

impl SwitchControllerMap {
    pub fn new(registry: Arc<SliceRegistry>, config: Arc<VmocConfig>) -> Arc<SwitchControllerMap> {
        Arc::new_cyclic(|this| SwitchControllerMap {
            registry,
            config,
            state: Mutex::new(MapState::default()),
            next_id: AtomicU64::new(1),
            this: this.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, MapState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A fresh id for a switch or controller connection.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Adds a switch and starts connecting it to every registered controller.
    pub fn add_switch(&self, switch: Arc<SwitchConnection>) {
        info!(switch = %switch, "adding switch");
        {
            let mut state = self.lock();
            state.controllers_by_switch.entry(switch.id()).or_default();
            state.switches.insert(switch.id(), switch.clone());
        }
        for config in self.registry.slice_configs() {
            for (url, vlan) in config.controllers() {
                self.connect(&switch, url, vlan);
            }
        }
    }

    /// Removes a switch and every controller connection paired with it.  With
    /// `close_controllers` their sockets are closed too.
    pub fn remove_switch(&self, switch: SwitchId, close_controllers: bool) -> Vec<Arc<ControllerConnection>> {
        let removed: Vec<Arc<ControllerConnection>> = {
            let mut state = self.lock();
            state.switches.remove(&switch);
            let ids = state.controllers_by_switch.remove(&switch).unwrap_or_default();
            ids.into_iter().filter_map(|id| state.unlink(id)).collect()
        };
        debug!(switch, controllers = removed.len(), "switch removed");
        if close_controllers {
            for conn in &removed {
                conn.close();
            }
        }
        removed
    }

    /// Connects `url` for `vlan` on every switch.
    pub fn add_controller(&self, url: &str, vlan: u16) {
        let switches: Vec<Arc<SwitchConnection>> = self.lock().switches.values().cloned().collect();
        debug!(url, vlan, switches = switches.len(), "adding controller");
        for switch in switches {
            self.connect(&switch, url, vlan);
        }
    }

    /// Removes a controller connection from every index.  Removing it twice is harmless.
    pub fn remove_controller(&self, id: ControllerId) -> Option<Arc<ControllerConnection>> {
        let removed = self.lock().unlink(id);
        if let Some(ref conn) = removed {
            debug!(controller = %conn, "controller removed");
        }
        removed
    }

    /// Removes and closes every controller connection for a VLAN of `config`.  Called after the
    /// slice has left the registry, so no new connection for it can be installed.
    pub fn remove_controllers_for_slice(&self, config: &SliceConfiguration) -> Vec<Arc<ControllerConnection>> {
        let removed = self.remove_controllers_for_vlans(config.vlans());
        debug!(slice = %config.slice_id, controllers = removed.len(), "slice controllers removed");
        removed
    }

    pub fn remove_controllers_for_vlans<I>(&self, vlans: I) -> Vec<Arc<ControllerConnection>>
    where
        I: IntoIterator<Item = u16>,
    {
        let removed: Vec<Arc<ControllerConnection>> = {
            let mut state = self.lock();
            let ids: Vec<ControllerId> = vlans
                .into_iter()
                .filter_map(|vlan| state.controllers_by_vlan.get(&vlan))
                .flatten()
                .cloned()
                .collect();
            ids.into_iter().filter_map(|id| state.unlink(id)).collect()
        };
        for conn in &removed {
            conn.close();
        }
        removed
    }

    pub fn lookup_controllers_for_switch(&self, switch: SwitchId) -> Vec<Arc<ControllerConnection>> {
        let state = self.lock();
        state
            .controllers_by_switch
            .get(&switch)
            .into_iter()
            .flatten()
            .filter_map(|id| state.controllers.get(id).cloned())
            .collect()
    }

    pub fn lookup_controllers_for_vlan(&self, vlan: u16) -> Vec<Arc<ControllerConnection>> {
        let state = self.lock();
        state
            .controllers_by_vlan
            .get(&vlan)
            .into_iter()
            .flatten()
            .filter_map(|id| state.controllers.get(id).cloned())
            .collect()
    }

    pub fn lookup_switch_for_controller(&self, controller: ControllerId) -> Option<Arc<SwitchConnection>> {
        let state = self.lock();
        state
            .switch_by_controller
            .get(&controller)
            .and_then(|sw| state.switches.get(sw).cloned())
    }

    pub fn switches(&self) -> Vec<Arc<SwitchConnection>> {
        self.lock().switches.values().cloned().collect()
    }

    /// Called by a controller connection's receive loop when it ends.  Unless the connection
    /// was closed on purpose, it is re-established while the registry still maps its VLAN to
    /// its URL.
    pub fn controller_lost(&self, conn: &Arc<ControllerConnection>) {
        self.remove_controller(conn.id());
        if conn.was_closed() {
            return;
        }
        if !self.registry.maps(conn.vlan(), conn.url()) {
            debug!(controller = %conn, "mapping gone, not reconnecting");
            return;
        }
        let switch = self.lock().switches.get(&conn.switch().id()).cloned();
        match switch {
            Some(switch) => {
                info!(controller = %conn, "reconnecting");
                self.connect(&switch, conn.url(), conn.vlan());
            }
            None => debug!(controller = %conn, "switch gone, not reconnecting"),
        }
    }

    /// Starts a connection attempt unless one is already running or the switch already has a
    /// controller for `vlan`.
    fn connect(&self, switch: &Arc<SwitchConnection>, url: &str, vlan: u16) {
        let map = match self.this.upgrade() {
            Some(map) => map,
            None => return,
        };
        let key = (switch.id(), vlan, url.to_string());
        {
            let mut state = self.lock();
            if state.has_controller(switch.id(), vlan) || !state.connecting.insert(key.clone()) {
                debug!(switch = %switch, url, vlan, "already connected or connecting");
                return;
            }
        }
        let switch = switch.clone();
        let spawned = thread::Builder::new()
            .name(format!("connect-{}-{}", vlan, switch.id()))
            .spawn(move || {
                map.establish(&switch, &key.2, vlan);
                map.lock().connecting.remove(&key);
            });
        if let Err(e) = spawned {
            error!(url, vlan, error = %e, "cannot start connection thread");
        }
    }

    /// Polls the controller until it accepts a connection, then installs it.  Gives up when
    /// the registry no longer maps `vlan` to `url` or the switch goes away.
    fn establish(self: &Arc<Self>, switch: &Arc<SwitchConnection>, url: &str, vlan: u16) {
        let retry = self.config.controller_retry_interval();
        let mut reported = false;
        loop {
            if !self.registry.maps(vlan, url) {
                debug!(url, vlan, "mapping withdrawn, abandoning connection attempt");
                return;
            }
            if !self.lock().switches.contains_key(&switch.id()) {
                debug!(url, vlan, switch = %switch, "switch gone, abandoning connection attempt");
                return;
            }
            let addr = match resolve_controller_url(url) {
                Ok(addr) => addr,
                Err(e) => {
                    error!(url, vlan, error = %e, "bad controller URL");
                    return;
                }
            };
            let stream = addr.and_then(|addr| TcpStream::connect_timeout(&addr, retry).ok());
            match stream {
                Some(stream) => {
                    self.install(switch, url, vlan, stream);
                    return;
                }
                None => {
                    if !reported {
                        info!(url, vlan, "controller unreachable, retrying");
                        reported = true;
                    }
                    thread::sleep(retry);
                }
            }
        }
    }

    fn install(self: &Arc<Self>, switch: &Arc<SwitchConnection>, url: &str, vlan: u16, stream: TcpStream) {
        let opened = ControllerConnection::open(
            self.next_id(),
            url,
            vlan,
            switch.clone(),
            self.config.vlan_policy.clone(),
            stream,
            self.config.read_timeout(),
        );
        let (conn, reader) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                warn!(url, vlan, error = %e, "cannot set up controller connection");
                return;
            }
        };
        {
            // Lock order is map, then registry.  An unregister that lands after this check
            // finds the connection in the index and closes it.
            let mut state = self.lock();
            if !self.registry.maps(vlan, url) {
                drop(state);
                info!(url, vlan, "mapping changed while connecting, dropping connection");
                conn.close();
                return;
            }
            if !state.switches.contains_key(&switch.id()) || state.has_controller(switch.id(), vlan) {
                drop(state);
                conn.close();
                return;
            }
            state.controllers.insert(conn.id(), conn.clone());
            state
                .controllers_by_switch
                .entry(switch.id())
                .or_default()
                .insert(conn.id());
            state.controllers_by_vlan.entry(vlan).or_default().insert(conn.id());
            state.switch_by_controller.insert(conn.id(), switch.id());
        }
        if let Err(e) = conn.hello() {
            warn!(controller = %conn, error = %e, "controller handshake failed");
            self.remove_controller(conn.id());
            conn.close();
            return;
        }
        let map = self.clone();
        let receiver = conn.clone();
        let spawned = thread::Builder::new()
            .name(format!("controller-{}", conn.id()))
            .spawn(move || receiver.run(reader, &map));
        if let Err(e) = spawned {
            error!(controller = %conn, error = %e, "cannot start receive thread");
            self.remove_controller(conn.id());
            conn.close();
        }
    }

    pub fn dump(&self) -> String {
        let state = self.lock();
        let mut out = String::from("Switch-controller map:\n  Switches:\n");
        for (id, switch) in &state.switches {
            let _ = writeln!(out, "    {}", switch);
            for cid in state.controllers_by_switch.get(id).into_iter().flatten() {
                if let Some(conn) = state.controllers.get(cid) {
                    let _ = writeln!(out, "      {}", conn);
                }
            }
        }
        out.push_str("  VLANs:\n");
        for (vlan, ids) in &state.controllers_by_vlan {
            let _ = writeln!(out, "    {}: {} controller(s)", vlan, ids.len());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slice_registry::VlanConfiguration;
    use crate::switch_connection::tests::switch;
    use std::io::Read;
    use std::net::TcpListener;
    use std::time::{Duration, Instant};

    fn fast_config() -> VmocConfig {
        VmocConfig {
            controller_retry_interval_ms: 20,
            read_timeout_ms: 50,
            ..VmocConfig::default()
        }
    }

    fn wait_until<F: Fn() -> bool>(cond: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn slice(id: &str, vlan: u16, url: &str) -> SliceConfiguration {
        SliceConfiguration::new(
            id,
            vec![VlanConfiguration {
                vlan_tag: vlan,
                controller_url: Some(url.to_string()),
            }],
        )
    }

    #[test]
    fn switch_without_slices_has_no_controllers() {
        let registry = Arc::new(SliceRegistry::new());
        let map = SwitchControllerMap::new(registry, Arc::new(fast_config()));
        let (sw, _) = switch(map.next_id(), 1, fast_config());
        let sw = Arc::new(sw);
        map.add_switch(sw.clone());
        assert_eq!(map.switches().len(), 1);
        assert!(map.lookup_controllers_for_switch(sw.id()).is_empty());
        assert!(map.remove_switch(sw.id(), true).is_empty());
        assert!(map.switches().is_empty());
    }

    #[test]
    fn connects_registered_controller_and_tears_down() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("tcp:127.0.0.1:{}", listener.local_addr().unwrap().port());
        let registry = Arc::new(SliceRegistry::new());
        registry.register(slice("a", 100, &url)).unwrap();
        let map = SwitchControllerMap::new(registry, Arc::new(fast_config()));
        let (sw, _) = switch(map.next_id(), 1, fast_config());
        let sw = Arc::new(sw);
        map.add_switch(sw.clone());

        let (_peer, _) = listener.accept().unwrap();
        assert!(wait_until(|| map.lookup_controllers_for_switch(sw.id()).len() == 1));
        let conn = map.lookup_controllers_for_switch(sw.id()).remove(0);
        assert_eq!(conn.dpid(), (100 << 48) | 1);
        assert_eq!(map.lookup_controllers_for_vlan(100).len(), 1);
        assert_eq!(map.lookup_switch_for_controller(conn.id()).map(|s| s.id()), Some(sw.id()));

        let removed = map.remove_switch(sw.id(), true);
        assert_eq!(removed.len(), 1);
        assert!(removed[0].was_closed());
        assert!(map.lookup_controllers_for_switch(sw.id()).is_empty());
        assert!(map.lookup_controllers_for_vlan(100).is_empty());
        assert!(map.lookup_switch_for_controller(conn.id()).is_none());
        // second removal is a no-op
        assert!(map.remove_controller(conn.id()).is_none());
    }

    #[test]
    fn unmapped_controller_is_never_connected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("tcp:127.0.0.1:{}", listener.local_addr().unwrap().port());
        let registry = Arc::new(SliceRegistry::new());
        let map = SwitchControllerMap::new(registry, Arc::new(fast_config()));
        let (sw, _) = switch(map.next_id(), 1, fast_config());
        map.add_switch(Arc::new(sw));
        map.add_controller(&url, 100);
        assert!(wait_until(|| map.lock().connecting.is_empty()));
        assert!(map.lookup_controllers_for_vlan(100).is_empty());
    }

    #[test]
    fn connection_finishing_after_unregister_is_not_installed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("tcp:127.0.0.1:{}", listener.local_addr().unwrap().port());
        let registry = Arc::new(SliceRegistry::new());
        let map = SwitchControllerMap::new(registry.clone(), Arc::new(fast_config()));
        let (sw, _) = switch(map.next_id(), 1, fast_config());
        let sw = Arc::new(sw);
        map.add_switch(sw.clone());

        // the slice leaves the registry while its controller is being connected
        registry.register(slice("a", 100, &url)).unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (mut stale, _) = listener.accept().unwrap();
        registry.unregister("a").unwrap();
        map.install(&sw, &url, 100, stream);
        assert!(map.lookup_controllers_for_vlan(100).is_empty());
        assert!(map.lookup_controllers_for_switch(sw.id()).is_empty());
        stale.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut buf = [0; 8];
        assert_eq!(stale.read(&mut buf).unwrap(), 0, "no HELLO before the connection is dropped");

        // the VLAN's next owner gets its own controller
        let listener_b = TcpListener::bind("127.0.0.1:0").unwrap();
        let url_b = format!("tcp:127.0.0.1:{}", listener_b.local_addr().unwrap().port());
        registry.register(slice("b", 100, &url_b)).unwrap();
        let stream = TcpStream::connect(listener_b.local_addr().unwrap()).unwrap();
        let (mut fresh, _) = listener_b.accept().unwrap();
        map.install(&sw, &url_b, 100, stream);
        let installed = map.lookup_controllers_for_vlan(100);
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].url(), url_b);
        fresh.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        fresh.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..2], &[0x01, 0x00]);
        map.remove_switch(sw.id(), true);
    }
}
