//! The session with one physical switch, and the fan-out of its messages to tenant
//! controllers.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

use crate::config::VmocConfig;
use crate::error::{OfpError, Result};
use crate::ofp_controller::SwitchSink;
use crate::ofp_header::{OfpHeader, OFP_VERSION};
use crate::ofp_message::OfpMessage;
use crate::openflow0x01::message::Message;
use crate::openflow0x01::{MsgCode, PacketIn, Payload, SwitchFeatures};
use crate::packet::EthernetFrame;
use crate::switch_controller_map::SwitchControllerMap;

pub type SwitchId = u64;

/// What the transport reports about a switch once its handshake has completed.
#[derive(Debug)]
pub enum SwitchEvent {
    /// `raw` is the whole message as received.
    PacketIn { raw: Vec<u8>, packet_in: PacketIn },
    PortStatus(Vec<u8>),
    FlowRemoved(Vec<u8>),
    Error(Vec<u8>),
    /// Transaction id of the barrier reply.
    BarrierIn(u32),
    StatsReply(Vec<u8>),
    ConnectionDown,
}

/// A packet the switch buffered and reported in a PACKET_IN.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedPacket {
    pub data: Vec<u8>,
    /// VLAN the packet was attributed to, if any.
    pub vlan: Option<u16>,
    at: Instant,
}

/// Packets by buffer id.  Entries older than the timeout are dropped on every insert and
/// ignored on lookup.
pub struct PacketCache {
    timeout: Duration,
    entries: HashMap<u32, CachedPacket>,
}

impl PacketCache {
    pub fn new(timeout: Duration) -> PacketCache {
        PacketCache {
            timeout,
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, buffer_id: u32, data: Vec<u8>, vlan: Option<u16>) {
        self.insert_at(buffer_id, data, vlan, Instant::now())
    }

    fn insert_at(&mut self, buffer_id: u32, data: Vec<u8>, vlan: Option<u16>, now: Instant) {
        let timeout = self.timeout;
        self.entries.retain(|id, p| {
            let fresh = now.saturating_duration_since(p.at) <= timeout;
            if !fresh {
                trace!(buffer_id = *id, "evicting stale buffer");
            }
            fresh
        });
        self.entries
            .insert(buffer_id, CachedPacket { data, vlan, at: now });
    }

    pub fn lookup(&self, buffer_id: u32) -> Option<CachedPacket> {
        self.lookup_at(buffer_id, Instant::now())
    }

    fn lookup_at(&self, buffer_id: u32, now: Instant) -> Option<CachedPacket> {
        self.entries
            .get(&buffer_id)
            .filter(|p| now.saturating_duration_since(p.at) <= self.timeout)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct SwitchConnection {
    id: SwitchId,
    features: SwitchFeatures,
    /// FEATURES_REPLY body exactly as the switch sent it.
    features_body: Vec<u8>,
    sink: Box<dyn SwitchSink>,
    packets: Mutex<PacketCache>,
    config: Arc<VmocConfig>,
}

impl SwitchConnection {
    pub fn new(
        id: SwitchId,
        features: SwitchFeatures,
        features_body: Vec<u8>,
        sink: Box<dyn SwitchSink>,
        config: Arc<VmocConfig>,
    ) -> SwitchConnection {
        SwitchConnection {
            id,
            features,
            features_body,
            sink,
            packets: Mutex::new(PacketCache::new(config.packet_cache_timeout())),
            config,
        }
    }

    pub fn id(&self) -> SwitchId {
        self.id
    }

    pub fn dpid(&self) -> u64 {
        self.features.datapath_id
    }

    pub fn features(&self) -> &SwitchFeatures {
        &self.features
    }

    /// The switch's own FEATURES_REPLY, re-addressed to transaction `xid`.
    pub fn features_reply(&self, xid: u32) -> Result<Vec<u8>> {
        let len = OfpHeader::size() + self.features_body.len();
        if len > u16::MAX as usize {
            return Err(OfpError::TooLarge(len).into());
        }
        let mut bytes = Vec::with_capacity(len);
        OfpHeader::marshal(
            &mut bytes,
            OfpHeader::new(OFP_VERSION, MsgCode::FeaturesResp as u8, len as u16, xid),
        );
        bytes.extend_from_slice(&self.features_body);
        Ok(bytes)
    }

    pub fn send(&self, xid: u32, msg: Message) -> Result<()> {
        let name = msg.name();
        let bytes = Message::marshal(xid, msg)?;
        trace!(switch = %self, msg = name, xid, "to switch");
        self.sink.send_raw(&bytes)?;
        Ok(())
    }

    pub fn send_raw(&self, bytes: &[u8]) -> io::Result<()> {
        self.sink.send_raw(bytes)
    }

    pub fn close(&self) {
        self.sink.close()
    }

    fn packets(&self) -> MutexGuard<'_, PacketCache> {
        self.packets.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn lookup_packet(&self, buffer_id: u32) -> Option<CachedPacket> {
        self.packets().lookup(buffer_id)
    }

    /// The VLAN a frame that entered on `in_port` belongs to: its 802.1Q tag, or the implicit
    /// VLAN of a hybrid port that handles untagged traffic.
    pub fn packet_vlan(&self, frame: &EthernetFrame, in_port: u16) -> Option<u16> {
        frame
            .vlan_id()
            .or_else(|| self.config.untagged_vlan(in_port))
    }

    pub fn handle_event(&self, map: &SwitchControllerMap, event: SwitchEvent) {
        match event {
            SwitchEvent::PacketIn { raw, packet_in } => self.packet_in(map, raw, packet_in),
            SwitchEvent::BarrierIn(xid) => {
                trace!(switch = %self, xid, "absorbing barrier reply");
            }
            SwitchEvent::PortStatus(raw)
            | SwitchEvent::FlowRemoved(raw)
            | SwitchEvent::Error(raw)
            | SwitchEvent::StatsReply(raw) => self.broadcast(map, &raw),
            SwitchEvent::ConnectionDown => {
                info!(switch = %self, "switch disconnected");
                map.remove_switch(self.id, true);
            }
        }
    }

    fn packet_in(&self, map: &SwitchControllerMap, raw: Vec<u8>, packet_in: PacketIn) {
        let data = Payload::data(&packet_in.input_payload);
        let frame = match EthernetFrame::parse(data) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(switch = %self, error = %e, "dropping unparseable packet in");
                return;
            }
        };
        let vlan = self.packet_vlan(&frame, packet_in.port);
        if let Some(buffer_id) = Payload::buffer_id(&packet_in.input_payload) {
            self.packets().insert(buffer_id, data.to_vec(), vlan);
        }
        let vlan = match vlan {
            Some(vlan) => vlan,
            None => {
                debug!(switch = %self, port = packet_in.port, %frame, "no VLAN for packet in, dropping");
                return;
            }
        };
        let owner = map
            .lookup_controllers_for_switch(self.id)
            .into_iter()
            .find(|c| c.vlan() == vlan);
        match owner {
            Some(controller) => {
                trace!(switch = %self, controller = %controller, %frame, "packet in");
                if let Err(e) = controller.send_raw(&raw) {
                    debug!(controller = %controller, error = %e, "packet in not delivered");
                }
            }
            None => debug!(switch = %self, vlan, %frame, "no controller for VLAN, dropping"),
        }
    }

    fn broadcast(&self, map: &SwitchControllerMap, raw: &[u8]) {
        let controllers = map.lookup_controllers_for_switch(self.id);
        if controllers.is_empty() {
            debug!(switch = %self, "no controllers, dropping switch message");
        }
        for controller in controllers {
            if let Err(e) = controller.send_raw(raw) {
                debug!(controller = %controller, error = %e, "switch message not delivered");
            }
        }
    }
}

impl fmt::Display for SwitchConnection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "switch {:#018x}", self.dpid())
    }
}

impl fmt::Debug for SwitchConnection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SwitchConnection")
            .field("id", &self.id)
            .field("dpid", &self.dpid())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::HybridPort;
    use crate::openflow0x01::{Capabilities, SupportedActions};
    use crate::packet::tests::ipv4_frame;

    /// Records everything sent to the switch.
    #[derive(Clone, Default)]
    pub struct RecordingSink {
        pub sent: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl SwitchSink for RecordingSink {
        fn send_raw(&self, bytes: &[u8]) -> io::Result<()> {
            self.sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }

        fn close(&self) {}
    }

    pub fn features(dpid: u64) -> SwitchFeatures {
        SwitchFeatures {
            datapath_id: dpid,
            num_buffers: 256,
            num_tables: 1,
            supported_capabilities: Capabilities::default(),
            supported_actions: SupportedActions::default(),
            ports: vec![],
        }
    }

    pub fn switch(id: SwitchId, dpid: u64, config: VmocConfig) -> (SwitchConnection, RecordingSink) {
        let sink = RecordingSink::default();
        let features = features(dpid);
        let mut body = vec![];
        crate::openflow0x01::MessageType::marshal(&features, &mut body);
        let sw = SwitchConnection::new(id, features, body, Box::new(sink.clone()), Arc::new(config));
        (sw, sink)
    }

    #[test]
    fn cache_evicts_stale_entries_on_insert() {
        let mut cache = PacketCache::new(Duration::from_secs(300));
        let t0 = Instant::now();
        cache.insert_at(1, vec![1], Some(100), t0);
        cache.insert_at(2, vec![2], None, t0 + Duration::from_secs(200));
        assert_eq!(cache.len(), 2);
        cache.insert_at(3, vec![3], None, t0 + Duration::from_secs(301));
        assert_eq!(cache.len(), 2);
        assert!(cache.lookup_at(1, t0 + Duration::from_secs(301)).is_none());
        assert_eq!(
            cache.lookup_at(2, t0 + Duration::from_secs(301)).map(|p| p.data),
            Some(vec![2])
        );
        // stale but not yet evicted
        assert!(cache.lookup_at(3, t0 + Duration::from_secs(700)).is_none());
    }

    #[test]
    fn features_reply_keeps_body_and_takes_xid() {
        let (sw, _) = switch(1, 0x1, VmocConfig::default());
        let reply = sw.features_reply(7).unwrap();
        let header = OfpHeader::parse(&reply).unwrap();
        assert_eq!(header.xid(), 7);
        assert_eq!(header.length(), reply.len());
        let (_, msg) = Message::parse(&header, &reply[8..]).unwrap();
        assert_eq!(msg, Message::FeaturesReply(features(0x1)));
    }

    #[test]
    fn untagged_frames_use_hybrid_port_vlan() {
        let mut config = VmocConfig::default();
        config.hybrid_ports.insert(
            3,
            HybridPort {
                vlan: 100,
                handle_untagged: true,
            },
        );
        let (sw, _) = switch(1, 0x1, config);
        let untagged = EthernetFrame::parse(&ipv4_frame()).unwrap();
        assert_eq!(sw.packet_vlan(&untagged, 3), Some(100));
        assert_eq!(sw.packet_vlan(&untagged, 4), None);
        let tagged = untagged.push_vlan(200).unwrap();
        assert_eq!(sw.packet_vlan(&tagged, 3), Some(200));
    }
}
