//! VMOC posing as a switch toward one tenant controller, scoped to one VLAN of one physical
//! switch.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::config::VlanPolicy;
use crate::error::{PacketError, Result, UrlError, VmocError};
use crate::ofp_message::{Frame, MessageFramer, OfpMessage};
use crate::openflow0x01::message::Message;
use crate::openflow0x01::{Action, FlowMod, MsgCode, PacketOut, Payload, SwitchConfig};
use crate::packet::{EthernetFrame, MacAddr};
use crate::switch_connection::{CachedPacket, SwitchConnection};
use crate::switch_controller_map::SwitchControllerMap;

pub type ControllerId = u64;

const READ_BUF_SIZE: usize = 8192;

/// Datapath id presented to the controller for `vlan` on the switch with datapath id `dpid`:
/// the VLAN in the top 12 bits, the low 52 bits of the switch's own id below it.
pub fn synthesized_dpid(vlan: u16, dpid: u64) -> u64 {
    ((vlan as u64 & 0xfff) << 48) | (dpid & 0x000f_ffff_ffff_ffff)
}

/// Splits a controller URL into host and port.  Accepts `host:port`, `scheme:host:port` and
/// `scheme://host:port`.
pub fn parse_controller_url(url: &str) -> std::result::Result<(String, u16), UrlError> {
    let stripped: String = url.chars().filter(|&c| c != '/').collect();
    let pieces: Vec<&str> = stripped.split(':').collect();
    let (host, port) = match pieces.as_slice() {
        [host, port] | [_, host, port] => (*host, *port),
        _ => return Err(UrlError::MissingPort(url.to_string())),
    };
    if host.is_empty() {
        return Err(UrlError::MissingHost(url.to_string()));
    }
    let port = port
        .parse()
        .map_err(|_| UrlError::BadPort(url.to_string()))?;
    Ok((host.to_string(), port))
}

pub fn resolve_controller_url(url: &str) -> std::result::Result<Option<SocketAddr>, UrlError> {
    let (host, port) = parse_controller_url(url)?;
    Ok((host.as_str(), port)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next()))
}

/// Why a FLOW_MOD or PACKET_OUT was not forwarded.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Rejection {
    #[error("delete of all flows without a VLAN")]
    ClearAllFlows,

    #[error("match on VLAN {vlan}")]
    MatchVlan { vlan: u16 },

    #[error("action sets VLAN {vlan}")]
    ActionVlan { vlan: u16 },

    #[error("vendor action {vendor:#x}")]
    VendorAction { vendor: u32 },

    #[error("frame {src} > {dst} tagged with VLAN {vlan}")]
    FrameVlan { vlan: u16, src: MacAddr, dst: MacAddr },

    #[error("buffer {0} unknown or expired")]
    UnknownBuffer(u32),

    #[error("buffer {buffer_id} belongs to VLAN {vlan:?}")]
    BufferVlan { buffer_id: u32, vlan: Option<u16> },

    #[error("bad frame: {0}")]
    BadFrame(#[from] PacketError),
}

/// Outcome of validating a controller message against the connection's VLAN.
#[derive(Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Forward the message exactly as received.
    Pass,
    /// Forward this rewritten message instead.
    Rewrite(Message),
    Reject(Rejection),
}

/// Decides whether `msg`, received from the controller for `vlan`, may reach the switch.
/// `buffered` resolves a switch buffer id to the packet reported for it.
pub fn validate_message<F>(msg: &Message, vlan: u16, policy: &VlanPolicy, buffered: F) -> Verdict
where
    F: FnOnce(u32) -> Option<CachedPacket>,
{
    match *msg {
        Message::FlowMod(ref flow_mod) => validate_flow_mod(flow_mod, vlan, policy, buffered),
        Message::PacketOut(ref packet_out) => validate_packet_out(packet_out, vlan, policy, buffered),
        _ => Verdict::Pass,
    }
}

/// Vendor actions are opaque and may rewrite the tag, so none are let through.
fn check_actions(actions: &[Action], vlan: u16) -> std::result::Result<(), Rejection> {
    for act in actions {
        match *act {
            Action::SetVlanVid(vid) if vid != vlan => {
                return Err(Rejection::ActionVlan { vlan: vid })
            }
            Action::Vendor(vendor, _) => return Err(Rejection::VendorAction { vendor }),
            _ => {}
        }
    }
    Ok(())
}

/// A buffered packet may only be released by the controller of the VLAN it was reported to.
fn check_buffer<F>(buffer_id: u32, vlan: u16, buffered: F) -> std::result::Result<(), Rejection>
where
    F: FnOnce(u32) -> Option<CachedPacket>,
{
    match buffered(buffer_id) {
        None => Err(Rejection::UnknownBuffer(buffer_id)),
        Some(packet) if packet.vlan == Some(vlan) => Ok(()),
        Some(packet) => Err(Rejection::BufferVlan {
            buffer_id,
            vlan: packet.vlan,
        }),
    }
}

fn validate_flow_mod<F>(flow_mod: &FlowMod, vlan: u16, policy: &VlanPolicy, buffered: F) -> Verdict
where
    F: FnOnce(u32) -> Option<CachedPacket>,
{
    if let Err(reason) = check_actions(&flow_mod.actions, vlan) {
        return Verdict::Reject(reason);
    }
    if let Some(buffer_id) = flow_mod.apply_to_packet {
        if let Err(reason) = check_buffer(buffer_id, vlan, buffered) {
            return Verdict::Reject(reason);
        }
    }
    match flow_mod.pattern.vlan() {
        Some(vid) if vid == vlan => Verdict::Pass,
        Some(vid) => Verdict::Reject(Rejection::MatchVlan { vlan: vid }),
        None if flow_mod.command.is_delete() => {
            if policy.allow_clear_all_flows {
                Verdict::Pass
            } else {
                Verdict::Reject(Rejection::ClearAllFlows)
            }
        }
        None if policy.auto_tag_flow_mod => {
            let mut tagged = flow_mod.clone();
            tagged.pattern.dl_vlan = Some(Some(vlan));
            Verdict::Rewrite(Message::FlowMod(tagged))
        }
        None => Verdict::Pass,
    }
}

fn validate_packet_out<F>(
    packet_out: &PacketOut,
    vlan: u16,
    policy: &VlanPolicy,
    buffered: F,
) -> Verdict
where
    F: FnOnce(u32) -> Option<CachedPacket>,
{
    if let Err(reason) = check_actions(&packet_out.apply_actions, vlan) {
        return Verdict::Reject(reason);
    }
    // The switch ignores inline data for a buffered packet, so only the buffer's owner counts.
    if let Some(buffer_id) = Payload::buffer_id(&packet_out.output_payload) {
        return match check_buffer(buffer_id, vlan, buffered) {
            Ok(()) => Verdict::Pass,
            Err(reason) => Verdict::Reject(reason),
        };
    }
    let data = Payload::data(&packet_out.output_payload);
    if data.is_empty() {
        return Verdict::Pass;
    }
    let frame = match EthernetFrame::parse(data) {
        Ok(frame) => frame,
        Err(e) => return Verdict::Reject(e.into()),
    };
    match frame.vlan_id() {
        Some(vid) if vid == vlan => Verdict::Pass,
        Some(vid) => Verdict::Reject(Rejection::FrameVlan {
            vlan: vid,
            src: frame.eth.dl_src,
            dst: frame.eth.dl_dst,
        }),
        None if policy.auto_tag_packet_out => match frame.push_vlan(vlan) {
            Ok(tagged) => Verdict::Rewrite(Message::PacketOut(PacketOut {
                output_payload: Payload::NotBuffered(tagged.marshal()),
                port_id: packet_out.port_id,
                apply_actions: packet_out.apply_actions.clone(),
            })),
            Err(e) => Verdict::Reject(e.into()),
        },
        None => Verdict::Pass,
    }
}

pub struct ControllerConnection {
    id: ControllerId,
    url: String,
    vlan: u16,
    dpid: u64,
    switch: Arc<SwitchConnection>,
    policy: VlanPolicy,
    writer: Mutex<TcpStream>,
    running: AtomicBool,
    /// Set by `close`; a connection closed on purpose is not re-established.
    closed: AtomicBool,
    switch_config: Mutex<SwitchConfig>,
}

impl ControllerConnection {
    /// Takes over a connected `stream` and returns the connection together with the stream its
    /// receive loop reads from.  Nothing is sent until `hello`.
    pub fn open(
        id: ControllerId,
        url: &str,
        vlan: u16,
        switch: Arc<SwitchConnection>,
        policy: VlanPolicy,
        stream: TcpStream,
        read_timeout: Duration,
    ) -> Result<(Arc<ControllerConnection>, TcpStream)> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(read_timeout))?;
        let reader = stream.try_clone()?;
        let conn = Arc::new(ControllerConnection {
            id,
            url: url.to_string(),
            vlan,
            dpid: synthesized_dpid(vlan, switch.dpid()),
            switch,
            policy,
            writer: Mutex::new(stream),
            running: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            switch_config: Mutex::new(SwitchConfig::default()),
        });
        Ok((conn, reader))
    }

    /// Greets the controller as a switch would, starting its handshake.
    pub fn hello(&self) -> Result<()> {
        self.send(0, Message::Hello)?;
        info!(controller = %self, "controller connected");
        Ok(())
    }

    pub fn id(&self) -> ControllerId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn vlan(&self) -> u16 {
        self.vlan
    }

    /// Datapath id the controller sees.
    pub fn dpid(&self) -> u64 {
        self.dpid
    }

    pub fn switch(&self) -> &Arc<SwitchConnection> {
        &self.switch
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn writer(&self) -> MutexGuard<'_, TcpStream> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn send(&self, xid: u32, msg: Message) -> Result<()> {
        let name = msg.name();
        let bytes = Message::marshal(xid, msg)?;
        trace!(controller = %self, msg = name, xid, "to controller");
        self.send_raw(&bytes)?;
        Ok(())
    }

    /// Writes a complete message.  Concurrent senders are serialized.
    pub fn send_raw(&self, bytes: &[u8]) -> io::Result<()> {
        let mut stream = self.writer();
        stream.write_all(bytes)?;
        stream.flush()
    }

    /// Stops the receive loop and closes the socket.  The connection will not be re-established.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(controller = %self, "closing");
        }
        self.running.store(false, Ordering::SeqCst);
        let _ = self.writer().shutdown(Shutdown::Both);
    }

    /// Receive loop.  Returns when the controller hangs up, sends something unparseable, or the
    /// connection is closed; the map is then told the connection is gone.
    pub fn run(self: &Arc<Self>, mut reader: TcpStream, map: &SwitchControllerMap) {
        let mut framer = MessageFramer::new();
        let mut buf = [0; READ_BUF_SIZE];
        'read: while self.is_running() {
            let n = match reader.read(&mut buf) {
                Ok(0) => {
                    info!(controller = %self, "controller closed the connection");
                    break;
                }
                Ok(n) => n,
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::Interrupted =>
                {
                    continue
                }
                Err(e) => {
                    if self.is_running() {
                        info!(controller = %self, error = %e, "controller connection lost");
                    }
                    break;
                }
            };
            framer.feed(&buf[..n]);
            loop {
                let result = match framer.next_frame() {
                    Ok(Some(frame)) => self.dispatch(frame),
                    Ok(None) => break,
                    Err(e) => Err(e.into()),
                };
                if let Err(e) = result {
                    warn!(controller = %self, error = %e, "dropping controller connection");
                    break 'read;
                }
            }
        }
        self.running.store(false, Ordering::SeqCst);
        let _ = self.writer().shutdown(Shutdown::Both);
        map.controller_lost(self);
    }

    fn dispatch(&self, frame: Frame) -> Result<()> {
        let (xid, msg) = Message::parse(&frame.header, frame.body())?;
        trace!(controller = %self, msg = msg.name(), xid, "from controller");
        match msg {
            Message::Hello | Message::EchoReply(_) | Message::Vendor(_) => {
                debug!(controller = %self, msg = msg.name(), "ignoring")
            }
            Message::EchoRequest(data) => self.send(xid, Message::EchoReply(data))?,
            Message::FeaturesReq => self.send_raw(&self.switch.features_reply(xid)?)?,
            Message::BarrierRequest => self.send(xid, Message::BarrierReply)?,
            Message::GetConfigRequest => {
                let config = *self.lock_switch_config();
                self.send(xid, Message::GetConfigReply(config))?
            }
            Message::SetConfig(config) => *self.lock_switch_config() = config,
            Message::Error(err) => {
                warn!(controller = %self, typ = err.typ, code = err.code, "error from controller")
            }
            Message::Opaque(MsgCode::StatsReq, _) => {
                debug!(controller = %self, "ignoring stats request")
            }
            Message::Opaque(code @ MsgCode::PortMod, _)
            | Message::Opaque(code @ MsgCode::QueueGetConfigReq, _) => {
                warn!(controller = %self, msg = code.name(), "dropping request on shared switch ports")
            }
            Message::FlowMod(_) | Message::PacketOut(_) => self.forward(xid, &frame, msg),
            other => return Err(VmocError::UnexpectedMessage(other.name())),
        }
        Ok(())
    }

    fn lock_switch_config(&self) -> MutexGuard<'_, SwitchConfig> {
        self.switch_config.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn forward(&self, xid: u32, frame: &Frame, msg: Message) {
        let verdict = validate_message(&msg, self.vlan, &self.policy, |buffer_id| {
            self.switch.lookup_packet(buffer_id)
        });
        let sent = match verdict {
            Verdict::Pass => {
                debug!(controller = %self, msg = msg.name(), xid, "forwarding");
                self.switch.send_raw(&frame.raw).map_err(VmocError::from)
            }
            Verdict::Rewrite(rewritten) => {
                debug!(controller = %self, msg = msg.name(), xid, "forwarding with VLAN tag");
                self.switch.send(xid, rewritten)
            }
            Verdict::Reject(reason) => {
                warn!(
                    controller = %self,
                    vlan = self.vlan,
                    msg = msg.name(),
                    %reason,
                    "rejected controller message"
                );
                Ok(())
            }
        };
        if let Err(e) = sent {
            warn!(controller = %self, switch = %self.switch, error = %e, "cannot forward to switch");
        }
    }
}

impl fmt::Display for ControllerConnection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "controller {} vlan {} dpid {:#018x}",
            self.url, self.vlan, self.dpid
        )
    }
}

impl fmt::Debug for ControllerConnection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ControllerConnection")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("vlan", &self.vlan)
            .field("dpid", &self.dpid)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmocConfig;
    use crate::openflow0x01::message::{add_flow, delete_flows};
    use crate::openflow0x01::{Pattern, PseudoPort};
    use crate::packet::tests::ipv4_frame;
    use crate::switch_connection::tests::switch;
    use std::net::TcpListener;
    use tracing_test::traced_test;

    const VLAN: u16 = 100;

    fn policy() -> VlanPolicy {
        VlanPolicy::default()
    }

    fn no_buffers(_: u32) -> Option<CachedPacket> {
        None
    }

    fn flow_mod_on(vlan: Option<Option<u16>>, actions: Vec<Action>) -> Message {
        let mut pattern = Pattern::match_all();
        pattern.dl_vlan = vlan;
        Message::FlowMod(add_flow(10, pattern, actions))
    }

    fn packet_out(data: Vec<u8>) -> Message {
        Message::PacketOut(PacketOut {
            output_payload: Payload::NotBuffered(data),
            port_id: Some(4),
            apply_actions: vec![Action::Output(PseudoPort::PhysicalPort(2))],
        })
    }

    #[test]
    fn dpid_packs_vlan_above_switch_bits() {
        assert_eq!(synthesized_dpid(100, 1), (100 << 48) | 1);
        assert_eq!(synthesized_dpid(0xfff, u64::MAX), u64::MAX);
        // only 12 bits of VLAN and 52 bits of dpid survive
        assert_eq!(synthesized_dpid(0x1064, 0xfff0_0000_0000_0002), (0x064 << 48) | 2);
    }

    #[test]
    fn dpids_are_distinct_across_vlans_and_switches() {
        let mut seen = std::collections::HashSet::new();
        for vlan in (0..4096).step_by(97) {
            for dpid in &[1u64, 2, 0x0000_1234_5678_9abc, 0x000f_ffff_ffff_ffff] {
                assert!(seen.insert(synthesized_dpid(vlan, *dpid)));
                assert_eq!(synthesized_dpid(vlan, *dpid), synthesized_dpid(vlan, *dpid));
            }
        }
    }

    #[test]
    fn url_forms() {
        assert_eq!(
            parse_controller_url("http://localhost:9001"),
            Ok(("localhost".to_string(), 9001))
        );
        assert_eq!(
            parse_controller_url("tcp:10.0.0.1:6633"),
            Ok(("10.0.0.1".to_string(), 6633))
        );
        assert_eq!(
            parse_controller_url("127.0.0.1:6633"),
            Ok(("127.0.0.1".to_string(), 6633))
        );
        assert!(matches!(
            parse_controller_url("localhost"),
            Err(UrlError::MissingPort(_))
        ));
        assert!(matches!(
            parse_controller_url("http://localhost:http"),
            Err(UrlError::BadPort(_))
        ));
    }

    #[test]
    fn flow_mod_on_own_vlan_passes() {
        let msg = flow_mod_on(Some(Some(VLAN)), vec![Action::SetVlanVid(VLAN)]);
        assert_eq!(validate_message(&msg, VLAN, &policy(), no_buffers), Verdict::Pass);
    }

    #[test]
    fn flow_mod_on_foreign_vlan_is_rejected() {
        let msg = flow_mod_on(Some(Some(200)), vec![]);
        assert_eq!(
            validate_message(&msg, VLAN, &policy(), no_buffers),
            Verdict::Reject(Rejection::MatchVlan { vlan: 200 })
        );
    }

    #[test]
    fn flow_mod_setting_foreign_vlan_is_rejected() {
        let msg = flow_mod_on(None, vec![Action::SetVlanVid(200)]);
        assert_eq!(
            validate_message(&msg, VLAN, &policy(), no_buffers),
            Verdict::Reject(Rejection::ActionVlan { vlan: 200 })
        );
    }

    #[test]
    fn vendor_actions_are_rejected() {
        let nicira = Action::Vendor(0x2320, vec![0; 8]);
        let msg = flow_mod_on(Some(Some(VLAN)), vec![nicira.clone()]);
        assert_eq!(
            validate_message(&msg, VLAN, &policy(), no_buffers),
            Verdict::Reject(Rejection::VendorAction { vendor: 0x2320 })
        );
        let msg = Message::PacketOut(PacketOut {
            output_payload: Payload::NotBuffered(ipv4_frame()),
            port_id: None,
            apply_actions: vec![Action::Output(PseudoPort::Flood), nicira],
        });
        assert_eq!(
            validate_message(&msg, VLAN, &policy(), no_buffers),
            Verdict::Reject(Rejection::VendorAction { vendor: 0x2320 })
        );
    }

    #[test]
    fn untagged_flow_mod_gets_vlan() {
        for dl_vlan in &[None, Some(None)] {
            let msg = flow_mod_on(*dl_vlan, vec![Action::Output(PseudoPort::Flood)]);
            match validate_message(&msg, VLAN, &policy(), no_buffers) {
                Verdict::Rewrite(Message::FlowMod(fm)) => {
                    assert_eq!(fm.pattern.dl_vlan, Some(Some(VLAN)));
                    assert_eq!(fm.actions, vec![Action::Output(PseudoPort::Flood)]);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        let passive = VlanPolicy {
            auto_tag_flow_mod: false,
            ..policy()
        };
        let msg = flow_mod_on(None, vec![]);
        assert_eq!(validate_message(&msg, VLAN, &passive, no_buffers), Verdict::Pass);
    }

    #[test]
    fn clear_all_flows_follows_policy() {
        let msg = Message::FlowMod(delete_flows(Pattern::match_all()));
        assert_eq!(
            validate_message(&msg, VLAN, &policy(), no_buffers),
            Verdict::Reject(Rejection::ClearAllFlows)
        );
        let permissive = VlanPolicy {
            allow_clear_all_flows: true,
            ..policy()
        };
        assert_eq!(validate_message(&msg, VLAN, &permissive, no_buffers), Verdict::Pass);

        let mut own = Pattern::match_all();
        own.dl_vlan = Some(Some(VLAN));
        let msg = Message::FlowMod(delete_flows(own));
        assert_eq!(validate_message(&msg, VLAN, &policy(), no_buffers), Verdict::Pass);
    }

    #[test]
    fn untagged_packet_out_is_tagged() {
        let raw = ipv4_frame();
        match validate_message(&packet_out(raw.clone()), VLAN, &policy(), no_buffers) {
            Verdict::Rewrite(Message::PacketOut(po)) => {
                assert_eq!(po.port_id, Some(4));
                assert_eq!(po.apply_actions, vec![Action::Output(PseudoPort::PhysicalPort(2))]);
                let data = Payload::data(&po.output_payload);
                let frame = EthernetFrame::parse(data).unwrap();
                assert_eq!(frame.vlan_id(), Some(VLAN));
                assert_eq!(&data[18..], &raw[14..]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn tagged_packet_out_checked_against_vlan() {
        let own = EthernetFrame::parse(&ipv4_frame()).unwrap().push_vlan(VLAN).unwrap();
        assert_eq!(
            validate_message(&packet_out(own.marshal()), VLAN, &policy(), no_buffers),
            Verdict::Pass
        );
        let foreign = EthernetFrame::parse(&ipv4_frame()).unwrap().push_vlan(200).unwrap();
        assert_eq!(
            validate_message(&packet_out(foreign.marshal()), VLAN, &policy(), no_buffers),
            Verdict::Reject(Rejection::FrameVlan {
                vlan: 200,
                src: MacAddr([0, 0, 0, 0, 0, 1]),
                dst: MacAddr([0, 0, 0, 0, 0, 2]),
            })
        );
    }

    #[test]
    fn buffered_packet_out_needs_owned_buffer() {
        let msg = Message::PacketOut(PacketOut {
            output_payload: Payload::Buffered(9, vec![]),
            port_id: None,
            apply_actions: vec![Action::Output(PseudoPort::Flood)],
        });
        assert_eq!(
            validate_message(&msg, VLAN, &policy(), no_buffers),
            Verdict::Reject(Rejection::UnknownBuffer(9))
        );
        let mut cache = crate::switch_connection::PacketCache::new(Duration::from_secs(300));
        cache.insert(9, ipv4_frame(), Some(VLAN));
        assert_eq!(
            validate_message(&msg, VLAN, &policy(), |id| cache.lookup(id)),
            Verdict::Pass
        );
        cache.insert(9, ipv4_frame(), Some(200));
        assert_eq!(
            validate_message(&msg, VLAN, &policy(), |id| cache.lookup(id)),
            Verdict::Reject(Rejection::BufferVlan {
                buffer_id: 9,
                vlan: Some(200)
            })
        );
    }

    #[test]
    fn flow_mod_applied_to_foreign_buffer_is_rejected() {
        let mut flow_mod = add_flow(10, Pattern::match_all(), vec![Action::Output(PseudoPort::Flood)]);
        flow_mod.apply_to_packet = Some(5);
        let msg = Message::FlowMod(flow_mod);
        let mut cache = crate::switch_connection::PacketCache::new(Duration::from_secs(300));
        cache.insert(5, ipv4_frame(), Some(200));
        assert_eq!(
            validate_message(&msg, VLAN, &policy(), |id| cache.lookup(id)),
            Verdict::Reject(Rejection::BufferVlan {
                buffer_id: 5,
                vlan: Some(200)
            })
        );
        assert_eq!(
            validate_message(&msg, VLAN, &policy(), no_buffers),
            Verdict::Reject(Rejection::UnknownBuffer(5))
        );
    }

    #[test]
    fn runt_frame_is_rejected() {
        assert!(matches!(
            validate_message(&packet_out(vec![0; 6]), VLAN, &policy(), no_buffers),
            Verdict::Reject(Rejection::BadFrame(_))
        ));
    }

    #[test]
    #[traced_test]
    fn rejected_message_is_logged_and_not_forwarded() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (_peer, _) = listener.accept().unwrap();
        let (sw, sink) = switch(1, 1, VmocConfig::default());
        let (conn, _reader) = ControllerConnection::open(
            2,
            "tcp:127.0.0.1:6633",
            VLAN,
            Arc::new(sw),
            policy(),
            stream,
            Duration::from_millis(50),
        )
        .unwrap();

        let mut framer = MessageFramer::new();
        framer.feed(&Message::marshal(3, flow_mod_on(Some(Some(200)), vec![])).unwrap());
        conn.dispatch(framer.next_frame().unwrap().unwrap()).unwrap();
        assert!(sink.sent.lock().unwrap().is_empty());
        assert!(logs_contain("rejected controller message"));
        assert!(logs_contain("match on VLAN 200"));
    }

    #[test]
    fn other_messages_pass() {
        assert_eq!(
            validate_message(&Message::BarrierRequest, VLAN, &policy(), no_buffers),
            Verdict::Pass
        );
    }
}
