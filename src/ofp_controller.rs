use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::error::{Result, VmocError};
use crate::ofp_message::{Frame, MessageFramer, OfpMessage};
use crate::openflow0x01::message::Message;
use crate::openflow0x01::{MessageType, MsgCode, SwitchFeatures};
use crate::switch_connection::{SwitchConnection, SwitchEvent};

/// Where messages for a physical switch go.
pub trait SwitchSink: Send + Sync {
    /// Write one complete, already encoded message.
    fn send_raw(&self, bytes: &[u8]) -> io::Result<()>;
    /// Close the connection; the switch's receive loop then ends.
    fn close(&self);
}

/// A switch reached over TCP.  Writes from different threads are serialized.
pub struct TcpSink {
    stream: Mutex<TcpStream>,
}

impl TcpSink {
    pub fn new(stream: TcpStream) -> TcpSink {
        TcpSink {
            stream: Mutex::new(stream),
        }
    }
}

impl SwitchSink for TcpSink {
    fn send_raw(&self, bytes: &[u8]) -> io::Result<()> {
        let mut stream = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        stream.write_all(bytes)?;
        stream.flush()
    }

    fn close(&self) {
        let stream = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        let _ = stream.shutdown(Shutdown::Both);
    }
}

/// OpenFlow Controller
///
/// What the switch transport hands its events to.
pub trait OfpController: Send + Sync {
    /// A switch has completed the handshake.
    fn switch_connected(
        &self,
        sink: Box<dyn SwitchSink>,
        features: SwitchFeatures,
        features_body: Vec<u8>,
    ) -> Arc<SwitchConnection>;

    /// Anything the switch reports afterwards, ending with `SwitchEvent::ConnectionDown`.
    fn switch_event(&self, switch: &Arc<SwitchConnection>, event: SwitchEvent);
}

/// Accepts switch connections forever, one thread per switch.
pub fn serve<C>(controller: Arc<C>, listener: TcpListener, read_timeout: Duration) -> io::Result<()>
where
    C: OfpController + 'static,
{
    info!(addr = %listener.local_addr()?, "listening for switches");
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let controller = controller.clone();
                let peer = stream.peer_addr().ok();
                thread::Builder::new()
                    .name("switch".to_string())
                    .spawn(move || {
                        if let Err(e) = handle_client_connected(&*controller, stream, read_timeout) {
                            warn!(peer = ?peer, error = %e, "switch connection failed");
                        }
                    })?;
            }
            Err(e) => warn!(error = %e, "accepting switch connection failed"),
        }
    }
    Ok(())
}

fn send<W: Write>(stream: &mut W, xid: u32, msg: Message) -> Result<()> {
    stream.write_all(&Message::marshal(xid, msg)?)?;
    Ok(())
}

/// Perform handshake and begin loop reading incoming messages from the switch.
pub fn handle_client_connected<C>(controller: &C, stream: TcpStream, read_timeout: Duration) -> Result<()>
where
    C: OfpController + ?Sized,
{
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(read_timeout))?;
    let mut reader = stream.try_clone()?;
    let sink = TcpSink::new(stream.try_clone()?);
    let mut writer = stream;
    send(&mut writer, 0, Message::Hello)?;
    send(&mut writer, 1, Message::FeaturesReq)?;

    let mut framer = MessageFramer::new();
    let mut switch: Option<Arc<SwitchConnection>> = None;
    let mut sink = Some(sink);
    let mut buf = [0; 8192];
    let result = 'read: loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                continue
            }
            Err(e) => break Err(VmocError::from(e)),
        };
        framer.feed(&buf[..n]);
        loop {
            let frame = match framer.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => break 'read Err(e.into()),
            };
            let step = match switch {
                Some(ref sw) => dispatch(controller, sw, frame),
                None => match handshake(controller, &mut sink, &mut writer, frame) {
                    Ok(up) => {
                        switch = up;
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
            };
            if let Err(e) = step {
                break 'read Err(e);
            }
        }
    };
    match switch {
        Some(sw) => {
            if let Err(ref e) = result {
                info!(switch = %sw, error = %e, "switch connection lost");
            }
            controller.switch_event(&sw, SwitchEvent::ConnectionDown);
            Ok(())
        }
        None => result.and(Err(VmocError::HandshakeIncomplete)),
    }
}

/// Handles a message received before FEATURES_REPLY.  Returns the switch once it is up.
fn handshake<C>(
    controller: &C,
    sink: &mut Option<TcpSink>,
    writer: &mut TcpStream,
    frame: Frame,
) -> Result<Option<Arc<SwitchConnection>>>
where
    C: OfpController + ?Sized,
{
    let code = frame.header.type_code()?;
    match code {
        MsgCode::FeaturesResp => {
            let features = SwitchFeatures::parse(frame.body())?;
            let sink = match sink.take() {
                Some(sink) => sink,
                None => return Ok(None),
            };
            let switch = controller.switch_connected(Box::new(sink), features, frame.body().to_vec());
            info!(switch = %switch, ports = switch.features().ports.len(), "switch connected");
            Ok(Some(switch))
        }
        MsgCode::EchoReq => {
            send(writer, frame.header.xid(), Message::EchoReply(frame.body().to_vec()))?;
            Ok(None)
        }
        MsgCode::Error => {
            warn!(len = frame.raw.len(), "error from switch during handshake");
            Ok(None)
        }
        _ => {
            debug!(msg = code.name(), "ignoring message before features reply");
            Ok(None)
        }
    }
}

fn dispatch<C>(controller: &C, switch: &Arc<SwitchConnection>, frame: Frame) -> Result<()>
where
    C: OfpController + ?Sized,
{
    let code = frame.header.type_code()?;
    trace!(switch = %switch, msg = code.name(), xid = frame.header.xid(), "from switch");
    let event = match code {
        MsgCode::PacketIn => match Message::parse(&frame.header, frame.body())? {
            (_, Message::PacketIn(packet_in)) => SwitchEvent::PacketIn {
                raw: frame.raw,
                packet_in,
            },
            _ => return Ok(()),
        },
        MsgCode::PortStatus => SwitchEvent::PortStatus(frame.raw),
        MsgCode::FlowRemoved => SwitchEvent::FlowRemoved(frame.raw),
        MsgCode::Error => SwitchEvent::Error(frame.raw),
        MsgCode::BarrierResp => SwitchEvent::BarrierIn(frame.header.xid()),
        MsgCode::StatsResp => SwitchEvent::StatsReply(frame.raw),
        MsgCode::EchoReq => {
            // the sink owns the socket once the switch is up
            return switch.send(frame.header.xid(), Message::EchoReply(frame.body().to_vec()));
        }
        MsgCode::Hello
        | MsgCode::EchoResp
        | MsgCode::Vendor
        | MsgCode::FeaturesResp
        | MsgCode::GetConfigResp
        | MsgCode::QueueGetConfigResp => {
            debug!(switch = %switch, msg = code.name(), "ignoring");
            return Ok(());
        }
        _ => return Err(VmocError::UnexpectedMessage(code.name())),
    };
    controller.switch_event(switch, event);
    Ok(())
}
