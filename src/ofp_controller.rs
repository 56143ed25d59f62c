use std::io::{BufReader, Read, Write};
use std::net::TcpStream;

use tracing::{debug, info, info_span, warn};

use crate::config::SessionConfig;
use crate::error::OfpError;
use crate::ofp_message::OfpMessage;
use crate::openflow0x01::message::Message;
use crate::session::SwitchSession;

/// Outbound half of a switch connection.
///
/// Everything a session sends to its switch goes through this trait, so the
/// session logic never touches the socket directly.
pub trait SwitchHandle {
    /// Send `msg` to the switch under transaction id `xid`.
    fn send_message(&mut self, xid: u32, msg: Message) -> Result<(), OfpError>;
}

impl SwitchHandle for TcpStream {
    fn send_message(&mut self, xid: u32, msg: Message) -> Result<(), OfpError> {
        let bytes = Message::marshal(xid, &msg)?;
        self.write_all(&bytes)?;
        Ok(())
    }
}

/// Buffers messages in memory instead of sending them.
impl SwitchHandle for Vec<Message> {
    fn send_message(&mut self, _xid: u32, msg: Message) -> Result<(), OfpError> {
        self.push(msg);
        Ok(())
    }
}

enum Connection<H: SwitchHandle> {
    /// Waiting for the features reply that identifies the switch.
    Handshake(H),
    Up(SwitchSession<H>),
}

impl<H: SwitchHandle> Connection<H> {
    fn handle_mut(&mut self) -> &mut H {
        match self {
            Connection::Handshake(handle) => handle,
            Connection::Up(session) => session.handle_mut(),
        }
    }

    fn connection_up(self, datapath_id: u64, config: &SessionConfig) -> Self {
        match self {
            Connection::Handshake(handle) => {
                info!(dpid = datapath_id, "switch connected");
                Connection::Up(SwitchSession::on_connection_up(datapath_id, handle, config))
            }
            Connection::Up(session) => {
                warn!(
                    dpid = session.datapath_id(),
                    reported = datapath_id,
                    "duplicate features reply ignored"
                );
                Connection::Up(session)
            }
        }
    }

    fn into_handle(self) -> H {
        match self {
            Connection::Handshake(handle) => handle,
            Connection::Up(session) => session.into_handle(),
        }
    }
}

/// Perform the handshake on an already-open connection and serve it until
/// the switch disconnects.
///
/// Messages are read from `reader` and replies go out through `handle`, which
/// is returned once the stream ends. A message whose body cannot be decoded is
/// skipped; header and I/O errors end the connection with that error.
pub fn run_connection<R: Read, H: SwitchHandle>(
    reader: &mut R,
    mut handle: H,
    config: &SessionConfig,
) -> Result<H, OfpError> {
    handle.send_message(0, Message::Hello)?;
    handle.send_message(0, Message::FeaturesReq)?;
    let mut conn = Connection::Handshake(handle);

    while let Some((header, body)) = Message::read_frame(reader)? {
        let (xid, msg) = match Message::parse(&header, &body) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(
                    xid = header.xid(),
                    typ = ?header.type_code(),
                    error = %e,
                    "skipping undecodable message"
                );
                continue;
            }
        };
        match msg {
            Message::EchoRequest(bytes) => {
                conn.handle_mut().send_message(xid, Message::EchoReply(bytes))?;
            }
            Message::FeaturesReply(feats) => {
                conn = conn.connection_up(feats.datapath_id, config);
            }
            Message::PacketIn(pkt) => match conn {
                Connection::Up(ref mut session) => session.packet_in(pkt),
                Connection::Handshake(_) => warn!("packet_in before features reply dropped"),
            },
            Message::Error(err) => {
                warn!(typ = err.typ, code = err.code, "switch reported error");
            }
            other => debug!(xid, msg = ?other, "ignored message"),
        }
    }

    info!("switch disconnected");
    Ok(conn.into_handle())
}

/// Serve a freshly accepted switch connection on the current thread.
pub fn handle_client_connected(stream: TcpStream, config: &SessionConfig) -> Result<(), OfpError> {
    let peer = stream
        .peer_addr()
        .map_or_else(|_| "unknown".to_string(), |addr| addr.to_string());
    let _span = info_span!("switch", %peer).entered();
    let writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    run_connection(&mut reader, writer, config)?;
    Ok(())
}
