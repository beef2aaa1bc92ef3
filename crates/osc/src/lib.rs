use async_trait::async_trait;
use chatbox_status_engine::{SinkError, StatusSink};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::debug;

const TAG_STRING: u8 = b's';
const TAG_TRUE: u8 = b'T';
const TAG_FALSE: u8 = b'F';

/// Fire-and-forget OSC sender for the chatbox input address.
pub struct OscSink {
    target: String,
    address: String,
    socket: Option<(UdpSocket, SocketAddr)>,
}

impl OscSink {
    pub fn new(host: &str, port: u16, address: impl Into<String>) -> Self {
        Self {
            target: format!("{host}:{port}"),
            address: address.into(),
            socket: None,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    async fn ensure_socket(&mut self) -> Result<&(UdpSocket, SocketAddr), SinkError> {
        if self.socket.is_none() {
            let dest = tokio::net::lookup_host(&self.target)
                .await?
                .next()
                .ok_or_else(|| SinkError::Resolve(self.target.clone()))?;
            let bind = if dest.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
            let socket = UdpSocket::bind(bind).await?;
            debug!(target = %dest, "osc socket ready");
            self.socket = Some((socket, dest));
        }
        self.socket
            .as_ref()
            .ok_or_else(|| SinkError::Resolve(self.target.clone()))
    }
}

#[async_trait]
impl StatusSink for OscSink {
    async fn send(&mut self, text: &str, visible: bool) -> Result<(), SinkError> {
        let packet = encode_message(&self.address, text, visible)?;
        let sent = {
            let (socket, dest) = self.ensure_socket().await?;
            socket.send_to(&packet, *dest).await
        };
        if let Err(err) = sent {
            // re-resolve on the next send
            self.socket = None;
            return Err(err.into());
        }
        Ok(())
    }
}

/// Encodes `address ,sT|F text` as a single OSC message.
pub fn encode_message(address: &str, text: &str, flag: bool) -> Result<Vec<u8>, SinkError> {
    if !address.starts_with('/') {
        return Err(SinkError::Encode(format!("osc address {address:?} must start with '/'")));
    }
    let mut buf = Vec::with_capacity(address.len() + text.len() + 16);
    push_padded(&mut buf, address.as_bytes())?;
    let flag_tag = if flag { TAG_TRUE } else { TAG_FALSE };
    push_padded(&mut buf, &[b',', TAG_STRING, flag_tag])?;
    push_padded(&mut buf, text.as_bytes())?;
    Ok(buf)
}

/// OSC strings are NUL terminated and padded to a multiple of four bytes.
fn push_padded(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<(), SinkError> {
    if bytes.contains(&0) {
        return Err(SinkError::Encode("osc strings cannot contain NUL".to_string()));
    }
    buf.extend_from_slice(bytes);
    let pad = 4 - bytes.len() % 4;
    buf.resize(buf.len() + pad, 0);
    Ok(())
}
