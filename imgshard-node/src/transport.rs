use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chitchat::serialize::Serializable;
use chitchat::transport::{Socket, Transport};
use chitchat::ChitchatMessage;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::net::UdpSocket;
use tracing::{info, trace, warn};

use crate::error::NodeError;

type HmacSha256 = Hmac<Sha256>;

/// The largest payload a single UDP datagram can carry.
const MAX_DATAGRAM_SIZE: usize = 65_507;
const TAG_LEN: usize = 32;

#[derive(Clone)]
/// The symmetric key shared by every member of the cluster.
pub struct SecretKey {
    mac: HmacSha256,
}

impl SecretKey {
    /// Creates a key from raw bytes.
    pub fn from_bytes(key: &[u8]) -> Result<Self, NodeError> {
        if key.is_empty() {
            return Err(NodeError::InvalidSecret("the secret is empty".to_string()));
        }

        let mac = HmacSha256::new_from_slice(key)
            .map_err(|e| NodeError::InvalidSecret(e.to_string()))?;
        Ok(Self { mac })
    }

    /// Creates a key from its standard base64 encoding.
    pub fn from_base64(encoded: &str) -> Result<Self, NodeError> {
        let key = STANDARD
            .decode(encoded.trim())
            .map_err(|e| NodeError::InvalidSecret(e.to_string()))?;
        Self::from_bytes(&key)
    }

    /// Prefixes the payload with its authentication tag.
    pub(crate) fn seal(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(payload);
        let tag = mac.finalize().into_bytes();

        let mut frame = Vec::with_capacity(TAG_LEN + payload.len());
        frame.extend_from_slice(&tag);
        frame.extend_from_slice(payload);
        frame
    }

    /// Returns the payload of the frame if its tag is valid.
    pub(crate) fn open<'a>(&self, frame: &'a [u8]) -> Option<&'a [u8]> {
        if frame.len() < TAG_LEN {
            return None;
        }

        let (tag, payload) = frame.split_at(TAG_LEN);
        let mut mac = self.mac.clone();
        mac.update(payload);
        mac.verify_slice(tag).ok()?;
        Some(payload)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

#[derive(Clone, Debug)]
/// Chitchat compatible UDP transport which authenticates every datagram.
///
/// Packets are sent as `HMAC-SHA256(secret, message) || message`, anything
/// arriving without a valid tag is dropped before it reaches chitchat.
pub struct SealedUdpTransport {
    key: SecretKey,
}

impl SealedUdpTransport {
    pub fn new(key: SecretKey) -> Self {
        Self { key }
    }
}

#[async_trait]
impl Transport for SealedUdpTransport {
    async fn open(
        &self,
        listen_addr: SocketAddr,
    ) -> Result<Box<dyn Socket>, anyhow::Error> {
        let socket = UdpSocket::bind(listen_addr).await?;
        info!(listen_addr = %listen_addr, "Gossip socket is listening.");

        Ok(Box::new(SealedUdpSocket {
            key: self.key.clone(),
            socket,
            buffer: vec![0; MAX_DATAGRAM_SIZE],
        }))
    }
}

pub struct SealedUdpSocket {
    key: SecretKey,
    socket: UdpSocket,
    buffer: Vec<u8>,
}

#[async_trait]
impl Socket for SealedUdpSocket {
    async fn send(
        &mut self,
        to: SocketAddr,
        msg: ChitchatMessage,
    ) -> Result<(), anyhow::Error> {
        trace!(to = %to, msg = ?msg, "Gossip send");
        let frame = self.key.seal(&msg.serialize_to_vec());
        self.socket.send_to(&frame, to).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<(SocketAddr, ChitchatMessage), anyhow::Error> {
        loop {
            let (len, from) = self.socket.recv_from(&mut self.buffer).await?;

            let mut payload = match self.key.open(&self.buffer[..len]) {
                Some(payload) => payload,
                None => {
                    warn!(from = %from, "Dropping gossip packet with an invalid authentication tag.");
                    continue;
                },
            };

            match <ChitchatMessage as Serializable>::deserialize(&mut payload) {
                Ok(msg) => return Ok((from, msg)),
                Err(error) => {
                    warn!(from = %from, error = ?error, "Dropping malformed gossip packet.");
                },
            }
        }
    }
}
