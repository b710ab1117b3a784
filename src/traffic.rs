//! Outbound and inbound packet streams.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use std::collections::VecDeque;

use pretty_hex::PrettyHex;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::encrypt::{DirKeys, RecvContext, SendContext};
use crate::packets::{Category, Packet};
use crate::sshwire;

/// Encoded output waiting for the writer task.
///
/// All encoding happens here so that sequence numbers and cipher state
/// advance in the order packets are written.
#[derive(Debug)]
pub(crate) struct TrafOut {
    buf: Vec<u8>,
    send: SendContext,
    /// Payloads held while a key exchange runs
    queued: VecDeque<Vec<u8>>,
    /// From our `KexInit` until our `NewKeys`
    kex_active: bool,
    /// Bytes encoded since keys were last installed
    bytes: u64,
    closed: bool,
}

impl TrafOut {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            send: SendContext::new(),
            queued: VecDeque::new(),
            // Nothing but kex packets until the first exchange completes
            kex_active: true,
            bytes: 0,
            closed: false,
        }
    }

    /// Serializes and encrypts a packet to send, or queues it
    /// if a key exchange is running.
    pub fn send<'p, P: Into<Packet<'p>>>(&mut self, p: P) -> Result<()> {
        let p = p.into();
        trace!("send {p:?}");
        let payload = sshwire::ssh_to_vec(&p)?;
        self.send_payload(payload, p.category())
    }

    pub fn send_payload(&mut self, payload: Vec<u8>, cat: Category) -> Result<()> {
        if self.closed {
            return Err(Error::SessionClosed);
        }
        if self.kex_active && !matches!(cat, Category::All | Category::Kex) {
            trace!("queued during kex, {} waiting", self.queued.len() + 1);
            self.queued.push_back(payload);
            return Ok(());
        }
        self.encode(&payload)
    }

    fn encode(&mut self, payload: &[u8]) -> Result<()> {
        let start = self.buf.len();
        let seq = self.send.encode(payload, &mut self.buf)?;
        let len = self.buf.len() - start;
        trace!("seq {seq} payload {:?}", payload.hex_dump());
        self.bytes += len as u64;
        Ok(())
    }

    /// Called when our `KexInit` is sent
    pub fn start_kex(&mut self) {
        self.kex_active = true;
    }

    /// Takes new outbound keys into use, immediately after sending `NewKeys`.
    /// Payloads queued during the exchange are sent in order.
    pub fn rekey(&mut self, keys: DirKeys) -> Result<()> {
        self.send.rekey(keys);
        self.kex_active = false;
        self.bytes = 0;
        if !self.queued.is_empty() {
            trace!("sending {} queued", self.queued.len());
        }
        while let Some(p) = self.queued.pop_front() {
            self.encode(&p)?;
        }
        Ok(())
    }

    pub fn activate_compression(&mut self) {
        self.send.activate_compression()
    }

    pub fn kex_active(&self) -> bool {
        self.kex_active
    }

    /// Bytes sent with the current keys
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn has_output(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Returns all pending output
    pub fn take_output(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.buf)
    }

    /// Discards queued payloads and keys. Already encoded output
    /// is kept so a final `Disconnect` can be written.
    pub fn close(&mut self) {
        self.closed = true;
        self.queued.clear();
        self.send = SendContext::new();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Reads packets from the transport
pub(crate) struct TrafIn<R> {
    r: R,
    recv: RecvContext,
    /// Bytes received since keys were last installed
    bytes: u64,
}

impl<R: AsyncRead + Unpin> TrafIn<R> {
    pub fn new(r: R) -> Self {
        Self { r, recv: RecvContext::new(), bytes: 0 }
    }

    /// Reads the next packet, returning the payload and sequence number.
    ///
    /// Dropping the future part way through a packet leaves the stream
    /// unusable.
    pub async fn read_packet(&mut self) -> Result<(Vec<u8>, u32)> {
        let mut buf = vec![0u8; self.recv.size_block()];
        self.r.read_exact(&mut buf).await?;
        let total = self.recv.decrypt_first_block(&mut buf)?;

        let first = buf.len();
        buf.resize(total, 0);
        self.r.read_exact(&mut buf[first..]).await?;
        self.bytes += total as u64;

        let seq = self.recv.open(&mut buf)?;
        Ok((buf, seq))
    }

    /// Takes new inbound keys into use, from the next packet
    pub fn rekey(&mut self, keys: DirKeys) {
        self.recv.rekey(keys);
        self.bytes = 0;
    }

    pub fn activate_compression(&mut self) {
        self.recv.activate_compression()
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}
