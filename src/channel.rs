//! Channel state for the connection protocol, RFC4254.
//!
//! The table here is driven by `Conn` under the session lock. Application
//! handles in `async_channel` wait on the oneshots, `Notify` and event
//! queues that each `Channel` holds.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Notify};

use crate::error;
use crate::packets::{self, ChannelOpen, ChannelOpenType, ChannelReqType, ChannelRequest};
use crate::sshnames::*;
use crate::sshwire::BinString;
use crate::traffic::TrafOut;

/// A SSH protocol channel number
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct ChanNum(pub u32);

impl core::fmt::Display for ChanNum {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.0.fmt(f)
    }
}

/// The type of channel to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChanOpen {
    /// An interactive session, for a shell, command or subsystem
    Session,
    /// A TCP connection made by the server, `direct-tcpip`
    DirectTcpip { host: String, port: u32, origin: String, origin_port: u32 },
}

impl ChanOpen {
    fn packet(&self) -> ChannelOpenType<'_> {
        match self {
            ChanOpen::Session => ChannelOpenType::Session,
            ChanOpen::DirectTcpip { host, port, origin, origin_port } => {
                ChannelOpenType::DirectTcpip(packets::DirectTcpip {
                    address: host.as_str().into(),
                    port: *port,
                    origin: origin.as_str().into(),
                    origin_port: *origin_port,
                })
            }
        }
    }
}

/// Pseudo-terminal parameters for a `pty-req`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pty {
    /// `TERM` environment value, eg `xterm-256color`
    pub term: String,
    pub cols: u32,
    pub rows: u32,
    pub width: u32,
    pub height: u32,
    /// Encoded terminal modes, RFC4254 section 8
    pub modes: Vec<u8>,
}

/// A channel request sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReqDetails {
    Shell,
    Exec(String),
    Subsystem(String),
    Pty(Pty),
    WinChange(packets::WinChange),
    Env { name: String, value: String },
    Signal(String),
    Break(u32),
}

impl ReqDetails {
    fn packet(&self) -> ChannelReqType<'_> {
        match self {
            ReqDetails::Shell => ChannelReqType::Shell,
            ReqDetails::Exec(cmd) => {
                ChannelReqType::Exec(packets::Exec { command: cmd.as_str().into() })
            }
            ReqDetails::Subsystem(s) => {
                ChannelReqType::Subsystem(packets::Subsystem { subsystem: s.as_str().into() })
            }
            ReqDetails::Pty(pty) => ChannelReqType::Pty(packets::PtyReq {
                term: pty.term.as_str().into(),
                cols: pty.cols,
                rows: pty.rows,
                width: pty.width,
                height: pty.height,
                modes: BinString(&pty.modes),
            }),
            ReqDetails::WinChange(w) => ChannelReqType::WinChange(w.clone()),
            ReqDetails::Env { name, value } => ChannelReqType::Env(packets::Env {
                name: name.as_str().into(),
                value: value.as_str().into(),
            }),
            ReqDetails::Signal(sig) => {
                ChannelReqType::Signal(packets::Signal { sig: sig.as_str() })
            }
            ReqDetails::Break(length) => {
                ChannelReqType::Break(packets::Break { length: *length })
            }
        }
    }
}

/// Inbound channel traffic, in the order it arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChanEvent {
    Data(Vec<u8>),
    /// Extended data with its type code, `1` is stderr
    ExtData(u32, Vec<u8>),
    /// The server will send no more data
    Eof,
    ExitStatus(u32),
    ExitSignal { signal: String, core_dumped: bool, error: String },
}

/// Where a `forwarded-tcpip` connection came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardInfo {
    /// The forwarded address and port, as requested
    pub address: String,
    pub port: u32,
    pub origin: String,
    pub origin_port: u32,
}

/// The pieces an application channel handle is built from
#[derive(Debug)]
pub(crate) struct ChanParts {
    pub num: ChanNum,
    pub events: mpsc::UnboundedReceiver<ChanEvent>,
    pub credit: Arc<Notify>,
}

type OpenReply = oneshot::Sender<Result<()>>;

#[derive(Debug)]
enum ChanState {
    /// Waiting for the server to confirm our open
    Opening(OpenReply),
    Open,
}

/// The remote side's receive limits
#[derive(Debug)]
struct SendDir {
    num: u32,
    window: u32,
    max_packet: u32,
}

#[derive(Debug)]
struct Channel {
    state: ChanState,
    send: SendDir,

    /// Remaining window granted to the server
    recv_window: u32,
    /// Window given at open, for deciding when to adjust
    init_window: u32,
    max_packet: u32,
    /// Consumed data not yet returned to the window
    pending_adjust: u32,

    /// Waiting for CHANNEL_SUCCESS/FAILURE, in send order
    replies: VecDeque<oneshot::Sender<bool>>,
    events: mpsc::UnboundedSender<ChanEvent>,
    credit: Arc<Notify>,

    sent_eof: bool,
    sent_close: bool,
    recv_eof: bool,
    recv_close: bool,
}

impl Channel {
    fn new(num: ChanNum, state: ChanState, window: u32, max_packet: u32) -> (Self, ChanParts) {
        let (tx, rx) = mpsc::unbounded_channel();
        let credit = Arc::new(Notify::new());
        let ch = Channel {
            state,
            send: SendDir { num: 0, window: 0, max_packet: 0 },
            recv_window: window,
            init_window: window,
            max_packet,
            pending_adjust: 0,
            replies: VecDeque::new(),
            events: tx,
            credit: credit.clone(),
            sent_eof: false,
            sent_close: false,
            recv_eof: false,
            recv_close: false,
        };
        (ch, ChanParts { num, events: rx, credit })
    }

    fn is_open(&self) -> bool {
        matches!(self.state, ChanState::Open)
    }

    fn event(&self, ev: ChanEvent) {
        // The application may have dropped its handle
        if self.events.send(ev).is_err() {
            trace!("channel event dropped");
        }
    }

    /// Returns a window adjustment packet if required
    fn check_window_adjust(&mut self) -> Option<packets::ChannelWindowAdjust> {
        if self.pending_adjust > self.init_window / 2 {
            let adjust = self.pending_adjust;
            self.pending_adjust = 0;
            self.recv_window = self.recv_window.saturating_add(adjust);
            Some(packets::ChannelWindowAdjust { num: self.send.num, adjust })
        } else {
            None
        }
    }

    /// Accepts inbound data against our window
    fn recv_data(&mut self, num: ChanNum, len: usize) -> Result<()> {
        let len = u32::try_from(len).map_err(|_| Error::WindowExceeded { num })?;
        if len > self.recv_window {
            debug!("Channel {num} data {len} exceeds window {}", self.recv_window);
            return Err(Error::WindowExceeded { num });
        }
        if len > self.max_packet {
            debug!("Channel {num} packet {len} exceeds max {}", self.max_packet);
            return Err(Error::SSHProtoError);
        }
        if self.recv_eof {
            warn!("Channel {num} data after EOF");
        }
        self.recv_window -= len;
        Ok(())
    }

    /// Releases anything waiting on the channel
    fn release(self, err: impl FnOnce() -> Error) {
        if let ChanState::Opening(tx) = self.state {
            let _ = tx.send(Err(err()));
        }
        // Dropping `replies` and `events` wakes their receivers
        self.credit.notify_waiters();
    }
}

/// The session's channels, indexed by our channel number.
#[derive(Debug)]
pub(crate) struct Channels {
    ch: Vec<Option<Channel>>,
    max: usize,
    /// Limits for channels the server opens
    window: u32,
    max_packet: u32,
    /// Remote forwards the server has accepted
    forwards: Vec<(String, u32)>,
    /// Dropped at close so `accept_forwarded()` returns
    forwarded: Option<mpsc::UnboundedSender<(ChanParts, ForwardInfo)>>,
}

impl Channels {
    pub fn new(
        max: usize,
        window: u32,
        max_packet: u32,
        forwarded: mpsc::UnboundedSender<(ChanParts, ForwardInfo)>,
    ) -> Self {
        Channels {
            ch: Vec::new(),
            max,
            window,
            max_packet,
            forwards: Vec::new(),
            forwarded: Some(forwarded),
        }
    }

    /// Returns a `Channel` for a local number, any state including `Opening`.
    fn get_any_mut(&mut self, num: ChanNum) -> Result<&mut Channel> {
        self.ch
            .get_mut(num.0 as usize)
            // out of range
            .ok_or(error::BadChannel { num }.build())?
            .as_mut()
            // unused channel
            .ok_or(error::BadChannel { num }.build())
    }

    /// Returns an open `Channel`
    fn get_mut(&mut self, num: ChanNum) -> Result<&mut Channel> {
        let ch = self.get_any_mut(num)?;
        if ch.is_open() {
            Ok(ch)
        } else {
            error::BadChannel { num }.fail()
        }
    }

    /// Finds the lowest free slot
    fn unused_chan(&mut self) -> Result<ChanNum> {
        if let Some(i) = self.ch.iter().position(|c| c.is_none()) {
            return Ok(ChanNum(i as u32));
        }
        if self.ch.len() < self.max {
            self.ch.push(None);
            Ok(ChanNum((self.ch.len() - 1) as u32))
        } else {
            Err(Error::NoChannels)
        }
    }

    fn remove(&mut self, num: ChanNum) -> Result<()> {
        let ch = self.ch.get_mut(num.0 as usize).and_then(|c| c.take()).trap()?;
        trace!("channel {num} removed");
        ch.release(|| Error::ChannelEOF);
        Ok(())
    }

    /// Removes the channel once CLOSE has gone both ways
    fn check_done(&mut self, num: ChanNum) -> Result<()> {
        let ch = self.get_any_mut(num)?;
        if ch.sent_close && ch.recv_close {
            self.remove(num)?;
        }
        Ok(())
    }

    /// Sends a `CHANNEL_OPEN`. The receiver completes when the server replies.
    pub fn open(
        &mut self,
        ty: &ChanOpen,
        window: u32,
        max_packet: u32,
        traf: &mut TrafOut,
    ) -> Result<(ChanParts, oneshot::Receiver<Result<()>>)> {
        if window == 0 || max_packet == 0 {
            return Err(Error::BadUsage { msg: "Zero window or max packet" });
        }
        let num = self.unused_chan()?;
        let p = ChannelOpen { num: num.0, initial_window: window, max_packet, ty: ty.packet() };
        traf.send(p)?;

        let (tx, rx) = oneshot::channel();
        let (ch, parts) = Channel::new(num, ChanState::Opening(tx), window, max_packet);
        self.ch[num.0 as usize] = Some(ch);
        debug!("Opening channel {num}");
        Ok((parts, rx))
    }

    pub fn handle_open_confirmation(&mut self, p: &packets::ChannelOpenConfirmation) -> Result<()> {
        let num = ChanNum(p.num);
        let ch = self.get_any_mut(num)?;
        let ChanState::Opening(_) = ch.state else {
            debug!("Channel {num} is already open");
            return Err(Error::SSHProtoError);
        };
        ch.send = SendDir { num: p.sender_num, window: p.initial_window, max_packet: p.max_packet };
        if let ChanState::Opening(tx) = core::mem::replace(&mut ch.state, ChanState::Open) {
            let _ = tx.send(Ok(()));
        }
        debug!("Channel {num} open, remote {} window {}", p.sender_num, p.initial_window);
        Ok(())
    }

    pub fn handle_open_failure(&mut self, p: &packets::ChannelOpenFailure) -> Result<()> {
        let num = ChanNum(p.num);
        let ch = self.get_any_mut(num)?;
        if ch.is_open() {
            return Err(Error::SSHProtoError);
        }
        let desc = p.desc.to_string_lossy();
        debug!("Channel {num} open failed, reason {}: {desc:?}", p.reason);
        let reason = p.reason;
        // Nothing was agreed with the server so the slot is free now
        let ch = self.ch[num.0 as usize].take().trap()?;
        ch.release(|| Error::ChannelOpenFail { reason, desc });
        Ok(())
    }

    /// Handles a `CHANNEL_OPEN` from the server. Only `forwarded-tcpip` for
    /// a registered forward is accepted.
    pub fn handle_open(&mut self, p: &ChannelOpen, traf: &mut TrafOut) -> Result<()> {
        let refuse = |reason: ChanFail, traf: &mut TrafOut| {
            debug!("Refusing channel open {:?}, {reason:?}", p.ty);
            traf.send(packets::ChannelOpenFailure {
                num: p.num,
                reason: reason as u32,
                desc: "".into(),
                lang: "",
            })
        };

        let fwd = match &p.ty {
            ChannelOpenType::ForwardedTcpip(f) => f,
            ChannelOpenType::Unknown(_) => {
                return refuse(ChanFail::SSH_OPEN_UNKNOWN_CHANNEL_TYPE, traf)
            }
            _ => return refuse(ChanFail::SSH_OPEN_ADMINISTRATIVELY_PROHIBITED, traf),
        };

        let info = ForwardInfo {
            address: fwd.address.to_string_lossy(),
            port: fwd.port,
            origin: fwd.origin.to_string_lossy(),
            origin_port: fwd.origin_port,
        };
        if !self.forwards.iter().any(|(a, port)| *a == info.address && *port == info.port) {
            return refuse(ChanFail::SSH_OPEN_ADMINISTRATIVELY_PROHIBITED, traf);
        }

        let Ok(num) = self.unused_chan() else {
            return refuse(ChanFail::SSH_OPEN_RESOURCE_SHORTAGE, traf);
        };
        let (window, max_packet) = (self.window, self.max_packet);
        let (mut ch, parts) = Channel::new(num, ChanState::Open, window, max_packet);
        ch.send = SendDir { num: p.num, window: p.initial_window, max_packet: p.max_packet };
        traf.send(packets::ChannelOpenConfirmation {
            num: p.num,
            sender_num: num.0,
            initial_window: window,
            max_packet,
        })?;
        self.ch[num.0 as usize] = Some(ch);
        debug!("Accepted forwarded channel {num} from {}:{}", info.origin, info.origin_port);

        let sent = self.forwarded.as_ref().map(|f| f.send((parts, info)).is_ok());
        if sent != Some(true) {
            // Session handle is gone
            let ch = self.get_mut(num)?;
            ch.sent_close = true;
            traf.send(packets::ChannelClose { num: p.num })?;
        }
        Ok(())
    }

    pub fn add_forward(&mut self, address: &str, port: u32) {
        self.forwards.push((address.into(), port));
    }

    pub fn remove_forward(&mut self, address: &str, port: u32) {
        self.forwards.retain(|(a, p)| !(a == address && *p == port));
    }

    pub fn handle_window_adjust(&mut self, p: &packets::ChannelWindowAdjust) -> Result<()> {
        let num = ChanNum(p.num);
        let ch = self.get_mut(num)?;
        ch.send.window = ch.send.window.checked_add(p.adjust).ok_or_else(|| {
            debug!("Channel {num} window overflow");
            Error::SSHProtoError
        })?;
        trace!("channel {num} window {}", ch.send.window);
        ch.credit.notify_waiters();
        Ok(())
    }

    pub fn handle_data(&mut self, p: &packets::ChannelData) -> Result<()> {
        let num = ChanNum(p.num);
        let ch = self.get_mut(num)?;
        ch.recv_data(num, p.data.0.len())?;
        ch.event(ChanEvent::Data(p.data.0.to_vec()));
        Ok(())
    }

    pub fn handle_data_ext(&mut self, p: &packets::ChannelDataExt) -> Result<()> {
        let num = ChanNum(p.num);
        let ch = self.get_mut(num)?;
        ch.recv_data(num, p.data.0.len())?;
        if p.code != SSH_EXTENDED_DATA_STDERR {
            trace!("channel {num} extended data type {}", p.code);
        }
        ch.event(ChanEvent::ExtData(p.code, p.data.0.to_vec()));
        Ok(())
    }

    pub fn handle_eof(&mut self, p: &packets::ChannelEof) -> Result<()> {
        let num = ChanNum(p.num);
        let ch = self.get_mut(num)?;
        ch.recv_eof = true;
        ch.event(ChanEvent::Eof);
        Ok(())
    }

    pub fn handle_close(&mut self, p: &packets::ChannelClose, traf: &mut TrafOut) -> Result<()> {
        let num = ChanNum(p.num);
        let ch = self.get_mut(num)?;
        ch.recv_close = true;
        if !ch.sent_close {
            traf.send(packets::ChannelClose { num: ch.send.num })?;
            ch.sent_close = true;
        }
        self.check_done(num)
    }

    pub fn handle_request(&mut self, p: &ChannelRequest, traf: &mut TrafOut) -> Result<()> {
        let num = ChanNum(p.num);
        let ch = self.get_mut(num)?;
        match &p.req {
            ChannelReqType::ExitStatus(s) => ch.event(ChanEvent::ExitStatus(s.status)),
            ChannelReqType::ExitSignal(s) => ch.event(ChanEvent::ExitSignal {
                signal: s.signal.into(),
                core_dumped: s.core,
                error: s.error.to_string_lossy(),
            }),
            r => {
                debug!("Unhandled channel request {r:?}");
                if p.want_reply {
                    traf.send(packets::ChannelFailure { num: ch.send.num })?;
                }
            }
        }
        Ok(())
    }

    /// Completes the oldest outstanding request on the channel
    pub fn handle_reply(&mut self, num: u32, success: bool) -> Result<()> {
        let num = ChanNum(num);
        let ch = self.get_mut(num)?;
        let Some(tx) = ch.replies.pop_front() else {
            debug!("Channel {num} reply without request");
            return Err(Error::SSHProtoError);
        };
        let _ = tx.send(success);
        Ok(())
    }

    /// Sends as much of `data` as the window allows, returning the length sent.
    ///
    /// Returns `Ok(0)` when there is no credit, the caller should wait
    /// on the channel's credit `Notify`.
    pub fn send_data(
        &mut self,
        num: ChanNum,
        ext: Option<u32>,
        data: &[u8],
        traf: &mut TrafOut,
    ) -> Result<usize> {
        let ch = self.get_mut(num)?;
        if ch.sent_eof || ch.sent_close || ch.recv_close {
            return Err(Error::ChannelEOF);
        }
        let credit = ch.send.window.min(ch.send.max_packet) as usize;
        let len = credit.min(data.len());
        if len == 0 {
            return Ok(0);
        }
        let data = BinString(&data[..len]);
        let remote = ch.send.num;
        match ext {
            None => traf.send(packets::ChannelData { num: remote, data })?,
            Some(code) => traf.send(packets::ChannelDataExt { num: remote, code, data })?,
        }
        // OK cast: len <= window
        ch.send.window -= len as u32;
        Ok(len)
    }

    /// Currently available send credit
    pub fn send_credit(&mut self, num: ChanNum) -> Result<u32> {
        let ch = self.get_mut(num)?;
        Ok(ch.send.window.min(ch.send.max_packet))
    }

    /// Sends a channel request. With `want_reply` the receiver completes
    /// with the server's answer.
    pub fn send_request(
        &mut self,
        num: ChanNum,
        req: &ReqDetails,
        want_reply: bool,
        traf: &mut TrafOut,
    ) -> Result<Option<oneshot::Receiver<bool>>> {
        let ch = self.get_mut(num)?;
        if ch.sent_close {
            return Err(Error::ChannelEOF);
        }
        traf.send(ChannelRequest { num: ch.send.num, want_reply, req: req.packet() })?;
        if want_reply {
            let (tx, rx) = oneshot::channel();
            ch.replies.push_back(tx);
            Ok(Some(rx))
        } else {
            Ok(None)
        }
    }

    pub fn send_eof(&mut self, num: ChanNum, traf: &mut TrafOut) -> Result<()> {
        let ch = self.get_mut(num)?;
        if ch.sent_eof || ch.sent_close {
            return Ok(());
        }
        traf.send(packets::ChannelEof { num: ch.send.num })?;
        ch.sent_eof = true;
        Ok(())
    }

    pub fn send_close(&mut self, num: ChanNum, traf: &mut TrafOut) -> Result<()> {
        let ch = self.get_mut(num)?;
        if ch.sent_close {
            return Ok(());
        }
        traf.send(packets::ChannelClose { num: ch.send.num })?;
        ch.sent_close = true;
        // No more sends
        ch.credit.notify_waiters();
        self.check_done(num)
    }

    /// Records that the application has consumed `len` bytes, sending
    /// a window adjustment when enough has accumulated.
    pub fn consumed(&mut self, num: ChanNum, len: usize, traf: &mut TrafOut) -> Result<()> {
        let Ok(ch) = self.get_mut(num) else {
            // Already closed
            return Ok(());
        };
        ch.pending_adjust = ch.pending_adjust.saturating_add(len as u32);
        if ch.recv_close || ch.sent_close {
            return Ok(());
        }
        if let Some(p) = ch.check_window_adjust() {
            trace!("channel {num} adjust {}", p.adjust);
            traf.send(p)?;
        }
        Ok(())
    }

    /// Grants the server extra window beyond the automatic adjustments
    pub fn adjust_window(&mut self, num: ChanNum, adjust: u32, traf: &mut TrafOut) -> Result<()> {
        let ch = self.get_mut(num)?;
        if ch.sent_close {
            return Err(Error::ChannelEOF);
        }
        ch.recv_window = ch
            .recv_window
            .checked_add(adjust)
            .ok_or(Error::BadUsage { msg: "Window would exceed 2^32-1" })?;
        traf.send(packets::ChannelWindowAdjust { num: ch.send.num, adjust })
    }

    /// Releases all channels at session teardown
    pub fn close_all(&mut self) {
        for c in self.ch.iter_mut() {
            if let Some(ch) = c.take() {
                ch.release(|| Error::SessionClosed);
            }
        }
        self.forwards.clear();
        self.forwarded = None;
    }
}

#[cfg(test)]
mod tests {
    use crate::channel::*;
    use crate::encrypt::DirKeys;
    use crate::gloamlog::init_test_log;
    use crate::packets::{ChannelOpenConfirmation, ChannelWindowAdjust, Packet, ParseContext};
    use crate::sshwire::packet_from_bytes;
    use crate::traffic::TrafIn;

    fn setup() -> (Channels, TrafOut, mpsc::UnboundedReceiver<(ChanParts, ForwardInfo)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut t = TrafOut::new();
        t.rekey(DirKeys::new_cleartext()).unwrap();
        (Channels::new(4, 64, 32, tx), t, rx)
    }

    /// Decodes everything sent, calling `f` with each packet
    async fn sent(t: &mut TrafOut, mut f: impl FnMut(Packet)) {
        let out = t.take_output();
        let mut tin = TrafIn::new(out.as_slice());
        let ctx = ParseContext::new();
        while let Ok((p, _)) = tin.read_packet().await {
            f(packet_from_bytes(&p, &ctx).unwrap());
        }
    }

    fn open(c: &mut Channels, t: &mut TrafOut, window: u32, remote: u32) -> ChanParts {
        let (parts, mut rx) = c.open(&ChanOpen::Session, 64, 32, t).unwrap();
        c.handle_open_confirmation(&ChannelOpenConfirmation {
            num: parts.num.0,
            sender_num: remote,
            initial_window: window,
            max_packet: 1000,
        })
        .unwrap();
        rx.try_recv().unwrap().unwrap();
        parts
    }

    #[tokio::test]
    async fn window_credit() {
        init_test_log();
        let (mut c, mut t, _) = setup();
        let parts = open(&mut c, &mut t, 1500, 7);
        t.take_output();

        let data = vec![0x55u8; 4000];
        // limited by max_packet
        assert_eq!(c.send_data(parts.num, None, &data, &mut t).unwrap(), 1000);
        assert_eq!(c.send_data(parts.num, None, &data, &mut t).unwrap(), 500);
        assert_eq!(c.send_data(parts.num, None, &data, &mut t).unwrap(), 0);
        assert_eq!(c.send_credit(parts.num).unwrap(), 0);

        c.handle_window_adjust(&ChannelWindowAdjust { num: parts.num.0, adjust: 300 }).unwrap();
        assert_eq!(c.send_data(parts.num, Some(1), &data, &mut t).unwrap(), 300);

        let mut total = 0;
        sent(&mut t, |p| match p {
            Packet::ChannelData(d) => {
                assert_eq!(d.num, 7);
                total += d.data.0.len();
            }
            Packet::ChannelDataExt(d) => {
                assert_eq!(d.code, 1);
                total += d.data.0.len();
            }
            p => panic!("{p:?}"),
        })
        .await;
        assert_eq!(total, 1800);

        // overflowing the window is an error
        c.handle_window_adjust(&ChannelWindowAdjust { num: parts.num.0, adjust: u32::MAX }).unwrap();
        let r = c.handle_window_adjust(&ChannelWindowAdjust { num: parts.num.0, adjust: 1 });
        assert!(matches!(r, Err(Error::SSHProtoError)));
    }

    #[tokio::test]
    async fn inbound_window() {
        init_test_log();
        let (mut c, mut t, _) = setup();
        let mut parts = open(&mut c, &mut t, 100, 3);
        t.take_output();

        let d = [1u8; 30];
        c.handle_data(&packets::ChannelData { num: parts.num.0, data: BinString(&d) }).unwrap();
        c.handle_data(&packets::ChannelData { num: parts.num.0, data: BinString(&d) }).unwrap();
        assert_eq!(parts.events.try_recv().unwrap(), ChanEvent::Data(d.to_vec()));

        // below half the window, no adjust
        c.consumed(parts.num, 30, &mut t).unwrap();
        assert!(!t.has_output());
        c.consumed(parts.num, 30, &mut t).unwrap();
        let mut adj = vec![];
        sent(&mut t, |p| match p {
            Packet::ChannelWindowAdjust(a) => adj.push((a.num, a.adjust)),
            p => panic!("{p:?}"),
        })
        .await;
        assert_eq!(adj, vec![(3, 60)]);

        // window is back to 64
        let big = [0u8; 31];
        c.handle_data(&packets::ChannelData { num: parts.num.0, data: BinString(&big[..30]) })
            .unwrap();
        c.handle_data(&packets::ChannelData { num: parts.num.0, data: BinString(&big) }).unwrap();
        let r = c.handle_data(&packets::ChannelData { num: parts.num.0, data: BinString(&big[..4]) });
        assert!(matches!(r, Err(Error::WindowExceeded { .. })));
    }

    #[tokio::test]
    async fn replies_fifo() {
        init_test_log();
        let (mut c, mut t, _) = setup();
        let parts = open(&mut c, &mut t, 100, 3);

        let mut r1 = c.send_request(parts.num, &ReqDetails::Shell, true, &mut t).unwrap().unwrap();
        let none = c.send_request(parts.num, &ReqDetails::Break(10), false, &mut t).unwrap();
        assert!(none.is_none());
        let mut r2 = c
            .send_request(parts.num, &ReqDetails::Exec("ls".into()), true, &mut t)
            .unwrap()
            .unwrap();

        c.handle_reply(parts.num.0, false).unwrap();
        c.handle_reply(parts.num.0, true).unwrap();
        assert!(!r1.try_recv().unwrap());
        assert!(r2.try_recv().unwrap());

        // unsolicited
        assert!(matches!(c.handle_reply(parts.num.0, true), Err(Error::SSHProtoError)));
    }

    #[tokio::test]
    async fn close_both_ways() {
        init_test_log();
        let (mut c, mut t, _) = setup();
        let mut p0 = open(&mut c, &mut t, 100, 10);
        let p1 = open(&mut c, &mut t, 100, 11);
        assert_eq!((p0.num.0, p1.num.0), (0, 1));
        t.take_output();

        // server closes first, we reply
        c.handle_eof(&packets::ChannelEof { num: 0 }).unwrap();
        c.handle_close(&packets::ChannelClose { num: 0 }, &mut t).unwrap();
        let mut closes = vec![];
        sent(&mut t, |p| match p {
            Packet::ChannelClose(c) => closes.push(c.num),
            p => panic!("{p:?}"),
        })
        .await;
        assert_eq!(closes, vec![10]);
        assert_eq!(p0.events.try_recv().unwrap(), ChanEvent::Eof);
        assert!(matches!(
            p0.events.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));

        // slot 0 is reused
        let p2 = open(&mut c, &mut t, 100, 12);
        assert_eq!(p2.num.0, 0);

        // we close first, the slot stays until the server's close
        c.send_close(p1.num, &mut t).unwrap();
        assert!(matches!(c.send_data(p1.num, None, b"x", &mut t), Err(Error::ChannelEOF)));
        let p3 = open(&mut c, &mut t, 100, 13);
        assert_eq!(p3.num.0, 2);
        c.handle_close(&packets::ChannelClose { num: 1 }, &mut t).unwrap();
        let p4 = open(&mut c, &mut t, 100, 14);
        assert_eq!(p4.num.0, 1);
    }

    #[test]
    fn open_failure() {
        init_test_log();
        let (mut c, mut t, _) = setup();
        let (parts, mut rx) = c.open(&ChanOpen::Session, 64, 32, &mut t).unwrap();
        c.handle_open_failure(&packets::ChannelOpenFailure {
            num: parts.num.0,
            reason: 1,
            desc: "no".into(),
            lang: "",
        })
        .unwrap();
        let r = rx.try_recv().unwrap();
        assert!(matches!(r, Err(Error::ChannelOpenFail { reason: 1, .. })));
        // slot is free again
        let (parts, _rx) = c.open(&ChanOpen::Session, 64, 32, &mut t).unwrap();
        assert_eq!(parts.num.0, 0);
    }

    #[test]
    fn limit() {
        init_test_log();
        let (mut c, mut t, _) = setup();
        let mut keep = vec![];
        for _ in 0..4 {
            keep.push(c.open(&ChanOpen::Session, 64, 32, &mut t).unwrap());
        }
        assert!(matches!(c.open(&ChanOpen::Session, 64, 32, &mut t), Err(Error::NoChannels)));
        c.close_all();
        let r = keep[0].1.try_recv().unwrap();
        assert!(matches!(r, Err(Error::SessionClosed)));
    }

    #[tokio::test]
    async fn forwarded_open() {
        init_test_log();
        let (mut c, mut t, mut fwd) = setup();
        let open = |port| ChannelOpen {
            num: 40,
            initial_window: 1000,
            max_packet: 100,
            ty: ChannelOpenType::ForwardedTcpip(packets::ForwardedTcpip {
                address: "localhost".into(),
                port,
                origin: "10.0.0.1".into(),
                origin_port: 5555,
            }),
        };

        // not registered
        c.handle_open(&open(2222), &mut t).unwrap();
        c.add_forward("localhost", 2222);
        c.handle_open(&open(2222), &mut t).unwrap();
        let sess = ChannelOpen {
            num: 41,
            initial_window: 1,
            max_packet: 1,
            ty: ChannelOpenType::Session,
        };
        c.handle_open(&sess, &mut t).unwrap();

        let mut replies = vec![];
        sent(&mut t, |p| match p {
            Packet::ChannelOpenFailure(f) => replies.push((f.num, Some(f.reason))),
            Packet::ChannelOpenConfirmation(f) => {
                assert_eq!(f.sender_num, 0);
                replies.push((f.num, None))
            }
            p => panic!("{p:?}"),
        })
        .await;
        assert_eq!(replies, vec![(40, Some(1)), (40, None), (41, Some(1))]);

        let (parts, info) = fwd.try_recv().unwrap();
        assert_eq!(parts.num.0, 0);
        assert_eq!(info.origin, "10.0.0.1");
        assert_eq!(info.port, 2222);
        assert_eq!(c.send_credit(parts.num).unwrap(), 100);
    }
}
