//! Represents the state of a SSH connection.
//!
//! `Conn` is only accessed with the session lock held. Inbound payloads are
//! dispatched here, and everything to be sent is encoded into `traf`.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use std::collections::VecDeque;

use pretty_hex::PrettyHex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::behaviour::CliBehaviour;
use crate::channel::{ChanNum, ChanOpen, ChanParts, Channels, ForwardInfo, ReqDetails};
use crate::cliauth::{self, AuthResult, CliAuth};
use crate::config::Config;
use crate::encrypt::DirKeys;
use crate::kex::{AlgoConfig, Kex, KexPhase, NegotiatedAlgos, SessId};
use crate::packets::{self, AuthMethod, Category, Packet, ParseContext, UserauthRequest};
use crate::sshnames::*;
use crate::sshwire;
use crate::traffic::TrafOut;

/// Externally visible session progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessState {
    /// Waiting for the first key exchange
    Connecting,
    /// Keys are established
    Running,
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// The DISCONNECT reason code sent or received. `None` if the
    /// transport failed without a DISCONNECT.
    pub code: Option<u32>,
    pub desc: String,
    /// Whether the server ended the session
    pub by_peer: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    /// Waiting for first Kex to complete
    FirstKex,
    /// Binary protocol has started, auth hasn't succeeded
    PreAuth,
    /// After auth success
    Authed,
    Closed,
}

/// Changes the reader must make to the inbound stream
/// before reading the next packet.
#[must_use]
#[derive(Debug)]
pub(crate) enum RxUpdate {
    None,
    /// The server's `NewKeys` was received
    NewKeys(DirKeys),
    /// Authentication succeeded, delayed compression starts
    AuthDone,
}

#[derive(Debug)]
enum GlobalReqKind {
    Forward { address: String, port: u32 },
    Cancel,
}

/// A global request awaiting `REQUEST_SUCCESS` or `REQUEST_FAILURE`
#[derive(Debug)]
struct GlobalReq {
    kind: GlobalReqKind,
    reply: oneshot::Sender<Result<u32>>,
}

/// The core state of a SSH client connection.
pub(crate) struct Conn {
    state: ConnState,

    // State of any current Key Exchange
    kex: Kex,
    /// Between the server's `KexInit` and its `NewKeys`
    in_kex: bool,
    last_kex: Instant,

    sess_id: Option<SessId>,
    names: NegotiatedAlgos,
    pending_names: NegotiatedAlgos,

    config: Config,
    algo_conf: AlgoConfig,
    /// Our version line then the server's, for the exchange hash
    versions: (String, String),

    parse_ctx: ParseContext,

    pub traf: TrafOut,
    /// Inbound bytes with the current keys, updated by the reader
    rx_bytes: u64,

    pub channels: Channels,
    auth: CliAuth,
    global_reqs: VecDeque<GlobalReq>,

    behaviour: Box<dyn CliBehaviour>,

    state_tx: watch::Sender<SessState>,
    close_reason: Option<CloseReason>,
    /// The error that ended the session, for `Session::connect()`
    fail: Option<Error>,
}

impl core::fmt::Debug for Conn {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Conn")
            .field("state", &self.state)
            .field("kex", &self.kex)
            .field("in_kex", &self.in_kex)
            .finish_non_exhaustive()
    }
}

impl Conn {
    pub fn new(
        config: Config,
        remote_version: String,
        behaviour: Box<dyn CliBehaviour>,
        forwarded: mpsc::UnboundedSender<(ChanParts, ForwardInfo)>,
        state_tx: watch::Sender<SessState>,
    ) -> Result<Self> {
        let algo_conf = AlgoConfig::new(&config, true)?;
        let channels =
            Channels::new(config.max_channels, config.window, config.max_packet, forwarded);
        Ok(Conn {
            state: ConnState::FirstKex,
            kex: Kex::new(),
            in_kex: false,
            last_kex: Instant::now(),
            sess_id: None,
            names: NegotiatedAlgos::default(),
            pending_names: NegotiatedAlgos::default(),
            versions: (config.version.clone(), remote_version),
            config,
            algo_conf,
            parse_ctx: ParseContext::new(),
            traf: TrafOut::new(),
            rx_bytes: 0,
            channels,
            auth: CliAuth::new(),
            global_reqs: VecDeque::new(),
            behaviour,
            state_tx,
            close_reason: None,
            fail: None,
        })
    }

    /// Sends our initial `KexInit`, without waiting for the server's
    pub fn start(&mut self) -> Result<()> {
        self.kex.send_kexinit(&self.algo_conf, &mut self.traf)
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnState::Closed
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::SessionClosed)
        } else {
            Ok(())
        }
    }

    fn check_authed(&self) -> Result<()> {
        self.check_open()?;
        if self.state == ConnState::Authed {
            Ok(())
        } else {
            Err(Error::BadUsage { msg: "Not authenticated" })
        }
    }

    pub fn kex_phase(&self) -> KexPhase {
        self.kex.phase(self.state != ConnState::FirstKex)
    }

    /// Algorithms of the keys currently in use
    pub fn algorithms(&self) -> &NegotiatedAlgos {
        &self.names
    }

    pub fn server_sig_algs(&self) -> Option<Vec<String>> {
        self.auth.server_sig_algs().map(|a| a.to_vec())
    }

    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    pub fn take_error(&mut self) -> Option<Error> {
        self.fail.take()
    }

    /// Decodes and handles a received packet.
    pub fn handle_payload(&mut self, payload: &[u8], seq: u32, rx_bytes: u64) -> Result<RxUpdate> {
        self.check_open()?;
        self.rx_bytes = rx_bytes;
        self.parse_ctx.kex_gex = self.kex.gex_pending();

        let r = match sshwire::packet_from_bytes(payload, &self.parse_ctx) {
            Ok(p) => {
                let num = p.message_num() as u8;
                let r = self.dispatch_packet(p, payload);
                if let Err(e) = &r {
                    debug!("Error handling {num} packet: {e}");
                }
                r
            }
            Err(Error::UnknownPacket { number }) => {
                if self.in_kex || self.state == ConnState::FirstKex {
                    debug!("Unknown packet {number} during key exchange");
                    return Err(Error::SSHProtoError);
                }
                debug!("Unimplemented packet type {number}");
                self.traf.send(packets::Unimplemented { seq })?;
                Ok(RxUpdate::None)
            }
            Err(e) => {
                debug!("Error decoding packet: {e}");
                trace!("Input:\n{:?}", payload.hex_dump());
                Err(e)
            }
        }?;

        self.check_rekey()?;
        Ok(r)
    }

    /// Check that a packet is received in the correct state
    fn check_packet(&self, p: &Packet) -> Result<()> {
        let cat = p.category();
        let ok = if self.in_kex || self.state == ConnState::FirstKex {
            // Only transport packets during key exchange
            matches!(cat, Category::All | Category::Kex)
        } else {
            match cat {
                Category::All | Category::Kex => true,
                // EXT_INFO may arrive just before USERAUTH_SUCCESS is processed
                Category::Auth => {
                    self.state == ConnState::PreAuth || matches!(p, Packet::ExtInfo(_))
                }
                Category::Sess => self.state == ConnState::Authed,
            }
        };

        if ok {
            Ok(())
        } else {
            debug!("Received unexpected packet {}", p.message_num() as u8);
            trace!("state is {:?}, in kex {}", self.state, self.in_kex);
            Err(Error::SSHProtoError)
        }
    }

    /// `payload` is the raw form of `packet`
    fn dispatch_packet(&mut self, packet: Packet, payload: &[u8]) -> Result<RxUpdate> {
        trace!("Incoming {packet:?}");
        self.check_packet(&packet)?;

        let authed = self.state == ConnState::Authed;
        match packet {
            Packet::KexInit(k) => {
                self.in_kex = true;
                self.handle_kexinit(&k, payload)?;
            }
            Packet::Kex31(p) => {
                self.kex.handle_kex31(
                    &p,
                    &mut self.traf,
                    self.behaviour.as_mut(),
                    &mut self.sess_id,
                    authed,
                )?;
                self.check_newkeys()?;
            }
            Packet::KexGexReply(p) => {
                self.kex.handle_gex_reply(
                    &p,
                    self.behaviour.as_mut(),
                    &mut self.sess_id,
                    authed,
                )?;
                self.check_newkeys()?;
            }
            Packet::NewKeys(_) => {
                let keys = self.kex.handle_newkeys()?;
                self.in_kex = false;
                self.last_kex = Instant::now();
                // the reader resets its count with the new keys
                self.rx_bytes = 0;
                self.names = core::mem::take(&mut self.pending_names);
                debug!("Key exchange complete");
                if self.state == ConnState::FirstKex {
                    self.state = ConnState::PreAuth;
                    self.state_tx.send_replace(SessState::Running);
                }
                return Ok(RxUpdate::NewKeys(keys));
            }
            Packet::KexDHInit(_)
            | Packet::KexGexInit(_)
            | Packet::KexGexRequest(_)
            | Packet::ServiceRequest(_)
            | Packet::UserauthRequest(_) => {
                debug!("Server sent a client packet");
                return Err(Error::SSHProtoError);
            }
            Packet::ExtInfo(p) => {
                self.auth.handle_ext_info(&p);
            }
            Packet::ServiceAccept(p) => {
                self.auth.service_accept(&p, &mut self.traf)?;
            }
            Packet::Ignore(_) => {
                // nothing to do
            }
            Packet::Unimplemented(p) => {
                warn!("Received SSH unimplemented message for seq {}", p.seq);
            }
            Packet::DebugPacket(p) => {
                let level = match p.always_display {
                    true => log::Level::Info,
                    false => log::Level::Debug,
                };
                log!(level, "SSH debug message from remote host: {}", p.message.to_string_lossy());
            }
            Packet::Disconnect(p) => {
                let desc = p.desc.to_string_lossy();
                info!("Server disconnected, reason {}: {desc:?}", p.reason);
                return Err(Error::PeerDisconnect { reason: p.reason, desc });
            }
            Packet::UserauthFailure(p) => {
                self.auth.failure(&p, &mut self.parse_ctx)?;
            }
            Packet::UserauthSuccess(_) => {
                self.auth.success(&mut self.parse_ctx)?;
                self.state = ConnState::Authed;
                self.traf.activate_compression();
                return Ok(RxUpdate::AuthDone);
            }
            Packet::UserauthBanner(p) => {
                self.auth.banner(&p, self.behaviour.as_mut());
            }
            Packet::Userauth60(p) => {
                self.auth.auth60(&p, &mut self.parse_ctx)?;
            }
            Packet::ChannelOpen(p) => self.channels.handle_open(&p, &mut self.traf)?,
            Packet::ChannelOpenConfirmation(p) => self.channels.handle_open_confirmation(&p)?,
            Packet::ChannelOpenFailure(p) => self.channels.handle_open_failure(&p)?,
            Packet::ChannelWindowAdjust(p) => self.channels.handle_window_adjust(&p)?,
            Packet::ChannelData(p) => self.channels.handle_data(&p)?,
            Packet::ChannelDataExt(p) => self.channels.handle_data_ext(&p)?,
            Packet::ChannelEof(p) => self.channels.handle_eof(&p)?,
            Packet::ChannelClose(p) => self.channels.handle_close(&p, &mut self.traf)?,
            Packet::ChannelRequest(p) => self.channels.handle_request(&p, &mut self.traf)?,
            Packet::ChannelSuccess(p) => self.channels.handle_reply(p.num, true)?,
            Packet::ChannelFailure(p) => self.channels.handle_reply(p.num, false)?,
            Packet::GlobalRequest(p) => {
                debug!("Server global request {:?}", p.req);
                if p.want_reply {
                    self.traf.send(packets::RequestFailure {})?;
                }
            }
            Packet::RequestSuccess(p) => {
                let port = match p {
                    packets::RequestSuccess::TcpPort(t) => Some(t.port),
                    packets::RequestSuccess::SuccessEmpty => None,
                };
                self.global_reply(Ok(port))?;
            }
            Packet::RequestFailure(_) => {
                self.global_reply(Err(Error::RequestFailed))?;
            }
        };
        Ok(RxUpdate::None)
    }

    fn handle_kexinit(&mut self, k: &packets::KexInit, payload: &[u8]) -> Result<()> {
        let versions = (self.versions.0.as_str(), self.versions.1.as_str());
        self.kex.handle_kexinit(k, payload, &self.algo_conf, versions, &mut self.traf)?;
        self.pending_names = self.kex.negotiated().cloned().unwrap_or_default();
        Ok(())
    }

    /// Sends `NewKeys` once the exchange has derived keys
    fn check_newkeys(&mut self) -> Result<()> {
        if self.kex.phase(true) == KexPhase::KeysDerived {
            self.kex.send_newkeys(&mut self.traf)?;
        }
        Ok(())
    }

    /// When the reader should next call `check_rekey()`
    pub fn rekey_deadline(&self) -> Instant {
        if self.state == ConnState::FirstKex || !self.kex.is_idle() {
            // checked again once the exchange completes
            Instant::now() + self.config.rekey_interval
        } else {
            self.last_kex + self.config.rekey_interval
        }
    }

    /// Starts a key exchange if either direction has passed its limits
    pub fn check_rekey(&mut self) -> Result<()> {
        if self.state == ConnState::FirstKex || self.is_closed() || !self.kex.is_idle() {
            return Ok(());
        }
        let limit = self.config.rekey_bytes;
        let due = self.traf.bytes() >= limit
            || self.rx_bytes >= limit
            || Instant::now() >= self.rekey_deadline();
        if due {
            debug!("Rekey limit reached");
            self.start_rekey()?;
        }
        Ok(())
    }

    fn start_rekey(&mut self) -> Result<()> {
        self.last_kex = Instant::now();
        self.kex.send_kexinit(&self.algo_conf, &mut self.traf)
    }

    /// Starts a key exchange now, if one isn't already running
    pub fn rekey(&mut self) -> Result<()> {
        self.check_open()?;
        if self.state == ConnState::FirstKex {
            return Err(Error::BadUsage { msg: "First key exchange is running" });
        }
        if self.kex.is_idle() {
            self.start_rekey()?;
        }
        Ok(())
    }

    pub fn userauth(
        &mut self,
        username: &str,
        method: AuthMethod,
    ) -> Result<oneshot::Receiver<Result<AuthResult>>> {
        self.check_open()?;
        if self.state == ConnState::FirstKex {
            return Err(Error::BadUsage { msg: "Key exchange hasn't completed" });
        }
        let req = UserauthRequest {
            username: username.into(),
            service: SSH_SERVICE_CONNECTION,
            method,
        };
        self.auth.request(req, &mut self.traf, &mut self.parse_ctx)
    }

    pub fn auth_sig_msg(&self, username: &str, method: AuthMethod) -> Result<Vec<u8>> {
        let sess_id = self.sess_id.as_ref().ok_or(Error::BadUsage { msg: "No session id yet" })?;
        let req = UserauthRequest {
            username: username.into(),
            service: SSH_SERVICE_CONNECTION,
            method,
        };
        cliauth::auth_sig_msg(sess_id, &req)
    }

    pub fn open_channel(
        &mut self,
        ty: &ChanOpen,
        window: u32,
        max_packet: u32,
    ) -> Result<(ChanParts, oneshot::Receiver<Result<()>>)> {
        self.check_authed()?;
        self.channels.open(ty, window, max_packet, &mut self.traf)
    }

    pub fn chan_defaults(&self) -> (u32, u32) {
        (self.config.window, self.config.max_packet)
    }

    pub fn chan_send(&mut self, num: ChanNum, ext: Option<u32>, data: &[u8]) -> Result<usize> {
        self.check_open()?;
        let n = self.channels.send_data(num, ext, data, &mut self.traf)?;
        self.check_rekey()?;
        Ok(n)
    }

    pub fn chan_request(
        &mut self,
        num: ChanNum,
        req: &ReqDetails,
        want_reply: bool,
    ) -> Result<Option<oneshot::Receiver<bool>>> {
        self.check_open()?;
        self.channels.send_request(num, req, want_reply, &mut self.traf)
    }

    pub fn chan_eof(&mut self, num: ChanNum) -> Result<()> {
        self.check_open()?;
        self.channels.send_eof(num, &mut self.traf)
    }

    pub fn chan_close(&mut self, num: ChanNum) -> Result<()> {
        self.check_open()?;
        self.channels.send_close(num, &mut self.traf)
    }

    /// The application dropped its handle, the channel is closed
    /// if it wasn't already.
    pub fn chan_dropped(&mut self, num: ChanNum) {
        if self.is_closed() {
            return;
        }
        if let Err(e) = self.channels.send_close(num, &mut self.traf) {
            trace!("channel {num} already gone: {e}");
        }
    }

    pub fn chan_consumed(&mut self, num: ChanNum, len: usize) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.channels.consumed(num, len, &mut self.traf)
    }

    pub fn chan_adjust(&mut self, num: ChanNum, adjust: u32) -> Result<()> {
        self.check_open()?;
        self.channels.adjust_window(num, adjust, &mut self.traf)
    }

    /// Sends a `tcpip-forward` request. The reply is the bound port.
    pub fn tcpip_forward(&mut self, address: &str, port: u32) -> Result<oneshot::Receiver<Result<u32>>> {
        self.check_authed()?;
        let req = packets::GlobalRequestMethod::TcpipForward(packets::TcpipForward {
            address: address.into(),
            port,
        });
        let kind = GlobalReqKind::Forward { address: address.into(), port };
        self.global_request(req, kind)
    }

    pub fn cancel_tcpip_forward(
        &mut self,
        address: &str,
        port: u32,
    ) -> Result<oneshot::Receiver<Result<u32>>> {
        self.check_authed()?;
        self.channels.remove_forward(address, port);
        let req = packets::GlobalRequestMethod::CancelTcpipForward(packets::TcpipForward {
            address: address.into(),
            port,
        });
        self.global_request(req, GlobalReqKind::Cancel)
    }

    fn global_request(
        &mut self,
        req: packets::GlobalRequestMethod,
        kind: GlobalReqKind,
    ) -> Result<oneshot::Receiver<Result<u32>>> {
        self.traf.send(packets::GlobalRequest { want_reply: true, req })?;
        let (tx, rx) = oneshot::channel();
        self.global_reqs.push_back(GlobalReq { kind, reply: tx });
        self.update_req_port();
        Ok(rx)
    }

    /// Replies to global requests come in request order
    fn global_reply(&mut self, r: Result<Option<u32>>) -> Result<()> {
        let Some(req) = self.global_reqs.pop_front() else {
            debug!("Global request reply without request");
            return Err(Error::SSHProtoError);
        };
        self.update_req_port();

        let r = match (r, req.kind) {
            (Ok(bound), GlobalReqKind::Forward { address, port }) => {
                let port = if port == 0 { bound.unwrap_or(0) } else { port };
                debug!("Forwarding {address}:{port}");
                self.channels.add_forward(&address, port);
                Ok(port)
            }
            (Ok(_), GlobalReqKind::Cancel) => Ok(0),
            (Err(e), _) => Err(e),
        };
        let _ = req.reply.send(r);
        Ok(())
    }

    /// A `REQUEST_SUCCESS` carries a port only for a port 0 forward
    fn update_req_port(&mut self) {
        self.parse_ctx.req_port = matches!(
            self.global_reqs.front(),
            Some(GlobalReq { kind: GlobalReqKind::Forward { port: 0, .. }, .. })
        );
    }

    /// Sends a DISCONNECT and ends the session
    pub fn disconnect(&mut self, desc: &str) -> Result<()> {
        self.check_open()?;
        self.traf.send(packets::Disconnect {
            reason: SSH_DISCONNECT_BY_APPLICATION,
            desc: desc.into(),
            lang: "",
        })?;
        self.finish(CloseReason {
            code: Some(SSH_DISCONNECT_BY_APPLICATION),
            desc: desc.into(),
            by_peer: false,
        });
        Ok(())
    }

    /// Ends the session when the application has dropped it.
    /// Nothing more is written.
    pub fn abandon(&mut self) {
        if self.is_closed() {
            return;
        }
        self.finish(CloseReason { code: None, desc: "Session dropped".into(), by_peer: false });
    }

    /// Ends the session after a failure, sending a DISCONNECT first
    /// if the error calls for one.
    pub fn teardown(&mut self, e: Error) {
        if self.is_closed() {
            return;
        }
        let reason = match &e {
            Error::PeerDisconnect { reason, desc } => {
                CloseReason { code: Some(*reason), desc: desc.clone(), by_peer: true }
            }
            e => {
                error!("Session failed: {e}");
                let code = e.disconnect_reason();
                if let Some(code) = code {
                    let desc = e.to_string();
                    let r = self.traf.send(packets::Disconnect {
                        reason: code,
                        desc: desc.as_str().into(),
                        lang: "",
                    });
                    if let Err(e) = r {
                        debug!("Couldn't send disconnect: {e}");
                    }
                }
                CloseReason { code, desc: e.to_string(), by_peer: false }
            }
        };
        self.fail = Some(e);
        self.finish(reason);
    }

    fn finish(&mut self, reason: CloseReason) {
        debug!("Session closed: {reason:?}");
        self.traf.close();
        self.channels.close_all();
        self.auth.close();
        for r in self.global_reqs.drain(..) {
            let _ = r.reply.send(Err(Error::SessionClosed));
        }
        self.behaviour.disconnected(&reason.desc);
        self.close_reason = Some(reason);
        self.state = ConnState::Closed;
        self.state_tx.send_replace(SessState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use crate::behaviour::AcceptAnyHostKey;
    use crate::conn::*;
    use crate::gloamlog::init_test_log;
    use crate::traffic::TrafIn;

    fn new_conn() -> (Conn, watch::Receiver<SessState>) {
        let (fwd, _) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessState::Connecting);
        let c = Conn::new(
            Config::default(),
            "SSH-2.0-peer".into(),
            Box::new(AcceptAnyHostKey),
            fwd,
            state_tx,
        )
        .unwrap();
        (c, state_rx)
    }

    /// Encodes a cleartext packet as the server would
    fn payload<'a, P: Into<Packet<'a>>>(p: P) -> Vec<u8> {
        sshwire::ssh_to_vec(&p.into()).unwrap()
    }

    #[tokio::test]
    async fn gating_before_kex() {
        init_test_log();
        let (mut c, state) = new_conn();
        c.start().unwrap();
        assert_eq!(c.kex_phase(), KexPhase::ExchangeStarted);

        // transport packets are fine
        let r = c.handle_payload(&payload(packets::Ignore { data: sshwire::BinString(b"") }), 0, 0);
        assert!(matches!(r, Ok(RxUpdate::None)));

        // connection packets before the first kex are fatal
        let r = c.handle_payload(&payload(packets::ChannelEof { num: 0 }), 1, 0);
        assert!(matches!(r, Err(Error::SSHProtoError)));

        // unknown packets too
        let r = c.handle_payload(&[200, 1, 2], 2, 0);
        assert!(matches!(r, Err(Error::SSHProtoError)));

        c.teardown(r.unwrap_err());
        assert_eq!(*state.borrow(), SessState::Closed);
        let reason = c.close_reason().unwrap();
        assert_eq!(reason.code, Some(SSH_DISCONNECT_PROTOCOL_ERROR));
        assert!(!reason.by_peer);

        // the kexinit and a disconnect were sent
        let out = c.traf.take_output();
        let mut tin = TrafIn::new(out.as_slice());
        let (p, _) = tin.read_packet().await.unwrap();
        assert_eq!(p[0], 20);
        let (p, _) = tin.read_packet().await.unwrap();
        let p = sshwire::packet_from_bytes(&p, &ParseContext::new()).unwrap();
        assert!(matches!(p, Packet::Disconnect(d) if d.reason == SSH_DISCONNECT_PROTOCOL_ERROR));

        // operations fail once closed
        assert!(matches!(c.rekey(), Err(Error::SessionClosed)));
    }

    #[test]
    fn peer_disconnect() {
        init_test_log();
        let (mut c, _state) = new_conn();
        let p = payload(packets::Disconnect { reason: 11, desc: "bye".into(), lang: "" });
        let e = c.handle_payload(&p, 0, 0).unwrap_err();
        c.teardown(e);
        let reason = c.close_reason().unwrap();
        assert_eq!(reason, &CloseReason { code: Some(11), desc: "bye".into(), by_peer: true });
        // nothing is sent in reply
        assert!(!c.traf.has_output());
        assert!(matches!(c.take_error(), Some(Error::PeerDisconnect { reason: 11, .. })));
    }

    #[test]
    fn usage_before_auth() {
        init_test_log();
        let (mut c, _state) = new_conn();
        assert!(matches!(c.userauth("me", AuthMethod::None), Err(Error::BadUsage { .. })));
        assert!(matches!(
            c.open_channel(&ChanOpen::Session, 100, 100),
            Err(Error::BadUsage { .. })
        ));
        assert!(matches!(c.rekey(), Err(Error::BadUsage { .. })));
        assert!(matches!(c.auth_sig_msg("me", AuthMethod::None), Err(Error::BadUsage { .. })));
    }

    #[test]
    fn debug_then_dropped() {
        init_test_log();
        let (mut c, state) = new_conn();
        let p = payload(packets::DebugPacket {
            always_display: true,
            message: "hello".into(),
            lang: "",
        });
        assert!(matches!(c.handle_payload(&p, 0, 0), Ok(RxUpdate::None)));
        assert!(!c.traf.has_output());

        c.abandon();
        assert_eq!(*state.borrow(), SessState::Closed);
        assert_eq!(c.close_reason().unwrap().code, None);
        // no DISCONNECT
        assert!(!c.traf.has_output());
        assert!(matches!(c.rekey(), Err(Error::SessionClosed)));
    }
}
