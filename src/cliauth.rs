//! Client user authentication, RFC4252.
//!
//! The application chooses methods and supplies credentials, this module
//! tracks the `ssh-userauth` service and matches server replies to the
//! single outstanding request.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use tokio::sync::oneshot;

use crate::behaviour::CliBehaviour;
use crate::kex::SessId;
use crate::packets::{self, AuthMethod, Category, MessageNumber, ParseContext};
use crate::packets::{Packet, Userauth60, UserauthRequest};
use crate::sshnames::*;
use crate::sshwire::{self, BinString, SSHEncode, SSHSink, WireResult};
use crate::traffic::TrafOut;

/// The kind of request awaiting a reply, selects the meaning of
/// message number 60.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthType {
    Password,
    PubKey,
}

/// The server's reply to a [`Session::userauth()`](crate::Session::userauth) request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    /// Authentication is complete
    Success,
    /// The request was refused. `methods` may continue.
    Failure { methods: Vec<String>, partial: bool },
    /// The server would accept a signature from this public key
    PkOk,
    /// The password has expired and must be changed
    PwChangeReq { prompt: String },
}

type AuthReply = oneshot::Sender<Result<AuthResult>>;

#[derive(Debug, PartialEq)]
enum ServiceState {
    Unrequested,
    Requested,
    Accepted,
}

/// The message to be signed in a pubkey authentication message,
/// RFC4252 Section 7.
#[derive(Debug)]
struct AuthSigMsg<'a> {
    sess_id: BinString<'a>,
    u: &'a UserauthRequest<'a>,
}

impl SSHEncode for AuthSigMsg<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        self.sess_id.enc(s)?;
        let m = MessageNumber::SSH_MSG_USERAUTH_REQUEST as u8;
        m.enc(s)?;
        self.u.enc(s)
    }
}

/// Returns the data a public key authentication signature covers.
///
/// `req` should have no signature.
pub(crate) fn auth_sig_msg(sess_id: &SessId, req: &UserauthRequest) -> Result<Vec<u8>> {
    let msg = AuthSigMsg { sess_id: BinString(sess_id.as_slice()), u: req };
    let ctx = ParseContext { method_pubkey_force_sig_bool: true, ..Default::default() };
    sshwire::ssh_to_vec_ctx(&msg, Some(&ctx))
}

#[derive(Debug)]
pub(crate) struct CliAuth {
    service: ServiceState,
    /// A request waiting for `SERVICE_ACCEPT`
    held: Option<Vec<u8>>,
    pending: Option<AuthReply>,
    authed: bool,
    server_sig_algs: Option<Vec<String>>,
}

impl CliAuth {
    pub fn new() -> Self {
        Self {
            service: ServiceState::Unrequested,
            held: None,
            pending: None,
            authed: false,
            server_sig_algs: None,
        }
    }

    pub fn is_authed(&self) -> bool {
        self.authed
    }

    pub fn server_sig_algs(&self) -> Option<&[String]> {
        self.server_sig_algs.as_deref()
    }

    /// Sends a `USERAUTH_REQUEST`, first requesting the service if needed.
    pub fn request(
        &mut self,
        req: UserauthRequest,
        traf: &mut TrafOut,
        parse_ctx: &mut ParseContext,
    ) -> Result<oneshot::Receiver<Result<AuthResult>>> {
        if self.authed {
            return Err(Error::BadUsage { msg: "Already authenticated" });
        }
        if self.pending.is_some() {
            return Err(Error::BadUsage { msg: "Authentication request already pending" });
        }

        parse_ctx.cli_auth_type = match &req.method {
            AuthMethod::Password(_) => Some(AuthType::Password),
            AuthMethod::PubKey(m) if m.sig.is_none() => Some(AuthType::PubKey),
            _ => None,
        };
        trace!("authtype {:?}", parse_ctx.cli_auth_type);

        let payload = sshwire::ssh_to_vec(&Packet::from(req))?;
        match self.service {
            ServiceState::Accepted => traf.send_payload(payload, Category::Auth)?,
            ServiceState::Requested => self.held = Some(payload),
            ServiceState::Unrequested => {
                traf.send(packets::ServiceRequest { name: SSH_SERVICE_USERAUTH })?;
                self.service = ServiceState::Requested;
                self.held = Some(payload);
            }
        }

        let (tx, rx) = oneshot::channel();
        self.pending = Some(tx);
        Ok(rx)
    }

    pub fn service_accept(&mut self, p: &packets::ServiceAccept, traf: &mut TrafOut) -> Result<()> {
        if self.service != ServiceState::Requested || p.name != SSH_SERVICE_USERAUTH {
            debug!("Unexpected service accept {:?}", p.name);
            return Err(Error::SSHProtoError);
        }
        self.service = ServiceState::Accepted;
        if let Some(h) = self.held.take() {
            traf.send_payload(h, Category::Auth)?;
        }
        Ok(())
    }

    fn reply(&mut self, r: AuthResult, parse_ctx: &mut ParseContext) -> Result<()> {
        parse_ctx.cli_auth_type = None;
        let Some(tx) = self.pending.take() else {
            debug!("Unexpected auth reply");
            return Err(Error::PacketWrong);
        };
        // The caller may have given up waiting
        let _ = tx.send(Ok(r));
        Ok(())
    }

    pub fn failure(
        &mut self,
        p: &packets::UserauthFailure,
        parse_ctx: &mut ParseContext,
    ) -> Result<()> {
        let methods = p.methods.names().into_iter().map(String::from).collect();
        debug!("Auth failure, methods {:?}", methods);
        self.reply(AuthResult::Failure { methods, partial: p.partial }, parse_ctx)
    }

    pub fn success(&mut self, parse_ctx: &mut ParseContext) -> Result<()> {
        self.reply(AuthResult::Success, parse_ctx)?;
        debug!("Authentication succeeded");
        self.authed = true;
        Ok(())
    }

    pub fn auth60(&mut self, p: &Userauth60, parse_ctx: &mut ParseContext) -> Result<()> {
        let r = match p {
            Userauth60::PkOk(_) => AuthResult::PkOk,
            Userauth60::PwChangeReq(req) => {
                AuthResult::PwChangeReq { prompt: req.prompt.to_string_lossy() }
            }
        };
        self.reply(r, parse_ctx)
    }

    pub fn banner(&self, p: &packets::UserauthBanner, b: &mut dyn CliBehaviour) {
        b.show_banner(&p.message.to_string_lossy(), p.lang);
    }

    pub fn handle_ext_info(&mut self, p: &packets::ExtInfo) {
        if let Some(algs) = &p.server_sig_algs {
            let algs: Vec<String> = algs.names().into_iter().map(String::from).collect();
            trace!("server-sig-algs {algs:?}");
            self.server_sig_algs = Some(algs);
        }
    }

    /// Fails any waiting request
    pub fn close(&mut self) {
        self.held = None;
        if let Some(tx) = self.pending.take() {
            let _ = tx.send(Err(Error::SessionClosed));
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::cliauth::*;
    use crate::encrypt::DirKeys;
    use crate::gloamlog::init_test_log;
    use crate::packets::{Ed25519PubKey, PubKey, UserauthFailure};
    use crate::namelist::NameList;
    use crate::sshwire::{packet_from_bytes, read_ssh, TextString};
    use crate::traffic::TrafIn;

    fn req(method: AuthMethod) -> UserauthRequest {
        UserauthRequest { username: "matt".into(), service: SSH_SERVICE_CONNECTION, method }
    }

    #[tokio::test]
    async fn service_then_request() {
        init_test_log();
        let mut a = CliAuth::new();
        let mut t = TrafOut::new();
        t.rekey(DirKeys::new_cleartext()).unwrap();
        let mut ctx = ParseContext::new();

        let mut rx = a.request(req(AuthMethod::password("pw")), &mut t, &mut ctx).unwrap();
        assert_eq!(ctx.cli_auth_type, Some(AuthType::Password));
        // only the service request is sent
        let out = t.take_output();
        let mut tin = TrafIn::new(out.as_slice());
        let (p, _) = tin.read_packet().await.unwrap();
        let p = packet_from_bytes(&p, &ctx).unwrap();
        assert!(matches!(p, Packet::ServiceRequest(_)));
        assert!(tin.read_packet().await.is_err());

        // a second request is refused
        let e = a.request(req(AuthMethod::None), &mut t, &mut ctx).unwrap_err();
        assert!(matches!(e, Error::BadUsage { .. }));

        a.service_accept(&packets::ServiceAccept { name: SSH_SERVICE_USERAUTH }, &mut t).unwrap();
        assert!(t.has_output());

        let f = UserauthFailure { methods: NameList::try_from("publickey,password").unwrap(), partial: false };
        a.failure(&f, &mut ctx).unwrap();
        assert_eq!(ctx.cli_auth_type, None);
        let r = rx.try_recv().unwrap().unwrap();
        assert_eq!(
            r,
            AuthResult::Failure { methods: vec!["publickey".into(), "password".into()], partial: false }
        );

        let mut rx = a.request(req(AuthMethod::None), &mut t, &mut ctx).unwrap();
        a.success(&mut ctx).unwrap();
        assert_eq!(rx.try_recv().unwrap().unwrap(), AuthResult::Success);
        assert!(a.is_authed());

        // unsolicited reply
        assert!(matches!(a.success(&mut ctx), Err(Error::PacketWrong)));
    }

    #[test]
    fn close_fails_pending() {
        init_test_log();
        let mut a = CliAuth::new();
        let mut t = TrafOut::new();
        let mut ctx = ParseContext::new();
        let mut rx = a.request(req(AuthMethod::None), &mut t, &mut ctx).unwrap();
        a.close();
        assert!(matches!(rx.try_recv().unwrap(), Err(Error::SessionClosed)));
    }

    #[test]
    fn sig_msg() {
        init_test_log();
        let key = [3u8; 32];
        let pubkey = PubKey::Ed25519(Ed25519PubKey { key: BinString(&key) });
        let sess_id = SessId::from_slice(&[7u8; 32]).unwrap();
        let r = req(AuthMethod::pubkey(pubkey).unwrap());
        let m = auth_sig_msg(&sess_id, &r).unwrap();

        let sid: BinString = read_ssh(&m, None).unwrap();
        assert_eq!(sid.0, sess_id.as_slice());
        assert_eq!(m[4 + 32], 50);
        let rest = &m[4 + 32 + 1..];
        let u: TextString = read_ssh(rest, None).unwrap();
        assert_eq!(u.as_str().unwrap(), "matt");
        // the signature flag is forced to true
        let flag_pos = 4 + 4 + 4 + SSH_SERVICE_CONNECTION.len() + 4 + SSH_AUTHMETHOD_PUBLICKEY.len();
        assert_eq!(rest[flag_pos], 1);
        // no signature follows the key blob
        let normal = sshwire::ssh_to_vec(&r).unwrap();
        assert_eq!(rest.len(), normal.len());
    }
}
