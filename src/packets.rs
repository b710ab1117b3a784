//! SSH protocol packets.
//!
//! A [`Packet`] can be encoded/decoded to the
//! SSH Binary Packet Protocol using [`sshwire`](crate::sshwire).
//! SSH packet format is described in [RFC4253](https://tools.ietf.org/html/rfc4253) SSH Transport

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::fmt;

use pretty_hex::PrettyHex;

use gloam_sshwire_derive::*;

use crate::cliauth::AuthType;
use crate::namelist::{NameList, StringNames};
use crate::sign::SigType;
use crate::sshnames::*;
use crate::sshwire;
use crate::sshwire::{BinString, Blob, TextString};
use crate::sshwire::{SSHDecode, SSHDecodeEnum, SSHEncode, SSHEncodeEnum};
use crate::sshwire::{SSHSink, SSHSource, WireError, WireResult};

// Any `enum` needs to have special handling to select a variant when deserializing.
// This is mostly done with `#[sshwire(...)]` attributes.

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct KexInit<'a> {
    pub cookie: [u8; 16],
    pub kex: NameList<'a>,
    /// A list of signature algorithms
    ///
    /// RFC4253 refers to this as the host key algorithms, but actually they
    /// are signature algorithms.
    pub hostsig: NameList<'a>,
    pub cipher_c2s: NameList<'a>,
    pub cipher_s2c: NameList<'a>,
    pub mac_c2s: NameList<'a>,
    pub mac_s2c: NameList<'a>,
    pub comp_c2s: NameList<'a>,
    pub comp_s2c: NameList<'a>,
    pub lang_c2s: NameList<'a>,
    pub lang_s2c: NameList<'a>,
    pub first_follows: bool,
    pub reserved: u32,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct NewKeys {}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct Ignore<'a> {
    pub data: BinString<'a>,
}

/// Named to avoid clashing with [`fmt::Debug`]
#[derive(Debug, SSHEncode, SSHDecode)]
pub struct DebugPacket<'a> {
    pub always_display: bool,
    pub message: TextString<'a>,
    pub lang: &'a str,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct Disconnect<'a> {
    pub reason: u32,
    pub desc: TextString<'a>,
    pub lang: &'a str,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct Unimplemented {
    pub seq: u32,
}

/// [RFC8308](https://tools.ietf.org/html/rfc8308) extension information.
///
/// Only `server-sig-algs` is kept, other extensions are skipped.
#[derive(Debug)]
pub struct ExtInfo<'a> {
    pub server_sig_algs: Option<NameList<'a>>,
}

impl SSHEncode for ExtInfo<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        match &self.server_sig_algs {
            Some(algs) => {
                1u32.enc(s)?;
                SSH_EXT_SERVER_SIG_ALGS.enc(s)?;
                algs.enc(s)
            }
            None => 0u32.enc(s),
        }
    }
}

impl<'de: 'a, 'a> SSHDecode<'de> for ExtInfo<'a> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let count = u32::dec(s)?;
        let mut server_sig_algs = None;
        for _ in 0..count {
            let name = BinString::dec(s)?;
            let value = BinString::dec(s)?;
            if name.0 == SSH_EXT_SERVER_SIG_ALGS.as_bytes() {
                let v = sshwire::try_as_ascii(value.0)?;
                server_sig_algs = Some(NameList::String(StringNames(v)));
            }
        }
        Ok(Self { server_sig_algs })
    }
}

/// `SSH_MSG_KEXDH_INIT` or `SSH_MSG_KEX_ECDH_INIT`.
///
/// For finite field DH `q_c` holds `e` in mpint format.
#[derive(Debug, SSHEncode, SSHDecode)]
pub struct KexDHInit<'a> {
    pub q_c: BinString<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct KexDHReply<'a> {
    pub k_s: Blob<PubKey<'a>>,
    pub q_s: BinString<'a>,
    pub sig: Blob<Signature<'a>>,
}

/// Message 31 is either a DH reply or a group exchange group,
/// depending on the negotiated kex.
#[derive(Debug, SSHEncode)]
#[sshwire(no_variant_names)]
pub enum Kex31<'a> {
    DHReply(KexDHReply<'a>),
    GexGroup(KexGexGroup<'a>),
}

impl<'de: 'a, 'a> SSHDecode<'de> for Kex31<'a> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        if s.ctx().kex_gex {
            Ok(Self::GexGroup(SSHDecode::dec(s)?))
        } else {
            Ok(Self::DHReply(SSHDecode::dec(s)?))
        }
    }
}

/// [RFC4419](https://tools.ietf.org/html/rfc4419) group exchange request
#[derive(Debug, SSHEncode, SSHDecode)]
pub struct KexGexRequest {
    pub min: u32,
    pub n: u32,
    pub max: u32,
}

/// `p` and `g` are mpint encoded
#[derive(Debug, SSHEncode, SSHDecode)]
pub struct KexGexGroup<'a> {
    pub p: BinString<'a>,
    pub g: BinString<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct KexGexInit<'a> {
    pub e: BinString<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct KexGexReply<'a> {
    pub k_s: Blob<PubKey<'a>>,
    pub f: BinString<'a>,
    pub sig: Blob<Signature<'a>>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ServiceRequest<'a> {
    pub name: &'a str,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ServiceAccept<'a> {
    pub name: &'a str,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct UserauthRequest<'a> {
    pub username: TextString<'a>,
    pub service: &'a str,
    pub method: AuthMethod<'a>,
}

/// The method-specific part of a [`UserauthRequest`].
#[derive(Debug, SSHEncode, SSHDecode)]
#[sshwire(variant_prefix)]
pub enum AuthMethod<'a> {
    #[sshwire(variant = SSH_AUTHMETHOD_PASSWORD)]
    Password(MethodPassword<'a>),
    #[sshwire(variant = SSH_AUTHMETHOD_PUBLICKEY)]
    PubKey(MethodPubKey<'a>),
    #[sshwire(variant = SSH_AUTHMETHOD_NONE)]
    None,
    #[sshwire(unknown)]
    Unknown(Unknown<'a>),
}

impl<'a> AuthMethod<'a> {
    /// A public key query or signed request, without a signature.
    pub fn pubkey(pubkey: PubKey<'a>) -> Result<Self> {
        let sig_algo = Signature::sig_name_for_pubkey(&pubkey)?;
        Ok(AuthMethod::PubKey(MethodPubKey { sig_algo, pubkey: Blob(pubkey), sig: None }))
    }

    pub fn password(password: &'a str) -> Self {
        AuthMethod::Password(MethodPassword { change: false, password: password.into() })
    }
}

#[derive(Debug, SSHEncode)]
#[sshwire(no_variant_names)]
pub enum Userauth60<'a> {
    PkOk(UserauthPkOk<'a>),
    PwChangeReq(UserauthPwChangeReq<'a>),
}

impl<'de: 'a, 'a> SSHDecode<'de> for Userauth60<'a> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        match s.ctx().cli_auth_type {
            Some(AuthType::Password) => Ok(Self::PwChangeReq(SSHDecode::dec(s)?)),
            Some(AuthType::PubKey) => Ok(Self::PkOk(SSHDecode::dec(s)?)),
            None => {
                trace!("Wrong packet state for userauth60");
                Err(WireError::PacketWrong)
            }
        }
    }
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct UserauthPkOk<'a> {
    pub algo: &'a str,
    pub key: Blob<PubKey<'a>>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct UserauthPwChangeReq<'a> {
    pub prompt: TextString<'a>,
    pub lang: &'a str,
}

#[derive(SSHEncode, SSHDecode)]
pub struct MethodPassword<'a> {
    pub change: bool,
    pub password: TextString<'a>,
}

// Don't print password
impl fmt::Debug for MethodPassword<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodPassword")
            .field("change", &self.change)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct MethodPubKey<'a> {
    /// A signature algorithm name (not key algorithm name).
    pub sig_algo: &'a str,
    pub pubkey: Blob<PubKey<'a>>,
    pub sig: Option<Blob<Signature<'a>>>,
}

impl SSHEncode for MethodPubKey<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        // The signature boolean is forced to TRUE when producing the
        // message to be signed, which has no signature yet.
        let force_sig_bool = s.ctx().map_or(false, |c| c.method_pubkey_force_sig_bool);
        let sig = self.sig.is_some() || force_sig_bool;
        sig.enc(s)?;
        self.sig_algo.enc(s)?;
        self.pubkey.enc(s)?;
        self.sig.enc(s)
    }
}

impl<'de: 'a, 'a> SSHDecode<'de> for MethodPubKey<'a> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let sig = bool::dec(s)?;
        let sig_algo = SSHDecode::dec(s)?;
        let pubkey = SSHDecode::dec(s)?;
        let sig = if sig { Some(SSHDecode::dec(s)?) } else { None };
        Ok(Self { sig_algo, pubkey, sig })
    }
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct UserauthFailure<'a> {
    pub methods: NameList<'a>,
    pub partial: bool,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct UserauthSuccess {}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct UserauthBanner<'a> {
    pub message: TextString<'a>,
    pub lang: &'a str,
}

#[derive(SSHEncode, SSHDecode, Debug, Clone, PartialEq)]
#[sshwire(variant_prefix)]
pub enum PubKey<'a> {
    #[sshwire(variant = SSH_NAME_ED25519)]
    Ed25519(Ed25519PubKey<'a>),
    #[sshwire(variant = SSH_NAME_RSA)]
    RSA(RSAPubKey<'a>),
    #[sshwire(unknown)]
    Unknown(Unknown<'a>),
}

impl PubKey<'_> {
    /// The algorithm name presented. May be invalid.
    pub fn algorithm_name(&self) -> Result<&str, &Unknown<'_>> {
        match self {
            PubKey::Ed25519(_) => Ok(SSH_NAME_ED25519),
            PubKey::RSA(_) => Ok(SSH_NAME_RSA),
            PubKey::Unknown(u) => Err(u),
        }
    }
}

#[derive(Debug, Clone, PartialEq, SSHEncode, SSHDecode)]
pub struct Ed25519PubKey<'a> {
    pub key: BinString<'a>,
}

#[derive(Debug, Clone, PartialEq, SSHEncode, SSHDecode)]
pub struct RSAPubKey<'a> {
    pub e: BinString<'a>,
    pub n: BinString<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
#[sshwire(variant_prefix)]
pub enum Signature<'a> {
    #[sshwire(variant = SSH_NAME_ED25519)]
    Ed25519(Ed25519Sig<'a>),
    #[sshwire(variant = SSH_NAME_RSA_SHA256)]
    RSA256(RSA256Sig<'a>),
    #[sshwire(unknown)]
    Unknown(Unknown<'a>),
}

impl<'a> Signature<'a> {
    /// The algorithm name presented. May be invalid.
    pub fn algorithm_name(&self) -> Result<&'a str, &Unknown<'a>> {
        match self {
            Signature::Ed25519(_) => Ok(SSH_NAME_ED25519),
            Signature::RSA256(_) => Ok(SSH_NAME_RSA_SHA256),
            Signature::Unknown(u) => Err(u),
        }
    }

    /// Returns the signature algorithm name for a public key.
    ///
    /// `ssh-rsa` keys sign with `rsa-sha2-256`.
    pub fn sig_name_for_pubkey(pubkey: &PubKey) -> Result<&'static str> {
        match pubkey {
            PubKey::Ed25519(_) => Ok(SSH_NAME_ED25519),
            PubKey::RSA(_) => Ok(SSH_NAME_RSA_SHA256),
            PubKey::Unknown(u) => {
                warn!("Unknown key type \"{}\"", u);
                Err(Error::UnknownMethod { kind: "key" })
            }
        }
    }

    pub fn sig_type(&self) -> Result<SigType> {
        match self {
            Signature::Ed25519(_) => Ok(SigType::Ed25519),
            Signature::RSA256(_) => Ok(SigType::RSA256),
            Signature::Unknown(u) => {
                warn!("Unknown signature type \"{}\"", u);
                Err(Error::UnknownMethod { kind: "signature" })
            }
        }
    }
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct Ed25519Sig<'a> {
    pub sig: BinString<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct RSA256Sig<'a> {
    pub sig: BinString<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct GlobalRequest<'a> {
    #[sshwire(variant_name = req)]
    pub want_reply: bool,
    pub req: GlobalRequestMethod<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub enum GlobalRequestMethod<'a> {
    #[sshwire(variant = SSH_GLOBAL_TCPIP_FORWARD)]
    TcpipForward(TcpipForward<'a>),
    #[sshwire(variant = SSH_GLOBAL_CANCEL_TCPIP_FORWARD)]
    CancelTcpipForward(TcpipForward<'a>),
    #[sshwire(unknown)]
    Unknown(Unknown<'a>),
}

/// Arguments for `tcpip-forward` and `cancel-tcpip-forward`
#[derive(Debug, SSHEncode, SSHDecode)]
pub struct TcpipForward<'a> {
    pub address: TextString<'a>,
    pub port: u32,
}

/// A `tcpip-forward` request for port 0 gets the allocated port in
/// the reply, other successes are empty.
#[derive(Debug, SSHEncode)]
#[sshwire(no_variant_names)]
pub enum RequestSuccess {
    SuccessEmpty,
    TcpPort(TcpPort),
}

impl<'de> SSHDecode<'de> for RequestSuccess {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        if s.ctx().req_port {
            Ok(Self::TcpPort(TcpPort::dec(s)?))
        } else {
            Ok(Self::SuccessEmpty)
        }
    }
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct TcpPort {
    pub port: u32,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct RequestFailure {}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelOpen<'a> {
    // channel_type is implicit in ty below
    #[sshwire(variant_name = ty)]
    pub num: u32,
    pub initial_window: u32,
    pub max_packet: u32,
    pub ty: ChannelOpenType<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub enum ChannelOpenType<'a> {
    #[sshwire(variant = "session")]
    Session,
    #[sshwire(variant = "forwarded-tcpip")]
    ForwardedTcpip(ForwardedTcpip<'a>),
    #[sshwire(variant = "direct-tcpip")]
    DirectTcpip(DirectTcpip<'a>),
    #[sshwire(unknown)]
    Unknown(Unknown<'a>),
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelOpenConfirmation {
    pub num: u32,
    pub sender_num: u32,
    pub initial_window: u32,
    pub max_packet: u32,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelOpenFailure<'a> {
    pub num: u32,
    pub reason: u32,
    pub desc: TextString<'a>,
    pub lang: &'a str,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelWindowAdjust {
    pub num: u32,
    pub adjust: u32,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelData<'a> {
    pub num: u32,
    pub data: BinString<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelDataExt<'a> {
    pub num: u32,
    pub code: u32,
    pub data: BinString<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelEof {
    pub num: u32,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelClose {
    pub num: u32,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelSuccess {
    pub num: u32,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelFailure {
    pub num: u32,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelRequest<'a> {
    pub num: u32,

    // request type is implicit in req below
    #[sshwire(variant_name = req)]
    pub want_reply: bool,
    pub req: ChannelReqType<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub enum ChannelReqType<'a> {
    #[sshwire(variant = "shell")]
    Shell,
    #[sshwire(variant = "exec")]
    Exec(Exec<'a>),
    #[sshwire(variant = "pty-req")]
    Pty(PtyReq<'a>),
    #[sshwire(variant = "subsystem")]
    Subsystem(Subsystem<'a>),
    #[sshwire(variant = "window-change")]
    WinChange(WinChange),
    #[sshwire(variant = "env")]
    Env(Env<'a>),
    #[sshwire(variant = "signal")]
    Signal(Signal<'a>),
    #[sshwire(variant = "exit-status")]
    ExitStatus(ExitStatus),
    #[sshwire(variant = "exit-signal")]
    ExitSignal(ExitSignal<'a>),
    #[sshwire(variant = "break")]
    Break(Break),
    #[sshwire(unknown)]
    Unknown(Unknown<'a>),
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct Exec<'a> {
    pub command: TextString<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct Subsystem<'a> {
    pub subsystem: TextString<'a>,
}

/// The contents of a `"pty-req"` request.
#[derive(Debug, SSHEncode, SSHDecode)]
pub struct PtyReq<'a> {
    pub term: TextString<'a>,
    pub cols: u32,
    pub rows: u32,
    pub width: u32,
    pub height: u32,
    /// Encoded terminal modes
    pub modes: BinString<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq, SSHEncode, SSHDecode)]
pub struct WinChange {
    pub cols: u32,
    pub rows: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct Env<'a> {
    pub name: TextString<'a>,
    pub value: TextString<'a>,
}

/// A unix signal channel request
#[derive(Debug, SSHEncode, SSHDecode)]
pub struct Signal<'a> {
    pub sig: &'a str,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ExitStatus {
    pub status: u32,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ExitSignal<'a> {
    pub signal: &'a str,
    pub core: bool,
    pub error: TextString<'a>,
    pub lang: &'a str,
}

#[derive(Debug, Clone, SSHEncode, SSHDecode)]
pub struct Break {
    pub length: u32,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ForwardedTcpip<'a> {
    pub address: TextString<'a>,
    pub port: u32,
    pub origin: TextString<'a>,
    pub origin_port: u32,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct DirectTcpip<'a> {
    pub address: TextString<'a>,
    pub port: u32,
    pub origin: TextString<'a>,
    pub origin_port: u32,
}

/// Placeholder for unknown method names.
///
/// These are sometimes non-fatal and need to be handled by the relevant code,
/// for example newly invented pubkey types.
/// Can only be received, encoding it fails.
#[derive(Clone, PartialEq)]
pub struct Unknown<'a>(pub &'a [u8]);

impl fmt::Display for Unknown<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Ok(s) = sshwire::try_as_ascii_str(self.0) {
            f.write_str(s)
        } else {
            write!(f, "non-ascii {:?}", self.0.hex_dump())
        }
    }
}

impl fmt::Debug for Unknown<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// State to be passed to decoding.
///
/// Lets the parser select the correct variant for message numbers
/// that have more than one meaning.
#[derive(Default, Clone, Debug)]
pub struct ParseContext {
    /// The pending userauth method, selects message 60's meaning
    pub cli_auth_type: Option<AuthType>,

    /// Used by `auth_sig_msg()`
    pub method_pubkey_force_sig_bool: bool,

    /// A group exchange kex is running, selects message 31's meaning
    pub kex_gex: bool,

    /// The oldest outstanding global request expects a port in its reply
    pub req_port: bool,

    // Set to true if an unknown variant is encountered.
    // Packet length checks should be omitted in that case.
    pub(crate) seen_unknown: bool,
}

impl ParseContext {
    pub fn new() -> Self {
        Self::default()
    }
}

/// We have repeated `match` statements for the various packet types, use a macro
macro_rules! messagetypes {
    (
        $( ( $message_num:literal,
            $SpecificPacketVariant:ident,
            $SpecificPacketType:ty,
            $SSH_MESSAGE_NAME:ident,
            $category:ident
            ),
             )*
    ) => {

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[allow(non_camel_case_types)]
pub enum MessageNumber {
    // variants are eg
    // SSH_MSG_KEXINIT = 20,
    $(
    $SSH_MESSAGE_NAME = $message_num,
    )*
}

impl TryFrom<u8> for MessageNumber {
    type Error = Error;
    fn try_from(v: u8) -> Result<Self> {
        match v {
            $(
            $message_num => Ok(MessageNumber::$SSH_MESSAGE_NAME),
            )*
            _ => Err(Error::UnknownPacket { number: v }),
        }
    }
}

impl SSHEncode for Packet<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where S: SSHSink {
        let t = self.message_num() as u8;
        t.enc(s)?;
        match self {
            $(
            Packet::$SpecificPacketVariant(p) => p.enc(s),
            )*
        }
    }
}

impl<'de: 'a, 'a> SSHDecode<'de> for Packet<'a> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where S: SSHSource<'de> {
        let msg_num = u8::dec(s)?;
        let ty = MessageNumber::try_from(msg_num)
            .map_err(|_| WireError::UnknownPacket { number: msg_num })?;

        let p = match ty {
            $(
            MessageNumber::$SSH_MESSAGE_NAME => Packet::$SpecificPacketVariant(SSHDecode::dec(s)?),
            )*
        };
        Ok(p)
    }
}

/// Top level SSH packet enum
#[derive(Debug)]
pub enum Packet<'a> {
    $(
    $SpecificPacketVariant($SpecificPacketType),
    )*
}

impl<'a> Packet<'a> {
    pub fn message_num(&self) -> MessageNumber {
        match self {
            $(
            Packet::$SpecificPacketVariant(_) => MessageNumber::$SSH_MESSAGE_NAME,
            )*
        }
    }

    pub fn category(&self) -> Category {
        match self {
            $(
            Packet::$SpecificPacketVariant(_) => Category::$category,
            )*
        }
    }
}

$(
impl<'a> From<$SpecificPacketType> for Packet<'a> {
    fn from(s: $SpecificPacketType) -> Packet<'a> {
        Packet::$SpecificPacketVariant(s)
    }
}
)*

} } // macro

/// When a packet may be sent or received
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Allowed at any time.
    All,
    /// After kexinit, before newkeys complete (other packets are not allowed during
    /// that time).
    Kex,
    /// Post-kex
    Auth,
    /// Post-auth
    Sess,
}

messagetypes![
(1, Disconnect, Disconnect<'a>, SSH_MSG_DISCONNECT, All),
(2, Ignore, Ignore<'a>, SSH_MSG_IGNORE, All),
(3, Unimplemented, Unimplemented, SSH_MSG_UNIMPLEMENTED, All),
(4, DebugPacket, DebugPacket<'a>, SSH_MSG_DEBUG, All),
(5, ServiceRequest, ServiceRequest<'a>, SSH_MSG_SERVICE_REQUEST, Auth),
(6, ServiceAccept, ServiceAccept<'a>, SSH_MSG_SERVICE_ACCEPT, Auth),
(7, ExtInfo, ExtInfo<'a>, SSH_MSG_EXT_INFO, Auth),
(20, KexInit, KexInit<'a>, SSH_MSG_KEXINIT, All),
(21, NewKeys, NewKeys, SSH_MSG_NEWKEYS, Kex),
// SSH_MSG_KEXDH_INIT or SSH_MSG_KEX_ECDH_INIT
(30, KexDHInit, KexDHInit<'a>, SSH_MSG_KEXDH_INIT, Kex),
// One of
// SSH_MSG_KEXDH_REPLY
// SSH_MSG_KEX_DH_GEX_GROUP
(31, Kex31, Kex31<'a>, SSH_MSG_KEX_31, Kex),
(32, KexGexInit, KexGexInit<'a>, SSH_MSG_KEX_DH_GEX_INIT, Kex),
(33, KexGexReply, KexGexReply<'a>, SSH_MSG_KEX_DH_GEX_REPLY, Kex),
(34, KexGexRequest, KexGexRequest, SSH_MSG_KEX_DH_GEX_REQUEST, Kex),

(50, UserauthRequest, UserauthRequest<'a>, SSH_MSG_USERAUTH_REQUEST, Auth),
(51, UserauthFailure, UserauthFailure<'a>, SSH_MSG_USERAUTH_FAILURE, Auth),
(52, UserauthSuccess, UserauthSuccess, SSH_MSG_USERAUTH_SUCCESS, Auth),
(53, UserauthBanner, UserauthBanner<'a>, SSH_MSG_USERAUTH_BANNER, Auth),
// One of
// SSH_MSG_USERAUTH_PASSWD_CHANGEREQ
// SSH_MSG_USERAUTH_PK_OK
(60, Userauth60, Userauth60<'a>, SSH_MSG_USERAUTH_60, Auth),

(80, GlobalRequest, GlobalRequest<'a>, SSH_MSG_GLOBAL_REQUEST, Sess),
(81, RequestSuccess, RequestSuccess, SSH_MSG_REQUEST_SUCCESS, Sess),
(82, RequestFailure, RequestFailure, SSH_MSG_REQUEST_FAILURE, Sess),

(90, ChannelOpen, ChannelOpen<'a>, SSH_MSG_CHANNEL_OPEN, Sess),
(91, ChannelOpenConfirmation, ChannelOpenConfirmation, SSH_MSG_CHANNEL_OPEN_CONFIRMATION, Sess),
(92, ChannelOpenFailure, ChannelOpenFailure<'a>, SSH_MSG_CHANNEL_OPEN_FAILURE, Sess),
(93, ChannelWindowAdjust, ChannelWindowAdjust, SSH_MSG_CHANNEL_WINDOW_ADJUST, Sess),
(94, ChannelData, ChannelData<'a>, SSH_MSG_CHANNEL_DATA, Sess),
(95, ChannelDataExt, ChannelDataExt<'a>, SSH_MSG_CHANNEL_EXTENDED_DATA, Sess),
(96, ChannelEof, ChannelEof, SSH_MSG_CHANNEL_EOF, Sess),
(97, ChannelClose, ChannelClose, SSH_MSG_CHANNEL_CLOSE, Sess),
(98, ChannelRequest, ChannelRequest<'a>, SSH_MSG_CHANNEL_REQUEST, Sess),
(99, ChannelSuccess, ChannelSuccess, SSH_MSG_CHANNEL_SUCCESS, Sess),
(100, ChannelFailure, ChannelFailure, SSH_MSG_CHANNEL_FAILURE, Sess),
];

#[cfg(test)]
mod tests {
    use crate::gloamlog::init_test_log;
    use crate::packets::*;
    use crate::sshwire::tests::{assert_serialize_equal, test_roundtrip, test_roundtrip_context};
    use crate::sshwire::{packet_from_bytes, ssh_to_vec};
    use pretty_hex::PrettyHex;

    #[test]
    /// check round trip of packet enums is right
    fn packet_type() {
        for i in 0..=255 {
            let ty = MessageNumber::try_from(i);
            if let Ok(ty) = ty {
                assert_eq!(i, ty as u8);
            }
        }
        assert!(matches!(
            MessageNumber::try_from(200),
            Err(Error::UnknownPacket { number: 200 })
        ));
    }

    #[test]
    fn roundtrip_channel_open() {
        init_test_log();
        let p = Packet::ChannelOpen(ChannelOpen {
            num: 111,
            initial_window: 50000,
            max_packet: 20000,
            ty: ChannelOpenType::DirectTcpip(DirectTcpip {
                address: "localhost".into(),
                port: 4444,
                origin: "somewhere".into(),
                origin_port: 0,
            }),
        });
        test_roundtrip(&p);

        let p = Packet::ChannelOpen(ChannelOpen {
            num: 0,
            initial_window: 899,
            max_packet: 14,
            ty: ChannelOpenType::Session,
        });
        test_roundtrip(&p);
    }

    #[test]
    fn roundtrip_requests() {
        init_test_log();
        let p: Packet = ChannelRequest {
            num: 3,
            want_reply: true,
            req: ChannelReqType::Env(Env { name: "LANG".into(), value: "C".into() }),
        }
        .into();
        test_roundtrip(&p);

        let p: Packet = GlobalRequest {
            want_reply: true,
            req: GlobalRequestMethod::TcpipForward(TcpipForward {
                address: "0.0.0.0".into(),
                port: 0,
            }),
        }
        .into();
        test_roundtrip(&p);
    }

    #[test]
    fn request_success_port() {
        init_test_log();
        let p: Packet = RequestSuccess::TcpPort(TcpPort { port: 40123 }).into();
        let ctx = ParseContext { req_port: true, ..Default::default() };
        test_roundtrip_context(&p, &ctx);

        // Without the context the trailing port is a length error
        let b = ssh_to_vec(&p).unwrap();
        let r = packet_from_bytes(&b, &ParseContext::default());
        assert!(matches!(r, Err(Error::WrongPacketLength)));
    }

    #[test]
    fn kex31_context() {
        init_test_log();
        let p: Packet = Kex31::GexGroup(KexGexGroup {
            p: BinString(&[0x00, 0xc5, 0x01]),
            g: BinString(&[0x02]),
        })
        .into();
        let ctx = ParseContext { kex_gex: true, ..Default::default() };
        test_roundtrip_context(&p, &ctx);
        let b = ssh_to_vec(&p).unwrap();
        let p2 = packet_from_bytes(&b, &ctx).unwrap();
        assert!(matches!(p2, Packet::Kex31(Kex31::GexGroup(_))));
    }

    #[test]
    fn userauth60_context() {
        init_test_log();
        let p: Packet = Userauth60::PwChangeReq(UserauthPwChangeReq {
            prompt: "change the password".into(),
            lang: "",
        })
        .into();
        let ctx = ParseContext { cli_auth_type: Some(AuthType::Password), ..Default::default() };
        test_roundtrip_context(&p, &ctx);

        let p: Packet = Userauth60::PkOk(UserauthPkOk {
            algo: SSH_NAME_ED25519,
            key: Blob(PubKey::Ed25519(Ed25519PubKey { key: BinString(&[0x11, 0x22, 0x33]) })),
        })
        .into();
        let ctx = ParseContext { cli_auth_type: Some(AuthType::PubKey), ..Default::default() };
        test_roundtrip_context(&p, &ctx);

        // No auth pending
        let b = ssh_to_vec(&p).unwrap();
        assert!(packet_from_bytes(&b, &ParseContext::default()).is_err());
    }

    #[test]
    fn ext_info() {
        init_test_log();
        // two extensions, only server-sig-algs is kept
        let mut b = vec![7u8];
        b.extend_from_slice(&2u32.to_be_bytes());
        for (n, v) in [("no-flow-control", "p"), ("server-sig-algs", "ssh-ed25519,rsa-sha2-256")] {
            b.extend_from_slice(&(n.len() as u32).to_be_bytes());
            b.extend_from_slice(n.as_bytes());
            b.extend_from_slice(&(v.len() as u32).to_be_bytes());
            b.extend_from_slice(v.as_bytes());
        }
        let p = packet_from_bytes(&b, &ParseContext::default()).unwrap();
        let Packet::ExtInfo(e) = p else { panic!("wrong packet {p:?}") };
        let algs = e.server_sig_algs.unwrap();
        assert_eq!(algs.names(), ["ssh-ed25519", "rsa-sha2-256"]);
    }

    #[test]
    fn unknown_method() {
        init_test_log();
        let p = Packet::ChannelOpen(ChannelOpen {
            num: 0,
            initial_window: 899,
            max_packet: 14,
            ty: ChannelOpenType::Session,
        });
        let mut buf1 = ssh_to_vec(&p).unwrap();
        // change a byte in "session"
        buf1[8] = b'X';
        trace!("broken: {:?}", buf1.hex_dump());
        let p2 = packet_from_bytes(&buf1, &ParseContext::default()).unwrap();
        trace!("broken: {p2:#?}");
        assert!(matches!(
            p2,
            Packet::ChannelOpen(ChannelOpen { ty: ChannelOpenType::Unknown(_), .. })
        ));
    }

    #[test]
    /// Tests recovery from unknown variants in a blob when decoding.
    fn unknown_variant_in_blob() {
        init_test_log();
        let p: Packet = UserauthRequest {
            username: "matt".into(),
            service: "connection",
            method: AuthMethod::PubKey(MethodPubKey {
                sig_algo: "something",
                pubkey: Blob(PubKey::Ed25519(Ed25519PubKey { key: BinString(b"zzzz") })),
                sig: Some(Blob(Signature::Ed25519(Ed25519Sig { sig: BinString(b"sighere") }))),
            }),
        }
        .into();

        let mut buf1 = ssh_to_vec(&p).unwrap();
        // change a byte in the "ssh-ed25519" variant string
        buf1[60] = b'F';
        trace!("broken: {:?}", buf1.hex_dump());
        let p2 = packet_from_bytes(&buf1, &ParseContext::default()).unwrap();
        trace!("broken: {p2:#?}");
        assert!(matches!(
            p2,
            Packet::UserauthRequest(UserauthRequest {
                method: AuthMethod::PubKey(MethodPubKey {
                    pubkey: Blob(PubKey::Unknown(Unknown(b"ssF-ed25519"))),
                    sig: Some(Blob(Signature::Ed25519(_))),
                    ..
                }),
                ..
            })
        ));
    }

    #[test]
    fn unknown_method_ser() {
        init_test_log();
        let p = Packet::ChannelOpen(ChannelOpen {
            num: 0,
            initial_window: 200000,
            max_packet: 88200,
            ty: ChannelOpenType::Unknown(Unknown(b"audio-stream")),
        });
        let r = std::panic::catch_unwind(|| ssh_to_vec(&p).map(|_| ()));
        // Debug builds panic through Error::bug(), release returns an error
        assert!(matches!(r, Err(_) | Ok(Err(_))));
    }

    #[test]
    fn pubkey_sig_names() {
        let k = PubKey::Ed25519(Ed25519PubKey { key: BinString(&[1; 32]) });
        assert_eq!(Signature::sig_name_for_pubkey(&k).unwrap(), SSH_NAME_ED25519);
        let m = AuthMethod::pubkey(k.clone()).unwrap();
        let p: Packet =
            UserauthRequest { username: "u".into(), service: SSH_SERVICE_CONNECTION, method: m }
                .into();
        test_roundtrip(&p);
        assert_serialize_equal(&k, &k.clone());
    }
}
