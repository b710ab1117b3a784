//! Key exchange, algorithm negotiation and key derivation.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::fmt;

use digest::Digest;
use pretty_hex::PrettyHex;
use rand_core::OsRng;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::behaviour::CliBehaviour;
use crate::compress::CompressAlgo;
use crate::config::{Config, GEX_MAX, GEX_MIN, GEX_N};
use crate::encrypt::{Cipher, DirKeys, Integ};
use crate::kexdh::KexDh;
use crate::namelist::{LocalNames, NameList};
use crate::packets::{self, Packet, PubKey, Signature};
use crate::random;
use crate::sign::SigType;
use crate::sshnames::*;
use crate::sshwire::{self, hash_mpint, hash_ser_length, BinString};
use crate::traffic::TrafOut;

// sha256 is the only exchange hash
const MAX_SESSID: usize = 32;
pub type SessId = heapless::Vec<u8, MAX_SESSID>;

/// Options that can't be negotiated
const MARKER_ONLY_KEXS: &[&str] = &[
    SSH_NAME_EXT_INFO_C,
    SSH_NAME_EXT_INFO_S,
    SSH_NAME_KEXGUESS2,
    SSH_NAME_STRICT_KEX_C,
    SSH_NAME_STRICT_KEX_S,
];

/// The lists we send in our `KexInit`.
#[derive(Debug)]
pub(crate) struct AlgoConfig {
    kexs: LocalNames,
    hostsig: LocalNames,
    ciphers: LocalNames,
    macs: LocalNames,
    comps: LocalNames,
    comp_algos: Vec<CompressAlgo>,
}

impl AlgoConfig {
    pub fn new(conf: &Config, is_client: bool) -> Result<Self> {
        let mut kexs = conf.kex.clone();
        // Only clients are interested in ext-info
        if is_client {
            kexs.push(SSH_NAME_EXT_INFO_C)?;
        }
        kexs.push(SSH_NAME_KEXGUESS2)?;

        let mut comps = LocalNames::new();
        for c in conf.compress.iter() {
            comps.push(c.name)?;
        }
        if !comps.contains(SSH_NAME_NONE) {
            comps.push(SSH_NAME_NONE)?;
        }

        Ok(AlgoConfig {
            kexs,
            hostsig: conf.hostsig.clone(),
            ciphers: conf.ciphers.clone(),
            macs: conf.macs.clone(),
            comps,
            comp_algos: conf.compress.clone(),
        })
    }

    fn comp_algo(&self, name: &str) -> CompressAlgo {
        self.comp_algos.iter().find(|c| c.name == name).copied().unwrap_or(CompressAlgo::NONE)
    }
}

/// Creates our `KexInit` packet
pub(crate) fn make_kexinit<'a>(cookie: &[u8; 16], conf: &'a AlgoConfig) -> Packet<'a> {
    packets::KexInit {
        cookie: *cookie,
        kex: (&conf.kexs).into(),
        hostsig: (&conf.hostsig).into(),
        cipher_c2s: (&conf.ciphers).into(),
        cipher_s2c: (&conf.ciphers).into(),
        mac_c2s: (&conf.macs).into(),
        mac_s2c: (&conf.macs).into(),
        comp_c2s: (&conf.comps).into(),
        comp_s2c: (&conf.comps).into(),
        lang_c2s: NameList::empty(),
        lang_s2c: NameList::empty(),
        first_follows: false,
        reserved: 0,
    }
    .into()
}

/// Key exchange method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KexType {
    Curve25519,
    Group14,
    Gex,
}

impl KexType {
    fn from_name(name: &str) -> Result<Self> {
        match name {
            SSH_NAME_CURVE25519 | SSH_NAME_CURVE25519_LIBSSH => Ok(KexType::Curve25519),
            SSH_NAME_DH_GROUP14_SHA256 => Ok(KexType::Group14),
            SSH_NAME_DH_GEX_SHA256 => Ok(KexType::Gex),
            _ => Err(Error::bug()),
        }
    }
}

/// The names of the algorithms in use, as agreed with the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NegotiatedAlgos {
    pub kex: &'static str,
    pub hostsig: &'static str,
    pub cipher_c2s: &'static str,
    pub cipher_s2c: &'static str,
    pub mac_c2s: &'static str,
    pub mac_s2c: &'static str,
    pub comp_c2s: &'static str,
    pub comp_s2c: &'static str,
}

impl fmt::Display for NegotiatedAlgos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "kex {} hostkey {} cipher {}/{} mac {}/{} comp {}/{}",
            self.kex,
            self.hostsig,
            self.cipher_c2s,
            self.cipher_s2c,
            self.mac_c2s,
            self.mac_s2c,
            self.comp_c2s,
            self.comp_s2c
        )
    }
}

/// Algorithms for one direction
#[derive(Debug, Clone)]
pub(crate) struct DirAlgos {
    pub cipher: Cipher,
    pub integ: Integ,
    pub comp: CompressAlgo,
}

/// Records the chosen algorithms while key exchange proceeds
#[derive(Debug, Clone)]
pub(crate) struct Algos {
    pub kex: KexType,
    pub hostsig: SigType,
    pub tx: DirAlgos,
    pub rx: DirAlgos,

    // If first_kex_packet_follows was set in SSH_MSG_KEXINIT but the
    // guessed algorithms don't match, we discard the next message (RFC4253 Sec 7).
    // This flag is reset to `false` after the packet has been discarded.
    pub discard_next: bool,

    pub is_client: bool,

    pub names: NegotiatedAlgos,
}

/// Performs SSH algorithm negotiation against a received `KexInit`.
pub(crate) fn negotiate(
    is_client: bool,
    p: &packets::KexInit,
    conf: &AlgoConfig,
) -> Result<Algos> {
    let kexguess2 = p.kex.has_algo(SSH_NAME_KEXGUESS2)?;

    // For each algorithm we select the first name in the client's
    // list that is also present in the server's list.
    let kex_method =
        p.kex.first_match(is_client, &conf.kexs)?.ok_or(Error::AlgoNoMatch { algo: "kex" })?;

    // Certain kex method names aren't actual algorithms, just markers.
    // If they are negotiated it means no valid method matched
    if MARKER_ONLY_KEXS.contains(&kex_method) {
        return Err(Error::AlgoNoMatch { algo: "kex" });
    }

    let kex = KexType::from_name(kex_method)?;
    let goodguess_kex = if kexguess2 {
        p.kex.first() == kex_method
    } else {
        p.kex.first() == conf.kexs.first()
    };

    let hostsig_method = p
        .hostsig
        .first_match(is_client, &conf.hostsig)?
        .ok_or(Error::AlgoNoMatch { algo: "hostkey" })?;
    let hostsig = SigType::from_name(hostsig_method)?;
    let goodguess_hostkey = if kexguess2 {
        p.hostsig.first() == hostsig_method
    } else {
        p.hostsig.first() == conf.hostsig.first()
    };

    let c2s = (&p.cipher_c2s, &p.mac_c2s, &p.comp_c2s);
    let s2c = (&p.cipher_s2c, &p.mac_s2c, &p.comp_s2c);

    let dir = |(ciphers, macs, comps): (&NameList, &NameList, &NameList)| {
        let n = ciphers
            .first_match(is_client, &conf.ciphers)?
            .ok_or(Error::AlgoNoMatch { algo: "encryption" })?;
        let cipher = Cipher::from_name(n)?;

        // We ignore mac algorithms for AEAD ciphers
        let (integ, mac_name) = if let Some(integ) = cipher.integ() {
            (integ, integ.name())
        } else {
            let n = macs
                .first_match(is_client, &conf.macs)?
                .ok_or(Error::AlgoNoMatch { algo: "mac" })?;
            (Integ::from_name(n)?, n)
        };

        let n = comps
            .first_match(is_client, &conf.comps)?
            .ok_or(Error::AlgoNoMatch { algo: "compression" })?;
        let comp = conf.comp_algo(n);
        Ok::<_, Error>((DirAlgos { cipher, integ, comp }, mac_name))
    };
    let (c2s, mac_c2s) = dir(c2s)?;
    let (s2c, mac_s2c) = dir(s2c)?;

    // Ignore language fields

    let names = NegotiatedAlgos {
        kex: kex_method,
        hostsig: hostsig_method,
        cipher_c2s: c2s.cipher.name(),
        cipher_s2c: s2c.cipher.name(),
        mac_c2s,
        mac_s2c,
        comp_c2s: c2s.comp.name,
        comp_s2c: s2c.comp.name,
    };

    let (tx, rx) = if is_client { (c2s, s2c) } else { (s2c, c2s) };

    let discard_next = p.first_follows && !(goodguess_kex && goodguess_hostkey);

    Ok(Algos { kex, hostsig, tx, rx, discard_next, is_client, names })
}

/// The exchange hash `H` in progress.
#[derive(Clone)]
pub(crate) struct KexHash {
    hash_ctx: Sha256,
}

impl fmt::Debug for KexHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KexHash")
    }
}

impl KexHash {
    /// RFC4253 section 8. `i_c` and `i_s` are the exact `KexInit` payloads.
    pub fn new(v_c: &str, v_s: &str, i_c: &[u8], i_s: &[u8]) -> Self {
        let mut kh = KexHash { hash_ctx: Sha256::new() };
        kh.hash_slice(v_c.as_bytes());
        kh.hash_slice(v_s.as_bytes());
        kh.hash_slice(i_c);
        kh.hash_slice(i_s);
        kh
    }

    /// Hashes a slice, with added u32 length prefix.
    pub fn hash_slice(&mut self, v: &[u8]) {
        self.hash_ctx.update((v.len() as u32).to_be_bytes());
        self.hash_ctx.update(v);
    }

    pub fn hash_u32(&mut self, v: u32) {
        self.hash_ctx.update(v.to_be_bytes());
    }

    pub fn hash_mpint(&mut self, m: &[u8]) {
        hash_mpint(&mut self.hash_ctx, m)
    }

    pub fn hash_pubkey(&mut self, k: &PubKey) -> Result<()> {
        hash_ser_length(&mut self.hash_ctx, k)
    }

    /// Computes `H`, `k` is the shared secret as unsigned bytes
    pub fn finish(mut self, k: &[u8]) -> Result<SessId> {
        self.hash_mpint(k);
        SessId::from_slice(&self.hash_ctx.finalize()).trap()
    }
}

/// The results of a key exchange, used to derive keys.
pub(crate) struct KexOutput {
    /// Shared secret `K`
    k: Zeroizing<Vec<u8>>,
    /// `H` for this exchange, the first becomes the session id
    pub h: SessId,
}

impl fmt::Debug for KexOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KexOutput").finish_non_exhaustive()
    }
}

impl KexOutput {
    pub fn new(k: &[u8], h: &SessId) -> Self {
        KexOutput { k: Zeroizing::new(k.to_vec()), h: h.clone() }
    }

    fn base_hash(&self) -> Sha256 {
        let mut d = Sha256::new();
        hash_mpint(&mut d, &self.k);
        d.update(&self.h);
        d
    }

    /// RFC4253 7.2. `K1 = HASH(K || H || "A" || session_id)`,
    /// extended with `Kn = HASH(K || H || K1 || ... || Kn-1)`.
    pub fn compute_key(&self, letter: u8, len: usize, sess_id: &SessId) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(len + Sha256::output_size()));
        let mut d = self.base_hash();
        d.update([letter]);
        d.update(sess_id);
        out.extend_from_slice(&d.finalize());

        while out.len() < len {
            let mut d = self.base_hash();
            d.update(out.as_slice());
            out.extend_from_slice(&d.finalize());
        }
        out.truncate(len);
        out
    }
}

/// Ephemeral secret for the running exchange
pub(crate) enum KexSecret {
    Curve25519 { ours: Option<x25519_dalek::EphemeralSecret>, pubkey: [u8; 32] },
    Dh(KexDh),
}

impl fmt::Debug for KexSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Curve25519 { .. } => f.write_str("Curve25519"),
            Self::Dh(d) => d.fmt(f),
        }
    }
}

impl KexSecret {
    fn new_curve25519() -> Self {
        let ours = x25519_dalek::EphemeralSecret::random_from_rng(OsRng);
        let pubkey = x25519_dalek::PublicKey::from(&ours).to_bytes();
        KexSecret::Curve25519 { ours: Some(ours), pubkey }
    }

    fn pubkey(&self) -> &[u8] {
        match self {
            Self::Curve25519 { pubkey, .. } => pubkey,
            Self::Dh(d) => d.pubkey(),
        }
    }

    /// Adds our and the server's public values to the hash
    fn hash_public(&self, kh: &mut KexHash, theirs: &[u8]) {
        match self {
            // RFC8731 hashes Q_C and Q_S as strings
            Self::Curve25519 { pubkey, .. } => {
                kh.hash_slice(pubkey);
                kh.hash_slice(theirs);
            }
            Self::Dh(d) => {
                kh.hash_mpint(d.pubkey());
                kh.hash_mpint(theirs);
            }
        }
    }

    /// Returns the shared secret `K` as unsigned bytes
    fn secret(&mut self, theirs: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        match self {
            Self::Curve25519 { ours, .. } => {
                let theirs: [u8; 32] = theirs.try_into().map_err(|_| Error::BadKex)?;
                let shsec = ours.take().trap()?.diffie_hellman(&theirs.into());
                if !shsec.was_contributory() {
                    debug!("Curve25519 shared secret is zero");
                    return Err(Error::BadKex);
                }
                Ok(Zeroizing::new(shsec.as_bytes().to_vec()))
            }
            Self::Dh(d) => Ok(Zeroizing::new(d.secret(theirs)?)),
        }
    }
}

/// Observable key exchange progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KexPhase {
    /// No exchange has completed yet, nor started
    Idle,
    /// `KexInit` has been sent or received
    ExchangeStarted,
    /// The shared secret and keys have been computed
    KeysDerived,
    /// Our `NewKeys` was sent, waiting for the server's
    NewKeysSent,
    /// Keys are in use and no exchange is running
    Active,
}

/// The current state of the Kex
#[derive(Debug)]
pub(crate) enum Kex {
    /// No key exchange in progress
    Idle,

    /// Sent our KexInit, waiting for the server's
    KexInit {
        /// Our exact `KexInit` payload, for the exchange hash
        own: Vec<u8>,
    },

    /// Sent `KEX_DH_GEX_REQUEST`, waiting for the group
    GexRequested { algos: Algos, kex_hash: KexHash },

    /// Waiting for `KEXDH_REPLY` or `KEX_DH_GEX_REPLY`
    KexDH { algos: Algos, kex_hash: KexHash, secret: KexSecret },

    /// Keys computed, `NewKeys` is yet to be sent
    KeysDerived { tx: DirKeys, rx: DirKeys },

    /// Waiting for the server's `NewKeys`. `rx` is taken into use then.
    NewKeysSent { rx: DirKeys },

    /// A transient state use internally to transition between other states.
    Taken,
}

impl Kex {
    pub fn new() -> Self {
        Kex::Idle
    }

    fn take(&mut self) -> Self {
        debug_assert!(!matches!(self, Kex::Taken));
        core::mem::replace(self, Kex::Taken)
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Kex::Idle)
    }

    /// `done` is whether a key exchange has ever completed
    pub fn phase(&self, done: bool) -> KexPhase {
        match self {
            Kex::Idle if done => KexPhase::Active,
            Kex::Idle => KexPhase::Idle,
            Kex::KexInit { .. } | Kex::GexRequested { .. } | Kex::KexDH { .. } => {
                KexPhase::ExchangeStarted
            }
            Kex::KeysDerived { .. } => KexPhase::KeysDerived,
            Kex::NewKeysSent { .. } | Kex::Taken => KexPhase::NewKeysSent,
        }
    }

    /// Algorithms chosen for the running exchange
    pub fn negotiated(&self) -> Option<&NegotiatedAlgos> {
        match self {
            Kex::GexRequested { algos, .. } | Kex::KexDH { algos, .. } => Some(&algos.names),
            _ => None,
        }
    }

    /// Whether message 31 is `KEX_DH_GEX_GROUP`
    pub fn gex_pending(&self) -> bool {
        matches!(self, Kex::GexRequested { .. })
    }

    /// Sends a `KexInit` message. Must be called from `Idle` state
    pub fn send_kexinit(&mut self, conf: &AlgoConfig, traf: &mut TrafOut) -> Result<()> {
        if !self.is_idle() {
            return Err(Error::bug());
        }
        let cookie = random::random_array::<16>()?;
        let p = make_kexinit(&cookie, conf);
        let own = sshwire::ssh_to_vec(&p)?;
        traf.start_kex();
        traf.send_payload(own.clone(), packets::Category::All)?;
        *self = Kex::KexInit { own };
        Ok(())
    }

    /// Handles the server's `KexInit`, `payload` is the exact packet payload.
    pub fn handle_kexinit(
        &mut self,
        remote: &packets::KexInit,
        payload: &[u8],
        conf: &AlgoConfig,
        versions: (&str, &str),
        traf: &mut TrafOut,
    ) -> Result<()> {
        // Reply if we haven't already sent one.
        if self.is_idle() {
            self.send_kexinit(conf, traf)?;
        }

        let own = if let Kex::KexInit { own } = self.take() {
            own
        } else {
            debug!("Unexpected KexInit");
            return Err(Error::PacketWrong);
        };

        let algos = negotiate(true, remote, conf)?;
        debug!("Negotiated {}", algos.names);

        let (v_c, v_s) = versions;
        let kex_hash = KexHash::new(v_c, v_s, &own, payload);

        *self = match algos.kex {
            KexType::Curve25519 => {
                let secret = KexSecret::new_curve25519();
                traf.send(packets::KexDHInit { q_c: BinString(secret.pubkey()) })?;
                Kex::KexDH { algos, kex_hash, secret }
            }
            KexType::Group14 => {
                let secret = KexSecret::Dh(KexDh::new_group14()?);
                traf.send(packets::KexDHInit { q_c: BinString(secret.pubkey()) })?;
                Kex::KexDH { algos, kex_hash, secret }
            }
            KexType::Gex => {
                traf.send(packets::KexGexRequest { min: GEX_MIN, n: GEX_N, max: GEX_MAX })?;
                Kex::GexRequested { algos, kex_hash }
            }
        };
        Ok(())
    }

    /// Handles message 31, either `KEXDH_REPLY` or `KEX_DH_GEX_GROUP`.
    pub fn handle_kex31(
        &mut self,
        p: &packets::Kex31,
        traf: &mut TrafOut,
        b: &mut dyn CliBehaviour,
        sess_id: &mut Option<SessId>,
        authed: bool,
    ) -> Result<()> {
        if self.discard() {
            return Ok(());
        }
        match (p, self.take()) {
            (packets::Kex31::GexGroup(g), Kex::GexRequested { algos, kex_hash }) => {
                let dh = KexDh::new_group(g.p.0, g.g.0)?;
                traf.send(packets::KexGexInit { e: BinString(dh.pubkey()) })?;
                *self = Kex::KexDH { algos, kex_hash, secret: KexSecret::Dh(dh) };
                Ok(())
            }
            (packets::Kex31::DHReply(r), Kex::KexDH { algos, kex_hash, secret })
                if algos.kex != KexType::Gex =>
            {
                self.handle_reply(
                    algos, kex_hash, secret, &r.k_s.0, r.q_s.0, &r.sig.0, b, sess_id, authed,
                )
            }
            _ => {
                debug!("Unexpected kex packet");
                Err(Error::PacketWrong)
            }
        }
    }

    pub fn handle_gex_reply(
        &mut self,
        p: &packets::KexGexReply,
        b: &mut dyn CliBehaviour,
        sess_id: &mut Option<SessId>,
        authed: bool,
    ) -> Result<()> {
        if self.discard() {
            return Ok(());
        }
        match self.take() {
            Kex::KexDH { algos, kex_hash, secret } if algos.kex == KexType::Gex => self
                .handle_reply(algos, kex_hash, secret, &p.k_s.0, p.f.0, &p.sig.0, b, sess_id, authed),
            _ => {
                debug!("Unexpected kex packet");
                Err(Error::PacketWrong)
            }
        }
    }

    /// Discards a wrongly guessed packet from the server
    fn discard(&mut self) -> bool {
        match self {
            Kex::GexRequested { algos, .. } | Kex::KexDH { algos, .. } if algos.discard_next => {
                debug!("Discarding guessed kex packet");
                algos.discard_next = false;
                true
            }
            _ => false,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_reply(
        &mut self,
        algos: Algos,
        mut kex_hash: KexHash,
        mut secret: KexSecret,
        k_s: &PubKey,
        theirs: &[u8],
        sig: &Signature,
        b: &mut dyn CliBehaviour,
        sess_id: &mut Option<SessId>,
        authed: bool,
    ) -> Result<()> {
        kex_hash.hash_pubkey(k_s)?;
        // RFC4419 group parameters follow K_S
        if let (KexType::Gex, KexSecret::Dh(dh)) = (algos.kex, &secret) {
            kex_hash.hash_u32(GEX_MIN);
            kex_hash.hash_u32(GEX_N);
            kex_hash.hash_u32(GEX_MAX);
            kex_hash.hash_mpint(&dh.p());
            kex_hash.hash_mpint(&dh.g());
        }
        secret.hash_public(&mut kex_hash, theirs);
        let k = secret.secret(theirs)?;
        let h = kex_hash.finish(&k)?;

        trace!("verify h {:?}", h.as_slice().hex_dump());
        algos.hostsig.verify(k_s, &h, sig)?;
        debug!("Hostkey signature is valid");
        if !b.valid_hostkey(k_s) {
            info!("Host key rejected");
            return Err(Error::HostKeyRejected);
        }

        let output = KexOutput::new(&k, &h);
        // The first KEX's H becomes the persistent sess_id
        let sess_id = sess_id.get_or_insert(h);
        let (tx, rx) = DirKeys::derive_pair(&output, sess_id, &algos, authed)?;
        *self = Kex::KeysDerived { tx, rx };
        Ok(())
    }

    /// Sends `NewKeys` and takes the new outbound keys into use.
    pub fn send_newkeys(&mut self, traf: &mut TrafOut) -> Result<()> {
        if let Kex::KeysDerived { tx, rx } = self.take() {
            traf.send(packets::NewKeys {})?;
            traf.rekey(tx)?;
            *self = Kex::NewKeysSent { rx };
            Ok(())
        } else {
            Err(Error::bug())
        }
    }

    /// Handles the server's `NewKeys`, returning the inbound keys
    /// to use from the next packet.
    pub fn handle_newkeys(&mut self) -> Result<DirKeys> {
        if let Kex::NewKeysSent { rx } = self.take() {
            *self = Kex::Idle;
            Ok(rx)
        } else {
            debug!("Unexpected NewKeys");
            Err(Error::PacketWrong)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use crate::config::Config;
    use crate::encrypt;
    use crate::gloamlog::init_test_log;
    use crate::kex::*;
    use crate::namelist::LocalNames;
    use crate::sshwire::packet_from_bytes;
    use crate::packets::ParseContext;

    /// A `KexInit` with single algorithms for all categories
    fn server_init(kex: &'static str, cipher: &'static str, mac: &'static str) -> AlgoConfig {
        let mut c = Config::default();
        c.kex = LocalNames::try_from([kex].as_slice()).unwrap();
        c.ciphers = LocalNames::try_from([cipher].as_slice()).unwrap();
        c.macs = LocalNames::try_from([mac].as_slice()).unwrap();
        AlgoConfig::new(&c, false).unwrap()
    }

    fn negotiate_with(serv: &AlgoConfig) -> Result<Algos> {
        let cli = AlgoConfig::new(&Config::default(), true).unwrap();
        let p = make_kexinit(&[0u8; 16], serv);
        let b = sshwire::ssh_to_vec(&p).unwrap();
        let p = packet_from_bytes(&b, &ParseContext::default()).unwrap();
        let Packet::KexInit(k) = p else { panic!() };
        negotiate(true, &k, &cli)
    }

    #[test]
    fn name_match() {
        // check that the from_name() functions are complete
        let c = Config::default();
        for k in c.kex.0.iter() {
            KexType::from_name(k).unwrap();
        }
        for k in c.hostsig.0.iter() {
            SigType::from_name(k).unwrap();
        }
        for k in c.ciphers.0.iter() {
            encrypt::Cipher::from_name(k).unwrap();
        }
        for k in c.macs.0.iter() {
            encrypt::Integ::from_name(k).unwrap();
        }
    }

    #[test]
    #[should_panic]
    fn unknown_kex() {
        KexType::from_name("bad").unwrap();
    }

    #[test]
    fn single_algorithm() {
        init_test_log();
        let serv =
            server_init(SSH_NAME_DH_GROUP14_SHA256, SSH_NAME_AES128_CTR, SSH_NAME_HMAC_SHA512);
        let a = negotiate_with(&serv).unwrap();
        assert_eq!(a.kex, KexType::Group14);
        assert_eq!(a.tx.cipher, Cipher::Aes128Ctr);
        assert_eq!(a.rx.integ, Integ::HmacSha512);
        assert_eq!(a.names.kex, SSH_NAME_DH_GROUP14_SHA256);
        assert_eq!(a.names.mac_s2c, SSH_NAME_HMAC_SHA512);
        assert_eq!(a.names.comp_c2s, SSH_NAME_NONE);
        assert!(!a.discard_next);
    }

    #[test]
    fn client_preference() {
        init_test_log();
        let mut c = Config::default();
        // server prefers aes, we prefer chapoly
        c.ciphers =
            LocalNames::try_from([SSH_NAME_AES256_CTR, SSH_NAME_CHAPOLY].as_slice()).unwrap();
        let serv = AlgoConfig::new(&c, false).unwrap();
        let a = negotiate_with(&serv).unwrap();
        assert_eq!(a.tx.cipher, Cipher::ChaPoly);
        // aead mac
        assert_eq!(a.tx.integ, Integ::ChaPoly);
        assert_eq!(a.names.mac_c2s, SSH_NAME_CHAPOLY);
    }

    #[test]
    fn no_match() {
        init_test_log();
        let serv = server_init(SSH_NAME_CURVE25519, "aes192-cbc", SSH_NAME_HMAC_SHA256);
        let e = negotiate_with(&serv).unwrap_err();
        assert!(matches!(e, Error::AlgoNoMatch { algo: "encryption" }));

        let serv = server_init(SSH_NAME_CURVE25519, SSH_NAME_AES128_CTR, "hmac-md5");
        assert!(matches!(negotiate_with(&serv), Err(Error::AlgoNoMatch { algo: "mac" })));
    }

    #[test]
    fn kex_guess() {
        init_test_log();
        let cli = AlgoConfig::new(&Config::default(), true).unwrap();
        let guessed = |kexs: &[&'static str]| {
            let mut c = Config::default();
            c.kex = LocalNames::try_from(kexs).unwrap();
            let serv = AlgoConfig::new(&c, false).unwrap();
            let mut p = make_kexinit(&[0u8; 16], &serv);
            let Packet::KexInit(k) = &mut p else { panic!() };
            k.first_follows = true;
            let b = sshwire::ssh_to_vec(&p).unwrap();
            let Packet::KexInit(k) = packet_from_bytes(&b, &ParseContext::default()).unwrap()
            else {
                panic!()
            };
            negotiate(true, &k, &cli).unwrap()
        };

        // server's first choice isn't what is negotiated
        let a = guessed(&[SSH_NAME_DH_GROUP14_SHA256, SSH_NAME_CURVE25519]);
        assert_eq!(a.kex, KexType::Curve25519);
        assert!(a.discard_next);

        let a = guessed(&[SSH_NAME_CURVE25519, SSH_NAME_DH_GROUP14_SHA256]);
        assert!(!a.discard_next);
    }

    #[test]
    fn marker_not_negotiated() {
        init_test_log();
        // server only offers the kexguess2 marker, which the client also lists
        let serv = server_init(SSH_NAME_KEXGUESS2, SSH_NAME_AES128_CTR, SSH_NAME_HMAC_SHA256);
        assert!(matches!(negotiate_with(&serv), Err(Error::AlgoNoMatch { algo: "kex" })));
    }

    #[test]
    fn derive_key_lengths() {
        init_test_log();
        let h = SessId::from_slice(&[4u8; 32]).unwrap();
        let out = KexOutput::new(&[0x80, 1, 2, 3], &h);
        let k64 = out.compute_key(b'C', 64, &h);
        let k32 = out.compute_key(b'C', 32, &h);
        assert_eq!(k64.len(), 64);
        assert_eq!(&k64[..32], k32.as_slice());
        let k20 = out.compute_key(b'A', 20, &h);
        assert_ne!(&k20[..], &k32[..20]);
        assert!(out.compute_key(b'B', 0, &h).is_empty());

        // K2 = HASH(K || H || K1)
        let mut d = Sha256::new();
        hash_mpint(&mut d, &[0x80, 1, 2, 3]);
        d.update(&h);
        d.update(k32.as_slice());
        assert_eq!(&k64[32..], d.finalize().as_slice());
    }
}
