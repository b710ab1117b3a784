//! Handles encryption/decryption and framing a payload in a SSH packet.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::fmt;
use core::num::Wrapping;

use aes::cipher::{BlockSizeUser, KeyIvInit, KeySizeUser, StreamCipher};
use digest::Digest;
use hmac::{Hmac, Mac};
use zeroize::Zeroizing;

use crate::compress::CompState;
use crate::config::MAX_PACKET_LEN;
use crate::kex::{Algos, DirAlgos, KexOutput, SessId};
use crate::random;
use crate::ssh_chapoly::SSHChaPoly;
use crate::sshnames::*;

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;
type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;
type HmacSha256 = Hmac<sha2::Sha256>;
type HmacSha512 = Hmac<sha2::Sha512>;

// RFC4253 Section 6. Including length u32 length field, excluding MAC
const SSH_MIN_PACKET_SIZE: usize = 16;
const SSH_MIN_PADLEN: usize = 4;
const SSH_MIN_BLOCK: usize = 8;
pub const SSH_LENGTH_SIZE: usize = 4;
pub const SSH_PAYLOAD_START: usize = SSH_LENGTH_SIZE + 1;

/// Cipher selected by negotiation, prior to keying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cipher {
    ChaPoly,
    Aes256Ctr,
    Aes128Ctr,
}

impl fmt::Display for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Cipher {
    /// Must be passed a known name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            SSH_NAME_CHAPOLY => Ok(Cipher::ChaPoly),
            SSH_NAME_AES256_CTR => Ok(Cipher::Aes256Ctr),
            SSH_NAME_AES128_CTR => Ok(Cipher::Aes128Ctr),
            _ => Err(Error::bug()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Cipher::ChaPoly => SSH_NAME_CHAPOLY,
            Cipher::Aes256Ctr => SSH_NAME_AES256_CTR,
            Cipher::Aes128Ctr => SSH_NAME_AES128_CTR,
        }
    }

    /// Length in bytes
    pub fn key_len(&self) -> usize {
        match self {
            Cipher::ChaPoly => SSHChaPoly::KEY_LEN,
            Cipher::Aes256Ctr => aes::Aes256::key_size(),
            Cipher::Aes128Ctr => aes::Aes128::key_size(),
        }
    }

    /// Length in bytes
    pub fn iv_len(&self) -> usize {
        match self {
            Cipher::ChaPoly => 0,
            Cipher::Aes256Ctr | Cipher::Aes128Ctr => aes::Aes128::block_size(),
        }
    }

    /// Returns the [`Integ`] for this cipher, or None if not aead
    pub fn integ(&self) -> Option<Integ> {
        match self {
            Cipher::ChaPoly => Some(Integ::ChaPoly),
            _ => None,
        }
    }
}

/// MAC selected by negotiation, prior to keying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Integ {
    ChaPoly,
    HmacSha256,
    HmacSha512,
}

impl fmt::Display for Integ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Integ {
    /// Matches a MAC name. AEAD ciphers use [`Cipher::integ`] instead.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            SSH_NAME_HMAC_SHA256 => Ok(Integ::HmacSha256),
            SSH_NAME_HMAC_SHA512 => Ok(Integ::HmacSha512),
            _ => Err(Error::bug()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Integ::ChaPoly => SSH_NAME_CHAPOLY,
            Integ::HmacSha256 => SSH_NAME_HMAC_SHA256,
            Integ::HmacSha512 => SSH_NAME_HMAC_SHA512,
        }
    }

    /// Length in bytes
    pub fn key_len(&self) -> usize {
        match self {
            Integ::ChaPoly => 0,
            Integ::HmacSha256 => sha2::Sha256::output_size(),
            Integ::HmacSha512 => sha2::Sha512::output_size(),
        }
    }
}

pub(crate) enum CipherKey {
    ChaPoly(SSHChaPoly),
    Aes256Ctr(Box<Aes256Ctr>),
    Aes128Ctr(Box<Aes128Ctr>),
    NoCipher,
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = match self {
            Self::ChaPoly(_) => "ChaPoly",
            Self::Aes256Ctr(_) => "Aes256Ctr",
            Self::Aes128Ctr(_) => "Aes128Ctr",
            Self::NoCipher => "NoCipher",
        };
        write!(f, "CipherKey::{n}")
    }
}

impl CipherKey {
    fn from_cipher(cipher: Cipher, key: &[u8], iv: &[u8]) -> Result<Self> {
        Ok(match cipher {
            Cipher::ChaPoly => CipherKey::ChaPoly(SSHChaPoly::new(key)?),
            Cipher::Aes256Ctr => {
                CipherKey::Aes256Ctr(Box::new(Aes256Ctr::new_from_slices(key, iv).trap()?))
            }
            Cipher::Aes128Ctr => {
                CipherKey::Aes128Ctr(Box::new(Aes128Ctr::new_from_slices(key, iv).trap()?))
            }
        })
    }

    fn is_aead(&self) -> bool {
        matches!(self, CipherKey::ChaPoly(_))
    }

    fn size_block(&self) -> usize {
        match self {
            CipherKey::Aes256Ctr(_) | CipherKey::Aes128Ctr(_) => aes::Aes128::block_size(),
            CipherKey::ChaPoly(_) | CipherKey::NoCipher => SSH_MIN_BLOCK,
        }
    }

    fn apply_keystream(&mut self, buf: &mut [u8]) {
        match self {
            CipherKey::Aes256Ctr(a) => a.apply_keystream(buf),
            CipherKey::Aes128Ctr(a) => a.apply_keystream(buf),
            CipherKey::ChaPoly(_) | CipherKey::NoCipher => (),
        }
    }
}

pub(crate) enum IntegKey {
    ChaPoly,
    HmacSha256(Zeroizing<[u8; 32]>),
    HmacSha512(Zeroizing<[u8; 64]>),
    NoInteg,
}

impl fmt::Debug for IntegKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = match self {
            Self::ChaPoly => "ChaPoly",
            Self::HmacSha256(_) => "HmacSha256",
            Self::HmacSha512(_) => "HmacSha512",
            Self::NoInteg => "NoInteg",
        };
        write!(f, "IntegKey::{n}")
    }
}

impl IntegKey {
    fn from_integ(integ: Integ, key: &[u8]) -> Result<Self> {
        Ok(match integ {
            Integ::ChaPoly => IntegKey::ChaPoly,
            Integ::HmacSha256 => IntegKey::HmacSha256(Zeroizing::new(key.try_into().trap()?)),
            Integ::HmacSha512 => IntegKey::HmacSha512(Zeroizing::new(key.try_into().trap()?)),
        })
    }

    fn size_out(&self) -> usize {
        match self {
            IntegKey::ChaPoly => SSHChaPoly::TAG_LEN,
            IntegKey::HmacSha256(_) => sha2::Sha256::output_size(),
            IntegKey::HmacSha512(_) => sha2::Sha512::output_size(),
            IntegKey::NoInteg => 0,
        }
    }

    /// Computes the MAC of `seq || data`, written to `out`
    fn mac(&self, seq: u32, data: &[u8], out: &mut [u8]) -> Result<()> {
        match self {
            IntegKey::HmacSha256(k) => {
                let mut h = HmacSha256::new_from_slice(k.as_slice()).trap()?;
                h.update(&seq.to_be_bytes());
                h.update(data);
                out.copy_from_slice(&h.finalize().into_bytes());
            }
            IntegKey::HmacSha512(k) => {
                let mut h = HmacSha512::new_from_slice(k.as_slice()).trap()?;
                h.update(&seq.to_be_bytes());
                h.update(data);
                out.copy_from_slice(&h.finalize().into_bytes());
            }
            IntegKey::ChaPoly | IntegKey::NoInteg => (),
        }
        Ok(())
    }

    /// Constant time comparison of the MAC
    fn verify(&self, seq: u32, data: &[u8], mac: &[u8]) -> Result<()> {
        let r = match self {
            IntegKey::HmacSha256(k) => {
                let mut h = HmacSha256::new_from_slice(k.as_slice()).trap()?;
                h.update(&seq.to_be_bytes());
                h.update(data);
                h.verify_slice(mac)
            }
            IntegKey::HmacSha512(k) => {
                let mut h = HmacSha512::new_from_slice(k.as_slice()).trap()?;
                h.update(&seq.to_be_bytes());
                h.update(data);
                h.verify_slice(mac)
            }
            IntegKey::ChaPoly | IntegKey::NoInteg => Ok(()),
        };
        r.map_err(|_| {
            info!("Packet integrity failed");
            Error::BadDecrypt
        })
    }
}

/// The keys for one direction of traffic.
#[derive(Debug)]
pub(crate) struct DirKeys {
    cipher: CipherKey,
    integ: IntegKey,
    comp: CompState,
}

impl DirKeys {
    pub fn new_cleartext() -> Self {
        DirKeys { cipher: CipherKey::NoCipher, integ: IntegKey::NoInteg, comp: CompState::Off }
    }

    /// Derives keys for one direction.
    ///
    /// `letters` are the RFC4253 7.2 characters for the IV, encryption key
    /// and integrity key of this direction.
    fn derive(
        out: &KexOutput,
        sess_id: &SessId,
        algos: &DirAlgos,
        letters: [u8; 3],
        authed: bool,
    ) -> Result<Self> {
        let [l_iv, l_key, l_integ] = letters;
        let iv = out.compute_key(l_iv, algos.cipher.iv_len(), sess_id);
        let key = out.compute_key(l_key, algos.cipher.key_len(), sess_id);
        let cipher = CipherKey::from_cipher(algos.cipher, &key, &iv)?;

        let ik = out.compute_key(l_integ, algos.integ.key_len(), sess_id);
        let integ = IntegKey::from_integ(algos.integ, &ik)?;
        let comp = CompState::new(&algos.comp, authed);
        Ok(DirKeys { cipher, integ, comp })
    }

    /// Derives `(send, receive)` keys from a completed exchange.
    pub fn derive_pair(
        out: &KexOutput,
        sess_id: &SessId,
        algos: &Algos,
        authed: bool,
    ) -> Result<(Self, Self)> {
        // client to server is A, C, E
        let c2s = *b"ACE";
        let s2c = *b"BDF";
        let (tx, rx) = if algos.is_client { (c2s, s2c) } else { (s2c, c2s) };
        Ok((
            Self::derive(out, sess_id, &algos.tx, tx, authed)?,
            Self::derive(out, sess_id, &algos.rx, rx, authed)?,
        ))
    }

    /// Padding is required to meet
    /// - minimum packet length
    /// - minimum padding size,
    /// - encrypted length being a multiple of block length
    fn calc_pad(&self, payload_len: usize) -> usize {
        let size_block = self.cipher.size_block();
        // aead ciphers don't include the initial length field in encrypted blocks
        let len = 1 + payload_len + if self.cipher.is_aead() { 0 } else { SSH_LENGTH_SIZE };

        let mut padlen = size_block - len % size_block;
        if padlen < SSH_MIN_PADLEN {
            padlen += size_block
        }

        // We know we already have at least 8 bytes because of blocksize rounding.
        if SSH_LENGTH_SIZE + 1 + payload_len + padlen < SSH_MIN_PACKET_SIZE {
            padlen += size_block;
        }
        padlen
    }
}

/// Outbound keys and sequence number.
///
/// A single instance is kept for the session, rekeying replaces the keys.
#[derive(Debug)]
pub(crate) struct SendContext {
    keys: DirKeys,
    seq: Wrapping<u32>,
}

impl SendContext {
    pub fn new() -> Self {
        Self { keys: DirKeys::new_cleartext(), seq: Wrapping(0) }
    }

    /// Takes new keys into use, keeping the sequence number.
    pub fn rekey(&mut self, keys: DirKeys) {
        self.keys = keys
    }

    pub fn activate_compression(&mut self) {
        self.keys.comp.activate()
    }

    pub fn seq(&self) -> u32 {
        self.seq.0
    }

    /// Appends a complete packet for `payload` to `out`.
    ///
    /// Returns the sequence number used.
    pub fn encode(&mut self, payload: &[u8], out: &mut Vec<u8>) -> Result<u32> {
        let compressed;
        let payload = match self.keys.comp.active() {
            Some(c) => {
                let mut v = Vec::with_capacity(payload.len());
                c.compress(payload, &mut v)?;
                compressed = v;
                compressed.as_slice()
            }
            None => payload,
        };

        let padlen = self.keys.calc_pad(payload.len());
        // len is everything except the MAC
        let len = SSH_LENGTH_SIZE + 1 + payload.len() + padlen;
        let size_integ = self.keys.integ.size_out();
        if self.keys.cipher.is_aead() {
            debug_assert_eq!((len - SSH_LENGTH_SIZE) % self.keys.cipher.size_block(), 0);
        } else {
            debug_assert_eq!(len % self.keys.cipher.size_block(), 0);
        }

        let start = out.len();
        out.reserve(len + size_integ);
        out.extend_from_slice(&((len - SSH_LENGTH_SIZE) as u32).to_be_bytes());
        out.push(padlen as u8);
        out.extend_from_slice(payload);
        let pad_start = out.len();
        out.resize(start + len + size_integ, 0);
        random::fill_random(&mut out[pad_start..start + len])?;

        let seq = self.seq.0;
        let (pkt, mac) = out[start..].split_at_mut(len);
        self.keys.integ.mac(seq, pkt, mac)?;

        match &mut self.keys.cipher {
            CipherKey::ChaPoly(k) => k.seal(seq, pkt, mac)?,
            c => c.apply_keystream(pkt),
        }

        self.seq += 1;
        Ok(seq)
    }
}

/// Inbound keys and sequence number.
#[derive(Debug)]
pub(crate) struct RecvContext {
    keys: DirKeys,
    seq: Wrapping<u32>,
}

impl RecvContext {
    pub fn new() -> Self {
        Self { keys: DirKeys::new_cleartext(), seq: Wrapping(0) }
    }

    pub fn rekey(&mut self, keys: DirKeys) {
        self.keys = keys
    }

    pub fn activate_compression(&mut self) {
        self.keys.comp.activate()
    }

    pub fn seq(&self) -> u32 {
        self.seq.0
    }

    /// The number of bytes to read before calling [`decrypt_first_block`](Self::decrypt_first_block)
    pub fn size_block(&self) -> usize {
        self.keys.cipher.size_block()
    }

    /// Decrypts the first block in the buffer, returning the length of the
    /// total SSH packet (including length and MAC).
    ///
    /// `buf` must be exactly [`size_block`](Self::size_block) long.
    pub fn decrypt_first_block(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() != self.size_block() {
            return Err(Error::bug());
        }

        let len = match &mut self.keys.cipher {
            CipherKey::ChaPoly(k) => k.packet_length(self.seq.0, buf)?,
            c => {
                c.apply_keystream(buf);
                u32::from_be_bytes(buf[..SSH_LENGTH_SIZE].try_into().trap()?)
            }
        };

        let total = (len as usize)
            .checked_add(SSH_LENGTH_SIZE + self.keys.integ.size_out())
            .ok_or(Error::BadDecrypt)?;
        if total > MAX_PACKET_LEN {
            return Err(Error::BigPacket { size: total });
        }
        if total < SSH_MIN_PACKET_SIZE + self.keys.integ.size_out() {
            debug!("Bad packet, {total} smaller than min packet size");
            return Err(Error::SSHProtoError);
        }
        Ok(total)
    }

    /// Authenticates and decrypts a whole packet, the first block already
    /// passed through [`decrypt_first_block`](Self::decrypt_first_block).
    ///
    /// `buf` is replaced by the packet payload. Returns the sequence number
    /// of the packet.
    pub fn open(&mut self, buf: &mut Vec<u8>) -> Result<u32> {
        let seq = self.seq.0;
        // The sequence number increments even for a failed packet,
        // but any failure here ends the session.
        self.seq += 1;

        let size_block = self.keys.cipher.size_block();
        let size_integ = self.keys.integ.size_out();
        let aead = self.keys.cipher.is_aead();

        // "MUST be a multiple of the cipher block size".
        // encrypted length for aead ciphers doesn't include the length prefix.
        let enc_len = buf.len() - size_integ - if aead { SSH_LENGTH_SIZE } else { 0 };
        if enc_len % size_block != 0 {
            debug!("Bad packet, not multiple of block size");
            return Err(Error::SSHProtoError);
        }

        let split = buf.len() - size_integ;
        let (data, mac) = buf.split_at_mut(split);
        match &mut self.keys.cipher {
            CipherKey::ChaPoly(k) => k.open(seq, data, mac).map_err(|_| {
                info!("Packet integrity failed");
                Error::BadDecrypt
            })?,
            c => c.apply_keystream(&mut data[size_block..]),
        }
        self.keys.integ.verify(seq, data, mac)?;

        let padlen = data[SSH_LENGTH_SIZE] as usize;
        if padlen < SSH_MIN_PADLEN {
            debug!("Packet padding too short");
            return Err(Error::SSHProtoError);
        }
        let payload_end = data.len().checked_sub(padlen).filter(|e| *e >= SSH_PAYLOAD_START).ok_or_else(|| {
            debug!("Bad padding length");
            Error::SSHProtoError
        })?;

        buf.truncate(payload_end);
        buf.drain(..SSH_PAYLOAD_START);

        if let Some(c) = self.keys.comp.active() {
            let mut v = Vec::with_capacity(buf.len() * 2);
            c.decompress(buf, &mut v)?;
            if v.len() > MAX_PACKET_LEN {
                return Err(Error::BigPacket { size: v.len() });
            }
            *buf = v;
        }
        Ok(seq)
    }
}

#[cfg(test)]
mod tests {
    use crate::compress::tests::FLIP_DELAYED;
    use crate::compress::CompressAlgo;
    use crate::encrypt::*;
    use crate::error::Error;
    use crate::gloamlog::init_test_log;
    use crate::kex::{Algos, DirAlgos, KexOutput, KexType, NegotiatedAlgos};
    use crate::sign::SigType;
    use sha2::Sha256;

    fn test_algos(tx: (Cipher, Integ), rx: (Cipher, Integ), is_client: bool) -> Algos {
        let d = |(cipher, integ)| DirAlgos { cipher, integ, comp: CompressAlgo::NONE };
        Algos {
            kex: KexType::Curve25519,
            hostsig: SigType::Ed25519,
            tx: d(tx),
            rx: d(rx),
            discard_next: false,
            is_client,
            names: NegotiatedAlgos::default(),
        }
    }

    fn combos() -> Vec<(Cipher, Integ)> {
        vec![
            (Cipher::ChaPoly, Integ::ChaPoly),
            (Cipher::Aes256Ctr, Integ::HmacSha256),
            (Cipher::Aes128Ctr, Integ::HmacSha512),
            (Cipher::Aes256Ctr, Integ::HmacSha512),
            (Cipher::Aes128Ctr, Integ::HmacSha256),
        ]
    }

    /// Returns a matching `(client send, server receive)` pair
    fn keypair(c: (Cipher, Integ)) -> (SendContext, RecvContext) {
        let h = SessId::from_slice(&Sha256::digest(b"some exchange hash")).unwrap();
        let sess_id = SessId::from_slice(&Sha256::digest(b"some sessid")).unwrap();
        let out = KexOutput::new(b"\x01\x02hello", &h);

        let cli = test_algos(c, c, true);
        let serv = test_algos(c, c, false);
        let (ctx, _) = DirKeys::derive_pair(&out, &sess_id, &cli, false).unwrap();
        let (_, srx) = DirKeys::derive_pair(&out, &sess_id, &serv, false).unwrap();
        let mut s = SendContext::new();
        s.rekey(ctx);
        let mut r = RecvContext::new();
        r.rekey(srx);
        (s, r)
    }

    fn recv_one(r: &mut RecvContext, wire: &[u8]) -> Result<(Vec<u8>, u32)> {
        let bs = r.size_block();
        let mut buf = wire[..bs].to_vec();
        let total = r.decrypt_first_block(&mut buf)?;
        assert_eq!(total, wire.len());
        buf.extend_from_slice(&wire[bs..]);
        let seq = r.open(&mut buf)?;
        Ok((buf, seq))
    }

    fn check_padding(wire: &[u8], block: usize, mac: usize, aead: bool) {
        let body = wire.len() - mac;
        let enc = if aead { body - SSH_LENGTH_SIZE } else { body };
        assert_eq!(enc % block.max(8), 0, "not multiple of block");
        assert!(body >= SSH_MIN_PACKET_SIZE);
    }

    #[test]
    fn padding_lengths() {
        init_test_log();
        for c in combos() {
            let (mut s, _) = keypair(c);
            let aead = c.1 == Integ::ChaPoly;
            let block = if c.0 == Cipher::ChaPoly { 8 } else { 16 };
            let mac = s.keys.integ.size_out();
            for l in 0..600 {
                let pad = s.keys.calc_pad(l);
                assert!((SSH_MIN_PADLEN..=255).contains(&pad), "pad {pad} for {l}");
                let mut out = vec![];
                s.encode(&vec![0x33; l], &mut out).unwrap();
                check_padding(&out, block, mac, aead);
            }
        }
        // cleartext
        let mut s = SendContext::new();
        for l in 0..600 {
            let mut out = vec![];
            s.encode(&vec![1; l], &mut out).unwrap();
            check_padding(&out, 8, 0, false);
            assert_eq!(out[4] as usize, out.len() - 5 - l);
        }
    }

    #[test]
    fn roundtrip_all_algos() {
        init_test_log();
        for c in combos() {
            trace!("algos {c:?}");
            let (mut s, mut r) = keypair(c);
            for i in 0..300usize {
                let payload: Vec<u8> = (0..i).map(|x| x as u8).collect();
                let mut wire = vec![];
                let seq = s.encode(&payload, &mut wire).unwrap();
                assert_eq!(seq, i as u32);
                let (p, rseq) = recv_one(&mut r, &wire).unwrap();
                assert_eq!(rseq, i as u32);
                assert_eq!(p, payload);
            }
        }
    }

    #[test]
    fn corrupt_mac_detected() {
        init_test_log();
        for c in combos() {
            let (mut s, mut r) = keypair(c);
            let mut wire = vec![];
            s.encode(b"\x5eimportant data", &mut wire).unwrap();
            // flip a bit of the payload ciphertext
            wire[SSH_PAYLOAD_START + 2] ^= 4;
            let e = recv_one(&mut r, &wire).unwrap_err();
            assert!(matches!(e, Error::BadDecrypt), "{c:?} gave {e:?}");
        }
    }

    #[test]
    fn cleartext_sequence() {
        init_test_log();
        let mut s = SendContext::new();
        let mut r = RecvContext::new();
        // sequence numbers are independent of the other direction
        let mut other = SendContext::new();
        let mut junk = vec![];
        other.encode(b"x", &mut junk).unwrap();
        for n in 0..10u32 {
            let mut wire = vec![];
            assert_eq!(s.encode(&n.to_be_bytes(), &mut wire).unwrap(), n);
            let (p, seq) = recv_one(&mut r, &wire).unwrap();
            assert_eq!(seq, n);
            assert_eq!(p, n.to_be_bytes());
        }
        assert_eq!(s.seq(), 10);
        assert_eq!(r.seq(), 10);
        assert_eq!(other.seq(), 1);
    }

    #[test]
    fn rekey_keeps_seq() {
        init_test_log();
        let (mut s, mut r) = keypair((Cipher::Aes256Ctr, Integ::HmacSha256));
        for _ in 0..3 {
            let mut wire = vec![];
            s.encode(b"abc", &mut wire).unwrap();
            recv_one(&mut r, &wire).unwrap();
        }
        let (s2, r2) = keypair((Cipher::ChaPoly, Integ::ChaPoly));
        s.rekey(s2.keys);
        r.rekey(r2.keys);
        let mut wire = vec![];
        assert_eq!(s.encode(b"after", &mut wire).unwrap(), 3);
        let (p, seq) = recv_one(&mut r, &wire).unwrap();
        assert_eq!((p.as_slice(), seq), (b"after".as_slice(), 3));
    }

    #[test]
    fn too_big() {
        let mut r = RecvContext::new();
        let mut buf = vec![0u8; 8];
        buf[..4].copy_from_slice(&(MAX_PACKET_LEN as u32).to_be_bytes());
        assert!(matches!(r.decrypt_first_block(&mut buf), Err(Error::BigPacket { .. })));
    }

    #[test]
    fn delayed_compression() {
        init_test_log();
        let mut s = SendContext::new();
        let mut r = RecvContext::new();
        let comp = || DirKeys {
            cipher: CipherKey::NoCipher,
            integ: IntegKey::NoInteg,
            comp: CompState::new(&FLIP_DELAYED, false),
        };
        s.rekey(comp());
        r.rekey(comp());

        let mut wire = vec![];
        s.encode(&[0x00, 0x01], &mut wire).unwrap();
        assert_eq!(&wire[5..7], &[0x00, 0x01]);
        assert_eq!(recv_one(&mut r, &wire).unwrap().0, [0x00, 0x01]);

        s.activate_compression();
        r.activate_compression();
        let mut wire = vec![];
        s.encode(&[0x00, 0x01], &mut wire).unwrap();
        assert_eq!(&wire[5..7], &[0xff, 0xfe]);
        assert_eq!(recv_one(&mut r, &wire).unwrap().0, [0x00, 0x01]);
    }
}
