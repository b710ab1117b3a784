//! `chacha20-poly1305@openssh.com` as described in OpenSSH's
//! PROTOCOL.chacha20poly1305.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20::ChaCha20Legacy;
use poly1305::universal_hash::KeyInit;
use poly1305::Poly1305;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::encrypt::SSH_LENGTH_SIZE;

/// Keys for one direction.
#[derive(Clone, ZeroizeOnDrop)]
pub(crate) struct SSHChaPoly {
    /// Encrypts the packet length
    k_len: [u8; 32],
    /// Encrypts the packet, and derives the poly1305 key
    k_main: [u8; 32],
}

impl SSHChaPoly {
    pub const TAG_LEN: usize = 16;
    pub const KEY_LEN: usize = 64;

    /// `key` is the 64 bytes of derived key material.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != Self::KEY_LEN {
            return Err(Error::bug());
        }
        let mut k = Self { k_len: [0; 32], k_main: [0; 32] };
        k.k_main.copy_from_slice(&key[..32]);
        k.k_len.copy_from_slice(&key[32..]);
        Ok(k)
    }

    /// The original 64 bit nonce variant, with the sequence number
    /// as the nonce.
    fn stream(key: &[u8; 32], seq: u32) -> ChaCha20Legacy {
        let nonce = (seq as u64).to_be_bytes();
        ChaCha20Legacy::new(key.into(), (&nonce).into())
    }

    /// Computes the tag over `msg`. Leaves `c` at block 1.
    fn tag(c: &mut ChaCha20Legacy, msg: &[u8]) -> poly1305::Tag {
        let mut poly_key = [0u8; 32];
        c.seek(0u32);
        c.apply_keystream(&mut poly_key);
        let tag = Poly1305::new((&poly_key).into()).compute_unpadded(msg);
        poly_key.zeroize();
        c.seek(64u32);
        tag
    }

    /// Decrypts the length field without modifying `buf`.
    pub fn packet_length(&self, seq: u32, buf: &[u8]) -> Result<u32> {
        let mut l: [u8; SSH_LENGTH_SIZE] =
            buf.get(..SSH_LENGTH_SIZE).trap()?.try_into().trap()?;
        Self::stream(&self.k_len, seq).apply_keystream(&mut l);
        Ok(u32::from_be_bytes(l))
    }

    /// Checks the tag then decrypts `msg` in place, apart from the
    /// still-encrypted length field.
    pub fn open(&self, seq: u32, msg: &mut [u8], tag: &[u8]) -> Result<()> {
        if msg.len() < SSH_LENGTH_SIZE || tag.len() != Self::TAG_LEN {
            return Err(Error::BadDecrypt);
        }

        let mut c = Self::stream(&self.k_main, seq);
        let expect = Self::tag(&mut c, msg);
        if !bool::from(expect.as_slice().ct_eq(tag)) {
            return Err(Error::BadDecrypt);
        }

        c.apply_keystream(&mut msg[SSH_LENGTH_SIZE..]);
        Ok(())
    }

    /// Encrypts the length and body of `msg` in place, writing the tag.
    pub fn seal(&self, seq: u32, msg: &mut [u8], tag: &mut [u8]) -> Result<()> {
        if msg.len() < SSH_LENGTH_SIZE || tag.len() != Self::TAG_LEN {
            return Err(Error::bug());
        }

        let (len, body) = msg.split_at_mut(SSH_LENGTH_SIZE);
        Self::stream(&self.k_len, seq).apply_keystream(len);

        let mut c = Self::stream(&self.k_main, seq);
        c.seek(64u32);
        c.apply_keystream(body);

        let t = Self::tag(&mut c, msg);
        tag.copy_from_slice(t.as_slice());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::gloamlog::init_test_log;
    use crate::ssh_chapoly::*;

    #[test]
    fn seal_open() {
        init_test_log();
        let key: Vec<u8> = (0..64).collect();
        let k = SSHChaPoly::new(&key).unwrap();

        let plain = *b"\x00\x00\x00\x0c\x04hello world";
        let mut msg = plain;
        let mut tag = [0u8; 16];
        k.seal(7, &mut msg, &mut tag).unwrap();
        assert_ne!(msg, plain);

        assert_eq!(k.packet_length(7, &msg).unwrap(), 12);
        // wrong sequence number fails
        let mut m2 = msg;
        assert!(matches!(k.open(8, &mut m2, &tag), Err(Error::BadDecrypt)));

        k.open(7, &mut msg, &tag).unwrap();
        assert_eq!(msg[SSH_LENGTH_SIZE..], plain[SSH_LENGTH_SIZE..]);
    }

    #[test]
    fn bad_tag() {
        let k = SSHChaPoly::new(&[3u8; 64]).unwrap();
        let mut msg = [1u8; 24];
        let mut tag = [0u8; 16];
        k.seal(0, &mut msg, &mut tag).unwrap();
        tag[15] ^= 1;
        assert!(matches!(k.open(0, &mut msg, &tag), Err(Error::BadDecrypt)));
    }
}
