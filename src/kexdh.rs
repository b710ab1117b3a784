//! Finite field Diffie-Hellman for `diffie-hellman-group14-sha256` and
//! `diffie-hellman-group-exchange-sha256`.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::fmt;

use num_bigint::BigUint;

use crate::config::{GEX_MAX, GEX_MIN};
use crate::random;

/// RFC3526 2048-bit MODP Group 14
const GROUP14_P: &[u8] = b"\
    FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1\
    29024E088A67CC74020BBEA63B139B22514A08798E3404DD\
    EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
    E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
    EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D\
    C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F\
    83655D23DCA3AD961C62F356208552BB9ED529077096966D\
    670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
    E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9\
    DE2BCBF6955817183995497CEA956AE515D2261898FA0510\
    15728E5A8AACAA68FFFFFFFFFFFFFFFF";
const GROUP14_G: u32 = 2;

/// Length of the private exponent. Comfortably more than twice the
/// security level of the largest group we accept.
const EXPONENT_BYTES: usize = 64;

pub(crate) struct KexDh {
    p: BigUint,
    g: BigUint,
    x: BigUint,
    /// Our public value `g^x mod p`, as mpint bytes
    e: Vec<u8>,
}

impl fmt::Debug for KexDh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KexDh").field("bits", &self.p.bits()).finish_non_exhaustive()
    }
}

impl KexDh {
    pub fn new_group14() -> Result<Self> {
        let p = BigUint::parse_bytes(GROUP14_P, 16).trap()?;
        Self::with_group(p, BigUint::from(GROUP14_G))
    }

    /// Creates a DH exchange from a group sent by the server in
    /// `SSH_MSG_KEX_DH_GEX_GROUP`. `p` and `g` are mpint contents.
    pub fn new_group(p: &[u8], g: &[u8]) -> Result<Self> {
        let p = from_mpint(p)?;
        let g = from_mpint(g)?;
        let bits = p.bits();
        if bits < GEX_MIN as u64 || bits > GEX_MAX as u64 {
            debug!("Group exchange prime is {bits} bits");
            return Err(Error::BadKex);
        }
        let one = BigUint::from(1u32);
        if g <= one || g >= &p - &one {
            debug!("Bad group exchange generator");
            return Err(Error::BadKex);
        }
        Self::with_group(p, g)
    }

    fn with_group(p: BigUint, g: BigUint) -> Result<Self> {
        let mut xb = [0u8; EXPONENT_BYTES];
        random::fill_random(&mut xb)?;
        let x = BigUint::from_bytes_be(&xb);
        xb.fill(0);
        let e = mpint_bytes(&g.modpow(&x, &p));
        Ok(Self { p, g, x, e })
    }

    /// `e`, to send in `KEXDH_INIT` or `KEX_DH_GEX_INIT`
    pub fn pubkey(&self) -> &[u8] {
        &self.e
    }

    pub fn p(&self) -> Vec<u8> {
        mpint_bytes(&self.p)
    }

    pub fn g(&self) -> Vec<u8> {
        mpint_bytes(&self.g)
    }

    /// Computes the shared secret `K` from the server's `f`, as
    /// unsigned big endian bytes.
    pub fn secret(&self, f: &[u8]) -> Result<Vec<u8>> {
        let f = from_mpint(f)?;
        let one = BigUint::from(1u32);
        // RFC4253 section 8, values outside [1, p-1] must not be accepted.
        // 1 and p-1 are also rejected as they give a trivial secret.
        if f <= one || f >= &self.p - &one {
            debug!("DH public value out of range");
            return Err(Error::BadKex);
        }
        Ok(f.modpow(&self.x, &self.p).to_bytes_be())
    }
}

/// Parses mpint contents as a positive number
fn from_mpint(m: &[u8]) -> Result<BigUint> {
    if m.first().map_or(false, |b| b & 0x80 != 0) {
        debug!("Negative mpint");
        return Err(Error::BadKex);
    }
    Ok(BigUint::from_bytes_be(m))
}

/// Encodes the contents of a positive mpint, with a leading zero
/// byte if the high bit would be set.
pub(crate) fn mpint_bytes(n: &BigUint) -> Vec<u8> {
    let mut b = n.to_bytes_be();
    if b == [0] {
        b.clear();
    } else if b[0] & 0x80 != 0 {
        b.insert(0, 0);
    }
    b
}

#[cfg(test)]
mod tests {
    use crate::gloamlog::init_test_log;
    use crate::kexdh::*;

    #[test]
    fn group14_agree() {
        init_test_log();
        let a = KexDh::new_group14().unwrap();
        let b = KexDh::new_group14().unwrap();
        assert_eq!(a.p.bits(), 2048);
        // p has the high bit set
        assert_eq!(a.p()[0], 0);
        assert_eq!(a.p().len(), 257);

        let ka = a.secret(b.pubkey()).unwrap();
        let kb = b.secret(a.pubkey()).unwrap();
        assert_eq!(ka, kb);
    }

    #[test]
    fn range_checks() {
        init_test_log();
        let a = KexDh::new_group14().unwrap();
        assert!(matches!(a.secret(&[]), Err(Error::BadKex)));
        assert!(matches!(a.secret(&[1]), Err(Error::BadKex)));
        let pm1 = mpint_bytes(&(&a.p - 1u32));
        assert!(matches!(a.secret(&pm1), Err(Error::BadKex)));
        assert!(matches!(a.secret(&a.p()), Err(Error::BadKex)));
        // negative
        assert!(matches!(a.secret(&[0x80, 2]), Err(Error::BadKex)));
        a.secret(&[2]).unwrap();
    }

    #[test]
    fn gex_group_limits() {
        init_test_log();
        let g14 = KexDh::new_group14().unwrap();
        let g = KexDh::new_group(&g14.p(), &[2]).unwrap();
        let k1 = g.secret(g14.pubkey()).unwrap();
        let k2 = g14.secret(g.pubkey()).unwrap();
        assert_eq!(k1, k2);

        // too small
        let small = mpint_bytes(&(BigUint::from(1u32) << 1023u32));
        assert!(matches!(KexDh::new_group(&small, &[2]), Err(Error::BadKex)));
        // bad generator
        assert!(matches!(KexDh::new_group(&g14.p(), &[1]), Err(Error::BadKex)));
    }

    #[test]
    fn mpint_encoding() {
        assert_eq!(mpint_bytes(&BigUint::from(0u32)), Vec::<u8>::new());
        assert_eq!(mpint_bytes(&BigUint::from(0x7fu32)), vec![0x7f]);
        assert_eq!(mpint_bytes(&BigUint::from(0x80u32)), vec![0, 0x80]);
    }
}
