//! Host key signature verification.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::mem::discriminant;

use signature::Verifier;

use crate::packets::{PubKey, Signature};
use crate::sshnames::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigType {
    Ed25519,
    RSA256,
}

impl SigType {
    /// Must be a valid name
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            SSH_NAME_ED25519 => Ok(SigType::Ed25519),
            SSH_NAME_RSA_SHA256 => Ok(SigType::RSA256),
            _ => Err(Error::bug()),
        }
    }

    /// Returns a valid name
    pub fn algorithm_name(&self) -> &'static str {
        match self {
            SigType::Ed25519 => SSH_NAME_ED25519,
            SigType::RSA256 => SSH_NAME_RSA_SHA256,
        }
    }

    /// Verifies `sig` over `msg` made by `pubkey`.
    ///
    /// `self` is the expected signature type, from key exchange negotiation.
    pub fn verify(&self, pubkey: &PubKey, msg: &[u8], sig: &Signature) -> Result<()> {
        let sig_type = sig.sig_type().map_err(|_| Error::BadSig)?;

        if discriminant(&sig_type) != discriminant(self) {
            warn!(
                "Received {:?} signature, expecting {}",
                sig.algorithm_name(),
                self.algorithm_name()
            );
            return Err(Error::BadSig);
        }

        match (self, pubkey, sig) {
            (SigType::Ed25519, PubKey::Ed25519(k), Signature::Ed25519(s)) => {
                let k: &[u8; 32] = k.key.0.try_into().map_err(|_| Error::BadKey)?;
                let k = ed25519_dalek::VerifyingKey::from_bytes(k).map_err(|_| Error::BadKey)?;
                let s: &[u8; 64] = s.sig.0.try_into().map_err(|_| Error::BadSig)?;
                let s = ed25519_dalek::Signature::from_bytes(s);
                k.verify(msg, &s).map_err(|_| Error::BadSig)
            }

            #[cfg(feature = "rsa")]
            (SigType::RSA256, PubKey::RSA(k), Signature::RSA256(s)) => {
                use rsa::pkcs1v15;
                use rsa::BigUint;

                let n = BigUint::from_bytes_be(k.n.0);
                let e = BigUint::from_bytes_be(k.e.0);
                let k = rsa::RsaPublicKey::new(n, e).map_err(|e| {
                    debug!("Bad RSA key: {e}");
                    Error::BadKey
                })?;
                let k = pkcs1v15::VerifyingKey::<sha2::Sha256>::new(k);
                let s = pkcs1v15::Signature::try_from(s.sig.0).map_err(|_| Error::BadSig)?;
                k.verify(msg, &s).map_err(|e| {
                    trace!("RSA signature failed: {e}");
                    Error::BadSig
                })
            }

            #[cfg(not(feature = "rsa"))]
            (SigType::RSA256, PubKey::RSA(_), Signature::RSA256(_)) => {
                Err(Error::NotAvailable { what: SSH_NAME_RSA_SHA256 })
            }

            _ => {
                warn!(
                    "Signature \"{:?}\" doesn't match key type \"{:?}\"",
                    sig.algorithm_name(),
                    pubkey.algorithm_name(),
                );
                Err(Error::BadSig)
            }
        }
    }
}
