//! Session configuration and protocol limits.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::time::Duration;

use crate::compress::CompressAlgo;
use crate::error;
use crate::namelist::{LocalNames, MAX_LOCAL_NAMES};
use crate::sshnames::*;

/// Default initial window for channels we open, 2MiB
pub const DEFAULT_WINDOW: u32 = 2 * 1024 * 1024;
/// Default largest channel data packet we accept
pub const DEFAULT_MAX_PACKET: u32 = 32 * 1024;
pub const DEFAULT_MAX_CHANNELS: usize = 64;

/// Largest inbound packet, including length and MAC.
///
/// RFC4253 requires at least 35000, larger allows bigger
/// payloads after decompression.
pub const MAX_PACKET_LEN: usize = 256 * 1024;

/// The limit for lines sent before the server's version line
pub const MAX_IDENT_LINES: usize = 50;
/// Including CR LF
pub const MAX_IDENT_LEN: usize = 255;

/// Group exchange sizes in bits, RFC8270 recommends at least 2048
pub const GEX_MIN: u32 = 2048;
pub const GEX_N: u32 = 3072;
pub const GEX_MAX: u32 = 8192;

/// Rekey after this much traffic in either direction
pub const DEFAULT_REKEY_BYTES: u64 = 1 << 30;
pub const DEFAULT_REKEY_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub const DEFAULT_VERSION: &str = "SSH-2.0-gloam_0.1";

/// Settings for a [`Session`](crate::Session).
///
/// Algorithm lists are in preference order and must only
/// contain names that gloam implements.
#[derive(Debug, Clone)]
pub struct Config {
    /// The version line we send, without CR LF
    pub version: String,

    pub kex: LocalNames,
    pub hostsig: LocalNames,
    pub ciphers: LocalNames,
    pub macs: LocalNames,
    /// Compression providers, `none` is accepted even if not listed
    pub compress: Vec<CompressAlgo>,

    /// Initial window for new channels
    pub window: u32,
    /// Largest channel data packet the server may send us
    pub max_packet: u32,
    pub max_channels: usize,

    pub rekey_bytes: u64,
    pub rekey_interval: Duration,
}

/// Marker names added to our kex list, `ext-info-c` and the guess extension
const KEX_MARKERS: usize = 2;

// Implemented algorithms, in default preference order

const KEXS: &[&str] = &[
    SSH_NAME_CURVE25519,
    SSH_NAME_CURVE25519_LIBSSH,
    SSH_NAME_DH_GEX_SHA256,
    SSH_NAME_DH_GROUP14_SHA256,
];

const HOSTSIGS: &[&str] = &[
    SSH_NAME_ED25519,
    #[cfg(feature = "rsa")]
    SSH_NAME_RSA_SHA256,
];

const CIPHERS: &[&str] = &[SSH_NAME_CHAPOLY, SSH_NAME_AES256_CTR, SSH_NAME_AES128_CTR];
const MACS: &[&str] = &[SSH_NAME_HMAC_SHA256, SSH_NAME_HMAC_SHA512];

impl Default for Config {
    fn default() -> Self {
        // OK unwrap: static lists are shorter than MAX_LOCAL_NAMES
        let names = |l: &[&'static str]| LocalNames::try_from(l).unwrap();
        Config {
            version: DEFAULT_VERSION.into(),
            kex: names(KEXS),
            hostsig: names(HOSTSIGS),
            ciphers: names(CIPHERS),
            macs: names(MACS),
            compress: vec![CompressAlgo::NONE],
            window: DEFAULT_WINDOW,
            max_packet: DEFAULT_MAX_PACKET,
            max_channels: DEFAULT_MAX_CHANNELS,
            rekey_bytes: DEFAULT_REKEY_BYTES,
            rekey_interval: DEFAULT_REKEY_INTERVAL,
        }
    }
}

impl Config {
    /// Checks that the settings are usable.
    pub fn validate(&self) -> Result<()> {
        if !self.version.starts_with("SSH-2.0-") || self.version.len() + 2 > MAX_IDENT_LEN {
            return Err(Error::BadUsage { msg: "Bad version string" });
        }
        if self.version.bytes().any(|c| c.is_ascii_control() || !c.is_ascii()) {
            return Err(Error::BadUsage { msg: "Bad version string" });
        }
        check_names("kex", &self.kex, KEXS)?;
        check_names("host key", &self.hostsig, HOSTSIGS)?;
        check_names("cipher", &self.ciphers, CIPHERS)?;
        check_names("mac", &self.macs, MACS)?;
        if self.kex.0.len() + KEX_MARKERS > MAX_LOCAL_NAMES {
            return Err(Error::BadUsage { msg: "Too many kex algorithms" });
        }
        // `none` may be added
        if self.compress.len() + 1 > MAX_LOCAL_NAMES {
            return Err(Error::BadUsage { msg: "Too many compression algorithms" });
        }
        if self.window == 0 || self.max_packet == 0 || self.max_channels == 0 {
            return Err(Error::BadUsage { msg: "Zero channel limits" });
        }
        Ok(())
    }
}

fn check_names(kind: &'static str, names: &LocalNames, supported: &[&str]) -> Result<()> {
    if names.0.is_empty() {
        return Err(Error::BadUsage { msg: "Empty algorithm list" });
    }
    match names.0.iter().find(|n| !supported.contains(n)) {
        Some(name) => error::UnsupportedAlgo { kind, name: *name }.fail(),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use crate::config::*;
    use crate::gloamlog::init_test_log;

    #[test]
    fn defaults_valid() {
        init_test_log();
        let c = Config::default();
        c.validate().unwrap();
        assert_eq!(c.kex.first(), SSH_NAME_CURVE25519);
        assert_eq!(c.compress[0].name, SSH_NAME_NONE);
    }

    #[test]
    fn bad_version() {
        let mut c = Config::default();
        c.version = "SSH-1.5-old".into();
        assert!(matches!(c.validate(), Err(Error::BadUsage { .. })));
        c.version = "SSH-2.0-a\rb".into();
        assert!(c.validate().is_err());
        c.version = format!("SSH-2.0-{}", "x".repeat(250));
        assert!(c.validate().is_err());
    }

    #[test]
    fn unsupported_names() {
        init_test_log();
        let mut c = Config::default();
        c.ciphers = LocalNames::try_from(["aes192-cbc"].as_slice()).unwrap();
        let e = c.validate().unwrap_err();
        assert!(
            matches!(e, Error::UnsupportedAlgo { kind: "cipher", name: "aes192-cbc" }),
            "{e:?}"
        );

        let mut c = Config::default();
        c.macs = LocalNames::try_from([SSH_NAME_HMAC_SHA256, "hmac-md5"].as_slice()).unwrap();
        assert!(matches!(c.validate(), Err(Error::UnsupportedAlgo { kind: "mac", .. })));

        // markers are added by the session, not configured
        let mut c = Config::default();
        c.kex = LocalNames::try_from([SSH_NAME_CURVE25519, SSH_NAME_EXT_INFO_C].as_slice()).unwrap();
        assert!(matches!(c.validate(), Err(Error::UnsupportedAlgo { kind: "kex", .. })));

        #[cfg(not(feature = "rsa"))]
        {
            let mut c = Config::default();
            c.hostsig = LocalNames::try_from([SSH_NAME_RSA_SHA256].as_slice()).unwrap();
            assert!(matches!(c.validate(), Err(Error::UnsupportedAlgo { kind: "host key", .. })));
        }
    }

    #[test]
    fn kex_list_room() {
        init_test_log();
        let mut c = Config::default();
        c.kex = LocalNames::try_from([SSH_NAME_CURVE25519; MAX_LOCAL_NAMES - KEX_MARKERS].as_slice())
            .unwrap();
        c.validate().unwrap();
        crate::kex::AlgoConfig::new(&c, true).unwrap();

        c.kex = LocalNames::try_from([SSH_NAME_CURVE25519; MAX_LOCAL_NAMES - 1].as_slice()).unwrap();
        assert!(matches!(c.validate(), Err(Error::BadUsage { .. })));
    }
}
