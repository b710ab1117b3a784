//! Payload compression providers.
//!
//! Only the `none` identity is built in. Other algorithms such as
//! `zlib@openssh.com` can be supplied by the application in
//! [`Config::compress`](crate::Config::compress).

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::fmt;

use crate::sshnames::SSH_NAME_NONE;

/// A stateful compressor for one direction of a session.
///
/// Implementations keep their stream state across packets, each call
/// handles a single packet payload.
pub trait Compressor: Send {
    /// Appends the compressed form of `input` to `out`
    fn compress(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()>;

    /// Appends the decompressed form of `input` to `out`
    fn decompress(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()>;
}

/// A named compression algorithm.
#[derive(Clone, Copy)]
pub struct CompressAlgo {
    pub name: &'static str,
    /// Only enabled once user authentication has succeeded, as
    /// for `zlib@openssh.com`
    pub delayed: bool,
    /// Creates the state for a direction
    pub new: fn() -> Box<dyn Compressor>,
}

impl CompressAlgo {
    pub const NONE: CompressAlgo =
        CompressAlgo { name: SSH_NAME_NONE, delayed: false, new: Identity::boxed };

    pub fn is_none(&self) -> bool {
        self.name == SSH_NAME_NONE
    }
}

impl fmt::Debug for CompressAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressAlgo")
            .field("name", &self.name)
            .field("delayed", &self.delayed)
            .finish_non_exhaustive()
    }
}

struct Identity;

impl Identity {
    fn boxed() -> Box<dyn Compressor> {
        Box::new(Identity)
    }
}

impl Compressor for Identity {
    fn compress(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(input);
        Ok(())
    }

    fn decompress(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(input);
        Ok(())
    }
}

/// Compression for one direction
pub(crate) enum CompState {
    Off,
    /// Delayed until authentication
    Pending(CompressAlgo),
    Active(Box<dyn Compressor>),
}

impl fmt::Debug for CompState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => f.write_str("Off"),
            Self::Pending(a) => write!(f, "Pending({})", a.name),
            Self::Active(_) => f.write_str("Active"),
        }
    }
}

impl CompState {
    pub fn new(algo: &CompressAlgo, authed: bool) -> Self {
        if algo.is_none() {
            Self::Off
        } else if algo.delayed && !authed {
            Self::Pending(*algo)
        } else {
            Self::Active((algo.new)())
        }
    }

    /// Called after authentication succeeds
    pub fn activate(&mut self) {
        if let Self::Pending(a) = self {
            trace!("Enabling delayed compression {}", a.name);
            *self = Self::Active((a.new)())
        }
    }

    pub fn active(&mut self) -> Option<&mut dyn Compressor> {
        match self {
            Self::Active(c) => Some(c.as_mut()),
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use crate::compress::*;
    use crate::gloamlog::init_test_log;

    /// Swaps bytes with their complement, enough to see that
    /// the provider was applied.
    pub struct Flip;

    impl Compressor for Flip {
        fn compress(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
            out.extend(input.iter().map(|b| !b));
            Ok(())
        }

        fn decompress(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
            self.compress(input, out)
        }
    }

    fn new_flip() -> Box<dyn Compressor> {
        Box::new(Flip)
    }

    pub const FLIP_DELAYED: CompressAlgo =
        CompressAlgo { name: "flip@test", delayed: true, new: new_flip };

    #[test]
    fn delayed_activation() {
        init_test_log();
        let mut c = CompState::new(&FLIP_DELAYED, false);
        assert!(c.active().is_none());
        c.activate();
        let mut out = vec![];
        c.active().unwrap().compress(&[0x0f], &mut out).unwrap();
        assert_eq!(out, [0xf0]);

        // a rekey after auth starts active
        let mut c = CompState::new(&FLIP_DELAYED, true);
        assert!(c.active().is_some());

        let mut c = CompState::new(&CompressAlgo::NONE, true);
        c.activate();
        assert!(c.active().is_none());
    }
}
