#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use crate::packets::PubKey;

/// Application hooks called by a client [`Session`](crate::Session).
///
/// Methods are called with the session locked, so should return promptly.
/// Decisions that need user interaction or IO should be made before
/// connecting, for example by loading a known hosts list.
pub trait CliBehaviour: Send {
    /// Check that a hostkey is valid.
    ///
    /// Returning `false` fails the key exchange and ends the session.
    fn valid_hostkey(&mut self, key: &PubKey) -> bool;

    /// Called with a `USERAUTH_BANNER` message from the server.
    ///
    /// The banner may contain terminal escape sequences, implementations
    /// should take care before displaying it.
    #[allow(unused)]
    fn show_banner(&mut self, banner: &str, language: &str) {
        info!("Got banner:\n{:?}", banner.escape_default());
    }

    /// Called once the session has closed. `desc` is the reason given
    /// by the server if it sent a disconnect.
    #[allow(unused)]
    fn disconnected(&mut self, desc: &str) {}
}

/// Accepts any host key.
///
/// Only suitable for testing, or where the transport is otherwise secured.
#[derive(Debug, Default)]
pub struct AcceptAnyHostKey;

impl CliBehaviour for AcceptAnyHostKey {
    fn valid_hostkey(&mut self, key: &PubKey) -> bool {
        warn!("Accepting unverified host key {:?}", key.algorithm_name());
        true
    }
}
