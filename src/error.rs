use core::fmt::Arguments;
use core::str::Utf8Error;

#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use snafu::prelude::*;

use crate::channel::ChanNum;
use crate::sshnames::*;

/// The gloam error type.
#[non_exhaustive]
#[derive(Snafu, Debug)]
#[snafu(context(suffix(false)))]
#[snafu(visibility(pub))]
pub enum Error {
    /// Output buffer ran out of room
    NoRoom,

    /// Input buffer ran out
    RanOut,

    /// Not a UTF-8 string
    BadString,

    /// Not a valid SSH ASCII string
    BadName,

    /// Key exchange incorrect
    BadKex,

    /// Packet integrity failed
    BadDecrypt,

    /// Signature is incorrect
    BadSig,

    /// Error in received SSH protocol. Will disconnect.
    SSHProtoError,

    /// Remote peer isn't SSH
    NotSSH,

    /// Bad key format
    BadKey,

    /// The host key was rejected by [`CliBehaviour::valid_hostkey()`](crate::CliBehaviour::valid_hostkey)
    HostKeyRejected,

    /// Ran out of channels
    NoChannels,

    #[snafu(display("Bad channel number {num}"))]
    BadChannel { num: ChanNum },

    /// Peer sent more channel data than the window allowed
    #[snafu(display("Window exceeded on channel {num}"))]
    WindowExceeded { num: ChanNum },

    /// Bad application usage
    #[snafu(display("Bad usage: {msg}"))]
    BadUsage { msg: &'static str },

    /// SSH packet contents doesn't match length
    WrongPacketLength,

    /// Channel EOF
    ///
    /// This is an expected error when a SSH channel completes. Can be returned
    /// by channel read/write functions. Any further calls in the same direction
    /// will fail similarly.
    ChannelEOF,

    /// The server refused a channel open request
    #[snafu(display("Channel open failed, reason {reason}: {desc}"))]
    ChannelOpenFail { reason: u32, desc: String },

    // Used for unknown key types etc.
    #[snafu(display("{what} is not available"))]
    NotAvailable { what: &'static str },

    #[snafu(display("Unknown packet type {number}"))]
    UnknownPacket { number: u8 },

    /// Received packet at a disallowed time.
    PacketWrong,

    #[snafu(display("No matching {algo} algorithm"))]
    AlgoNoMatch { algo: &'static str },

    /// A configured algorithm isn't implemented
    #[snafu(display("Unsupported {kind} algorithm {name}"))]
    UnsupportedAlgo { kind: &'static str, name: &'static str },

    #[snafu(display("Packet size {size} too large (or bad decrypt)"))]
    BigPacket { size: usize },

    /// An unknown SSH name is provided, for a key type, signature type,
    /// channel name etc.
    #[snafu(display("Unknown {kind} method"))]
    UnknownMethod { kind: &'static str },

    /// The server refused a global request
    RequestFailed,

    /// The server sent a disconnect message
    #[snafu(display("Peer disconnected, reason {reason}: {desc}"))]
    PeerDisconnect { reason: u32, desc: String },

    /// The session has ended. The reason is available from
    /// [`Session::closed()`](crate::Session::closed)
    SessionClosed,

    #[snafu(display("{msg}"))]
    Custom { msg: &'static str },

    /// IO Error
    IoError { source: std::io::Error },

    /// Program bug
    ///
    /// This state should not be reached, previous logic should have
    /// prevented it. Create this using [`Error::bug()`] or [`.trap()`](TrapBug::trap).
    Bug,
}

impl Error {
    pub fn msg(m: &'static str) -> Error {
        Error::Custom { msg: m }
    }

    #[cold]
    #[track_caller]
    /// Panics in debug builds, returns [`Error::Bug`] in release.
    pub fn bug() -> Error {
        // Easier to track the source of errors in development,
        // but release builds shouldn't panic.
        if cfg!(debug_assertions) {
            panic!("Hit a bug");
        } else {
            Error::Bug
        }
    }

    /// Like [`bug()`](Error::bug) but with a message
    ///
    /// The message can be used instead of a code comment, is logged at `debug` level.
    #[cold]
    #[track_caller]
    pub fn bug_fmt(args: Arguments) -> Error {
        if cfg!(debug_assertions) {
            panic!("Hit a bug: {args}");
        } else {
            debug!("Hit a bug: {args}");
            Error::Bug
        }
    }

    #[cold]
    #[track_caller]
    pub fn bug_err_msg(msg: &str) -> Error {
        Self::bug_fmt(format_args!("{}", msg))
    }

    /// The reason code to send in a DISCONNECT when this error ends a session.
    ///
    /// Returns `None` when no message should be sent, for example when the
    /// transport has failed or the peer already disconnected.
    pub fn disconnect_reason(&self) -> Option<u32> {
        let r = match self {
            Error::IoError { .. }
            | Error::PeerDisconnect { .. }
            | Error::SessionClosed
            | Error::NotSSH => return None,
            Error::BadDecrypt => SSH_DISCONNECT_MAC_ERROR,
            Error::AlgoNoMatch { .. } | Error::BadKex => {
                SSH_DISCONNECT_KEY_EXCHANGE_FAILED
            }
            Error::BadSig | Error::HostKeyRejected | Error::BadKey => {
                SSH_DISCONNECT_HOST_KEY_NOT_VERIFIABLE
            }
            Error::UnknownMethod { .. } => {
                SSH_DISCONNECT_SERVICE_NOT_AVAILABLE
            }
            Error::Bug | Error::Custom { .. } | Error::NoChannels => {
                SSH_DISCONNECT_BY_APPLICATION
            }
            _ => SSH_DISCONNECT_PROTOCOL_ERROR,
        };
        Some(r)
    }
}

/// A gloam-specific Result type.
pub type Result<T, E = Error> = core::result::Result<T, E>;

pub trait TrapBug<T> {
    /// `.trap()` should be used like `.unwrap()`, in situations
    /// never expected to fail. Instead it calls [`Error::bug()`].
    /// (or debug builds may panic)
    fn trap(self) -> Result<T, Error>;
}

impl<T, E> TrapBug<T> for Result<T, E> {
    #[track_caller]
    fn trap(self) -> Result<T, Error> {
        // call directly so that Location::caller() works
        if let Ok(i) = self {
            Ok(i)
        } else {
            Err(Error::bug())
        }
    }
}

impl<T> TrapBug<T> for Option<T> {
    #[track_caller]
    fn trap(self) -> Result<T, Error> {
        if let Some(i) = self {
            Ok(i)
        } else {
            Err(Error::bug())
        }
    }
}

impl From<Utf8Error> for Error {
    fn from(_e: Utf8Error) -> Error {
        Error::BadString
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::IoError { source: value }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use crate::error::*;
    use crate::gloamlog::init_test_log;

    #[test]
    fn disconnect_codes() {
        init_test_log();
        assert_eq!(Error::BadDecrypt.disconnect_reason(), Some(SSH_DISCONNECT_MAC_ERROR));
        assert_eq!(
            Error::AlgoNoMatch { algo: "kex" }.disconnect_reason(),
            Some(SSH_DISCONNECT_KEY_EXCHANGE_FAILED)
        );
        assert_eq!(Error::SSHProtoError.disconnect_reason(), Some(SSH_DISCONNECT_PROTOCOL_ERROR));
        assert_eq!(
            Error::WindowExceeded { num: ChanNum(3) }.disconnect_reason(),
            Some(SSH_DISCONNECT_PROTOCOL_ERROR)
        );
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert_eq!(Error::from(io).disconnect_reason(), None);
    }
}
