//! gloam, an asynchronous SSH client protocol engine.
//!
//! A [`Session`] runs the SSH transport over any `tokio` stream, performs
//! key exchange and rekeying, user authentication, and multiplexes
//! [`Channel`]s.

#![forbid(unsafe_code)]
// avoids headscratching
#![deny(unused_must_use)]

pub mod sshwire;
pub mod packets;
pub mod sshnames;
pub mod config;
pub mod error;
pub mod random;

mod async_channel;
mod behaviour;
mod channel;
mod cliauth;
mod compress;
mod conn;
mod encrypt;
mod ident;
mod kex;
mod kexdh;
mod namelist;
mod session;
mod sign;
mod ssh_chapoly;
mod traffic;

mod gloamlog;

// Application API
pub use sshwire::TextString;

pub use async_channel::Channel;
pub use behaviour::{AcceptAnyHostKey, CliBehaviour};
pub use channel::{ChanEvent, ChanNum, ChanOpen, ForwardInfo, Pty, ReqDetails};
pub use cliauth::{AuthResult, AuthType};
pub use compress::{CompressAlgo, Compressor};
pub use config::Config;
pub use conn::CloseReason;
pub use error::{Error, Result};
pub use kex::{KexPhase, NegotiatedAlgos};
pub use namelist::LocalNames;
pub use packets::{AuthMethod, PubKey, Signature, WinChange};
pub use session::Session;
pub use sign::SigType;
pub use sshnames::ChanFail;
