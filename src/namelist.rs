//! SSH comma separated algorithm lists.
//!
//! Used when implementing protocol encoding/decoding, and for the
//! algorithm preference lists in [`Config`](crate::Config).
#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use ascii::{AsciiChar::Comma, AsciiStr};
use heapless::{CapacityError, Vec};

use gloam_sshwire_derive::{SSHDecode, SSHEncode};

use crate::sshwire::{SSHDecode, SSHEncode, SSHSink, SSHSource, WireResult};

// Used for lists of:
// - algorithm names
// - signature types
// - auth methods

/// Max count of LocalNames entries
pub const MAX_LOCAL_NAMES: usize = 8;
static EMPTY_LOCALNAMES: LocalNames = LocalNames::new();

/// A comma separated string, can be decoded or encoded.
/// Used for remote name lists.
///
/// Wire format is described in [RFC4251](https://tools.ietf.org/html/rfc4251) SSH Architecture "name-list"
#[derive(SSHEncode, SSHDecode, Debug, Clone)]
pub struct StringNames<'a>(pub &'a AsciiStr);

/// A list of names, can only be encoded. Used for local name lists.
///
/// `'static` since it should only come from hardcoded local strings
/// `SSH_NAME_*` in [`crate::sshnames`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LocalNames(pub Vec<&'static str, MAX_LOCAL_NAMES>);

/// The general form that can store either representation
#[derive(SSHEncode, Debug, Clone)]
#[sshwire(no_variant_names)]
pub enum NameList<'a> {
    String(StringNames<'a>),
    Local(&'a LocalNames),
}

impl<'de: 'a, 'a> SSHDecode<'de> for NameList<'a> {
    fn dec<S>(s: &mut S) -> WireResult<NameList<'a>>
    where
        S: SSHSource<'de>,
    {
        Ok(NameList::String(StringNames::dec(s)?))
    }
}

/// Serialize the list of names with comma separators
impl SSHEncode for &LocalNames {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        let names = self.0.as_slice();
        let strlen = names.iter().map(|n| n.len()).sum::<usize>()
            + names.len().saturating_sub(1);
        (strlen as u32).enc(s)?;
        for (i, n) in names.iter().enumerate() {
            if i > 0 {
                b','.enc(s)?;
            }
            n.as_bytes().enc(s)?;
        }
        Ok(())
    }
}

impl<'a> TryFrom<&'a str> for StringNames<'a> {
    type Error = Error;
    fn try_from(s: &'a str) -> Result<Self> {
        Ok(Self(AsciiStr::from_ascii(s).map_err(|_| Error::BadName)?))
    }
}

impl<'a> TryFrom<&'a str> for NameList<'a> {
    type Error = Error;
    fn try_from(s: &'a str) -> Result<Self> {
        Ok(NameList::String(s.try_into()?))
    }
}

impl TryFrom<&[&'static str]> for LocalNames {
    type Error = Error;
    fn try_from(s: &[&'static str]) -> Result<Self> {
        Ok(Self(Vec::from_slice(s).map_err(|_| Error::NoRoom)?))
    }
}

impl From<CapacityError> for Error {
    fn from(_e: CapacityError) -> Error {
        Error::NoRoom
    }
}

impl<'a> From<&'a LocalNames> for NameList<'a> {
    fn from(s: &'a LocalNames) -> Self {
        NameList::Local(s)
    }
}

impl<'a> NameList<'a> {
    /// Returns the first name in this namelist that matches, based on SSH priority.
    ///
    /// The SSH client's list determines priority (RFC4253 7.1).
    /// `self` is a remote list, `our_options` are our own allowed options in
    /// preference order.
    /// Must only be called on [`StringNames`], fails for [`LocalNames`].
    pub fn first_match(
        &self,
        is_client: bool,
        our_options: &LocalNames,
    ) -> Result<Option<&'static str>> {
        match self {
            NameList::String(s) => Ok(if is_client {
                s.first_options_match(our_options)
            } else {
                s.first_string_match(our_options)
            }),
            // only remote lists are matched against
            NameList::Local(_) => Err(Error::bug()),
        }
    }

    /// Returns whether the `algo` is contained in this list
    ///
    /// Fails iff given a Local variant
    pub fn has_algo(&self, algo: &str) -> Result<bool> {
        match self {
            NameList::String(s) => Ok(s.has_algo(algo)),
            NameList::Local(_) => Err(Error::bug()),
        }
    }

    /// Returns the first algorithm in the list, or `""` if the list is empty.
    pub fn first(&self) -> &str {
        match self {
            NameList::String(s) => s.first(),
            NameList::Local(s) => s.first(),
        }
    }

    /// Returns the names in the list
    pub fn names(&self) -> std::vec::Vec<&str> {
        match self {
            // An empty remote string has no names, not one empty name
            NameList::String(s) if s.0.is_empty() => std::vec::Vec::new(),
            NameList::String(s) => s.0.split(Comma).map(|n| n.as_str()).collect(),
            NameList::Local(l) => l.0.iter().map(|n| &**n).collect(),
        }
    }

    /// Returns an empty `Local` variant
    pub fn empty() -> Self {
        Self::Local(&EMPTY_LOCALNAMES)
    }

    /// Returns a `String` variant namelist with a single name.
    pub fn single(name: &'a str) -> Result<Self> {
        AsciiStr::from_ascii(name.as_bytes())
            .map_err(|_| Error::BadString)
            .map(|n| Self::String(StringNames(n)))
    }
}

impl StringNames<'_> {
    /// Returns the first name in this namelist that matches one of the provided options
    fn first_string_match(&self, options: &LocalNames) -> Option<&'static str> {
        self.0
            .split(Comma)
            .find_map(|n| options.0.iter().find(|o| n == **o).copied())
    }

    /// Returns the first of "options" that is in this namelist
    fn first_options_match(&self, options: &LocalNames) -> Option<&'static str> {
        options.0.iter().find(|o| self.has_algo(o)).copied()
    }

    fn first(&self) -> &str {
        self.0.split(Comma).next().map(|n| n.as_str()).unwrap_or("")
    }

    fn has_algo(&self, algo: &str) -> bool {
        self.0.split(Comma).any(|a| a == algo)
    }
}

impl LocalNames {
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    pub fn first(&self) -> &str {
        self.0.first().copied().unwrap_or("")
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|n| *n == name)
    }

    pub fn push(&mut self, name: &'static str) -> Result<()> {
        self.0.push(name).map_err(|_| Error::NoRoom)
    }
}

#[cfg(test)]
mod tests {
    use crate::gloamlog::init_test_log;
    use crate::namelist::*;
    use crate::sshwire;

    use std::vec::Vec;

    #[test]
    fn test_match() {
        init_test_log();
        let r1 = NameList::String("rho,cog".try_into().unwrap());
        let r2 = NameList::String("woe".try_into().unwrap());
        let l1 = LocalNames::try_from(["rho", "cog"].as_slice()).unwrap();
        let l2 = LocalNames::try_from(["cog", "rho"].as_slice()).unwrap();
        let l3 = LocalNames::try_from(["now", "woe"].as_slice()).unwrap();
        assert_eq!(r1.first_match(true, &l1).unwrap(), Some("rho"));
        assert_eq!(r1.first_match(false, &l1).unwrap(), Some("rho"));
        assert_eq!(r1.first_match(true, &l2).unwrap(), Some("cog"));
        assert_eq!(r1.first_match(false, &l2).unwrap(), Some("rho"));
        assert_eq!(r2.first_match(false, &l1).unwrap(), None);
        assert_eq!(r2.first_match(true, &l2).unwrap(), None);
        assert_eq!(r2.first_match(true, &l3).unwrap(), Some("woe"));
    }

    #[test]
    fn test_localnames_serialize() {
        let tests: Vec<&[&str]> = vec![
            &["foo", "quux", "boo"],
            &[],
            &["one"],
            &["one", "2"],
            &["", "2"],
            &["3", ""],
        ];
        for t in tests.iter() {
            let n = LocalNames::try_from(*t).unwrap();
            let n = NameList::Local(&n);
            let buf = sshwire::ssh_to_vec(&n).unwrap();
            assert_eq!(buf[..4], ((buf.len() - 4) as u32).to_be_bytes());
            assert_eq!(core::str::from_utf8(&buf[4..]).unwrap(), t.join(","));
        }
    }

    #[test]
    fn test_first_and_names() {
        let tests: Vec<&[&str]> = vec![&["foo", "quux", "boo"], &[], &["one"]];

        for t in tests.iter() {
            let l = LocalNames::try_from(*t).unwrap();
            let l = NameList::Local(&l);
            let x = t.join(",");
            let s: NameList = x.as_str().try_into().unwrap();
            assert_eq!(l.first(), s.first());
            assert_eq!(l.first(), t.first().copied().unwrap_or(""));
            assert_eq!(s.names(), t.to_vec());
            assert_eq!(l.names(), t.to_vec());
        }
    }

    #[test]
    fn test_has_algo() {
        fn n(list: &str, has: &str) -> bool {
            let s: NameList = list.try_into().unwrap();
            s.has_algo(has).unwrap()
        }
        assert!(n("", ""));
        assert!(!n("", "one"));
        assert!(!n("zzz", ""));
        assert!(n("zzz", "zzz"));
        assert!(!n("zzz", "zz"));
        assert!(!n("zz,more", "zzz"));
        assert!(n("zzz,boo", "boo"));
    }

    #[test]
    fn localnames_max_size() {
        let s = vec!["one"; MAX_LOCAL_NAMES + 1];
        LocalNames::try_from(s.as_slice()).unwrap_err();
        let s = vec!["one"; MAX_LOCAL_NAMES];
        LocalNames::try_from(s.as_slice()).unwrap();
    }
}
