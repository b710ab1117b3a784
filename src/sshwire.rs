//! SSH wire format reading/writing.
//!
//! Used in conjunction with `gloam_sshwire_derive` and the
//! [`packets`](crate::packets) definitions.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::fmt::{self, Debug};

use ascii::{AsAsciiStr, AsciiChar, AsciiStr};
use pretty_hex::PrettyHex;

use crate::packets::{Packet, ParseContext};

/// A generic destination for serializing, used similarly to `serde::Serializer`
pub trait SSHSink {
    fn push(&mut self, v: &[u8]) -> WireResult<()>;
    fn ctx(&self) -> Option<&ParseContext> {
        None
    }
}

/// A generic source for a packet, used similarly to `serde::Deserializer`
pub trait SSHSource<'de> {
    fn take(&mut self, len: usize) -> WireResult<&'de [u8]>;
    fn pos(&self) -> usize;
    fn ctx(&mut self) -> &mut ParseContext;
}

/// Encodes the type in SSH wire format
pub trait SSHEncode {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink;
}

/// For enums with an externally provided name
pub trait SSHEncodeEnum {
    /// Returns the current variant, used for encoding parent structs.
    /// Fails if it is Unknown
    fn variant_name(&self) -> WireResult<&'static str>;
}

/// Decodes `struct` and `enum`s without an externally provided enum name
pub trait SSHDecode<'de>: Sized {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>;
}

/// Decodes enums with an externally provided name
pub trait SSHDecodeEnum<'de>: Sized {
    /// `var` is the variant name to decode, as raw bytes off the wire.
    fn dec_enum<S>(s: &mut S, var: &'de [u8]) -> WireResult<Self>
    where
        S: SSHSource<'de>;
}

/// A subset of [`Error`] for `SSHEncode` and `SSHDecode`.
#[derive(Debug)]
pub enum WireError {
    NoRoom,

    RanOut,

    BadString,

    BadName,

    UnknownVariant,

    PacketWrong,

    SSHProtoError,

    UnknownPacket { number: u8 },
}

impl From<WireError> for Error {
    fn from(w: WireError) -> Self {
        match w {
            WireError::NoRoom => Error::NoRoom,
            WireError::RanOut => Error::RanOut,
            WireError::BadString => Error::BadString,
            WireError::BadName => Error::BadName,
            WireError::SSHProtoError => Error::SSHProtoError,
            WireError::PacketWrong => Error::PacketWrong,
            WireError::UnknownVariant => Error::bug_err_msg("Can't encode Unknown"),
            WireError::UnknownPacket { number } => Error::UnknownPacket { number },
        }
    }
}

pub type WireResult<T> = core::result::Result<T, WireError>;

///////////////////////////////////////////////

/// Parses a [`Packet`] from a borrowed `&[u8]` byte buffer.
///
/// The whole buffer must be consumed, unless an unknown variant was
/// encountered part way through.
pub fn packet_from_bytes<'a>(b: &'a [u8], ctx: &ParseContext) -> Result<Packet<'a>> {
    let ctx = ParseContext { seen_unknown: false, ..ctx.clone() };
    let mut s = DecodeBytes { input: b, pos: 0, parse_ctx: ctx };
    let p = Packet::dec(&mut s)?;

    if s.pos() != b.len() && !s.ctx().seen_unknown {
        Err(Error::WrongPacketLength)
    } else {
        Ok(p)
    }
}

pub fn read_ssh<'a, T: SSHDecode<'a>>(b: &'a [u8], ctx: Option<ParseContext>) -> Result<T> {
    let mut s = DecodeBytes { input: b, pos: 0, parse_ctx: ctx.unwrap_or_default() };
    Ok(T::dec(&mut s)?)
}

/// Writes `value` into `target`, returning the length written.
pub fn write_ssh<T>(target: &mut [u8], value: &T) -> Result<usize>
where
    T: SSHEncode,
{
    let mut s = EncodeBytes { target, pos: 0 };
    value.enc(&mut s)?;
    Ok(s.pos)
}

/// Serializes `value` into a new `Vec`.
///
/// The encoded length is computed first so the buffer is allocated once,
/// at its exact size.
pub fn ssh_to_vec<T>(value: &T) -> Result<Vec<u8>>
where
    T: SSHEncode,
{
    ssh_to_vec_ctx(value, None)
}

pub fn ssh_to_vec_ctx<T>(value: &T, parse_ctx: Option<&ParseContext>) -> Result<Vec<u8>>
where
    T: SSHEncode,
{
    let len = length_enc(value)? as usize;
    let mut s = EncodeVec { v: Vec::with_capacity(len), parse_ctx };
    value.enc(&mut s)?;
    debug_assert_eq!(s.v.len(), len);
    Ok(s.v)
}

/// Hashes the SSH wire format representation of `value`, with a `u32` length prefix.
pub fn hash_ser_length<T>(hash_ctx: &mut impl digest::DynDigest, value: &T) -> Result<()>
where
    T: SSHEncode,
{
    let len: u32 = length_enc(value)?;
    hash_ctx.update(&len.to_be_bytes());
    hash_ser(hash_ctx, value, None)
}

/// Hashes the SSH wire format representation of `value`
pub fn hash_ser<T>(
    hash_ctx: &mut impl digest::DynDigest,
    value: &T,
    parse_ctx: Option<&ParseContext>,
) -> Result<()>
where
    T: SSHEncode,
{
    let mut s = EncodeHash { hash_ctx, parse_ctx };
    value.enc(&mut s)?;
    Ok(())
}

/// Hashes big endian unsigned magnitude bytes as a SSH `mpint`.
///
/// Leading zero bytes are skipped, and a `0x00` is prefixed if the
/// high bit is set. RFC4251 section 5.
pub fn hash_mpint(hash_ctx: &mut dyn digest::DynDigest, m: &[u8]) {
    let start = m.iter().position(|b| *b != 0).unwrap_or(m.len());
    let m = &m[start..];
    let pad = m.first().map_or(false, |b| b & 0x80 != 0);
    let l = m.len() as u32 + pad as u32;
    hash_ctx.update(&l.to_be_bytes());
    if pad {
        hash_ctx.update(&[0x00]);
    }
    hash_ctx.update(m);
}

/// Returns `WireError::NoRoom` if larger than `u32`
pub(crate) fn length_enc<T>(value: &T) -> WireResult<u32>
where
    T: SSHEncode,
{
    let mut s = EncodeLen { pos: 0 };
    value.enc(&mut s)?;
    s.pos.try_into().map_err(|_| WireError::NoRoom)
}

struct EncodeBytes<'a> {
    target: &'a mut [u8],
    pos: usize,
}

impl SSHSink for EncodeBytes<'_> {
    fn push(&mut self, v: &[u8]) -> WireResult<()> {
        let end = self.pos + v.len();
        let dest = self.target.get_mut(self.pos..end).ok_or(WireError::NoRoom)?;
        dest.copy_from_slice(v);
        self.pos = end;
        Ok(())
    }
}

struct EncodeVec<'a> {
    v: Vec<u8>,
    parse_ctx: Option<&'a ParseContext>,
}

impl SSHSink for EncodeVec<'_> {
    fn push(&mut self, v: &[u8]) -> WireResult<()> {
        self.v.extend_from_slice(v);
        Ok(())
    }

    fn ctx(&self) -> Option<&ParseContext> {
        self.parse_ctx
    }
}

struct EncodeLen {
    pos: usize,
}

impl SSHSink for EncodeLen {
    fn push(&mut self, v: &[u8]) -> WireResult<()> {
        self.pos += v.len();
        Ok(())
    }
}

struct EncodeHash<'a> {
    hash_ctx: &'a mut dyn digest::DynDigest,
    parse_ctx: Option<&'a ParseContext>,
}

impl SSHSink for EncodeHash<'_> {
    fn push(&mut self, v: &[u8]) -> WireResult<()> {
        self.hash_ctx.update(v);
        Ok(())
    }

    fn ctx(&self) -> Option<&ParseContext> {
        self.parse_ctx
    }
}

struct DecodeBytes<'a> {
    input: &'a [u8],
    pos: usize,
    parse_ctx: ParseContext,
}

impl<'de> SSHSource<'de> for DecodeBytes<'de> {
    fn take(&mut self, len: usize) -> WireResult<&'de [u8]> {
        if len > self.input.len() {
            return Err(WireError::RanOut);
        }
        let t;
        (t, self.input) = self.input.split_at(len);
        self.pos += len;
        Ok(t)
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn ctx(&mut self) -> &mut ParseContext {
        &mut self.parse_ctx
    }
}

///////////////////////////////////////////////

/// A SSH style binary string. Serialized as `u32` length followed by the bytes
/// of the slice.
#[derive(Clone, PartialEq)]
pub struct BinString<'a>(pub &'a [u8]);

impl<'a> AsRef<[u8]> for BinString<'a> {
    fn as_ref(&self) -> &'a [u8] {
        self.0
    }
}

impl Debug for BinString<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BinString(len={})", self.0.len())
    }
}

impl SSHEncode for BinString<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        (self.0.len() as u32).enc(s)?;
        self.0.enc(s)
    }
}

impl<'de> SSHDecode<'de> for BinString<'de> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let len = u32::dec(s)? as usize;
        Ok(BinString(s.take(len)?))
    }
}

/// A text string that may be presented to a user or used
/// for things such as a password, username, exec command, TCP hostname, etc.
///
/// The SSH protocol defines it to be UTF-8, the library treats it as
/// opaque bytes.
///
/// Protocol identifiers in `Packet` are `&str` rather than `TextString`,
/// and always ASCII.
#[derive(Clone, PartialEq, Copy)]
pub struct TextString<'a>(pub &'a [u8]);

impl<'a> TextString<'a> {
    /// Returns the UTF-8 decoded string
    pub fn as_str(&self) -> Result<&'a str> {
        core::str::from_utf8(self.0).map_err(|_| Error::BadString)
    }

    /// A lossy conversion to an owned `String`, for display and error messages
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.0).into_owned()
    }
}

impl<'a> AsRef<[u8]> for TextString<'a> {
    fn as_ref(&self) -> &'a [u8] {
        self.0
    }
}

impl<'a> From<&'a str> for TextString<'a> {
    fn from(s: &'a str) -> Self {
        TextString(s.as_bytes())
    }
}

impl Debug for TextString<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match core::str::from_utf8(self.0) {
            Ok(s) => write!(f, "TextString(\"{}\")", s.escape_default()),
            Err(_) => write!(f, "TextString(not utf8!, {:#?})", self.0.hex_dump()),
        }
    }
}

impl SSHEncode for TextString<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        BinString(self.0).enc(s)
    }
}

impl<'de> SSHDecode<'de> for TextString<'de> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let b = BinString::dec(s)?;
        Ok(TextString(b.0))
    }
}

/// A wrapper for a `u32` length prefixed data structure `B`, such as a public key blob
pub struct Blob<B>(pub B);

impl<B> AsRef<B> for Blob<B> {
    fn as_ref(&self) -> &B {
        &self.0
    }
}

impl<B: Clone> Clone for Blob<B> {
    fn clone(&self) -> Self {
        Blob(self.0.clone())
    }
}

impl<B: PartialEq> PartialEq for Blob<B> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<B: SSHEncode + Debug> Debug for Blob<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match length_enc(&self.0) {
            Ok(len) => write!(f, "Blob(len={len}, {:?})", self.0),
            Err(_) => write!(f, "Blob(len>u32, {:?})", self.0),
        }
    }
}

impl<B: SSHEncode> SSHEncode for Blob<B> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        let len: u32 = length_enc(&self.0)?;
        len.enc(s)?;
        self.0.enc(s)
    }
}

impl<'de, B: SSHDecode<'de>> SSHDecode<'de> for Blob<B> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let len = u32::dec(s)? as usize;
        let pos1 = s.pos();
        let inner = SSHDecode::dec(s)?;
        let used = s.pos() - pos1;

        // Unknown variants may leave part of the blob unconsumed,
        // skip over it.
        let extra = len.checked_sub(used).ok_or_else(|| {
            trace!("Blob contents overran its length, {used} > {len}");
            WireError::SSHProtoError
        })?;
        if extra > 0 {
            s.take(extra)?;
        }
        Ok(Blob(inner))
    }
}

///////////////////////////////////////////////

impl SSHEncode for u8 {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        s.push(&[*self])
    }
}

impl SSHEncode for bool {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        (*self as u8).enc(s)
    }
}

impl SSHEncode for u32 {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        s.push(&self.to_be_bytes())
    }
}

// no length prefix
impl SSHEncode for &[u8] {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        s.push(self)
    }
}

// no length prefix
impl<const N: usize> SSHEncode for [u8; N] {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        s.push(self)
    }
}

impl SSHEncode for &str {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        BinString(self.as_bytes()).enc(s)
    }
}

impl<T: SSHEncode> SSHEncode for Option<T> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        match self {
            Some(t) => t.enc(s),
            None => Ok(()),
        }
    }
}

impl SSHEncode for &AsciiStr {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        BinString(self.as_bytes()).enc(s)
    }
}

impl<'de> SSHDecode<'de> for bool {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        Ok(u8::dec(s)? != 0)
    }
}

impl<'de> SSHDecode<'de> for u8 {
    #[inline]
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let t = s.take(1)?;
        Ok(t[0])
    }
}

impl<'de> SSHDecode<'de> for u32 {
    #[inline]
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let t: [u8; 4] = SSHDecode::dec(s)?;
        Ok(u32::from_be_bytes(t))
    }
}

/// Decodes a SSH name string. Must be ASCII
/// without control characters. RFC4251 section 6.
pub fn try_as_ascii(t: &[u8]) -> WireResult<&AsciiStr> {
    let n = t.as_ascii_str().map_err(|_| WireError::BadName)?;
    if n.chars().any(|ch| ch.is_ascii_control() || ch == AsciiChar::DEL) {
        return Err(WireError::BadName);
    }
    Ok(n)
}

pub fn try_as_ascii_str(t: &[u8]) -> WireResult<&str> {
    try_as_ascii(t).map(AsciiStr::as_str)
}

impl<'de: 'a, 'a> SSHDecode<'de> for &'a str {
    #[inline]
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let b = BinString::dec(s)?;
        try_as_ascii_str(b.0)
    }
}

impl<'de: 'a, 'a> SSHDecode<'de> for &'a AsciiStr {
    fn dec<S>(s: &mut S) -> WireResult<&'a AsciiStr>
    where
        S: SSHSource<'de>,
    {
        let b = BinString::dec(s)?;
        try_as_ascii(b.0)
    }
}

impl<'de, const N: usize> SSHDecode<'de> for [u8; N] {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let mut l = [0u8; N];
        l.copy_from_slice(s.take(N)?);
        Ok(l)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use crate::error::Error;
    use crate::gloamlog::init_test_log;
    use crate::packets::*;
    use crate::sshwire::*;
    use log::trace;
    use pretty_hex::PrettyHex;

    /// Checks that two items serialize the same
    pub fn assert_serialize_equal<T: SSHEncode>(p1: &T, p2: &T) {
        let b1 = ssh_to_vec(p1).unwrap();
        let b2 = ssh_to_vec(p2).unwrap();
        assert_eq!(b1, b2);
    }

    #[test]
    /// check that hash_ser_length() matches hashing a serialized message
    fn test_hash_packet() {
        use digest::Digest;
        use sha2::Sha256;
        let input = "hello";
        let buf = ssh_to_vec(&input).unwrap();

        let mut hash_ctx = Sha256::new();
        hash_ser_length(&mut hash_ctx, &input).unwrap();
        let digest1 = hash_ctx.finalize();

        let mut hash_ctx = Sha256::new();
        hash_ctx.update((buf.len() as u32).to_be_bytes());
        hash_ctx.update(&buf);
        let digest2 = hash_ctx.finalize();
        assert_eq!(digest1, digest2);

        let mut hash_ctx = Sha256::new();
        hash_ctx.update((buf.len() as u32).to_be_bytes());
        hash_ser(&mut hash_ctx, &input, None).unwrap();
        let digest3 = hash_ctx.finalize();
        assert_eq!(digest3, digest2);
    }

    #[test]
    fn mpint_hashing() {
        use digest::Digest;
        use sha2::Sha256;
        fn h(parts: &[&[u8]]) -> Vec<u8> {
            let mut d = Sha256::new();
            for p in parts {
                Digest::update(&mut d, p);
            }
            d.finalize().to_vec()
        }
        fn hm(m: &[u8]) -> Vec<u8> {
            let mut d = Sha256::new();
            hash_mpint(&mut d, m);
            d.finalize().to_vec()
        }
        // high bit set gets a zero prefix
        assert_eq!(hm(&[0x80, 0x01]), h(&[&[0, 0, 0, 3, 0x00, 0x80, 0x01]]));
        // leading zeros are stripped
        assert_eq!(hm(&[0x00, 0x00, 0x7f]), h(&[&[0, 0, 0, 1, 0x7f]]));
        assert_eq!(hm(&[0x00, 0x9a]), h(&[&[0, 0, 0, 2, 0x00, 0x9a]]));
        // zero is an empty string
        assert_eq!(hm(&[0, 0]), h(&[&[0, 0, 0, 0]]));
    }

    #[test]
    fn exact_capacity() {
        init_test_log();
        let p: Packet = ChannelData { num: 4, data: BinString(&[7u8; 300]) }.into();
        let v = ssh_to_vec(&p).unwrap();
        assert_eq!(v.len(), 1 + 4 + 4 + 300);
        assert_eq!(v.capacity(), v.len());
        let mut buf = [0u8; 20];
        assert!(matches!(write_ssh(&mut buf, &p), Err(Error::NoRoom)));
    }

    pub fn test_roundtrip_context(p: &Packet, ctx: &ParseContext) {
        let buf = ssh_to_vec(p).unwrap();
        trace!("wrote packet {:?}", buf.hex_dump());

        let p2 = packet_from_bytes(&buf, ctx).unwrap();
        trace!("returned packet {:#?}", p2);
        assert_serialize_equal(p, &p2);
    }

    /// With default context
    pub fn test_roundtrip(p: &Packet) {
        test_roundtrip_context(p, &ParseContext::default());
    }

    #[test]
    fn trailing_bytes() {
        init_test_log();
        let p: Packet = ChannelEof { num: 1 }.into();
        let mut buf = ssh_to_vec(&p).unwrap();
        buf.push(0);
        let r = packet_from_bytes(&buf, &ParseContext::default());
        assert!(matches!(r, Err(Error::WrongPacketLength)));
    }
}
