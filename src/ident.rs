//! SSH identification string exchange, RFC4253 section 4.2.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::{MAX_IDENT_LEN, MAX_IDENT_LINES};

const SSH_PREFIX: &str = "SSH-2.0-";
/// Servers with SSH1 compatibility
const SSH_PREFIX_199: &str = "SSH-1.99-";

pub const CR: u8 = 0x0d;
pub const LF: u8 = 0x0a;

/// Writes our version line, `version` excludes CR LF.
pub(crate) async fn send_version<W: AsyncWrite + Unpin>(w: &mut W, version: &str) -> Result<()> {
    let mut v = Vec::with_capacity(version.len() + 2);
    v.extend_from_slice(version.as_bytes());
    v.extend_from_slice(&[CR, LF]);
    w.write_all(&v).await?;
    w.flush().await?;
    Ok(())
}

/// Reads until the server's version line, returning it without CR LF.
///
/// Other lines may be sent by the server first, they are discarded.
pub(crate) async fn read_version<R: AsyncBufRead + Unpin>(r: &mut R) -> Result<String> {
    let mut line = Vec::with_capacity(MAX_IDENT_LEN);
    for _ in 0..MAX_IDENT_LINES {
        line.clear();
        let l = (&mut *r).take(MAX_IDENT_LEN as u64).read_until(LF, &mut line).await?;
        if l == 0 {
            debug!("Connection closed before version");
            return Err(Error::NotSSH);
        }
        if line.last() != Some(&LF) {
            debug!("Overlong version line");
            return Err(Error::NotSSH);
        }
        line.pop();
        if line.last() == Some(&CR) {
            line.pop();
        }

        if line.starts_with(SSH_PREFIX.as_bytes()) || line.starts_with(SSH_PREFIX_199.as_bytes()) {
            if !line.is_ascii() || line.iter().any(|c| c.is_ascii_control()) {
                return Err(Error::msg("bad remote version"));
            }
            let v = String::from_utf8(line).map_err(|_| Error::BadString)?;
            debug!("Remote version {v}");
            return Ok(v);
        }
        if line.starts_with(b"SSH-") {
            debug!("Unsupported protocol {:?}", String::from_utf8_lossy(&line));
            return Err(Error::NotSSH);
        }
        trace!("Skipping line {:?}", String::from_utf8_lossy(&line));
    }
    Err(Error::NotSSH)
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::gloamlog::init_test_log;
    use crate::ident::*;

    async fn test_version(input: &[u8]) -> Result<String> {
        let mut r = input;
        read_version(&mut r).await
    }

    #[tokio::test]
    async fn version_lines() {
        init_test_log();
        assert_eq!(test_version(b"SSH-2.0-good\r\n").await.unwrap(), "SSH-2.0-good");
        assert_eq!(test_version(b"SSH-2.0-lf only\n").await.unwrap(), "SSH-2.0-lf only");
        assert_eq!(test_version(b"SSH-1.99-compat\r\n").await.unwrap(), "SSH-1.99-compat");
        assert_eq!(
            test_version(b"hello\r\nbanner SSH-2.0-\r\nSSH-2.0-after\r\nextra").await.unwrap(),
            "SSH-2.0-after"
        );
    }

    #[tokio::test]
    async fn version_failures() {
        init_test_log();
        assert!(matches!(test_version(b"SSH-1.5-old\r\n").await, Err(Error::NotSSH)));
        assert!(matches!(test_version(b"SSH-2.0-noend").await, Err(Error::NotSSH)));
        assert!(matches!(test_version(b"").await, Err(Error::NotSSH)));

        let mut many = b"x\r\n".repeat(MAX_IDENT_LINES);
        many.extend_from_slice(b"SSH-2.0-late\r\n");
        assert!(matches!(test_version(&many).await, Err(Error::NotSSH)));

        let mut long = b"SSH-2.0-".to_vec();
        long.extend(std::iter::repeat(b'a').take(300));
        long.extend_from_slice(b"\r\n");
        assert!(matches!(test_version(&long).await, Err(Error::NotSSH)));
    }

    #[tokio::test]
    async fn remainder_kept() {
        init_test_log();
        let mut r: &[u8] = b"SSH-2.0-x\r\n\x00\x00\x01";
        read_version(&mut r).await.unwrap();
        assert_eq!(r, b"\x00\x00\x01");
    }

    #[tokio::test]
    async fn write() {
        let mut out = vec![];
        send_version(&mut out, "SSH-2.0-gloam").await.unwrap();
        assert_eq!(out, b"SSH-2.0-gloam\r\n");
    }
}
