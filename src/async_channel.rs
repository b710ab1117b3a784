//! Application handles for SSH channels

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use std::sync::Arc;

use tokio::sync::{mpsc, Notify};

use crate::channel::{ChanEvent, ChanNum, ChanParts, Pty, ReqDetails};
use crate::packets::WinChange;
use crate::session::Inner;

/// An open channel.
///
/// Inbound data and events are read with [`recv()`](Self::recv). Reading
/// data returns window to the server, so a channel that isn't read will
/// eventually stall the server's sending.
///
/// Dropping the handle closes the channel.
pub struct Channel {
    inner: Arc<Inner>,
    num: ChanNum,
    events: mpsc::UnboundedReceiver<ChanEvent>,
    credit: Arc<Notify>,
}

impl core::fmt::Debug for Channel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Channel").field("num", &self.num).finish_non_exhaustive()
    }
}

/// Once the channel state is gone, calls report EOF
fn chan_err(e: Error) -> Error {
    match e {
        Error::BadChannel { .. } => Error::ChannelEOF,
        e => e,
    }
}

impl Channel {
    pub(crate) fn new(inner: Arc<Inner>, parts: ChanParts) -> Self {
        Self { inner, num: parts.num, events: parts.events, credit: parts.credit }
    }

    /// Our channel number
    pub fn num(&self) -> ChanNum {
        self.num
    }

    /// Sends data, waiting for window if none is available.
    ///
    /// Returns the length sent, which may be less than `data`.
    pub async fn send(&self, data: &[u8]) -> Result<usize> {
        self.send_inner(None, data).await
    }

    /// Sends extended data with a type `code`
    pub async fn send_ext(&self, code: u32, data: &[u8]) -> Result<usize> {
        self.send_inner(Some(code), data).await
    }

    async fn send_inner(&self, ext: Option<u32>, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        loop {
            // Created before checking so a window adjust can't be missed
            let credit = self.credit.notified();
            let n = self
                .inner
                .with_conn(|c| c.chan_send(self.num, ext, data))
                .await
                .map_err(chan_err)?;
            if n > 0 {
                return Ok(n);
            }
            trace!("channel {} waiting for window", self.num);
            credit.await;
        }
    }

    /// Sends all of `data`
    pub async fn send_all(&self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let n = self.send(data).await?;
            data = &data[n..];
        }
        Ok(())
    }

    /// Returns the next inbound event, or `None` once the
    /// channel or session has closed.
    pub async fn recv(&mut self) -> Option<ChanEvent> {
        let ev = self.events.recv().await?;
        let len = match &ev {
            ChanEvent::Data(d) | ChanEvent::ExtData(_, d) => d.len(),
            _ => 0,
        };
        if len > 0 {
            let r = self.inner.with_conn(|c| c.chan_consumed(self.num, len)).await;
            if let Err(e) = r {
                debug!("Window adjust failed: {e}");
            }
        }
        Some(ev)
    }

    /// Sends a channel request. With `want_reply` the result is the
    /// server's success or failure, otherwise `true`.
    pub async fn request(&self, req: ReqDetails, want_reply: bool) -> Result<bool> {
        let rx = self
            .inner
            .with_conn(|c| c.chan_request(self.num, &req, want_reply))
            .await
            .map_err(chan_err)?;
        match rx {
            Some(rx) => rx.await.map_err(|_| Error::ChannelEOF),
            None => Ok(true),
        }
    }

    pub async fn exec(&self, command: &str) -> Result<bool> {
        self.request(ReqDetails::Exec(command.into()), true).await
    }

    pub async fn shell(&self) -> Result<bool> {
        self.request(ReqDetails::Shell, true).await
    }

    pub async fn subsystem(&self, subsystem: &str) -> Result<bool> {
        self.request(ReqDetails::Subsystem(subsystem.into()), true).await
    }

    pub async fn pty(&self, pty: Pty) -> Result<bool> {
        self.request(ReqDetails::Pty(pty), true).await
    }

    pub async fn env(&self, name: &str, value: &str) -> Result<bool> {
        self.request(ReqDetails::Env { name: name.into(), value: value.into() }, true).await
    }

    /// Notifies the server of a terminal size change
    pub async fn window_change(&self, win: WinChange) -> Result<()> {
        self.request(ReqDetails::WinChange(win), false).await.map(|_| ())
    }

    /// Sends a signal, `sig` is a name without the `SIG` prefix
    pub async fn signal(&self, sig: &str) -> Result<()> {
        self.request(ReqDetails::Signal(sig.into()), false).await.map(|_| ())
    }

    /// Sends EOF, no more data may be sent
    pub async fn eof(&self) -> Result<()> {
        self.inner.with_conn(|c| c.chan_eof(self.num)).await.map_err(chan_err)
    }

    /// Sends CLOSE. The channel is released once the server's CLOSE arrives.
    pub async fn close(&self) -> Result<()> {
        self.inner.with_conn(|c| c.chan_close(self.num)).await.map_err(chan_err)
    }

    /// Grants the server `adjust` bytes of window beyond the automatic
    /// adjustments made as data is read.
    pub async fn adjust_window(&self, adjust: u32) -> Result<()> {
        self.inner.with_conn(|c| c.chan_adjust(self.num, adjust)).await.map_err(chan_err)
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        let num = self.num;
        self.inner.with_conn_detached(move |c| c.chan_dropped(num));
    }
}
