//! The asynchronous client session.
//!
//! A [`Session`] runs a reader task and a writer task over the transport.
//! All protocol state is in a `Conn` behind a mutex, the tasks and the
//! application calls take the lock briefly to dispatch or encode packets.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use std::sync::Arc;

use core::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch, Mutex, MutexGuard, Notify};
use tokio::task::{AbortHandle, JoinHandle};

use crate::async_channel::Channel;
use crate::behaviour::CliBehaviour;
use crate::channel::{ChanOpen, ChanParts, ForwardInfo};
use crate::cliauth::AuthResult;
use crate::config::Config;
use crate::conn::{CloseReason, Conn, RxUpdate, SessState};
use crate::ident;
use crate::kex::{KexPhase, NegotiatedAlgos};
use crate::packets::AuthMethod;
use crate::traffic::TrafIn;

/// Limit on writing a final DISCONNECT
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// State shared between the session handle, channel handles and tasks
#[derive(Debug)]
pub(crate) struct Inner {
    conn: Mutex<Conn>,
    /// Output is waiting in `conn.traf`
    output: Notify,
}

impl Inner {
    pub async fn lock(&self) -> MutexGuard<'_, Conn> {
        self.conn.lock().await
    }

    /// Runs `f` with the connection locked, then wakes the writer
    pub async fn with_conn<T>(&self, f: impl FnOnce(&mut Conn) -> Result<T>) -> Result<T> {
        let mut c = self.conn.lock().await;
        let r = f(&mut c);
        self.wake_writer(&c);
        r
    }

    pub fn wake_writer(&self, c: &Conn) {
        if c.traf.has_output() || c.traf.is_closed() {
            self.output.notify_one();
        }
    }

    /// Runs `f` with the connection from a synchronous context such as
    /// `Drop`. If the lock is held `f` runs later in a spawned task.
    pub fn with_conn_detached(self: &Arc<Self>, f: impl FnOnce(&mut Conn) + Send + 'static) {
        if let Ok(mut c) = self.conn.try_lock() {
            f(&mut *c);
            self.wake_writer(&c);
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(h) => {
                let inner = self.clone();
                h.spawn(async move {
                    let mut c = inner.conn.lock().await;
                    f(&mut *c);
                    inner.wake_writer(&c);
                });
            }
            Err(_) => warn!("No runtime to release session state"),
        }
    }
}

/// A SSH client session.
///
/// Dropping the `Session` stops its tasks, the transport is closed
/// without a DISCONNECT and remaining [`Channel`]s report the session
/// as closed. Use [`disconnect()`](Self::disconnect) to end the session
/// cleanly.
pub struct Session {
    inner: Arc<Inner>,
    state: watch::Receiver<SessState>,
    forwarded: Mutex<mpsc::UnboundedReceiver<(ChanParts, ForwardInfo)>>,
    reader: AbortHandle,
    /// Taken when the session ends cleanly
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl core::fmt::Debug for Session {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session").field("state", &*self.state.borrow()).finish_non_exhaustive()
    }
}

impl Session {
    /// Starts a session over `stream`, returning once the first key
    /// exchange has completed.
    ///
    /// The server's host key is checked with
    /// [`CliBehaviour::valid_hostkey()`].
    pub async fn connect<S>(
        stream: S,
        config: Config,
        behaviour: Box<dyn CliBehaviour>,
    ) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        config.validate()?;
        let (r, mut w) = tokio::io::split(stream);
        let mut r = BufReader::new(r);

        ident::send_version(&mut w, &config.version).await?;
        let remote = ident::read_version(&mut r).await?;

        let (fwd_tx, fwd_rx) = mpsc::unbounded_channel();
        let (state_tx, mut state) = watch::channel(SessState::Connecting);
        let mut conn = Conn::new(config, remote, behaviour, fwd_tx, state_tx)?;
        conn.start()?;

        let inner = Arc::new(Inner { conn: Mutex::new(conn), output: Notify::new() });
        inner.output.notify_one();

        let writer = tokio::spawn(write_task(inner.clone(), w));
        let reader = tokio::spawn(read_task(inner.clone(), TrafIn::new(r), state.clone()));

        let sess = Session {
            inner,
            state: state.clone(),
            forwarded: Mutex::new(fwd_rx),
            reader: reader.abort_handle(),
            writer: Mutex::new(Some(writer)),
        };

        let st = *state.wait_for(|s| *s != SessState::Connecting).await.map_err(|_| Error::bug())?;
        if st == SessState::Closed {
            // Let a DISCONNECT reach the server
            sess.join_writer().await;
            let e = sess.inner.lock().await.take_error();
            return Err(e.unwrap_or(Error::SessionClosed));
        }
        debug!("Session running, {}", sess.algorithms().await);
        Ok(sess)
    }

    /// Authenticates with a method, requesting the `ssh-userauth`
    /// service first if needed.
    ///
    /// Only one request may be outstanding at a time.
    pub async fn userauth(&self, username: &str, method: AuthMethod<'_>) -> Result<AuthResult> {
        let rx = self.inner.with_conn(|c| c.userauth(username, method)).await?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }

    /// Returns the data to be signed for a public key `method`.
    ///
    /// The signature is then passed in a second `userauth()` call
    /// with the same `username` and key.
    pub async fn auth_sig_msg(&self, username: &str, method: AuthMethod<'_>) -> Result<Vec<u8>> {
        self.inner.lock().await.auth_sig_msg(username, method)
    }

    /// Opens a channel with the given window and maximum packet size
    pub async fn open_channel(
        &self,
        ty: ChanOpen,
        window: u32,
        max_packet: u32,
    ) -> Result<Channel> {
        let (parts, rx) =
            self.inner.with_conn(|c| c.open_channel(&ty, window, max_packet)).await?;
        rx.await.map_err(|_| Error::SessionClosed)??;
        trace!("channel {} opened", parts.num);
        Ok(Channel::new(self.inner.clone(), parts))
    }

    /// Opens a `session` channel with the configured window
    pub async fn open_session(&self) -> Result<Channel> {
        let (window, max_packet) = self.inner.lock().await.chan_defaults();
        self.open_channel(ChanOpen::Session, window, max_packet).await
    }

    /// Asks the server to connect to `host:port`
    pub async fn open_direct_tcpip(
        &self,
        host: &str,
        port: u32,
        origin: &str,
        origin_port: u32,
    ) -> Result<Channel> {
        let (window, max_packet) = self.inner.lock().await.chan_defaults();
        let ty = ChanOpen::DirectTcpip {
            host: host.into(),
            port,
            origin: origin.into(),
            origin_port,
        };
        self.open_channel(ty, window, max_packet).await
    }

    /// Requests remote forwarding from `address:port` on the server.
    /// Returns the bound port, which the server chooses if `port` is 0.
    ///
    /// Connections arrive with [`accept_forwarded()`](Self::accept_forwarded).
    pub async fn tcpip_forward(&self, address: &str, port: u32) -> Result<u32> {
        let rx = self.inner.with_conn(|c| c.tcpip_forward(address, port)).await?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }

    pub async fn cancel_tcpip_forward(&self, address: &str, port: u32) -> Result<()> {
        let rx = self.inner.with_conn(|c| c.cancel_tcpip_forward(address, port)).await?;
        rx.await.map_err(|_| Error::SessionClosed)?.map(|_| ())
    }

    /// Waits for the server to open a `forwarded-tcpip` channel
    pub async fn accept_forwarded(&self) -> Result<(Channel, ForwardInfo)> {
        let mut f = self.forwarded.lock().await;
        let (parts, info) = f.recv().await.ok_or(Error::SessionClosed)?;
        Ok((Channel::new(self.inner.clone(), parts), info))
    }

    /// Starts a key exchange, if one isn't already running.
    ///
    /// Returns without waiting for it to complete, progress is
    /// visible from [`kex_phase()`](Self::kex_phase).
    pub async fn rekey(&self) -> Result<()> {
        self.inner.with_conn(|c| c.rekey()).await
    }

    pub async fn kex_phase(&self) -> KexPhase {
        self.inner.lock().await.kex_phase()
    }

    /// The algorithms currently in use
    pub async fn algorithms(&self) -> NegotiatedAlgos {
        self.inner.lock().await.algorithms().clone()
    }

    /// Signature algorithms the server accepts for user authentication,
    /// if it sent `server-sig-algs`.
    pub async fn server_sig_algs(&self) -> Option<Vec<String>> {
        self.inner.lock().await.server_sig_algs()
    }

    /// Sends a DISCONNECT and waits for the session to end
    pub async fn disconnect(&self, desc: &str) -> Result<CloseReason> {
        self.inner.with_conn(|c| c.disconnect(desc)).await?;
        let r = self.closed().await;
        self.join_writer().await;
        r
    }

    /// Waits for remaining output to be written
    async fn join_writer(&self) {
        let Some(w) = self.writer.lock().await.take() else {
            return;
        };
        match tokio::time::timeout(WRITER_FLUSH_TIMEOUT, w).await {
            Ok(Ok(())) => (),
            Ok(Err(e)) => debug!("Writer task failed: {e}"),
            Err(_) => debug!("Timed out flushing output"),
        }
    }

    /// Waits until the session has ended
    pub async fn closed(&self) -> Result<CloseReason> {
        let mut state = self.state.clone();
        state.wait_for(|s| *s == SessState::Closed).await.map_err(|_| Error::bug())?;
        self.inner.lock().await.close_reason().cloned().trap()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader.abort();
        if let Some(w) = self.writer.get_mut().take() {
            w.abort();
        }
        // Channel handles keep `inner` alive, their waiters are released here
        self.inner.with_conn_detached(|c| c.abandon());
    }
}

/// The only writer to the transport
async fn write_task<W: AsyncWrite + Unpin>(inner: Arc<Inner>, mut w: W) {
    if let Err(e) = write_loop(&inner, &mut w).await {
        debug!("Writer failed: {e}");
        inner.lock().await.teardown(e);
    }
    trace!("writer done");
}

async fn write_loop<W: AsyncWrite + Unpin>(inner: &Inner, w: &mut W) -> Result<()> {
    loop {
        let (out, closed) = {
            let mut c = inner.lock().await;
            (c.traf.take_output(), c.traf.is_closed())
        };
        if !out.is_empty() {
            trace!("write {}", out.len());
            w.write_all(&out).await?;
            w.flush().await?;
            continue;
        }
        if closed {
            w.shutdown().await?;
            return Ok(());
        }
        inner.output.notified().await;
    }
}

async fn read_task<R: AsyncRead + Unpin>(
    inner: Arc<Inner>,
    mut tin: TrafIn<R>,
    mut state: watch::Receiver<SessState>,
) {
    let r = tokio::select! {
        r = read_loop(&inner, &mut tin) => r,
        // Closed elsewhere
        _ = state.wait_for(|s| *s == SessState::Closed) => Ok(()),
    };
    if let Err(e) = r {
        let mut c = inner.lock().await;
        c.teardown(e);
        inner.wake_writer(&c);
    }
    trace!("reader done");
}

async fn read_loop<R: AsyncRead + Unpin>(inner: &Inner, tin: &mut TrafIn<R>) -> Result<()> {
    loop {
        let mut deadline = inner.lock().await.rekey_deadline();

        let (payload, seq) = {
            let read = tin.read_packet();
            tokio::pin!(read);
            loop {
                tokio::select! {
                    r = &mut read => break r?,
                    _ = tokio::time::sleep_until(deadline) => {
                        let mut c = inner.lock().await;
                        c.check_rekey()?;
                        deadline = c.rekey_deadline();
                        inner.wake_writer(&c);
                    }
                }
            }
        };

        let mut c = inner.lock().await;
        let upd = c.handle_payload(&payload, seq, tin.bytes());
        inner.wake_writer(&c);
        match upd? {
            RxUpdate::None => (),
            RxUpdate::NewKeys(keys) => tin.rekey(keys),
            RxUpdate::AuthDone => tin.activate_compression(),
        }
    }
}
