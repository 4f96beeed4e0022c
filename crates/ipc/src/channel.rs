//! Duplex, message-oriented channel between two named endpoints.
//!
//! Each side listens on its own endpoint and writes to the peer's endpoint,
//! so a link is two one-way streams. Messages are whole lines: a line is only
//! handed to `on_message` once its terminating newline has arrived, and lines
//! are delivered in the order they were written. A failed write drops the
//! connection instead of retrying, so nothing is delivered twice.
//!
//! The first send waits up to the connect timeout for the peer to start listening.
//! Once that wait has expired, the peer is considered missing: later sends try to
//! connect once and fail straight away, so an absent peer never stalls the caller
//! for more than one timeout.

use crate::{endpoint_address, MAX_MESSAGE_SIZE};
use serde::Serialize;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Errors that can occur on a channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Failed to listen on {endpoint}: {source}")]
    Listen {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("Peer {endpoint} did not accept a connection within {timeout:?}")]
    ConnectTimeout { endpoint: String, timeout: Duration },

    #[error("Peer {endpoint} is not listening")]
    PeerUnavailable { endpoint: String },

    #[error("Failed to send to {endpoint}: {source}")]
    Send {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("Message must be a single line")]
    InvalidMessage,

    #[error("Message of {0} bytes exceeds the size limit")]
    TooLarge(usize),

    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Tunables for [`Channel::open_with_options`].
#[derive(Debug, Clone, Copy)]
pub struct ChannelOptions {
    /// How long `send` keeps retrying while the peer is not listening yet.
    pub connect_timeout: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
        }
    }
}

type Writer = Box<dyn AsyncWrite + Send + Unpin>;
type MessageHandler = Arc<dyn Fn(String) + Send + Sync>;

/// One end of a named duplex link.
pub struct Channel {
    local: String,
    remote: String,
    options: ChannelOptions,
    writer: Mutex<Option<Writer>>,
    /// Set once a connect attempt ran out of time.
    peer_missing: AtomicBool,
    listener: JoinHandle<()>,
}

impl Channel {
    /// Listen on `local` and address messages to `remote`.
    ///
    /// `on_message` runs on a runtime worker for every complete line received.
    pub async fn open<F>(local: &str, remote: &str, on_message: F) -> Result<Self, ChannelError>
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        Self::open_with_options(local, remote, ChannelOptions::default(), on_message).await
    }

    pub async fn open_with_options<F>(
        local: &str,
        remote: &str,
        options: ChannelOptions,
        on_message: F,
    ) -> Result<Self, ChannelError>
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        let local = endpoint_address(local);
        let remote = endpoint_address(remote);
        let listener = listen(&local, Arc::new(on_message))?;
        debug!("Channel listening on {}", local);

        Ok(Self {
            local,
            remote,
            options,
            writer: Mutex::new(None),
            peer_missing: AtomicBool::new(false),
            listener,
        })
    }

    /// Address this channel listens on.
    pub fn local_address(&self) -> &str {
        &self.local
    }

    /// Address messages are sent to.
    pub fn remote_address(&self) -> &str {
        &self.remote
    }

    /// Whether the peer failed to show up within the connect timeout.
    pub fn peer_missing(&self) -> bool {
        self.peer_missing.load(Ordering::SeqCst)
    }

    /// Send one message. Connects to the peer on first use.
    pub async fn send(&self, text: &str) -> Result<(), ChannelError> {
        if text.contains('\n') {
            return Err(ChannelError::InvalidMessage);
        }
        if text.len() > MAX_MESSAGE_SIZE {
            return Err(ChannelError::TooLarge(text.len()));
        }

        let mut writer = self.writer.lock().await;
        if writer.is_none() {
            *writer = Some(self.connect().await?);
        }
        let Some(stream) = writer.as_mut() else {
            return Err(ChannelError::ConnectTimeout {
                endpoint: self.remote.clone(),
                timeout: self.options.connect_timeout,
            });
        };

        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');
        let written = match stream.write_all(line.as_bytes()).await {
            Ok(()) => stream.flush().await,
            Err(e) => Err(e),
        };
        if let Err(source) = written {
            *writer = None;
            return Err(ChannelError::Send {
                endpoint: self.remote.clone(),
                source,
            });
        }
        trace!("Sent to {}: {}", self.remote, text);
        Ok(())
    }

    /// Serialize and send one message.
    pub async fn send_message<T: Serialize>(&self, message: &T) -> Result<(), ChannelError> {
        let text = serde_json::to_string(message)?;
        self.send(&text).await
    }

    /// Stop listening and drop the connection to the peer.
    pub async fn close(self) {
        if let Some(mut stream) = self.writer.lock().await.take() {
            let _ = stream.shutdown().await;
        }
        // Drop runs the remaining cleanup.
    }

    async fn connect(&self) -> Result<Writer, ChannelError> {
        if self.peer_missing() {
            return match connect_once(&self.remote).await {
                Ok(stream) => {
                    info!("Peer {} is listening now", self.remote);
                    self.peer_missing.store(false, Ordering::SeqCst);
                    Ok(stream)
                }
                Err(e) => {
                    trace!("Peer {} still missing: {}", self.remote, e);
                    Err(ChannelError::PeerUnavailable {
                        endpoint: self.remote.clone(),
                    })
                }
            };
        }

        let deadline = Instant::now() + self.options.connect_timeout;
        loop {
            match connect_once(&self.remote).await {
                Ok(stream) => {
                    debug!("Connected to {}", self.remote);
                    return Ok(stream);
                }
                Err(e) if Instant::now() < deadline => {
                    trace!("Peer {} not ready: {}", self.remote, e);
                    tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
                }
                Err(e) => {
                    warn!(
                        "Peer {} did not connect within {:?}, not waiting for it again: {}",
                        self.remote, self.options.connect_timeout, e
                    );
                    self.peer_missing.store(true, Ordering::SeqCst);
                    return Err(ChannelError::ConnectTimeout {
                        endpoint: self.remote.clone(),
                        timeout: self.options.connect_timeout,
                    });
                }
            }
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.listener.abort();
        #[cfg(unix)]
        let _ = std::fs::remove_file(&self.local);
    }
}

/// Read complete lines from one connection until it closes.
async fn read_messages<R>(stream: R, endpoint: String, on_message: MessageHandler)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = (&mut reader)
            .take(MAX_MESSAGE_SIZE as u64 + 1)
            .read_until(b'\n', &mut buf)
            .await;
        let n = match read {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("Read from {} failed: {}", endpoint, e);
                break;
            }
        };
        if buf.last() != Some(&b'\n') {
            if n > MAX_MESSAGE_SIZE {
                warn!("Dropping connection on {}: message exceeds {} bytes", endpoint, MAX_MESSAGE_SIZE);
            } else {
                debug!("Discarding {} bytes of an unterminated message on {}", n, endpoint);
            }
            break;
        }
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        match String::from_utf8(std::mem::take(&mut buf)) {
            Ok(text) if text.trim().is_empty() => {}
            Ok(text) => on_message(text),
            Err(e) => warn!("Ignoring non-UTF-8 message on {}: {}", endpoint, e),
        }
    }
    trace!("Connection on {} closed", endpoint);
}

#[cfg(unix)]
fn listen(address: &str, on_message: MessageHandler) -> Result<JoinHandle<()>, ChannelError> {
    use tokio::net::UnixListener;

    // A previous run that was killed leaves its socket file behind.
    let _ = std::fs::remove_file(address);
    let listener = UnixListener::bind(address).map_err(|source| ChannelError::Listen {
        endpoint: address.to_string(),
        source,
    })?;

    let endpoint = address.to_string();
    Ok(tokio::spawn(async move {
        let mut readers = JoinSet::new();
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    trace!("Peer connected on {}", endpoint);
                    while readers.try_join_next().is_some() {}
                    readers.spawn(read_messages(stream, endpoint.clone(), on_message.clone()));
                }
                Err(e) => {
                    warn!("Failed to accept connection on {}: {}", endpoint, e);
                    tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
                }
            }
        }
    }))
}

#[cfg(unix)]
async fn connect_once(address: &str) -> io::Result<Writer> {
    let stream = tokio::net::UnixStream::connect(address).await?;
    Ok(Box::new(stream))
}

#[cfg(windows)]
fn listen(address: &str, on_message: MessageHandler) -> Result<JoinHandle<()>, ChannelError> {
    use tokio::net::windows::named_pipe::{PipeMode, ServerOptions};

    let create = |first: bool| {
        ServerOptions::new()
            .first_pipe_instance(first)
            .reject_remote_clients(true)
            .pipe_mode(PipeMode::Byte)
            .create(address)
    };
    // Creating the first instance up front reports a name that is already taken.
    let mut server = create(true).map_err(|source| ChannelError::Listen {
        endpoint: address.to_string(),
        source,
    })?;

    let endpoint = address.to_string();
    Ok(tokio::spawn(async move {
        let mut readers = JoinSet::new();
        loop {
            if let Err(e) = server.connect().await {
                warn!("Failed to accept connection on {}: {}", endpoint, e);
                tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
                continue;
            }
            trace!("Peer connected on {}", endpoint);

            // Create the next instance before handing this one off so a reconnecting
            // peer always finds a listening pipe.
            let next = loop {
                match ServerOptions::new()
                    .reject_remote_clients(true)
                    .pipe_mode(PipeMode::Byte)
                    .create(&endpoint)
                {
                    Ok(next) => break next,
                    Err(e) => {
                        warn!("Failed to create pipe instance {}: {}", endpoint, e);
                        tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
                    }
                }
            };
            let connected = std::mem::replace(&mut server, next);
            while readers.try_join_next().is_some() {}
            readers.spawn(read_messages(connected, endpoint.clone(), on_message.clone()));
        }
    }))
}

#[cfg(windows)]
async fn connect_once(address: &str) -> io::Result<Writer> {
    use tokio::net::windows::named_pipe::ClientOptions;

    let client = ClientOptions::new().open(address)?;
    Ok(Box::new(client))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;

    fn unique(role: &str) -> String {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        format!(
            "workspaces_test_{}_{}_{}",
            role,
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::SeqCst)
        )
    }

    #[tokio::test]
    async fn test_rejects_multiline_text() {
        let a = unique("a");
        let b = unique("b");
        let channel = Channel::open(&a, &b, |_| {}).await.unwrap();
        assert!(matches!(
            channel.send("one\ntwo").await,
            Err(ChannelError::InvalidMessage)
        ));
        channel.close().await;
    }

    #[tokio::test]
    async fn test_oversized_message_is_rejected() {
        let a = unique("a");
        let b = unique("b");
        let channel = Channel::open(&a, &b, |_| {}).await.unwrap();
        let text = "x".repeat(MAX_MESSAGE_SIZE + 1);
        assert!(matches!(
            channel.send(&text).await,
            Err(ChannelError::TooLarge(n)) if n == MAX_MESSAGE_SIZE + 1
        ));
        channel.close().await;
    }

    #[tokio::test]
    async fn test_missing_peer_costs_one_timeout() {
        let a = unique("a");
        let b = unique("b");
        let options = ChannelOptions {
            connect_timeout: Duration::from_millis(300),
        };
        let channel = Channel::open_with_options(&a, &b, options, |_| {}).await.unwrap();

        let started = Instant::now();
        assert!(matches!(
            channel.send("first").await,
            Err(ChannelError::ConnectTimeout { .. })
        ));
        assert!(channel.peer_missing());
        for i in 0..5 {
            assert!(matches!(
                channel.send(&format!("later {i}")).await,
                Err(ChannelError::PeerUnavailable { .. })
            ));
        }
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(900), "took {elapsed:?}");

        channel.close().await;
    }

    #[tokio::test]
    async fn test_late_peer_is_picked_up() {
        let a = unique("a");
        let b = unique("b");
        let options = ChannelOptions {
            connect_timeout: Duration::from_millis(100),
        };
        let sender = Channel::open_with_options(&a, &b, options, |_| {}).await.unwrap();
        assert!(sender.send("lost").await.is_err());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let receiver = Channel::open(&b, &a, move |text| {
            let _ = tx.send(text);
        })
        .await
        .unwrap();
        sender.send("found").await.unwrap();
        assert!(!sender.peer_missing());

        let text = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(text, "found");

        sender.close().await;
        receiver.close().await;
    }

    #[tokio::test]
    async fn test_messages_arrive_whole_and_in_order() {
        let a = unique("a");
        let b = unique("b");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let receiver = Channel::open(&b, &a, move |text| {
            let _ = tx.send(text);
        })
        .await
        .unwrap();
        let sender = Channel::open(&a, &b, |_| {}).await.unwrap();

        for i in 0..20 {
            sender.send(&format!("message {i}")).await.unwrap();
        }
        for i in 0..20 {
            let text = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(text, format!("message {i}"));
        }

        sender.close().await;
        receiver.close().await;
    }
}
