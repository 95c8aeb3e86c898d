//! # Child side of the IPC channel.
//!
//! A worker written in Rust uses [`WorkerChannel`] to talk to its master:
//!
//! ```no_run
//! use procvisor::{MasterMessage, WorkerChannel};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> std::io::Result<()> {
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
//!     let Some(mut channel) = WorkerChannel::from_env()? else {
//!         // Not supervised: run standalone.
//!         return Ok(());
//!     };
//!     channel.listening(Some(listener.local_addr()?.to_string())).await?;
//!
//!     while let Some(msg) = channel.recv().await {
//!         match msg {
//!             MasterMessage::Shutdown => break,
//!             MasterMessage::Reload => { /* reopen logs */ }
//!             MasterMessage::Message { payload } => println!("{payload}"),
//!         }
//!     }
//!     channel.disconnect().await
//! }
//! ```

use std::io;
use std::os::fd::{FromRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

use crate::process::{CHANNEL_FD_ENV, LineReader, LineWriter, MasterMessage, WORKER_ID_ENV, WorkerMessage};

/// Set once the inherited descriptor has been wrapped; it must never be owned twice.
static ADOPTED: AtomicBool = AtomicBool::new(false);

/// Connection from a worker process to its master.
pub struct WorkerChannel {
    id: Option<u64>,
    reader: LineReader<OwnedReadHalf>,
    writer: LineWriter<OwnedWriteHalf>,
}

impl WorkerChannel {
    /// Adopts the channel inherited from the master.
    ///
    /// Returns `Ok(None)` when the process is not supervised. Only the first
    /// call in a process can adopt the descriptor; later calls return `None`.
    /// Must be called inside a tokio runtime.
    pub fn from_env() -> io::Result<Option<Self>> {
        let Some(fd) = std::env::var(CHANNEL_FD_ENV)
            .ok()
            .and_then(|v| v.parse::<RawFd>().ok())
        else {
            return Ok(None);
        };
        if fd < 0 || ADOPTED.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }

        // SAFETY: the master installs the socket at `fd` for this process only,
        // and the `ADOPTED` flag guarantees a single owner.
        let std_stream = unsafe { std::os::unix::net::UnixStream::from_raw_fd(fd) };
        std_stream.set_nonblocking(true)?;
        let stream = UnixStream::from_std(std_stream)?;

        let id = std::env::var(WORKER_ID_ENV).ok().and_then(|v| v.parse().ok());
        Ok(Some(Self::from_stream(id, stream)))
    }

    pub(crate) fn from_stream(id: Option<u64>, stream: UnixStream) -> Self {
        let (rd, wr) = stream.into_split();
        Self {
            id,
            reader: LineReader::new(rd),
            writer: LineWriter::new(wr),
        }
    }

    /// Logical worker id assigned by the master.
    #[inline]
    pub fn id(&self) -> Option<u64> {
        self.id
    }

    /// Tells the master this worker accepts connections.
    pub async fn listening(&mut self, address: Option<String>) -> io::Result<()> {
        self.write(&WorkerMessage::listening(address)).await
    }

    /// Sends a payload to the master's message handler.
    pub async fn send(&mut self, payload: Value) -> io::Result<()> {
        self.write(&WorkerMessage::message(payload)).await
    }

    /// Next message from the master; `None` once the master disconnected.
    ///
    /// Malformed lines are logged and skipped.
    pub async fn recv(&mut self) -> Option<MasterMessage> {
        loop {
            let line = match self.reader.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => {
                    tracing::debug!(error = %e, "channel read failed");
                    return None;
                }
            };
            match MasterMessage::from_line(&line) {
                Ok(msg) => return Some(msg),
                Err(e) => tracing::warn!(error = %e, %line, "malformed master message"),
            }
        }
    }

    /// Closes the channel; the master observes a disconnect.
    pub async fn disconnect(mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }

    async fn write(&mut self, msg: &WorkerMessage) -> io::Result<()> {
        let line = msg.to_line()?;
        self.writer.write_line(&line).await
    }
}
