//! # Production spawner: one OS process per worker.
//!
//! ```text
//!   master                                   child (program args...)
//!   ───────────────────────────────────      ─────────────────────────────
//!   UnixStream::pair()  ─── parent end         fd 3 = child end
//!     reader task: JSON lines → EventSink      PROCVISOR_CHANNEL_FD=3
//!     writer task: outbox → JSON lines         PROCVISOR_WORKER_ID=<id>
//!     wait task:   child.wait() → Exited
//! ```
//!
//! - `Online` is posted as soon as `spawn` succeeds.
//! - `Disconnected` is posted when either side closes the channel.
//! - `Exited` is posted after the reader observed EOF (bounded wait), so a worker's
//!   `Disconnected` precedes its `Exited`.
//! - Children are spawned with `kill_on_drop`: if the master's runtime goes away,
//!   so do they.

use std::ffi::OsString;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nix::sys::signal::Signal;
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::channel::{LineReader, LineWriter};
use super::liveness;
use super::protocol::{MasterMessage, WorkerMessage};
use super::{EventSink, ExitStatus, Spawner, WorkerId, WorkerProcess};
use crate::error::{ConfigError, WorkerError};

/// Environment variable naming the IPC file descriptor in the child.
pub const CHANNEL_FD_ENV: &str = "PROCVISOR_CHANNEL_FD";

/// Environment variable carrying the worker's logical id.
pub const WORKER_ID_ENV: &str = "PROCVISOR_WORKER_ID";

/// Descriptor number the channel is installed at in the child.
const CHILD_FD: i32 = 3;

/// How long the exit path waits for the reader to drain the channel.
const READER_DRAIN: Duration = Duration::from_millis(100);

/// Worker program description.
#[derive(Clone, Debug)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    current_dir: Option<PathBuf>,
    silent: bool,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            silent: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Route the child's stdout/stderr to `/dev/null`.
    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    #[inline]
    pub fn program(&self) -> &std::path::Path {
        &self.program
    }
}

/// Spawns [`WorkerCommand`] processes connected by a Unix socket channel.
#[derive(Debug)]
pub struct CommandSpawner {
    resolved: PathBuf,
    cmd: WorkerCommand,
}

impl CommandSpawner {
    /// Validates the entry point. Fails before any worker is forked.
    pub fn new(cmd: WorkerCommand) -> Result<Self, ConfigError> {
        if cmd.program.as_os_str().is_empty() {
            return Err(ConfigError::MissingEntryPoint);
        }
        let resolved = which::which(&cmd.program).map_err(|_| ConfigError::EntryPointNotFound {
            path: cmd.program.clone(),
        })?;
        Ok(Self { resolved, cmd })
    }

    /// Absolute path of the program that will be executed.
    #[inline]
    pub fn resolved(&self) -> &std::path::Path {
        &self.resolved
    }

    fn command(&self, id: WorkerId, child_fd: i32) -> Command {
        let mut cmd = Command::new(&self.resolved);
        cmd.args(&self.cmd.args)
            .envs(self.cmd.envs.iter().map(|(k, v)| (k, v)))
            .env(CHANNEL_FD_ENV, CHILD_FD.to_string())
            .env(WORKER_ID_ENV, id.get().to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.cmd.current_dir {
            cmd.current_dir(dir);
        }
        if self.cmd.silent {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        // SAFETY: only async-signal-safe libc calls between fork and exec.
        unsafe {
            cmd.pre_exec(move || install_channel_fd(child_fd));
        }
        cmd
    }
}

/// Places the child end of the socket pair at `CHILD_FD`, inheritable across exec.
fn install_channel_fd(fd: i32) -> std::io::Result<()> {
    // SAFETY: plain descriptor syscalls on descriptors owned by this process.
    unsafe {
        if fd == CHILD_FD {
            if libc::fcntl(fd, libc::F_SETFD, 0) < 0 {
                return Err(std::io::Error::last_os_error());
            }
        } else if libc::dup2(fd, CHILD_FD) < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

impl Spawner for CommandSpawner {
    fn spawn(&self, id: WorkerId, sink: EventSink) -> Result<Arc<dyn WorkerProcess>, WorkerError> {
        let (parent, child_end) = std::os::unix::net::UnixStream::pair().map_err(WorkerError::Spawn)?;
        let child_end: OwnedFd = child_end.into();

        let child = self
            .command(id, child_end.as_raw_fd())
            .spawn()
            .map_err(WorkerError::Spawn)?;
        drop(child_end);

        parent.set_nonblocking(true).map_err(WorkerError::Spawn)?;
        let stream = UnixStream::from_std(parent).map_err(WorkerError::Spawn)?;
        let pid = child.id();

        tracing::debug!(worker = %id, pid, program = %self.resolved.display(), "worker spawned");
        sink.online();

        Ok(Arc::new(CommandProcess::start(id, pid, child, stream, sink)))
    }
}

/// Master-side handle of a spawned command.
struct CommandProcess {
    pid: Option<u32>,
    outbox: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
    exited: Arc<AtomicBool>,
    close: CancellationToken,
}

impl CommandProcess {
    fn start(id: WorkerId, pid: Option<u32>, child: Child, stream: UnixStream, sink: EventSink) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (outbox, rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));
        let exited = Arc::new(AtomicBool::new(false));
        let close = CancellationToken::new();
        let reader_done = CancellationToken::new();

        tokio::spawn(read_loop(
            id,
            LineReader::new(read_half),
            sink.clone(),
            connected.clone(),
            close.clone(),
            reader_done.clone(),
        ));
        tokio::spawn(write_loop(id, LineWriter::new(write_half), rx, close.clone()));
        tokio::spawn(wait_loop(id, child, sink, exited.clone(), reader_done));

        Self {
            pid,
            outbox,
            connected,
            exited,
            close,
        }
    }
}

impl WorkerProcess for CommandProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn send(&self, msg: &MasterMessage) -> Result<(), WorkerError> {
        if !self.is_connected() {
            return Err(WorkerError::ChannelClosed);
        }
        let line = msg.to_line().map_err(|_| WorkerError::ChannelClosed)?;
        self.outbox.send(line).map_err(|_| WorkerError::ChannelClosed)
    }

    fn disconnect(&self) {
        self.close.cancel();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.close.is_cancelled()
    }

    fn is_running(&self) -> bool {
        if self.exited.load(Ordering::Acquire) {
            return false;
        }
        self.pid.is_some_and(|pid| liveness::probe(pid).is_running())
    }

    fn signal(&self, signal: Signal) -> Result<(), WorkerError> {
        let pid = self.pid.ok_or(WorkerError::NotRunning { pid: 0 })?;
        // A reaped pid may already belong to someone else.
        if self.exited.load(Ordering::Acquire) {
            return Err(WorkerError::NotRunning { pid });
        }
        liveness::deliver(pid, signal)
    }
}

async fn read_loop(
    id: WorkerId,
    mut reader: LineReader<OwnedReadHalf>,
    sink: EventSink,
    connected: Arc<AtomicBool>,
    close: CancellationToken,
    done: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            line = reader.next_line() => line,
            _ = close.cancelled() => break,
        };
        match line {
            Ok(Some(line)) => match WorkerMessage::from_line(&line) {
                Ok(WorkerMessage::Listening { address }) => sink.listening(address),
                Ok(WorkerMessage::Message { payload }) => sink.message(payload),
                Err(e) => tracing::warn!(worker = %id, error = %e, "malformed worker message"),
            },
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(worker = %id, error = %e, "worker channel read failed");
                break;
            }
        }
    }
    connected.store(false, Ordering::Release);
    close.cancel();
    sink.disconnected();
    done.cancel();
}

async fn write_loop(
    id: WorkerId,
    mut writer: LineWriter<OwnedWriteHalf>,
    mut outbox: mpsc::UnboundedReceiver<String>,
    close: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            line = outbox.recv() => match line {
                Some(line) => {
                    if let Err(e) = writer.write_line(&line).await {
                        tracing::debug!(worker = %id, error = %e, "worker channel write failed");
                        return;
                    }
                }
                None => break,
            },
            _ = close.cancelled() => {
                // Flush what was queued before the disconnect.
                while let Ok(line) = outbox.try_recv() {
                    if writer.write_line(&line).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }
    let _ = writer.shutdown().await;
}

async fn wait_loop(
    id: WorkerId,
    mut child: Child,
    sink: EventSink,
    exited: Arc<AtomicBool>,
    reader_done: CancellationToken,
) {
    let status = match child.wait().await {
        Ok(status) => ExitStatus::from(status),
        Err(e) => {
            tracing::error!(worker = %id, error = %e, "failed to wait for worker");
            ExitStatus::default()
        }
    };
    exited.store(true, Ordering::Release);
    let _ = tokio::time::timeout(READER_DRAIN, reader_done.cancelled()).await;
    sink.exited(status);
}
