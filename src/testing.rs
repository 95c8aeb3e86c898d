//! In-process fake workers for deterministic master tests.
//!
//! Every fake reports `Online` synchronously from `spawn` and then follows its
//! [`Behavior`] on tokio timers, so tests run under `start_paused` time.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nix::sys::signal::Signal;

use crate::error::WorkerError;
use crate::process::{EventSink, ExitStatus, MasterMessage, Spawner, WorkerId, WorkerProcess};

/// Delay between a graceful disconnect and the fake's exit.
const GRACEFUL_EXIT: Duration = Duration::from_millis(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Behavior {
    /// Listens after `listen_after`, exits 0 when disconnected.
    Healthy { listen_after: Duration },
    /// Never reports listening.
    NeverListen,
    /// Listens, then exits with code 1 after `after`.
    CrashAfterListen { after: Duration },
    /// Exits with code 1 right after coming online.
    CrashOnStart,
    /// Listens, then keeps running after shutdown and disconnect; only a signal ends it.
    IgnoreShutdown,
    /// Listens; on disconnect reports an exit but keeps running.
    FakeExit,
    /// The spawn itself fails.
    FailSpawn,
}

impl Behavior {
    pub fn healthy() -> Self {
        Behavior::Healthy {
            listen_after: Duration::from_millis(10),
        }
    }

    fn listen_after(&self) -> Option<Duration> {
        match self {
            Behavior::Healthy { listen_after } => Some(*listen_after),
            Behavior::CrashAfterListen { .. } | Behavior::IgnoreShutdown | Behavior::FakeExit => {
                Some(Duration::from_millis(10))
            }
            Behavior::NeverListen | Behavior::CrashOnStart | Behavior::FailSpawn => None,
        }
    }
}

pub(crate) struct FakeProcess {
    id: WorkerId,
    pid: u32,
    behavior: Behavior,
    sink: EventSink,
    connected: AtomicBool,
    running: AtomicBool,
    exit_posted: AtomicBool,
    sent: Mutex<Vec<MasterMessage>>,
    signals: Mutex<Vec<Signal>>,
}

impl FakeProcess {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn messages(&self) -> Vec<MasterMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.signals.lock().unwrap().clone()
    }

    /// Sends an application message up to the master.
    pub fn publish(&self, payload: serde_json::Value) {
        self.sink.message(payload);
    }

    /// Closes the channel from the worker side; the process keeps running.
    pub fn hang_up(&self) {
        self.close_channel();
    }

    /// Simulates the process dying on its own.
    pub fn crash(&self, code: i32) {
        self.running.store(false, Ordering::SeqCst);
        self.report_exit(ExitStatus::code(code));
    }

    fn close_channel(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.sink.disconnected();
        }
    }

    fn report_exit(&self, status: ExitStatus) {
        self.close_channel();
        if !self.exit_posted.swap(true, Ordering::SeqCst) {
            self.sink.exited(status);
        }
    }

    fn exit_gracefully(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(GRACEFUL_EXIT).await;
            match this.behavior {
                Behavior::FakeExit => this.report_exit(ExitStatus::code(0)),
                _ if this.running.load(Ordering::SeqCst) => this.crash(0),
                _ => {}
            }
        });
    }

    fn run(self: &Arc<Self>) {
        if let Some(delay) = self.behavior.listen_after() {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if this.connected.load(Ordering::SeqCst) {
                    this.sink.listening(None);
                }
            });
        }
        match self.behavior {
            Behavior::CrashAfterListen { after } => {
                let this = Arc::clone(self);
                let listen = self.behavior.listen_after().unwrap_or_default();
                tokio::spawn(async move {
                    tokio::time::sleep(listen + after).await;
                    if this.running.load(Ordering::SeqCst) {
                        this.crash(1);
                    }
                });
            }
            Behavior::CrashOnStart => {
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    this.crash(1);
                });
            }
            _ => {}
        }
    }
}

/// Handle wrapper so the master's `disconnect` can schedule the graceful exit.
struct FakeHandle(Arc<FakeProcess>);

impl WorkerProcess for FakeHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.0.pid)
    }

    fn send(&self, msg: &MasterMessage) -> Result<(), WorkerError> {
        if !self.is_connected() {
            return Err(WorkerError::ChannelClosed);
        }
        self.0.sent.lock().unwrap().push(msg.clone());
        Ok(())
    }

    fn disconnect(&self) {
        self.0.close_channel();
        if self.0.behavior != Behavior::IgnoreShutdown {
            self.0.exit_gracefully();
        }
    }

    fn is_connected(&self) -> bool {
        self.0.connected.load(Ordering::SeqCst)
    }

    fn is_running(&self) -> bool {
        self.0.running.load(Ordering::SeqCst)
    }

    fn signal(&self, signal: Signal) -> Result<(), WorkerError> {
        self.0.signals.lock().unwrap().push(signal);
        if !self.0.running.swap(false, Ordering::SeqCst) {
            return Err(WorkerError::NotRunning { pid: self.0.pid });
        }
        self.0.report_exit(ExitStatus::signaled(signal));
        Ok(())
    }
}

#[derive(Default)]
struct Inner {
    script: VecDeque<Behavior>,
    spawned: HashMap<WorkerId, Arc<FakeProcess>>,
    order: Vec<WorkerId>,
    attempts: usize,
}

/// Spawner producing [`FakeProcess`]es.
#[derive(Clone)]
pub(crate) struct FakeSpawner {
    default: Behavior,
    inner: Arc<Mutex<Inner>>,
    next_pid: Arc<AtomicU32>,
}

impl FakeSpawner {
    pub fn new(default: Behavior) -> Self {
        Self {
            default,
            inner: Arc::default(),
            next_pid: Arc::new(AtomicU32::new(10_000)),
        }
    }

    /// Behaviors for the next spawns, in order; the default applies afterwards.
    pub fn script(self, behaviors: impl IntoIterator<Item = Behavior>) -> Self {
        self.inner.lock().unwrap().script.extend(behaviors);
        self
    }

    pub fn process(&self, id: WorkerId) -> Option<Arc<FakeProcess>> {
        self.inner.lock().unwrap().spawned.get(&id).cloned()
    }

    /// Successfully spawned workers, in spawn order.
    pub fn spawned(&self) -> Vec<Arc<FakeProcess>> {
        let inner = self.inner.lock().unwrap();
        inner.order.iter().map(|id| Arc::clone(&inner.spawned[id])).collect()
    }

    /// Spawn attempts, failed ones included.
    pub fn attempts(&self) -> usize {
        self.inner.lock().unwrap().attempts
    }

    /// Fakes still running (exit reported or not).
    pub fn running(&self) -> usize {
        self.spawned()
            .iter()
            .filter(|p| p.running.load(Ordering::SeqCst))
            .count()
    }
}

impl Spawner for FakeSpawner {
    fn spawn(&self, id: WorkerId, sink: EventSink) -> Result<Arc<dyn WorkerProcess>, WorkerError> {
        let behavior = {
            let mut inner = self.inner.lock().unwrap();
            inner.attempts += 1;
            inner.script.pop_front().unwrap_or(self.default)
        };
        if behavior == Behavior::FailSpawn {
            return Err(WorkerError::Spawn(std::io::Error::other("fake spawn failure")));
        }

        let process = Arc::new(FakeProcess {
            id,
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            behavior,
            sink,
            connected: AtomicBool::new(true),
            running: AtomicBool::new(true),
            exit_posted: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            signals: Mutex::new(Vec::new()),
        });
        {
            let mut inner = self.inner.lock().unwrap();
            inner.spawned.insert(id, Arc::clone(&process));
            inner.order.push(id);
        }

        process.sink.online();
        process.run();
        Ok(Arc::new(FakeHandle(process)))
    }
}
