//! # Master: owns the pool and runs the event loop.
//!
//! [`Master`] holds every piece of supervisor state: pool, timers, fork-loop
//! counter, restart and shutdown coordinators. [`Master::run`] drives it from a
//! single task: each loop iteration waits for exactly one wake-up (inbox
//! message, timer, fork-loop tick, shutdown poll, OS signal) and handles it to
//! completion before the next one. No locks are needed and per-worker events
//! are handled in the order the spawner reported them.
//!
//! ## Example
//! ```no_run
//! use procvisor::{Config, Master, WorkerCommand};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let cfg = Config { workers: 4, ..Config::default() };
//!     let master = Master::builder(cfg)
//!         .command(WorkerCommand::new("./server").arg("--port=8080"))
//!         .build()?;
//!
//!     let handle = master.handle();
//!     tokio::spawn(async move {
//!         tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//!         let _ = handle.restart().await;
//!     });
//!
//!     let report = master.run().await?;
//!     println!("stopped: {:?}", report.cause);
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use nix::sys::signal::Signal;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::builder::MasterBuilder;
use super::config::Config;
use super::fork_loop::ForkLoopGuard;
use super::handle::MasterHandle;
use super::pool::Pool;
use super::restart::RestartState;
use super::shutdown::{ShutdownReport, ShutdownState};
use super::signals::{self, SignalAction, Signals};
use super::timers::{TimeoutRegistry, TimerKey};
use super::{Control, Inbound, ShutdownCause};
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::policies::JitterPolicy;
use crate::process::{MasterMessage, Spawner, WorkerId};
use crate::relay::{MessageHandler, Relay};
use crate::sticky::StickyRouter;
use crate::subscribers::{Subscribe, SubscriberSet};

/// One unit of work for the event loop.
pub(super) enum Wake {
    Inbound(Inbound),
    Timer(TimerKey),
    ForkLoopReset,
    ShutdownPoll,
    Signal(Signal),
}

/// Master process supervising a pool of workers.
pub struct Master {
    pub(super) cfg: Config,
    pub(super) target: usize,
    pub(super) pool: Pool,
    pub(super) timers: TimeoutRegistry,
    pub(super) fork_loop: ForkLoopGuard,
    pub(super) restart: RestartState,
    pub(super) shutdown: ShutdownState,
    pub(super) inbox_tx: mpsc::UnboundedSender<Inbound>,
    pub(super) inbox_rx: mpsc::UnboundedReceiver<Inbound>,
    pub(super) jitter: JitterPolicy,
    handler: Option<Arc<dyn MessageHandler>>,
    router: StickyRouter,
    bus: Bus,
    subs: SubscriberSet,
    started: bool,
}

impl Master {
    /// Starts building a master with the given configuration.
    pub fn builder(cfg: Config) -> MasterBuilder {
        MasterBuilder::new(cfg)
    }

    pub(super) fn new_internal(
        cfg: Config,
        spawner: Arc<dyn Spawner>,
        subscribers: Vec<Arc<dyn Subscribe>>,
        handler: Option<Arc<dyn MessageHandler>>,
        jitter: JitterPolicy,
    ) -> Self {
        let target = cfg.worker_count();
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let subs = SubscriberSet::new(subscribers, bus.clone());
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let fork_loop = ForkLoopGuard::new(cfg.fork_loop_threshold(target), cfg.fork_loop_window(target));

        Self {
            pool: Pool::new(spawner, inbox_tx.clone()),
            timers: TimeoutRegistry::new(),
            fork_loop,
            restart: RestartState::default(),
            shutdown: ShutdownState::new(cfg.shutdown_poll),
            inbox_tx,
            inbox_rx,
            jitter,
            handler,
            router: StickyRouter::new(),
            bus,
            subs,
            started: false,
            target,
            cfg,
        }
    }

    /// Returns a control handle. Handles stay valid after `run` returns, but
    /// every request then fails with [`RuntimeError::MasterGone`].
    pub fn handle(&self) -> MasterHandle {
        MasterHandle::new(self.inbox_tx.clone(), self.bus.clone())
    }

    /// Target pool size.
    #[inline]
    pub fn target(&self) -> usize {
        self.target
    }

    /// Forks the initial pool and supervises it until every worker has exited
    /// after a shutdown.
    ///
    /// Never calls `process::exit`; the caller decides how to terminate.
    pub async fn run(mut self) -> Result<ShutdownReport, RuntimeError> {
        let mut signals = Signals::install(self.cfg.handle_signals).map_err(RuntimeError::Signals)?;
        self.start();

        let report = loop {
            if let Some(report) = self.shutdown.report() {
                break report;
            }
            let poll_at = self.shutdown.poll_deadline();
            let wake = tokio::select! {
                Some(msg) = self.inbox_rx.recv() => Wake::Inbound(msg),
                key = self.timers.fired() => Wake::Timer(key),
                _ = self.fork_loop.tick() => Wake::ForkLoopReset,
                _ = sleep_until(poll_at) => Wake::ShutdownPoll,
                sig = signals.recv() => Wake::Signal(sig),
            };
            self.dispatch(wake);
        };

        tracing::info!(cause = %report.cause.as_label(), retired = report.retired, "master stopped");
        let Master { subs, .. } = self;
        subs.shutdown().await;
        Ok(report)
    }

    /// Forks the initial pool. Runs once.
    pub(super) fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        tracing::info!(workers = self.target, "starting workers");
        for _ in 0..self.target {
            self.fork_worker();
        }
        self.emit(Event::new(EventKind::Start).with_reason(self.target.to_string()));
    }

    pub(super) fn dispatch(&mut self, wake: Wake) {
        match wake {
            Wake::Inbound(Inbound::Process { id, event }) => self.on_process_event(id, event),
            Wake::Inbound(Inbound::SpawnFailed { id, error }) => self.on_spawn_failed(id, error),
            Wake::Inbound(Inbound::Control(ctl)) => self.on_control(ctl),
            Wake::Timer((id, kind)) => self.on_timeout(id, kind),
            Wake::ForkLoopReset => self.fork_loop.reset(),
            Wake::ShutdownPoll => self.on_shutdown_poll(),
            Wake::Signal(sig) => self.on_signal(sig),
        }
    }

    fn on_signal(&mut self, sig: Signal) {
        tracing::info!(signal = sig.as_str(), "signal received");
        match signals::action(sig) {
            SignalAction::Shutdown => self.begin_shutdown(ShutdownCause::Signal(sig.as_str())),
            SignalAction::Reload => self.reload(),
        }
    }

    fn on_control(&mut self, ctl: Control) {
        match ctl {
            Control::Restart(waiter) => self.request_restart(waiter),
            Control::Stop(waiter) => {
                if !self.shutdown.is_called() {
                    self.emit(Event::new(EventKind::Stop));
                }
                self.shutdown.add_waiter(waiter);
                self.begin_shutdown(ShutdownCause::Requested);
            }
            Control::Shutdown => self.begin_shutdown(ShutdownCause::Requested),
            Control::Reload => self.reload(),
            Control::Workers(tx) => {
                let _ = tx.send(self.pool.snapshot());
            }
            Control::Broadcast(payload, tx) => {
                let _ = tx.send(Relay::new(&self.pool).broadcast(&payload));
            }
            Control::Route(ip, tx) => {
                let workers = self.pool.snapshot();
                let _ = tx.send(self.router.pick(ip, &workers).cloned());
            }
        }
    }

    /// Broadcasts `reload` to every worker, then performs a rolling restart.
    fn reload(&mut self) {
        if self.shutdown.is_called() {
            tracing::debug!("reload during shutdown, ignoring");
            return;
        }
        tracing::info!(workers = self.pool.count(), "reloading workers");
        self.emit(Event::new(EventKind::Reload));
        for worker in self.pool.each_worker() {
            if let Err(e) = worker.process.send(&MasterMessage::Reload) {
                tracing::debug!(worker = %worker.id, error = %e, "reload message not delivered");
            }
        }
        self.request_restart(None);
    }

    /// Invokes the injected message handler.
    pub(super) fn relay_message(&self, origin: WorkerId, payload: &Value) {
        match &self.handler {
            Some(handler) => handler.on_message(payload, origin, &Relay::new(&self.pool)),
            None => tracing::trace!(worker = %origin, "worker message dropped: no handler"),
        }
    }

    /// Delivers an event to subscribers and bus receivers.
    pub(super) fn emit(&self, ev: Event) {
        self.subs.emit(&ev);
        self.bus.publish(ev);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::broadcast;

    use super::*;
    use crate::core::{RestartOutcome, Timeouts, TimerKind, WorkerState};
    use crate::relay::PubSub;
    use crate::testing::{Behavior, FakeSpawner};

    fn config(workers: usize) -> Config {
        Config {
            workers,
            timeouts: Timeouts {
                start: Duration::from_millis(200),
                stop: Duration::from_millis(100),
                max_age: Duration::from_secs(3600),
            },
            confirm_interval: Duration::from_millis(20),
            shutdown_poll: Duration::from_millis(10),
            handle_signals: false,
            ..Config::default()
        }
    }

    fn build(cfg: Config, spawner: &FakeSpawner) -> Master {
        Master::builder(cfg).spawner(spawner.clone()).build().unwrap()
    }

    async fn wait_listening(handle: &MasterHandle, n: usize) -> Vec<crate::WorkerInfo> {
        let wait = async {
            loop {
                let workers = handle.workers().await.unwrap();
                let listening = workers
                    .iter()
                    .filter(|w| w.state == WorkerState::Listening)
                    .count();
                if listening == n && workers.len() == n {
                    return workers;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(30), wait)
            .await
            .expect("pool never settled")
    }

    fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn count(events: &[Event], kind: EventKind) -> usize {
        events.iter().filter(|e| e.kind == kind).count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_starts_target_workers_and_stops() {
        let spawner = FakeSpawner::new(Behavior::healthy());
        let master = build(config(4), &spawner);
        let handle = master.handle();
        let mut rx = handle.subscribe();
        let run = tokio::spawn(master.run());

        let workers = wait_listening(&handle, 4).await;
        assert_eq!(spawner.attempts(), 4);
        assert!(workers.windows(2).all(|w| w[0].id < w[1].id));

        handle.stop().await.unwrap();
        let report = run.await.unwrap().unwrap();
        assert_eq!(report.cause, ShutdownCause::Requested);
        assert_eq!(report.retired, 4);
        assert_eq!(spawner.running(), 0);

        let events = drain(&mut rx);
        assert_eq!(events.first().map(|e| e.kind), Some(EventKind::Fork));
        assert_eq!(count(&events, EventKind::Start), 1);
        assert_eq!(count(&events, EventKind::Stop), 1);
        assert_eq!(count(&events, EventKind::Exit), 4);
        assert_eq!(events.last().map(|e| e.kind), Some(EventKind::Shutdown));
        assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));

        assert!(matches!(handle.count().await, Err(RuntimeError::MasterGone)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashed_worker_replaced_once() {
        let spawner = FakeSpawner::new(Behavior::healthy());
        let master = build(config(2), &spawner);
        let handle = master.handle();
        let run = tokio::spawn(master.run());
        wait_listening(&handle, 2).await;

        let victim = spawner.spawned()[0].clone();
        victim.crash(1);

        let workers = wait_listening(&handle, 2).await;
        assert_eq!(spawner.attempts(), 3);
        assert!(workers.iter().all(|w| w.id != victim.id()));
        let pids: HashSet<_> = workers.iter().filter_map(|w| w.pid).collect();
        assert_eq!(pids.len(), 2);

        handle.stop().await.unwrap();
        run.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_fork_timeout_kills_and_replaces() {
        let spawner = FakeSpawner::new(Behavior::healthy()).script([Behavior::NeverListen]);
        let master = build(config(1), &spawner);
        let handle = master.handle();
        let run = tokio::spawn(master.run());

        tokio::time::sleep(Duration::from_millis(250)).await;
        let workers = wait_listening(&handle, 1).await;

        let stuck = spawner.spawned()[0].clone();
        assert_eq!(stuck.signals(), vec![Signal::SIGKILL]);
        assert_eq!(spawner.attempts(), 2);
        assert_ne!(workers[0].id, stuck.id());

        handle.stop().await.unwrap();
        run.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_deadlines_are_splayed() {
        let spawner = FakeSpawner::new(Behavior::healthy());
        let cfg = config(8);
        let t = cfg.timeouts;
        let mut master = build(cfg, &spawner);

        let now = Instant::now();
        master.start();
        while let Ok(msg) = master.inbox_rx.try_recv() {
            master.dispatch(Wake::Inbound(msg));
        }

        let deadlines: Vec<Instant> = master
            .pool
            .ids()
            .into_iter()
            .filter_map(|id| master.timers.deadline(id, TimerKind::Lifecycle))
            .collect();
        assert_eq!(deadlines.len(), 8);
        for d in &deadlines {
            assert!(*d >= now + t.max_age);
            assert!(*d <= now + t.max_age + t.lifecycle_splay());
        }
        let distinct: HashSet<_> = deadlines.iter().collect();
        assert_eq!(distinct.len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_age_recycles_worker() {
        let spawner = FakeSpawner::new(Behavior::healthy());
        let mut cfg = config(1);
        cfg.timeouts.max_age = Duration::from_millis(50);
        cfg.fork_loop_factor = 100;
        let master = build(cfg, &spawner);
        let handle = master.handle();
        let run = tokio::spawn(master.run());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(spawner.attempts() >= 2);
        let first = spawner.spawned()[0].clone();
        assert!(first.messages().contains(&MasterMessage::Shutdown));
        assert!(first.signals().is_empty());

        handle.stop().await.unwrap();
        run.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rolling_restart_keeps_capacity() {
        let spawner = FakeSpawner::new(Behavior::healthy());
        let master = build(config(3), &spawner);
        let handle = master.handle();
        let mut rx = handle.subscribe();
        let run = tokio::spawn(master.run());
        let before = wait_listening(&handle, 3).await;

        assert_eq!(handle.restart().await.unwrap(), RestartOutcome::Completed);

        let after = wait_listening(&handle, 3).await;
        assert_eq!(spawner.attempts(), 6);
        assert!(after.iter().all(|w| before.iter().all(|b| b.id != w.id)));
        for old in &spawner.spawned()[..3] {
            assert_eq!(old.messages(), vec![MasterMessage::Shutdown]);
        }

        let events = drain(&mut rx);
        let mut live = HashSet::new();
        let mut armed = false;
        for ev in &events {
            match ev.kind {
                EventKind::Listening => {
                    live.extend(ev.worker);
                    armed |= live.len() == 3;
                }
                EventKind::Disconnect | EventKind::Exit => {
                    if let Some(id) = ev.worker {
                        live.remove(&id);
                    }
                    if armed {
                        assert!(live.len() >= 2, "capacity dropped below n-1");
                    }
                }
                _ => {}
            }
        }
        let restart = events.iter().find(|e| e.kind == EventKind::Restart).unwrap();
        assert_eq!(restart.reason.as_deref(), Some("completed"));

        handle.stop().await.unwrap();
        run.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_restart_aborts_it() {
        let spawner = FakeSpawner::new(Behavior::healthy());
        let master = build(config(3), &spawner);
        let handle = master.handle();
        let run = tokio::spawn(master.run());
        wait_listening(&handle, 3).await;

        let restart = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.restart().await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        handle.shutdown().unwrap();

        assert_eq!(restart.await.unwrap().unwrap(), RestartOutcome::Aborted);
        let report = run.await.unwrap().unwrap();
        assert_eq!(report.cause, ShutdownCause::Requested);
        assert_eq!(report.retired, 2);
        assert_eq!(spawner.attempts(), 3);
        assert_eq!(spawner.running(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fork_loop_triggers_shutdown() {
        let spawner = FakeSpawner::new(Behavior::CrashOnStart);
        let master = build(config(2), &spawner);
        let handle = master.handle();
        let mut rx = handle.subscribe();
        let run = tokio::spawn(master.run());

        let report = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("fork loop never detected")
            .unwrap()
            .unwrap();
        assert_eq!(report.cause, ShutdownCause::ForkLoop);

        let events = drain(&mut rx);
        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        let fork_loop = kinds.iter().position(|k| *k == EventKind::ForkLoop).unwrap();
        let shutdown = kinds.iter().position(|k| *k == EventKind::Shutdown).unwrap();
        assert!(fork_loop < shutdown);
        assert_eq!(count(&events, EventKind::ForkLoop), 1);
        assert_eq!(events[shutdown].reason.as_deref(), Some("fork_loop"));

        // threshold = 2 × 5; the guard trips on the one past it.
        assert_eq!(count(&events[..fork_loop], EventKind::Online), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_crashes_settle_to_target() {
        let crash = Behavior::CrashAfterListen {
            after: Duration::from_millis(50),
        };
        let spawner = FakeSpawner::new(Behavior::healthy()).script([crash; 4]);
        let master = build(config(4), &spawner);
        let handle = master.handle();
        let run = tokio::spawn(master.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        wait_listening(&handle, 4).await;
        assert_eq!(spawner.attempts(), 8);

        handle.stop().await.unwrap();
        let report = run.await.unwrap().unwrap();
        assert_eq!(report.cause, ShutdownCause::Requested);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_idempotent() {
        let spawner = FakeSpawner::new(Behavior::healthy());
        let master = build(config(2), &spawner);
        let handle = master.handle();
        let mut rx = handle.subscribe();
        let run = tokio::spawn(master.run());
        wait_listening(&handle, 2).await;

        handle.shutdown().unwrap();
        handle.shutdown().unwrap();
        handle.stop().await.unwrap();
        run.await.unwrap().unwrap();

        let events = drain(&mut rx);
        assert_eq!(count(&events, EventKind::Shutdown), 1);
        assert_eq!(count(&events, EventKind::Stop), 0);
        assert_eq!(count(&events, EventKind::Fork), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_worker_killed_after_disconnect_timeout() {
        let spawner = FakeSpawner::new(Behavior::healthy()).script([Behavior::IgnoreShutdown]);
        let master = build(config(1), &spawner);
        let handle = master.handle();
        let run = tokio::spawn(master.run());
        wait_listening(&handle, 1).await;

        handle.stop().await.unwrap();
        let report = run.await.unwrap().unwrap();
        assert_eq!(report.retired, 1);

        let stuck = spawner.spawned()[0].clone();
        assert_eq!(stuck.signals(), vec![Signal::SIGKILL]);
        assert_eq!(spawner.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_failure_is_replaced() {
        let spawner = FakeSpawner::new(Behavior::healthy()).script([Behavior::FailSpawn]);
        let master = build(config(2), &spawner);
        let handle = master.handle();
        let mut rx = handle.subscribe();
        let run = tokio::spawn(master.run());

        wait_listening(&handle, 2).await;
        assert_eq!(spawner.attempts(), 3);

        let events = drain(&mut rx);
        let failed = events
            .iter()
            .find(|e| e.kind == EventKind::Exit && e.reason.is_some())
            .unwrap();
        assert_eq!(failed.worker, Some(WorkerId::new(1)));

        handle.stop().await.unwrap();
        run.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pubsub_relays_between_workers() {
        let spawner = FakeSpawner::new(Behavior::healthy());
        let master = Master::builder(config(3))
            .spawner(spawner.clone())
            .message_handler(PubSub)
            .build()
            .unwrap();
        let handle = master.handle();
        let run = tokio::spawn(master.run());
        wait_listening(&handle, 3).await;

        let procs = spawner.spawned();
        procs[1].publish(json!({"topic": "cache", "key": 7}));
        tokio::time::sleep(Duration::from_millis(1)).await;

        let expected = MasterMessage::message(json!({"topic": "cache", "key": 7}));
        assert_eq!(procs[0].messages(), vec![expected.clone()]);
        assert!(procs[1].messages().is_empty());
        assert_eq!(procs[2].messages(), vec![expected]);

        assert_eq!(handle.broadcast(json!("hi")).await.unwrap(), 3);

        handle.stop().await.unwrap();
        run.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_route_is_sticky() {
        let spawner = FakeSpawner::new(Behavior::healthy());
        let master = build(config(4), &spawner);
        let handle = master.handle();
        let run = tokio::spawn(master.run());
        wait_listening(&handle, 4).await;

        let ip = IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3));
        let first = handle.route(ip).await.unwrap().unwrap();
        for _ in 0..5 {
            assert_eq!(handle.route(ip).await.unwrap().unwrap().id, first.id);
        }

        handle.stop().await.unwrap();
        run.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_faked_exit_is_confirmed_with_kill() {
        let spawner = FakeSpawner::new(Behavior::healthy()).script([Behavior::FakeExit]);
        let master = build(config(1), &spawner);
        let handle = master.handle();
        let run = tokio::spawn(master.run());
        wait_listening(&handle, 1).await;

        handle.stop().await.unwrap();
        run.await.unwrap().unwrap();

        let liar = spawner.spawned()[0].clone();
        assert!(liar.signals().is_empty());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(liar.signals(), vec![Signal::SIGKILL]);
        assert_eq!(spawner.running(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_broadcasts_then_restarts() {
        let spawner = FakeSpawner::new(Behavior::healthy());
        let master = build(config(2), &spawner);
        let handle = master.handle();
        let mut rx = handle.subscribe();
        let run = tokio::spawn(master.run());
        wait_listening(&handle, 2).await;

        handle.reload().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        wait_listening(&handle, 2).await;

        for old in &spawner.spawned()[..2] {
            assert_eq!(old.messages(), vec![MasterMessage::Reload, MasterMessage::Shutdown]);
        }
        let events = drain(&mut rx);
        assert_eq!(count(&events, EventKind::Reload), 1);
        assert_eq!(count(&events, EventKind::Restart), 1);

        handle.stop().await.unwrap();
        run.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_age_rotation_is_rolling() {
        let spawner = FakeSpawner::new(Behavior::healthy());
        let mut cfg = config(8);
        cfg.timeouts.max_age = Duration::from_secs(1);
        cfg.fork_loop_factor = 100;
        let master = build(cfg, &spawner);
        let handle = master.handle();
        let mut rx = handle.subscribe();
        let run = tokio::spawn(master.run());
        wait_listening(&handle, 8).await;

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(spawner.attempts() >= 16, "workers were not recycled");

        let events = drain(&mut rx);
        let mut live = HashSet::new();
        let mut armed = false;
        for ev in &events {
            match ev.kind {
                EventKind::Listening => {
                    live.extend(ev.worker);
                    armed |= live.len() == 8;
                }
                EventKind::Disconnect | EventKind::Exit => {
                    if let Some(id) = ev.worker {
                        live.remove(&id);
                    }
                    if armed {
                        assert!(live.len() >= 7, "more than one aged worker down at once");
                    }
                }
                _ => {}
            }
        }
        assert_eq!(count(&events, EventKind::Restart), 0);
        assert!(spawner.spawned().iter().all(|p| p.signals().is_empty()));

        handle.stop().await.unwrap();
        run.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_skips_disconnecting_worker() {
        let spawner = FakeSpawner::new(Behavior::healthy());
        let master = build(config(3), &spawner);
        let handle = master.handle();
        let run = tokio::spawn(master.run());
        wait_listening(&handle, 3).await;

        let leaving = spawner.spawned()[0].clone();
        leaving.hang_up();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(handle.restart().await.unwrap(), RestartOutcome::Completed);
        assert!(leaving.messages().is_empty());

        // The stop deadline armed on disconnect still reaps it.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(leaving.signals(), vec![Signal::SIGKILL]);
        wait_listening(&handle, 3).await;
        assert_eq!(spawner.attempts(), 6);

        handle.stop().await.unwrap();
        run.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_arms_stop_deadline_only_while_running() {
        let spawner = FakeSpawner::new(Behavior::healthy());
        let mut master = build(config(2), &spawner);
        master.start();
        while let Ok(msg) = master.inbox_rx.try_recv() {
            master.dispatch(Wake::Inbound(msg));
        }
        let procs = spawner.spawned();
        let (alive, dead) = (procs[0].id(), procs[1].id());

        procs[0].hang_up();
        let msg = master.inbox_rx.try_recv().unwrap();
        master.dispatch(Wake::Inbound(msg));
        assert!(master.timers.is_armed(alive, TimerKind::Disconnect));
        assert!(!master.timers.is_armed(alive, TimerKind::Lifecycle));

        // A crash reports the disconnect after the process is already gone.
        procs[1].crash(1);
        let msg = master.inbox_rx.try_recv().unwrap();
        master.dispatch(Wake::Inbound(msg));
        assert_eq!(
            master.pool.get(dead).map(|w| w.state),
            Some(WorkerState::Disconnecting)
        );
        assert!(!master.timers.is_armed(dead, TimerKind::Disconnect));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_timeout_during_restart_and_shutdown() {
        let spawner = FakeSpawner::new(Behavior::healthy());
        let mut master = build(config(2), &spawner);
        master.start();
        while let Ok(msg) = master.inbox_rx.try_recv() {
            master.dispatch(Wake::Inbound(msg));
        }
        let second = spawner.spawned()[1].clone();
        let id = second.id();

        master.request_restart(None);
        assert!(master.restart.is_running());

        // Rolling restart in flight: the deadline is pushed back, nothing is sent.
        master.timers.clear(id, TimerKind::Lifecycle);
        master.on_timeout(id, TimerKind::Lifecycle);
        assert!(master.timers.is_armed(id, TimerKind::Lifecycle));
        assert!(second.messages().is_empty());

        master.begin_shutdown(ShutdownCause::Requested);
        master.timers.clear(id, TimerKind::Lifecycle);
        master.on_timeout(id, TimerKind::Lifecycle);
        assert!(!master.timers.is_armed(id, TimerKind::Lifecycle));
        assert!(second.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_restarts_are_coalesced() {
        let spawner = FakeSpawner::new(Behavior::healthy());
        let master = build(config(2), &spawner);
        let handle = master.handle();
        let mut rx = handle.subscribe();
        let run = tokio::spawn(master.run());
        wait_listening(&handle, 2).await;

        let first = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.restart().await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        let queued: Vec<_> = (0..2)
            .map(|_| {
                let handle = handle.clone();
                tokio::spawn(async move { handle.restart().await })
            })
            .collect();

        assert_eq!(first.await.unwrap().unwrap(), RestartOutcome::Completed);
        for q in queued {
            assert_eq!(q.await.unwrap().unwrap(), RestartOutcome::Completed);
        }
        wait_listening(&handle, 2).await;

        // Initial pool, then one pass for the first request and one shared pass.
        assert_eq!(spawner.attempts(), 6);
        let events = drain(&mut rx);
        assert_eq!(count(&events, EventKind::Restart), 2);

        handle.stop().await.unwrap();
        run.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_queued_restart() {
        let spawner = FakeSpawner::new(Behavior::healthy());
        let master = build(config(2), &spawner);
        let handle = master.handle();
        let run = tokio::spawn(master.run());
        wait_listening(&handle, 2).await;

        let restart = || {
            let handle = handle.clone();
            tokio::spawn(async move { handle.restart().await })
        };
        let running = restart();
        tokio::time::sleep(Duration::from_millis(1)).await;
        let queued = restart();
        tokio::time::sleep(Duration::from_millis(1)).await;
        handle.shutdown().unwrap();

        assert_eq!(running.await.unwrap().unwrap(), RestartOutcome::Aborted);
        assert_eq!(queued.await.unwrap().unwrap(), RestartOutcome::Aborted);
        let report = run.await.unwrap().unwrap();
        assert_eq!(report.cause, ShutdownCause::Requested);
        assert_eq!(spawner.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_spawn_ends_in_fork_loop() {
        let spawner = FakeSpawner::new(Behavior::FailSpawn);
        let master = build(config(2), &spawner);
        let handle = master.handle();
        let mut rx = handle.subscribe();
        let run = tokio::spawn(master.run());

        let report = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("failing spawns never stopped")
            .unwrap()
            .unwrap();
        assert_eq!(report.cause, ShutdownCause::ForkLoop);
        assert_eq!(report.retired, 0);

        // Two initial attempts, then one replacement per failure until the 11th trips the guard.
        assert_eq!(spawner.attempts(), 12);
        let events = drain(&mut rx);
        assert_eq!(count(&events, EventKind::ForkLoop), 1);
        assert_eq!(count(&events, EventKind::Online), 0);
    }
}
