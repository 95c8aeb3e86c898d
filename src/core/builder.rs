use std::sync::Arc;

use super::{Config, Master};
use crate::error::ConfigError;
use crate::policies::JitterPolicy;
use crate::process::{CommandSpawner, Spawner, WorkerCommand};
use crate::relay::MessageHandler;
use crate::subscribers::Subscribe;

/// Builder for constructing a [`Master`] with optional features.
pub struct MasterBuilder {
    cfg: Config,
    spawner: Option<Arc<dyn Spawner>>,
    command: Option<WorkerCommand>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    handler: Option<Arc<dyn MessageHandler>>,
    jitter: JitterPolicy,
}

impl MasterBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            spawner: None,
            command: None,
            subscribers: Vec::new(),
            handler: None,
            jitter: JitterPolicy::default(),
        }
    }

    /// Worker program, spawned as one OS process per worker.
    pub fn command(mut self, cmd: WorkerCommand) -> Self {
        self.command = Some(cmd);
        self
    }

    /// Custom spawner; takes precedence over [`command`](Self::command).
    pub fn spawner(mut self, spawner: impl Spawner) -> Self {
        self.spawner = Some(Arc::new(spawner));
        self
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive lifecycle events through dedicated workers with
    /// bounded queues; a slow subscriber never stalls the master.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Handler for worker-originated messages. Without one they are dropped.
    pub fn message_handler(mut self, handler: impl MessageHandler) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Distribution of the per-worker max-age splay.
    pub fn jitter(mut self, jitter: JitterPolicy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Builds the master.
    ///
    /// Fails when neither a spawner nor a command was given, or when the
    /// command's program cannot be found.
    pub fn build(self) -> Result<Master, ConfigError> {
        let spawner: Arc<dyn Spawner> = match (self.spawner, self.command) {
            (Some(spawner), _) => spawner,
            (None, Some(cmd)) => Arc::new(CommandSpawner::new(cmd)?),
            (None, None) => return Err(ConfigError::MissingEntryPoint),
        };
        Ok(Master::new_internal(
            self.cfg,
            spawner,
            self.subscribers,
            self.handler,
            self.jitter,
        ))
    }
}
