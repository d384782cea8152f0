//! The application orchestrator.
//!
//! Owns the registry, loader, session store, worker pool, AI monitor,
//! and message handler; wires channel callbacks onto the pool; runs the
//! cooperative poll loop; and drives the shutdown sequence: stop
//! channels, shut plugins down in reverse order, unload dynamic
//! plugins, stop the monitor, drain the pool.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use skein_memory::MemoryManager;
use skein_plugin::{PluginHandle, PluginLoader, PluginRegistry};
use skein_types::Config;

use crate::agent::AgentLoop;
use crate::commands::register_core_commands;
use crate::handler::MessageHandler;
use crate::monitor::{AiMonitor, DEFAULT_HEARTBEAT_SECS};
use crate::pool::{WorkerPool, DEFAULT_WORKERS};
use crate::session::{SessionStore, DEFAULT_MAX_HISTORY};
use crate::session_key::DmScope;
use crate::skills::SkillSet;

/// Cadence of the cooperative poll loop.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Central orchestrator wiring the runtime together.
pub struct Application {
    config: Config,
    registry: Arc<PluginRegistry>,
    loader: Mutex<PluginLoader>,
    sessions: Arc<SessionStore>,
    pool: Arc<WorkerPool>,
    monitor: Arc<AiMonitor>,
    memory: Option<Arc<MemoryManager>>,
    handler: Arc<MessageHandler>,
    cancel: CancellationToken,
}

impl Application {
    /// Wire the runtime from config, statically-built plugins, and an
    /// optional memory manager (shared with the memory tool).
    pub fn new(
        config: Config,
        plugins: Vec<PluginHandle>,
        memory: Option<Arc<MemoryManager>>,
    ) -> Self {
        let sessions = Arc::new(SessionStore::new(
            DmScope::parse(&config.get_str("session.dm_scope", "main")),
            config.get_i64("session.max_history", DEFAULT_MAX_HISTORY as i64).max(1) as usize,
        ));

        let mut registry = PluginRegistry::new();
        for plugin in plugins {
            registry.register_plugin(plugin);
        }
        let registry = Arc::new(registry);

        let mut loader = PluginLoader::new();
        let plugins_dir = config.get_str("plugins_dir", "");
        if !plugins_dir.is_empty() {
            loader.add_search_path(plugins_dir);
        }

        let monitor = Arc::new(AiMonitor::new(
            config.get_i64("agent.heartbeat_secs", DEFAULT_HEARTBEAT_SECS),
        ));

        let skills = Arc::new(Self::load_skills(&config));
        let agent = AgentLoop::new(registry.clone(), monitor.clone()).with_config(&config);
        let handler = Arc::new(MessageHandler::new(
            registry.clone(),
            sessions.clone(),
            skills,
            agent,
            &config,
        ));

        let pool = Arc::new(WorkerPool::new(
            config.get_i64("workers", DEFAULT_WORKERS as i64).max(1) as usize,
        ));

        register_core_commands(&config, &registry, sessions.clone());

        let app = Self {
            config,
            registry,
            loader: Mutex::new(loader),
            sessions,
            pool,
            monitor,
            memory,
            handler,
            cancel: CancellationToken::new(),
        };
        app.wire_channel_callbacks();
        app
    }

    /// Skill directories: `<workspace>/skills` plus `skills.dirs`.
    fn load_skills(config: &Config) -> SkillSet {
        let mut dirs = vec![PathBuf::from(config.get_str("workspace_dir", ".")).join("skills")];
        if let Some(extra) = config.get_section("skills.dirs").as_array() {
            dirs.extend(
                extra
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(PathBuf::from),
            );
        }
        SkillSet::load(&dirs)
    }

    /// Point every channel's inbound callback at the worker pool.
    fn wire_channel_callbacks(&self) {
        for channel in self.registry.channels() {
            let handler = self.handler.clone();
            let pool = self.pool.clone();
            channel.set_message_callback(Arc::new(move |msg| {
                let handler = handler.clone();
                pool.enqueue(async move {
                    handler.handle(msg).await;
                });
            }));
            channel.set_error_callback(Arc::new(|channel_id, error| {
                warn!(channel = channel_id, error, "channel reported error");
            }));
        }
    }

    /// Attempt to load the named plugins dynamically. Failures are
    /// logged; peers keep loading.
    pub fn load_dynamic_plugins(&self, names: &[String]) -> usize {
        let mut loader = self.loader.lock().expect("loader poisoned");
        let mut count = 0;
        for name in names {
            match loader.load(name) {
                Ok(()) => count += 1,
                Err(e) => warn!(plugin = %name, error = %e, "dynamic plugin load failed"),
            }
        }
        count
    }

    /// Initialize all plugins (static then dynamic) and sync memory.
    /// Returns whether every init succeeded; the application stays up
    /// either way.
    pub fn init(&self) -> bool {
        let static_ok = self.registry.init_all(&self.config);
        let dynamic_ok = self
            .loader
            .lock()
            .expect("loader poisoned")
            .init_all(&self.config);

        if let Some(memory) = &self.memory {
            if let Err(e) = memory.sync() {
                warn!(error = %e, "initial memory sync failed");
            }
        }
        static_ok && dynamic_ok
    }

    /// Token that stops [`run`](Application::run) when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start channels and the monitor, then poll cooperatively until
    /// the cancellation token fires; shut everything down after.
    pub async fn run(&self) {
        self.registry.start_all_channels().await;

        let registry = self.registry.clone();
        self.monitor.start(Arc::new(move |channel, chat| {
            let registry = registry.clone();
            let channel = channel.to_string();
            let chat = chat.to_string();
            tokio::spawn(async move {
                if let Some(plugin) = registry.get_channel(&channel) {
                    plugin.on_typing_indicator(&channel, &chat, true).await;
                }
            });
        }));

        info!("application running");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(POLL_INTERVAL) => {
                    self.registry.poll_all().await;
                }
            }
        }

        info!("shutting down");
        self.shutdown().await;
    }

    /// Cooperative shutdown: stop channels, shut plugins down in
    /// reverse registration order, unload dynamic plugins, stop the
    /// monitor, drain and join the worker pool.
    pub async fn shutdown(&self) {
        self.registry.stop_all_channels().await;
        self.registry.shutdown_all();
        self.loader.lock().expect("loader poisoned").unload_all();
        self.monitor.stop().await;
        self.pool.shutdown().await;
        info!("shutdown complete");
    }

    /// The plugin registry.
    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// The session store.
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// The message handler.
    pub fn handler(&self) -> &Arc<MessageHandler> {
        &self.handler
    }

    /// The worker pool.
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// The AI monitor.
    pub fn monitor(&self) -> &Arc<AiMonitor> {
        &self.monitor
    }

    /// The memory manager, when configured.
    pub fn memory(&self) -> Option<&Arc<MemoryManager>> {
        self.memory.as_ref()
    }
}
