//! `skein` -- multi-channel conversational agent runtime.
//!
//! Loads a JSON config, wires the configured channel / tool / AI
//! plugins into the orchestrator, and runs until interrupted.
//!
//! Exit codes: 0 on normal shutdown, 1 on unrecoverable init failure,
//! 130 when stopped by SIGINT.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use skein_ai::{ClaudeAi, LlamaCppAi};
use skein_channels::{GatewayChannel, TelegramChannel, WhatsAppChannel};
use skein_core::Application;
use skein_memory::{MemoryConfig, MemoryManager};
use skein_plugin::PluginHandle;
use skein_tools::{BrowserTool, FileTool, MemoryTool};
use skein_types::Config;

/// Plugins registered when the config has no `plugins` section.
const DEFAULT_PLUGINS: &[&str] = &["claude", "browser", "memory", "file"];

/// skein agent runtime.
#[derive(Parser)]
#[command(name = "skein", about = "Multi-channel conversational agent runtime", version)]
struct Cli {
    /// Path to the JSON config file.
    #[arg(default_value = "config.json")]
    config: PathBuf,

    /// Enable verbose (debug-level) logging.
    #[arg(short, long)]
    verbose: bool,
}

/// Plugin names requested by the config: an ordered list, or an object
/// keyed by name with optional `{"enabled": bool}`.
fn configured_plugin_names(cfg: &Config) -> Vec<String> {
    let section = cfg.get_section("plugins");
    if let Some(list) = section.as_array() {
        return list
            .iter()
            .filter_map(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    }
    if let Some(map) = section.as_object() {
        return map
            .iter()
            .filter(|(_, v)| v.get("enabled").and_then(|e| e.as_bool()).unwrap_or(true))
            .map(|(k, _)| k.clone())
            .collect();
    }
    DEFAULT_PLUGINS.iter().map(|s| s.to_string()).collect()
}

/// Build the statically-known plugins; names nobody recognizes are
/// returned for the dynamic loader.
fn build_plugins(
    names: &[String],
    memory: &Arc<MemoryManager>,
) -> (Vec<PluginHandle>, Vec<String>) {
    let mut plugins = Vec::new();
    let mut dynamic = Vec::new();

    for name in names {
        match name.as_str() {
            "telegram" => plugins.push(PluginHandle::Channel(Arc::new(TelegramChannel::new()))),
            "whatsapp" => plugins.push(PluginHandle::Channel(Arc::new(WhatsAppChannel::new()))),
            "gateway" => plugins.push(PluginHandle::Channel(Arc::new(GatewayChannel::new()))),
            "claude" => plugins.push(PluginHandle::Ai(Arc::new(ClaudeAi::new()))),
            "llamacpp" => plugins.push(PluginHandle::Ai(Arc::new(LlamaCppAi::new()))),
            "browser" => plugins.push(PluginHandle::Tool(Arc::new(BrowserTool::new()))),
            "memory" => plugins.push(PluginHandle::Tool(Arc::new(MemoryTool::new(
                memory.clone(),
            )))),
            "file" => plugins.push(PluginHandle::Tool(Arc::new(FileTool::new()))),
            other => dynamic.push(other.to_string()),
        }
    }
    (plugins, dynamic)
}

fn install_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli, interrupted: Arc<AtomicBool>) -> anyhow::Result<()> {
    let config = Config::load_file(&cli.config)
        .with_context(|| format!("failed to load config {}", cli.config.display()))?;

    let memory = Arc::new(
        MemoryManager::new(MemoryConfig::from_config(&config))
            .context("failed to open memory store")?,
    );

    let names = configured_plugin_names(&config);
    info!(plugins = ?names, "configured plugins");
    let (plugins, dynamic) = build_plugins(&names, &memory);

    let app = Application::new(config, plugins, Some(memory));
    app.load_dynamic_plugins(&dynamic);
    if !app.init() {
        warn!("one or more plugins failed to initialize; continuing");
    }

    // First signal flips the stop flag; the second aborts immediately.
    let cancel = app.cancel_token();
    let signal_count = Arc::new(AtomicUsize::new(0));
    tokio::spawn(async move {
        loop {
            if wait_for_signal().await.is_err() {
                return;
            }
            let count = signal_count.fetch_add(1, Ordering::SeqCst);
            if count == 0 {
                info!("shutdown signal received");
                interrupted.store(true, Ordering::SeqCst);
                cancel.cancel();
            } else {
                error!("second signal, aborting");
                std::process::exit(130);
            }
        }
    });

    app.run().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = term.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    install_tracing(cli.verbose);

    let interrupted = Arc::new(AtomicBool::new(false));
    let code = match run(cli, interrupted.clone()).await {
        Ok(()) => {
            if interrupted.load(Ordering::SeqCst) {
                130
            } else {
                0
            }
        }
        Err(e) => {
            error!("{e:#}");
            1
        }
    };
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_names_from_list() {
        let cfg = Config::load_str(r#"{"plugins": ["telegram", "claude", ""]}"#).unwrap();
        assert_eq!(configured_plugin_names(&cfg), vec!["telegram", "claude"]);
    }

    #[test]
    fn plugin_names_from_object_honor_enabled() {
        let cfg = Config::load_str(
            r#"{"plugins": {"claude": {}, "telegram": {"enabled": false}, "browser": {"enabled": true}}}"#,
        )
        .unwrap();
        let mut names = configured_plugin_names(&cfg);
        names.sort();
        assert_eq!(names, vec!["browser", "claude"]);
    }

    #[test]
    fn plugin_names_default_when_absent() {
        let cfg = Config::empty();
        assert_eq!(configured_plugin_names(&cfg), DEFAULT_PLUGINS);
    }

    #[test]
    fn unknown_names_go_to_dynamic_loader() {
        let dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(
            MemoryManager::new(MemoryConfig::for_workspace(dir.path())).unwrap(),
        );
        let names = vec!["claude".to_string(), "my_custom".to_string()];
        let (plugins, dynamic) = build_plugins(&names, &memory);
        assert_eq!(plugins.len(), 1);
        assert_eq!(dynamic, vec!["my_custom"]);
    }
}
