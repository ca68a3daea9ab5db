//! docsync-daemon: headless driver for the document synchronization engine.
//!
//! Opens files on the native filesystem, persists drafts under the state
//! directory and watches the active document. Editing happens through line
//! commands on stdin, which makes the engine scriptable for manual testing.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use docsync_core::{
    CloseOutcome, PromptResolution, SaveOutcome, SyncEvent, SynchronizationEngine, Tab, TabMode,
};
use docsync_daemon::commands::Command;
use docsync_daemon::native_fs::NativeFs;
use docsync_daemon::persistence::JsonDraftStore;
use docsync_daemon::settings::load_settings;
use docsync_daemon::watcher::NotifyWatchService;

#[derive(Parser, Debug)]
#[command(name = "docsync-daemon")]
#[command(about = "Local-first document sync engine driven from stdin")]
struct Args {
    /// Files to open on startup
    files: Vec<PathBuf>,

    /// Directory holding the draft cache
    #[arg(long, default_value = ".docsync")]
    state_dir: PathBuf,

    /// Settings file (JSON)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Open files as read-only previews
    #[arg(long)]
    read_only: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

/// Daemon state holding all components.
struct Daemon {
    engine: SynchronizationEngine,
    mode: TabMode,
}

impl Daemon {
    fn active(&self) -> Result<Tab> {
        self.engine
            .active_tab()
            .ok_or_else(|| anyhow!("No active tab"))
    }

    async fn open(&self, path: PathBuf) -> Result<()> {
        let path = std::path::absolute(&path)
            .with_context(|| format!("Invalid path {}", path.display()))?;
        let opened = self.engine.open_file(&path, self.mode).await?;
        if opened.recovered_draft {
            println!(
                "Recovered unsaved changes for {} (save to keep, close discard to drop)",
                path.display()
            );
        }
        Ok(())
    }

    fn print_tabs(&self) {
        let tabs = self.engine.tabs();
        if tabs.is_empty() {
            println!("No open tabs");
        }
        for (i, tab) in tabs.iter().enumerate() {
            println!(
                "{} {}. {}{} [{}] {}",
                if tab.active { "*" } else { " " },
                i + 1,
                tab.display_name,
                if tab.dirty { " (modified)" } else { "" },
                serde_json::to_value(&tab.status)
                    .ok()
                    .and_then(|v| v["state"].as_str().map(str::to_string))
                    .unwrap_or_default(),
                tab.path,
            );
        }
    }

    /// Run one command. Returns false when the daemon should stop.
    async fn on_command(&self, command: Command) -> Result<bool> {
        match command {
            Command::Tabs => self.print_tabs(),
            Command::Open(path) => self.open(path).await?,
            Command::New(name) => {
                self.engine.new_untitled(name).await?;
            }
            Command::Switch(index) => {
                let tab = self
                    .engine
                    .tabs()
                    .get(index - 1)
                    .cloned()
                    .ok_or_else(|| anyhow!("No tab {}", index))?;
                self.engine.switch_tab(tab.id).await?;
            }
            Command::Set(text) => {
                let tab = self.active()?;
                self.engine.content_changed(tab.id, text)?;
            }
            Command::Append(text) => {
                let tab = self.active()?;
                let mut content = self.engine.content(tab.id).unwrap_or_default();
                if !content.is_empty() && !content.ends_with('\n') {
                    content.push('\n');
                }
                content.push_str(&text);
                content.push('\n');
                self.engine.content_changed(tab.id, content)?;
            }
            Command::Save => {
                let tab = self.active()?;
                match self.engine.save(tab.id).await? {
                    SaveOutcome::Saved => {}
                    SaveOutcome::NothingToSave => println!("Nothing to save"),
                    SaveOutcome::NeedsSaveAs => println!("Untitled document: use 'saveas <path>'"),
                }
            }
            Command::SaveAs(path) => {
                let tab = self.active()?;
                let path = std::path::absolute(&path)
                    .with_context(|| format!("Invalid path {}", path.display()))?;
                self.engine.save_as(tab.id, path).await?;
            }
            Command::Reload => {
                let tab = self.active()?;
                self.engine
                    .resolve_prompt(&tab.path, PromptResolution::Reload)
                    .await?;
            }
            Command::Keep => {
                let tab = self.active()?;
                self.engine
                    .resolve_prompt(&tab.path, PromptResolution::KeepCurrent)
                    .await?;
            }
            Command::Close(decision) => {
                let tab = self.active()?;
                match self.engine.close_tab(tab.id, decision).await? {
                    CloseOutcome::Closed | CloseOutcome::Cancelled => {}
                    CloseOutcome::NeedsDecision => {
                        println!("{} has unsaved changes: close save|discard|cancel", tab.display_name)
                    }
                    CloseOutcome::NeedsSaveAs => {
                        println!("Untitled document: use 'saveas <path>' first")
                    }
                }
            }
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }
}

fn print_event(event: SyncEvent) {
    match event {
        SyncEvent::ExternalChangePrompt { path, .. } => {
            println!("{} changed on disk. Type 'reload' or 'keep'.", path);
        }
        SyncEvent::Reloaded { path, .. } => println!("Reloaded {} from disk", path),
        SyncEvent::Saved { path } => println!("Saved {}", path),
        SyncEvent::WriteFailed { path, error } => println!("Could not save {}: {}", path, error),
        SyncEvent::ReadFailed { path, error } => println!("Could not read {}: {}", path, error),
        SyncEvent::WatchFailed { path, error } => {
            println!("Not watching {} for changes: {}", path, error)
        }
        other => debug!("Event: {:?}", other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,docsync_daemon=debug"
    } else {
        "info,docsync_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting docsync-daemon");
    info!("State directory: {:?}", args.state_dir);

    let settings = load_settings(args.settings.as_deref());
    debug!("Settings: {:?}", settings);

    let drafts = JsonDraftStore::open_in(&args.state_dir).await?;
    let (watch_service, mut changes) = NotifyWatchService::new();
    let engine = SynchronizationEngine::new(
        Arc::new(NativeFs::new()),
        Arc::new(drafts),
        Arc::new(watch_service),
        settings,
    );
    let _events = engine.subscribe(print_event);

    let recovered = engine.recover_untitled().await?;
    if !recovered.is_empty() {
        info!("Recovered {} untitled document(s)", recovered.len());
    }

    let daemon = Daemon {
        engine: engine.clone(),
        mode: if args.read_only {
            TabMode::ReadOnly
        } else {
            TabMode::Editable
        },
    };

    for file in args.files {
        if let Err(e) = daemon.open(file.clone()).await {
            error!("Failed to open {}: {:#}", file.display(), e);
        }
    }

    info!("Daemon running. Press Ctrl+C to stop.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    // Main event loop
    loop {
        tokio::select! {
            // Handle file watcher events
            Some(path) = changes.recv() => {
                let outcome = engine.handle_file_changed(&path).await;
                debug!("Change to {}: {:?}", path.display(), outcome);
            }

            // Handle stdin commands
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("Input closed");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read input: {}", e);
                        break;
                    }
                };
                match Command::parse(&line) {
                    Ok(Some(command)) => match daemon.on_command(command).await {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(e) => error!("{:#}", e),
                    },
                    Ok(None) => {}
                    Err(e) => error!("{}", e),
                }
            }

            // Handle graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Shutting down");
    engine.shutdown().await;
    Ok(())
}
