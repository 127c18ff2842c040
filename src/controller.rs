//! Lifecycle of the marker engine for one document
//!
//! `MarkerContext` is constructed by the embedder and composes the
//! renderer, reconciler, resolver and command channel:
//!
//! ```text
//! Uninitialized --init()--> Active | Disabled --configure()--> Active | Disabled
//!                                              --dispose()--> Uninitialized
//! ```

use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::{Command, CommandChannel, CommandResult, Inbound, PendingSelect};
use crate::commands::{self, Execution};
use crate::config::{ConfigPatch, MarkerConfig};
use crate::constants::dom::{OVERLAY_STYLES, STYLE_KEY};
use crate::dom::Document;
use crate::error::{MarkerError, Result};
use crate::reconciler::{Reconciler, ScanStats};
use crate::renderer::{Renderer, SweepStats};
use crate::resolver::{self, Assignment};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Active,
    Disabled,
}

pub struct MarkerContext {
    state: LifecycleState,
    /// Snapshot `init` merges over
    base: MarkerConfig,
    config: Arc<MarkerConfig>,
    renderer: Renderer,
    reconciler: Reconciler,
    channel: Option<CommandChannel>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
}

impl MarkerContext {
    /// New context plus the receiving end of its inbound queue, which the
    /// event loop drains
    pub fn new(base: MarkerConfig) -> (Self, mpsc::UnboundedReceiver<Inbound>) {
        Self::with_renderer(base, Renderer::default())
    }

    /// Context whose base configuration comes from a config file, or
    /// defaults when the file does not exist
    pub fn from_config_file(path: &Path) -> Result<(Self, mpsc::UnboundedReceiver<Inbound>)> {
        let base = MarkerConfig::load_from(path).map_err(|e| MarkerError::Config(format!("{e:#}")))?;
        Ok(Self::new(base))
    }

    pub fn with_renderer(
        base: MarkerConfig,
        renderer: Renderer,
    ) -> (Self, mpsc::UnboundedReceiver<Inbound>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let context = Self {
            state: LifecycleState::Uninitialized,
            config: Arc::new(base.clone()),
            base,
            renderer,
            reconciler: Reconciler::new(),
            channel: None,
            inbound_tx,
        };
        (context, inbound_rx)
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn config(&self) -> Arc<MarkerConfig> {
        Arc::clone(&self.config)
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn is_connected(&self) -> bool {
        self.channel.as_ref().is_some_and(CommandChannel::is_connected)
    }

    /// Sender half of the inbound queue, for host integrations that inject
    /// commands without the network channel
    pub fn inbound(&self) -> mpsc::UnboundedSender<Inbound> {
        self.inbound_tx.clone()
    }

    pub fn init(&mut self, doc: &mut Document, patch: ConfigPatch) {
        if self.state != LifecycleState::Uninitialized {
            warn!(state = ?self.state, "init called twice, ignoring");
            return;
        }

        let patch = patch.with_page_port(doc.location());
        self.config = Arc::new(self.base.merged(&patch));

        if doc.inject_style(STYLE_KEY, OVERLAY_STYLES) {
            debug!(key = STYLE_KEY, "Injected overlay presentation rules");
        }

        if self.config.enabled {
            self.activate(doc);
        } else {
            self.state = LifecycleState::Disabled;
        }

        match CommandChannel::open(
            self.config.port,
            self.config.reconnect_interval(),
            self.inbound_tx.clone(),
        ) {
            Ok(channel) => self.channel = Some(channel),
            Err(e) => warn!(error = %e, "Remote control disabled"),
        }

        info!(
            state = ?self.state,
            port = self.config.port,
            overlays = self.renderer.len(),
            "Marker engine initialized"
        );
    }

    /// Merge a partial configuration. The command channel is left alone.
    pub fn configure(&mut self, doc: &mut Document, patch: ConfigPatch) {
        if self.state == LifecycleState::Uninitialized {
            warn!("configure called before init, ignoring");
            return;
        }

        let previous = Arc::clone(&self.config);
        self.config = Arc::new(previous.merged(&patch));

        match (previous.enabled, self.config.enabled) {
            (true, false) => self.deactivate(doc),
            (false, true) => self.activate(doc),
            (true, true) if previous.opacity != self.config.opacity => {
                if let Err(e) = self.renderer.set_opacity(doc, self.config.opacity) {
                    warn!(error = %e, "Failed to apply new opacity");
                }
            }
            _ => {}
        }
        info!(state = ?self.state, "Marker engine reconfigured");
    }

    pub fn dispose(&mut self, doc: &mut Document) {
        if self.state == LifecycleState::Uninitialized {
            return;
        }
        self.reconciler.stop(doc);
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        match self.renderer.clear(doc) {
            Ok(count) => debug!(count = count, "Removed overlays on dispose"),
            Err(e) => warn!(error = %e, "Failed to remove overlays on dispose"),
        }
        self.state = LifecycleState::Uninitialized;
        info!("Marker engine disposed");
    }

    fn activate(&mut self, doc: &mut Document) {
        let stats = self
            .reconciler
            .scan(doc, None, &mut self.renderer, &self.config);
        self.reconciler.start(doc);
        self.state = LifecycleState::Active;
        debug!(rendered = stats.rendered, skipped = stats.skipped, "Initial scan complete");
    }

    fn deactivate(&mut self, doc: &mut Document) {
        self.reconciler.stop(doc);
        if let Err(e) = self.renderer.clear(doc) {
            warn!(error = %e, "Failed to remove overlays");
        }
        self.state = LifecycleState::Disabled;
    }

    /// Process the pending batch of structural changes
    pub fn handle_mutations(&mut self, doc: &mut Document) -> ScanStats {
        self.reconciler
            .process_pending(doc, &mut self.renderer, &self.config)
    }

    /// Scroll or resize happened
    pub fn on_viewport_change(&mut self, doc: &mut Document) {
        if let Err(e) = self.renderer.reposition_detached(doc, &self.config) {
            warn!(error = %e, "Failed to reposition detached overlays");
        }
    }

    pub fn sweep(&mut self, doc: &mut Document) -> SweepStats {
        self.renderer.sweep(doc).unwrap_or_else(|e| {
            warn!(error = %e, "Overlay sweep failed");
            SweepStats::default()
        })
    }

    /// Label unlabeled interactive elements, then render their overlays
    pub fn discover(&mut self, doc: &mut Document) -> Result<Vec<Assignment>> {
        let assigned = resolver::discover(doc, &self.config.label_attributes)?;
        if self.state == LifecycleState::Active && !assigned.is_empty() {
            self.reconciler
                .scan(doc, None, &mut self.renderer, &self.config);
        }
        Ok(assigned)
    }

    /// Run one inbound item from the event loop
    pub fn handle(&mut self, doc: &mut Document, inbound: Inbound) -> Option<CommandResult> {
        match inbound {
            Inbound::Command(command) => self.execute(doc, &command),
            Inbound::SelectDue(pending) => Some(self.complete_select(doc, &pending)),
        }
    }

    /// Execute a command; the result, if any, is sent when connected and returned
    pub fn execute(&mut self, doc: &mut Document, command: &Command) -> Option<CommandResult> {
        if self.state == LifecycleState::Uninitialized {
            debug!(command = %command, "Ignoring command, engine not initialized");
            return None;
        }
        debug!(command = %command, "Executing command");
        match commands::execute(doc, &self.renderer, &self.config, command) {
            Execution::Reply(result) => {
                self.reply(&result);
                Some(result)
            }
            Execution::Silent => None,
            Execution::Deferred(pending) => self.schedule_select(doc, pending),
        }
    }

    fn schedule_select(
        &mut self,
        doc: &mut Document,
        pending: PendingSelect,
    ) -> Option<CommandResult> {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            // no timer available, resolve right away
            return Some(self.complete_select(doc, &pending));
        };
        let delay = self.config.select_delay();
        let tx = self.inbound_tx.clone();
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Inbound::SelectDue(pending));
        });
        None
    }

    /// Resolve a deferred custom select and report it
    pub fn complete_select(&mut self, doc: &mut Document, pending: &PendingSelect) -> CommandResult {
        let result = CommandResult::from(commands::resolve_select(doc, pending));
        self.reply(&result);
        result
    }

    fn reply(&self, result: &CommandResult) {
        match &self.channel {
            Some(channel) => {
                channel.send(result);
            }
            None => debug!("No command channel, result dropped"),
        }
    }
}
