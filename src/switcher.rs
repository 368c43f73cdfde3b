use crate::error::{RelayError, Result};
use crate::types::{DeviceId, InputIndex, SourceMap, SwitcherSources};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

/// Mix effect bus the panel operates on
const MIX_EFFECT: u8 = 0;

/// Notification from the switcher driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitcherEvent {
    /// Link established; carries the sources the switcher reports right now
    Connected(SwitcherSources),
    /// Link lost
    Disconnected,
    /// Switcher state update
    StateChanged(SwitcherSources),
}

/// Commands the panel issues to the switcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitcherCommand {
    SetPreview { mix_effect: u8, source: InputIndex },
    AutoTransition { mix_effect: u8 },
}

/// Capability provided by a switcher protocol driver.
///
/// The driver owns the wire protocol; the bridge only consumes its event
/// stream and sends it commands.
#[async_trait]
pub trait SwitcherDriver: Send + Sync + 'static {
    /// Start connecting to the switcher at `address`.
    ///
    /// Link changes and state updates arrive on the returned stream, which
    /// stays open across reconnects.
    async fn connect(&self, address: &str) -> Result<mpsc::UnboundedReceiver<SwitcherEvent>>;

    async fn send_command(&self, command: SwitcherCommand) -> Result<()>;
}

/// State of the switcher link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connected,
}

/// A change of preview/program carrying both values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcesChange {
    /// Increases by one with every change the bridge emits
    pub revision: u64,
    pub previous: SwitcherSources,
    pub current: SwitcherSources,
    /// Emitted because the link came (back) up rather than because a value moved
    pub resync: bool,
}

/// Synchronous consumer of source changes, run on the bridge's event task
pub trait SourcesListener: Send + Sync {
    fn sources_changed(&self, change: &SourcesChange);
}

/// Tracks the switcher's preview/program selection and link state
pub struct SwitcherBridge {
    driver: Arc<dyn SwitcherDriver>,
    source_map: SourceMap,
    link: watch::Sender<LinkState>,
    sources: watch::Sender<(u64, SwitcherSources)>,
    changes: broadcast::Sender<SourcesChange>,
    listeners: Vec<Arc<dyn SourcesListener>>,
}

impl SwitcherBridge {
    pub fn new(driver: Arc<dyn SwitcherDriver>, source_map: SourceMap) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            driver,
            source_map,
            link: watch::Sender::new(LinkState::Disconnected),
            sources: watch::Sender::new((0, SwitcherSources::default())),
            changes,
            listeners: Vec::new(),
        }
    }

    /// Register a listener that runs inline on every change
    pub fn with_listener(mut self, listener: Arc<dyn SourcesListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Connect the driver and process its events on a background task
    pub async fn start(self: &Arc<Self>, address: &str) -> Result<JoinHandle<()>> {
        tracing::info!("Connecting to switcher at {}", address);
        let mut events = self.driver.connect(address).await?;
        let bridge = Arc::clone(self);
        Ok(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                bridge.handle_event(event);
            }
            tracing::warn!("Switcher event stream ended");
            bridge.link.send_replace(LinkState::Disconnected);
        }))
    }

    /// Apply one driver event
    pub fn handle_event(&self, event: SwitcherEvent) {
        match event {
            SwitcherEvent::Connected(sources) => {
                tracing::info!("Connected to switcher");
                self.link.send_replace(LinkState::Connected);
                self.update(sources, true);
            }
            SwitcherEvent::Disconnected => {
                if self.link.send_replace(LinkState::Disconnected) == LinkState::Connected {
                    tracing::info!("Switcher disconnected");
                }
            }
            SwitcherEvent::StateChanged(sources) => self.update(sources, false),
        }
    }

    fn update(&self, current: SwitcherSources, resync: bool) {
        let (revision, previous) = *self.sources.borrow();
        if !resync && previous == current {
            return;
        }
        let revision = revision + 1;
        self.sources.send_replace((revision, current));

        let change = SourcesChange {
            revision,
            previous,
            current,
            resync,
        };
        tracing::debug!(
            "Switcher sources: preview {:?} program {:?}{}",
            current.preview,
            current.program,
            if resync { " (resync)" } else { "" }
        );
        for listener in &self.listeners {
            listener.sources_changed(&change);
        }
        let _ = self.changes.send(change);
    }

    /// Subscribe to source changes
    pub fn subscribe(&self) -> broadcast::Receiver<SourcesChange> {
        self.changes.subscribe()
    }

    pub fn current_sources(&self) -> SwitcherSources {
        self.sources.borrow().1
    }

    /// Current sources with the revision of the change that set them
    pub fn current_revision(&self) -> (u64, SwitcherSources) {
        *self.sources.borrow()
    }

    pub fn link_state(&self) -> LinkState {
        *self.link.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.link_state() == LinkState::Connected
    }

    pub fn source_map(&self) -> &SourceMap {
        &self.source_map
    }

    pub fn device_for_input(&self, input: InputIndex) -> Option<&DeviceId> {
        self.source_map.device_for_input(input)
    }

    /// Resolve once the link is up
    pub async fn wait_connected(&self) -> Result<()> {
        let mut link = self.link.subscribe();
        link.wait_for(|state| *state == LinkState::Connected)
            .await
            .map_err(|_| RelayError::ConnectionClosed)?;
        Ok(())
    }

    /// Stage `source` on preview and run the auto transition
    pub async fn fade_to_source(&self, source: InputIndex) -> Result<()> {
        if !self.is_connected() {
            return Err(RelayError::NotConnected);
        }
        tracing::info!("Fading to source {}", source);
        self.driver
            .send_command(SwitcherCommand::SetPreview {
                mix_effect: MIX_EFFECT,
                source,
            })
            .await?;
        self.driver
            .send_command(SwitcherCommand::AutoTransition { mix_effect: MIX_EFFECT })
            .await
    }
}

/// One-shot program override: connect, wait for the link, cut to `source`.
///
/// Fails with `NotConnected` if the link does not come up within `link_timeout`.
pub async fn force_program_source(
    driver: Arc<dyn SwitcherDriver>,
    address: &str,
    source: InputIndex,
    link_timeout: Duration,
) -> Result<()> {
    let bridge = Arc::new(SwitcherBridge::new(driver, SourceMap::default()));
    let events = bridge.start(address).await?;

    let result = async {
        tokio::time::timeout(link_timeout, bridge.wait_connected())
            .await
            .map_err(|_| RelayError::NotConnected)??;
        tracing::info!("Asking switcher to use source {}", source);
        bridge.fade_to_source(source).await
    }
    .await;

    events.abort();
    result
}
