use crate::camera::CameraService;
use crate::error::{RelayError, Result};
use crate::switcher::SwitcherBridge;
use crate::types::{DeviceId, SourceMap, SwitcherSources, TallyMessage, TallySnapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Message from an observer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ObserverIntent {
    /// Ask for the current tally
    GetTally,
    /// Drive a camera's pan/tilt at normalized speeds
    Pantilt {
        id: DeviceId,
        #[serde(rename = "speedX")]
        speed_x: f64,
        #[serde(rename = "speedY")]
        speed_y: f64,
    },
    /// Drive a camera's zoom at a normalized speed
    Zoom { id: DeviceId, speed: f64 },
}

/// Message pushed to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ObserverEvent {
    Tally(TallyMessage),
}

/// Receiving side of one connected observer
pub struct ObserverSession {
    id: Uuid,
    rx: mpsc::UnboundedReceiver<ObserverEvent>,
}

impl ObserverSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Receive the next event
    ///
    /// Fails with `ConnectionClosed` once the observer has been disconnected.
    pub async fn recv(&mut self) -> Result<ObserverEvent> {
        self.rx.recv().await.ok_or(RelayError::ConnectionClosed)
    }

    /// Receive an event without waiting
    pub fn try_recv(&mut self) -> Result<Option<ObserverEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(RelayError::ConnectionClosed),
        }
    }
}

struct FanoutState {
    snapshot: Arc<TallySnapshot>,
    observers: HashMap<Uuid, mpsc::UnboundedSender<ObserverEvent>>,
}

/// Holds the current tally and pushes it to every connected observer.
///
/// Snapshot replacement and delivery happen under one lock, so an observer
/// always gets the snapshot current at connect time before any later one.
pub struct StateFanout {
    cameras: CameraService,
    source_map: SourceMap,
    state: Mutex<FanoutState>,
}

impl StateFanout {
    pub fn new(cameras: CameraService, source_map: SourceMap) -> Self {
        let snapshot = TallySnapshot::derive(&SwitcherSources::default(), &source_map);
        Self {
            cameras,
            source_map,
            state: Mutex::new(FanoutState {
                snapshot: Arc::new(snapshot),
                observers: HashMap::new(),
            }),
        }
    }

    /// Register an observer and push it the current snapshot
    pub async fn connect(&self) -> ObserverSession {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.state.lock().await;
        let _ = tx.send(ObserverEvent::Tally(state.snapshot.to_message()));
        state.observers.insert(id, tx);
        tracing::info!(observer = %id, "Observer connected, {} total", state.observers.len());

        ObserverSession { id, rx }
    }

    pub async fn disconnect(&self, id: Uuid) {
        let mut state = self.state.lock().await;
        if state.observers.remove(&id).is_some() {
            tracing::info!(observer = %id, "Observer disconnected, {} remaining", state.observers.len());
        }
    }

    pub async fn observer_count(&self) -> usize {
        self.state.lock().await.observers.len()
    }

    pub async fn snapshot(&self) -> Arc<TallySnapshot> {
        self.state.lock().await.snapshot.clone()
    }

    /// Recompute the snapshot from `sources` and push it to everyone
    pub async fn publish(&self, sources: &SwitcherSources) {
        let snapshot = Arc::new(TallySnapshot::derive(sources, &self.source_map));
        let message = snapshot.to_message();

        let mut state = self.state.lock().await;
        state.snapshot = snapshot;
        state.observers.retain(|id, tx| {
            let delivered = tx.send(ObserverEvent::Tally(message.clone())).is_ok();
            if !delivered {
                tracing::debug!(observer = %id, "Dropping closed observer");
            }
            delivered
        });
        tracing::debug!("Pushed tally {:?} to {} observers", message, state.observers.len());
    }

    /// Act on an observer's message.
    ///
    /// Camera intents are queued and left to complete in the background.
    /// Intents for unknown cameras are ignored.
    pub async fn handle_intent(&self, observer: Uuid, intent: ObserverIntent) {
        match intent {
            ObserverIntent::GetTally => {
                let state = self.state.lock().await;
                if let Some(tx) = state.observers.get(&observer) {
                    let _ = tx.send(ObserverEvent::Tally(state.snapshot.to_message()));
                }
            }
            ObserverIntent::Pantilt { id, speed_x, speed_y } => match self.cameras.get(&id) {
                Some(camera) => {
                    tokio::spawn(camera.request_pan_tilt(speed_x, speed_y));
                }
                None => tracing::debug!(device = %id, "Ignoring pan/tilt for unknown camera"),
            },
            ObserverIntent::Zoom { id, speed } => match self.cameras.get(&id) {
                Some(camera) => {
                    tokio::spawn(camera.request_zoom(speed));
                }
                None => tracing::debug!(device = %id, "Ignoring zoom for unknown camera"),
            },
        }
    }

    /// Follow `bridge` and publish every source change.
    ///
    /// Publishes the bridge's current sources first and skips queued changes
    /// that are older than them. If the subscription lags, the missed changes
    /// are replaced by the bridge's current sources.
    pub fn follow(self: &Arc<Self>, bridge: Arc<SwitcherBridge>) -> JoinHandle<()> {
        let mut changes = bridge.subscribe();
        let fanout = Arc::clone(self);
        tokio::spawn(async move {
            let (mut published, sources) = bridge.current_revision();
            fanout.publish(&sources).await;
            loop {
                match changes.recv().await {
                    Ok(change) if change.revision <= published => {
                        tracing::trace!("Skipping change {} already published", change.revision);
                    }
                    Ok(change) => {
                        published = change.revision;
                        fanout.publish(&change.current).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Tally relay lagged by {} changes, resyncing", n);
                        let (revision, sources) = bridge.current_revision();
                        published = revision;
                        fanout.publish(&sources).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
