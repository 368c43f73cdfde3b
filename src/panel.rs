use crate::camera::CameraService;
use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::fanout::StateFanout;
use crate::projector::ProjectorService;
use crate::switcher::{SwitcherBridge, SwitcherDriver};
use crate::tally::{TallyPair, TallySynchronizer};
use crate::types::{DeviceId, DeviceRoster, DeviceStatus, InputIndex, SwitcherSources};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// The assembled control panel
///
/// `ControlPanel` owns the device services, the switcher bridge and the
/// observer fanout, and exposes the polled status surface.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use studio_relay::{select_outputs, Config, ControlPanel, SwitcherDriver, SYSFS_GPIO_ROOT};
///
/// async fn run(driver: Arc<dyn SwitcherDriver>) -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::load("config.json")?;
///     let outputs = select_outputs(SYSFS_GPIO_ROOT, &config.tally_pins());
///     let panel = ControlPanel::start(config, driver, outputs).await?;
///     for (id, status) in panel.camera_status().await {
///         println!("{}: {}", id, status.power);
///     }
///     Ok(())
/// }
/// ```
pub struct ControlPanel {
    config: Config,
    cameras: CameraService,
    projectors: ProjectorService,
    bridge: Arc<SwitcherBridge>,
    fanout: Arc<StateFanout>,
    tasks: Vec<JoinHandle<()>>,
}

impl ControlPanel {
    /// Wire every component together and connect to the switcher
    ///
    /// `outputs` are the tally lines, one pair per camera position starting
    /// at switcher input 1. They are all switched off before the switcher
    /// link is started.
    pub async fn start(config: Config, driver: Arc<dyn SwitcherDriver>, outputs: Vec<TallyPair>) -> Result<Self> {
        config.validate()?;

        let cameras = CameraService::connect(&config).await?;
        let projectors = ProjectorService::from_config(&config);

        let tally = Arc::new(TallySynchronizer::new(outputs));
        tally.apply(&SwitcherSources::default());

        let bridge = Arc::new(SwitcherBridge::new(driver, config.source_map()).with_listener(tally));
        let fanout = Arc::new(StateFanout::new(cameras.clone(), config.source_map()));
        let relay = fanout.follow(bridge.clone());
        let events = match bridge.start(&config.switcher_address).await {
            Ok(events) => events,
            Err(e) => {
                relay.abort();
                return Err(e);
            }
        };

        tracing::info!(
            "Control panel started with {} cameras and {} projectors",
            config.cameras.len(),
            config.projectors.len()
        );

        Ok(Self {
            config,
            cameras,
            projectors,
            bridge,
            fanout,
            tasks: vec![relay, events],
        })
    }

    /// Power state of every camera
    pub async fn camera_status(&self) -> BTreeMap<DeviceId, DeviceStatus> {
        self.cameras.get_all_status().await
    }

    /// Power state of every projector
    pub async fn projector_status(&self) -> BTreeMap<DeviceId, DeviceStatus> {
        self.projectors.get_all_status().await
    }

    pub async fn set_camera_power(&self, id: &str, on: bool) -> Result<bool> {
        self.cameras.set_power(id, on).await
    }

    pub async fn set_projector_power(&self, id: &str, on: bool) -> Result<bool> {
        self.projectors.set_power(id, on).await
    }

    /// Take `source` to program with the switcher's auto transition
    pub async fn fade_to_source(&self, source: InputIndex) -> Result<()> {
        self.bridge.fade_to_source(source).await
    }

    /// Take a camera to program by id
    pub async fn fade_to_camera(&self, id: &str) -> Result<()> {
        let input = self
            .bridge
            .source_map()
            .input_for_device(id)
            .ok_or_else(|| RelayError::UnknownDevice(id.to_string()))?;
        self.fade_to_source(input).await
    }

    pub fn device_roster(&self) -> DeviceRoster {
        self.config.roster()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cameras(&self) -> &CameraService {
        &self.cameras
    }

    pub fn bridge(&self) -> &Arc<SwitcherBridge> {
        &self.bridge
    }

    pub fn fanout(&self) -> &Arc<StateFanout> {
        &self.fanout
    }

    /// Serve the observer protocol over WebSocket on `listener`
    pub fn serve_observers(&self, listener: TcpListener) -> JoinHandle<Result<()>> {
        tokio::spawn(crate::ws::serve(listener, self.fanout.clone()))
    }
}

impl Drop for ControlPanel {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
