//! Device command relay and live tally synchronization for a small
//! production control panel
//!
//! This library bridges a video switcher, PTZ cameras, projectors and tally
//! lamps into one control surface. It supports:
//!
//! - Serialized request/response command channels to UDP devices
//! - VISCA pan/tilt/zoom and power control for cameras
//! - Power control for projectors over their HTTP control page
//! - Tracking the switcher's preview/program sources across reconnects
//! - Driving tally lamps from the switcher state (sysfs GPIO or logging)
//! - Pushing tally state to observers and routing their camera requests
//! - A one-shot "force program source" override
//!
//! # Quick Start
//!
//! The switcher wire protocol is provided by a [`SwitcherDriver`]
//! implementation.
//!
//! ```no_run
//! use std::sync::Arc;
//! use studio_relay::{select_outputs, Config, ControlPanel, SwitcherDriver, SYSFS_GPIO_ROOT};
//! use tokio::net::TcpListener;
//!
//! async fn run(driver: Arc<dyn SwitcherDriver>) -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.json")?;
//!     let outputs = select_outputs(SYSFS_GPIO_ROOT, &config.tally_pins());
//!     let panel = ControlPanel::start(config, driver, outputs).await?;
//!
//!     // Observers connect over WebSocket
//!     let listener = TcpListener::bind(("0.0.0.0", panel.config().port)).await?;
//!     panel.serve_observers(listener);
//!
//!     panel.bridge().wait_connected().await?;
//!     panel.fade_to_source(2).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Channel**: one FIFO request/response pipe per UDP device
//! - **Ptz**: pure encoding of motion intents into VISCA commands
//! - **Camera / Projector**: semantic device operations and status queries
//! - **Switcher**: link state and preview/program tracking over a driver
//! - **Tally**: lamp outputs derived from the switcher sources
//! - **Fanout / Ws**: observer sessions and their WebSocket endpoint
//! - **Panel**: wires everything together from a [`Config`]

mod camera;
mod channel;
mod config;
mod error;
mod fanout;
mod panel;
mod projector;
mod ptz;
mod switcher;
mod tally;
#[cfg(test)]
mod testing;
mod types;
pub mod ws;

// Public exports
pub use camera::{decode_power_reply, power_command, CameraAdapter, CameraService, POWER_QUERY};
pub use channel::{CommandChannel, DatagramTransport, UdpTransport};
pub use config::{Config, EndpointConfig, RelayConstants, DEFAULT_TALLY_PINS};
pub use error::{RelayError, Result};
pub use fanout::{ObserverEvent, ObserverIntent, ObserverSession, StateFanout};
pub use panel::ControlPanel;
pub use projector::{parse_power, ControlReply, ProjectorAdapter, ProjectorService};
pub use ptz::{encode, encode_pan_tilt, encode_zoom, Direction, PtzCommand, PtzScale, PAN_TILT_STOP};
pub use switcher::{
    force_program_source, LinkState, SourcesChange, SourcesListener, SwitcherBridge, SwitcherCommand,
    SwitcherDriver, SwitcherEvent,
};
pub use tally::{select_outputs, LoggingOutput, SysfsGpio, TallyOutput, TallyPair, TallySynchronizer, SYSFS_GPIO_ROOT};
pub use types::{
    DeviceId, DeviceInfo, DeviceKind, DeviceRoster, DeviceStatus, InputIndex, PowerState, SourceMap,
    SwitcherSources, TallyMessage, TallySnapshot, TallyState,
};
