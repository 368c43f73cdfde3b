use crate::error::{RelayError, Result};
use crate::types::{DeviceId, DeviceInfo, DeviceKind, DeviceRoster, SourceMap};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_PORT: u16 = 1885;

/// Tally pins wired on the stock control box, `[left, right]` per camera
pub const DEFAULT_TALLY_PINS: [[u32; 2]; 3] = [[533, 538], [532, 531], [528, 525]];

/// Network endpoint of a camera or projector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub ip: String,
    pub name: String,
}

/// Fixed relay constants, tuned against the installed hardware
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayConstants {
    /// Deadline for a device reply, in milliseconds
    pub response_timeout_ms: u64,
    /// UDP port cameras listen on for VISCA commands
    pub camera_port: u16,
    /// TCP port of the projector control form
    pub projector_port: u16,
    /// Pan/tilt speed steps (speed byte range is `0..=pan_tilt_steps`)
    pub pan_tilt_steps: u8,
    /// Zoom speed steps added to the tele/wide base value
    pub zoom_steps: u8,
}

impl Default for RelayConstants {
    fn default() -> Self {
        Self {
            response_timeout_ms: 1000,
            camera_port: 1259,
            projector_port: 80,
            pan_tilt_steps: 8,
            zoom_steps: 7,
        }
    }
}

impl RelayConstants {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

/// Static control panel configuration, normally read from `config.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address of the video switcher
    #[serde(rename = "atemIP")]
    pub switcher_address: String,

    #[serde(default)]
    pub cameras: Vec<EndpointConfig>,

    #[serde(default)]
    pub projectors: Vec<EndpointConfig>,

    /// GPIO lines per camera position, `[left, right]`.
    ///
    /// When absent, the stock pins are used for as many cameras as exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tally_pins: Option<Vec<[u32; 2]>>,

    #[serde(default)]
    pub relay: RelayConstants,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Config {
    /// Load and validate configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RelayError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config = Self::from_json(&text)?;
        tracing::info!(
            "Loaded config from {}: {} cameras, {} projectors",
            path.display(),
            config.cameras.len(),
            config.projectors.len()
        );
        Ok(config)
    }

    /// Parse and validate configuration from a JSON string
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.switcher_address.trim().is_empty() {
            return Err(RelayError::Config("switcher address is empty".to_string()));
        }
        if self.relay.response_timeout_ms == 0 {
            return Err(RelayError::Config("responseTimeoutMs must be positive".to_string()));
        }
        if self.relay.pan_tilt_steps == 0 || self.relay.zoom_steps == 0 {
            return Err(RelayError::Config("speed steps must be positive".to_string()));
        }
        if self.relay.zoom_steps > 0x0f {
            return Err(RelayError::Config("zoomSteps must fit in a nibble".to_string()));
        }
        if let Some(pins) = &self.tally_pins {
            if pins.len() > self.cameras.len() {
                return Err(RelayError::Config(format!(
                    "{} tally pin pairs configured for {} cameras",
                    pins.len(),
                    self.cameras.len()
                )));
            }
        }
        Ok(())
    }

    /// Tally pin pairs in use, one per camera position
    pub fn tally_pins(&self) -> Vec<[u32; 2]> {
        match &self.tally_pins {
            Some(pins) => pins.clone(),
            None => DEFAULT_TALLY_PINS.iter().take(self.cameras.len()).copied().collect(),
        }
    }

    /// Cameras paired with their assigned ids
    pub fn camera_entries(&self) -> Vec<(DeviceId, EndpointConfig)> {
        assign_ids(DeviceKind::Camera, &self.cameras)
    }

    /// Projectors paired with their assigned ids
    pub fn projector_entries(&self) -> Vec<(DeviceId, EndpointConfig)> {
        assign_ids(DeviceKind::Projector, &self.projectors)
    }

    /// Switcher input to camera mapping
    pub fn source_map(&self) -> SourceMap {
        SourceMap::with_cameras(self.cameras.len())
    }

    pub fn roster(&self) -> DeviceRoster {
        DeviceRoster {
            cameras: self
                .camera_entries()
                .into_iter()
                .map(|(id, cfg)| DeviceInfo {
                    id,
                    name: cfg.name,
                    ip: Some(cfg.ip),
                })
                .collect(),
            projectors: self
                .projector_entries()
                .into_iter()
                .map(|(id, cfg)| DeviceInfo {
                    id,
                    name: cfg.name,
                    ip: None,
                })
                .collect(),
        }
    }
}

fn assign_ids(kind: DeviceKind, endpoints: &[EndpointConfig]) -> Vec<(DeviceId, EndpointConfig)> {
    endpoints
        .iter()
        .enumerate()
        .map(|(idx, cfg)| (kind.device_id(idx + 1), cfg.clone()))
        .collect()
}
