use crate::channel::{CommandChannel, UdpTransport};
use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::ptz::{encode_pan_tilt, encode_zoom, PtzScale};
use crate::types::{DeviceId, DeviceStatus, PowerState};
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::future::Future;

/// VISCA power inquiry
pub const POWER_QUERY: [u8; 5] = [0x81, 0x09, 0x04, 0x00, 0xff];

const POWER_ON: u8 = 0x02;
const POWER_OFF: u8 = 0x03;

/// VISCA power on/standby command
pub fn power_command(on: bool) -> [u8; 6] {
    [0x81, 0x01, 0x04, 0x00, if on { POWER_ON } else { POWER_OFF }, 0xff]
}

/// Decode the power inquiry reply (`90 50 0p FF`)
pub fn decode_power_reply(reply: &[u8]) -> Result<PowerState> {
    match reply.get(2) {
        Some(&POWER_ON) => Ok(PowerState::On),
        Some(&POWER_OFF) => Ok(PowerState::Off),
        Some(other) => Err(RelayError::ParseFailure(format!("unexpected power byte {:#04x}", other))),
        None => Err(RelayError::ParseFailure(format!("short power reply {:02x?}", reply))),
    }
}

/// Semantic operations on one PTZ camera.
///
/// Every operation queues its command immediately and returns a future for
/// the outcome, so calls made in order reach the camera in order even when
/// the futures are driven elsewhere. Failures are logged and reported as
/// `false` or [`PowerState::Unknown`].
#[derive(Clone)]
pub struct CameraAdapter {
    channel: CommandChannel,
    scale: PtzScale,
}

impl CameraAdapter {
    pub fn new(channel: CommandChannel, scale: PtzScale) -> Self {
        Self { channel, scale }
    }

    pub fn id(&self) -> &DeviceId {
        self.channel.id()
    }

    pub fn query_power(&self) -> impl Future<Output = DeviceStatus> + Send + 'static {
        let id = self.id().clone();
        let reply = self.channel.enqueue(POWER_QUERY.to_vec());
        async move {
            let power = match reply.await.and_then(|bytes| decode_power_reply(&bytes)) {
                Ok(power) => power,
                Err(e) => {
                    tracing::warn!(device = %id, "Cannot read camera power: {}", e);
                    PowerState::Unknown
                }
            };
            DeviceStatus { power }
        }
    }

    pub fn set_power(&self, on: bool) -> impl Future<Output = bool> + Send + 'static {
        self.command("set power", power_command(on).to_vec())
    }

    /// Drive pan/tilt at normalized speeds; `(0, 0)` stops
    pub fn request_pan_tilt(&self, x: f64, y: f64) -> impl Future<Output = bool> + Send + 'static {
        self.command("pan/tilt", encode_pan_tilt(x, y, self.scale).to_vec())
    }

    /// Zoom at a normalized speed; `0` stops
    pub fn request_zoom(&self, z: f64) -> impl Future<Output = bool> + Send + 'static {
        self.command("zoom", encode_zoom(z, self.scale).to_vec())
    }

    fn command(&self, what: &'static str, payload: Vec<u8>) -> impl Future<Output = bool> + Send + 'static {
        let id = self.id().clone();
        let reply = self.channel.enqueue(payload);
        async move {
            match reply.await {
                Ok(bytes) => {
                    tracing::debug!(device = %id, "Camera {} acknowledged: {:02x?}", what, bytes);
                    true
                }
                Err(e) => {
                    tracing::warn!(device = %id, "Camera {} failed: {}", what, e);
                    false
                }
            }
        }
    }
}

/// All configured cameras, keyed by id
#[derive(Clone, Default)]
pub struct CameraService {
    cameras: BTreeMap<DeviceId, CameraAdapter>,
}

impl CameraService {
    pub fn new(cameras: impl IntoIterator<Item = CameraAdapter>) -> Self {
        Self {
            cameras: cameras.into_iter().map(|cam| (cam.id().clone(), cam)).collect(),
        }
    }

    /// Open a UDP channel to every configured camera
    pub async fn connect(config: &Config) -> Result<Self> {
        let scale = PtzScale::from(&config.relay);
        let mut cameras = Vec::new();
        for (id, endpoint) in config.camera_entries() {
            let transport = UdpTransport::bind(&endpoint.ip, config.relay.camera_port).await?;
            tracing::info!(device = %id, "Camera {} at {}:{}", endpoint.name, endpoint.ip, config.relay.camera_port);
            let channel = CommandChannel::spawn(id, transport, config.relay.response_timeout());
            cameras.push(CameraAdapter::new(channel, scale));
        }
        Ok(Self::new(cameras))
    }

    pub fn get(&self, id: &str) -> Option<&CameraAdapter> {
        self.cameras.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &DeviceId> {
        self.cameras.keys()
    }

    /// Query every camera concurrently
    pub async fn get_all_status(&self) -> BTreeMap<DeviceId, DeviceStatus> {
        let queries = self.cameras.values().map(|cam| {
            let id = cam.id().clone();
            let status = cam.query_power();
            async move { (id, status.await) }
        });
        join_all(queries).await.into_iter().collect()
    }

    pub async fn set_power(&self, id: &str, on: bool) -> Result<bool> {
        let camera = self.get(id).ok_or_else(|| RelayError::UnknownDevice(id.to_string()))?;
        Ok(camera.set_power(on).await)
    }

    pub async fn request_pan_tilt(&self, id: &str, x: f64, y: f64) -> Result<bool> {
        let camera = self.get(id).ok_or_else(|| RelayError::UnknownDevice(id.to_string()))?;
        Ok(camera.request_pan_tilt(x, y).await)
    }

    pub async fn request_zoom(&self, id: &str, z: f64) -> Result<bool> {
        let camera = self.get(id).ok_or_else(|| RelayError::UnknownDevice(id.to_string()))?;
        Ok(camera.request_zoom(z).await)
    }
}
