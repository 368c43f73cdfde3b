//! VISCA pan/tilt/zoom command encoding
//!
//! Pan and tilt speeds share one drive command: the motion vector is quantized
//! to one of eight compass directions, while each axis keeps its own speed.
//! Positive `y` tilts up, positive `x` pans right, positive `z` zooms in.

use crate::config::RelayConstants;
use serde::{Deserialize, Serialize};

/// Pan/tilt drive with both axes stopped
pub const PAN_TILT_STOP: [u8; 9] = [0x81, 0x01, 0x06, 0x01, 0x00, 0x00, 0x03, 0x03, 0xff];

const ZOOM_STOP: u8 = 0x00;
const ZOOM_TELE: u8 = 0x20;
const ZOOM_WIDE: u8 = 0x30;

/// Speed scaling applied to normalized intents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtzScale {
    pub pan_tilt_steps: u8,
    pub zoom_steps: u8,
}

impl Default for PtzScale {
    fn default() -> Self {
        Self::from(&RelayConstants::default())
    }
}

impl From<&RelayConstants> for PtzScale {
    fn from(constants: &RelayConstants) -> Self {
        Self {
            pan_tilt_steps: constants.pan_tilt_steps,
            zoom_steps: constants.zoom_steps,
        }
    }
}

/// Compass direction of a pan/tilt move, counter-clockwise from 0°
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    Right,
    UpRight,
    Up,
    UpLeft,
    Left,
    DownLeft,
    Down,
    DownRight,
}

impl Direction {
    const OCTANTS: [Direction; 8] = [
        Self::Right,
        Self::UpRight,
        Self::Up,
        Self::UpLeft,
        Self::Left,
        Self::DownLeft,
        Self::Down,
        Self::DownRight,
    ];

    /// Quantize a motion vector; `None` when both axes are zero
    pub fn from_vector(x: f64, y: f64) -> Option<Self> {
        if x == 0.0 && y == 0.0 {
            return None;
        }
        let mut degrees = y.atan2(x).to_degrees();
        if degrees < 0.0 {
            degrees += 360.0;
        }
        let octant = (degrees / 45.0).round() as usize % 8;
        Some(Self::OCTANTS[octant])
    }

    pub fn octant(&self) -> usize {
        Self::OCTANTS.iter().position(|d| d == self).unwrap_or(0)
    }

    /// VISCA pan and tilt direction bytes
    pub fn code(&self) -> [u8; 2] {
        match self {
            Self::Right => [0x02, 0x03],
            Self::UpRight => [0x02, 0x01],
            Self::Up => [0x03, 0x01],
            Self::UpLeft => [0x01, 0x01],
            Self::Left => [0x01, 0x03],
            Self::DownLeft => [0x01, 0x02],
            Self::Down => [0x03, 0x02],
            Self::DownRight => [0x02, 0x02],
        }
    }
}

/// Encoded commands for one joystick sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtzCommand {
    pub pan_tilt: [u8; 9],
    pub zoom: [u8; 6],
}

/// Encode a full pan/tilt/zoom intent
pub fn encode(x: f64, y: f64, z: f64, scale: PtzScale) -> PtzCommand {
    PtzCommand {
        pan_tilt: encode_pan_tilt(x, y, scale),
        zoom: encode_zoom(z, scale),
    }
}

/// Encode a pan/tilt drive command for speeds in `[-1, 1]`
pub fn encode_pan_tilt(x: f64, y: f64, scale: PtzScale) -> [u8; 9] {
    let (x, y) = (normalize(x), normalize(y));
    let mut command = PAN_TILT_STOP;
    if let Some(direction) = Direction::from_vector(x, y) {
        let [pan, tilt] = direction.code();
        command[4] = steps(x, scale.pan_tilt_steps);
        command[5] = steps(y, scale.pan_tilt_steps);
        command[6] = pan;
        command[7] = tilt;
    }
    command
}

/// Encode a variable-speed zoom command for a speed in `[-1, 1]`
pub fn encode_zoom(z: f64, scale: PtzScale) -> [u8; 6] {
    let z = normalize(z);
    let data = if z > 0.0 {
        ZOOM_TELE + steps(z, scale.zoom_steps)
    } else if z < 0.0 {
        ZOOM_WIDE + steps(z, scale.zoom_steps)
    } else {
        ZOOM_STOP
    };
    [0x81, 0x01, 0x04, 0x07, data, 0xff]
}

/// Clamp to `[-1, 1]`, treating NaN as no motion
fn normalize(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(-1.0, 1.0)
    }
}

fn steps(v: f64, max: u8) -> u8 {
    (v.abs() * f64::from(max)).ceil().min(f64::from(max)) as u8
}
