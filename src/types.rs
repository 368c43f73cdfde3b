use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Device identifier, assigned at configuration load as `<kind>-<ordinal>`
pub type DeviceId = String;

/// Switcher input index (1-based, as the switcher numbers its sources)
pub type InputIndex = u16;

/// Kind of controllable device in the roster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Camera,
    Projector,
}

impl DeviceKind {
    /// Prefix used when building device ids
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Camera => "cam",
            Self::Projector => "proj",
        }
    }

    /// Build the id for the device at `ordinal` (1-based)
    pub fn device_id(&self, ordinal: usize) -> DeviceId {
        format!("{}-{}", self.prefix(), ordinal)
    }
}

/// Best-effort power state of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    On,
    Off,
    #[default]
    Unknown,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::On => "on",
            Self::Off => "off",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Polled status of one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DeviceStatus {
    pub power: PowerState,
}

/// Preview/program inputs currently selected on the switcher.
///
/// Always read and replaced as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SwitcherSources {
    pub preview: Option<InputIndex>,
    pub program: Option<InputIndex>,
}

impl SwitcherSources {
    pub fn new(preview: Option<InputIndex>, program: Option<InputIndex>) -> Self {
        Self { preview, program }
    }
}

/// Tally lamp state for a single camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TallyState {
    pub program: bool,
    pub preview: bool,
}

/// Maps switcher inputs to camera ids: input `n` is the `n`-th configured camera
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMap {
    cameras: Vec<DeviceId>,
}

impl SourceMap {
    pub fn new(cameras: Vec<DeviceId>) -> Self {
        Self { cameras }
    }

    /// Build the map for `count` cameras with generated ids
    pub fn with_cameras(count: usize) -> Self {
        Self::new((1..=count).map(|n| DeviceKind::Camera.device_id(n)).collect())
    }

    pub fn device_for_input(&self, input: InputIndex) -> Option<&DeviceId> {
        usize::from(input)
            .checked_sub(1)
            .and_then(|idx| self.cameras.get(idx))
    }

    pub fn input_for_device(&self, id: &str) -> Option<InputIndex> {
        self.cameras
            .iter()
            .position(|cam| cam == id)
            .and_then(|idx| InputIndex::try_from(idx + 1).ok())
    }

    /// Camera ids in input order
    pub fn cameras(&self) -> &[DeviceId] {
        &self.cameras
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }
}

/// Per-camera tally derived from the switcher sources.
///
/// Never mutated after construction; a new snapshot replaces the old one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TallySnapshot {
    states: BTreeMap<DeviceId, TallyState>,
    program: Option<DeviceId>,
    preview: Option<DeviceId>,
}

impl TallySnapshot {
    /// Derive the snapshot for every camera in `map`
    pub fn derive(sources: &SwitcherSources, map: &SourceMap) -> Self {
        let states = map
            .cameras()
            .iter()
            .enumerate()
            .map(|(idx, id)| {
                let input = InputIndex::try_from(idx + 1).ok();
                let state = TallyState {
                    program: input.is_some() && sources.program == input,
                    preview: input.is_some() && sources.preview == input,
                };
                (id.clone(), state)
            })
            .collect();

        Self {
            states,
            program: sources.program.and_then(|i| map.device_for_input(i)).cloned(),
            preview: sources.preview.and_then(|i| map.device_for_input(i)).cloned(),
        }
    }

    pub fn state(&self, id: &str) -> Option<TallyState> {
        self.states.get(id).copied()
    }

    pub fn states(&self) -> &BTreeMap<DeviceId, TallyState> {
        &self.states
    }

    /// Camera currently on program, if it is one we know
    pub fn program(&self) -> Option<&DeviceId> {
        self.program.as_ref()
    }

    /// Camera currently on preview, if it is one we know
    pub fn preview(&self) -> Option<&DeviceId> {
        self.preview.as_ref()
    }

    /// Outbound observer message for this snapshot
    pub fn to_message(&self) -> TallyMessage {
        TallyMessage {
            program: self.program.clone(),
            preview: self.preview.clone(),
        }
    }
}

/// Outbound `tally` payload pushed to observers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<DeviceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<DeviceId>,
}

/// Roster entry reported to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// Configured devices by kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRoster {
    pub cameras: Vec<DeviceInfo>,
    pub projectors: Vec<DeviceInfo>,
}
