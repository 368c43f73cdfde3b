use crate::error::{RelayError, Result};
use crate::switcher::{SourcesChange, SourcesListener};
use crate::types::{InputIndex, SwitcherSources};
use std::fs;
use std::path::{Path, PathBuf};

/// Kernel sysfs GPIO class directory
pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// A single on/off signal line driving a tally lamp
pub trait TallyOutput: Send + Sync {
    /// Set the line; failures are logged, never raised
    fn write(&self, on: bool);
}

/// Stand-in line used when no GPIO hardware is present
#[derive(Debug)]
pub struct LoggingOutput {
    line: u32,
}

impl LoggingOutput {
    pub fn new(line: u32) -> Self {
        Self { line }
    }
}

impl TallyOutput for LoggingOutput {
    fn write(&self, on: bool) {
        tracing::debug!("GPIO {} {}", self.line, u8::from(on));
    }
}

/// Output line exported through the sysfs GPIO interface.
///
/// The line is unexported again when dropped.
#[derive(Debug)]
pub struct SysfsGpio {
    pin: u32,
    root: PathBuf,
    value: PathBuf,
}

impl SysfsGpio {
    /// Export `pin` under `root` and configure it as an output
    pub fn export(root: impl AsRef<Path>, pin: u32) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let dir = root.join(format!("gpio{}", pin));
        if !dir.exists() {
            fs::write(root.join("export"), pin.to_string())?;
        }
        fs::write(dir.join("direction"), "out")
            .map_err(|e| RelayError::Config(format!("cannot configure GPIO {}: {}", pin, e)))?;
        Ok(Self {
            pin,
            root,
            value: dir.join("value"),
        })
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }
}

impl TallyOutput for SysfsGpio {
    fn write(&self, on: bool) {
        if let Err(e) = fs::write(&self.value, if on { "1" } else { "0" }) {
            tracing::warn!("GPIO {} write failed: {}", self.pin, e);
        }
    }
}

impl Drop for SysfsGpio {
    fn drop(&mut self) {
        tracing::debug!("Releasing GPIO {}", self.pin);
        if let Err(e) = fs::write(self.root.join("unexport"), self.pin.to_string()) {
            tracing::warn!("GPIO {} unexport failed: {}", self.pin, e);
        }
    }
}

/// Left and right lines of one camera's tally lamp
pub struct TallyPair {
    pub left: Box<dyn TallyOutput>,
    pub right: Box<dyn TallyOutput>,
}

impl TallyPair {
    pub fn new(left: impl TallyOutput + 'static, right: impl TallyOutput + 'static) -> Self {
        Self {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn set(&self, left: bool, right: bool) {
        self.left.write(left);
        self.right.write(right);
    }
}

/// Choose tally outputs once at startup.
///
/// Uses sysfs GPIO under `root` when it exists and every pin can be
/// exported; otherwise every line is a logging stand-in.
pub fn select_outputs(root: impl AsRef<Path>, pins: &[[u32; 2]]) -> Vec<TallyPair> {
    let root = root.as_ref();
    if root.is_dir() {
        tracing::info!("Setting up GPIO...");
        let exported: Result<Vec<TallyPair>> = pins
            .iter()
            .map(|[left, right]| -> Result<TallyPair> {
                Ok(TallyPair::new(SysfsGpio::export(root, *left)?, SysfsGpio::export(root, *right)?))
            })
            .collect();
        match exported {
            Ok(pairs) => return pairs,
            Err(e) => tracing::warn!("GPIO unavailable, using logging tally outputs: {}", e),
        }
    } else {
        tracing::info!("GPIO not available, using logging tally outputs");
    }

    (0..pins.len() as u32)
        .map(|i| TallyPair::new(LoggingOutput::new(2 * i + 1), LoggingOutput::new(2 * i + 2)))
        .collect()
}

/// Drives every camera's tally lamp from the switcher sources.
///
/// Pair `n` (0-based) belongs to switcher input `n + 1`. Program lights the
/// right line, preview the left line. All pairs are rewritten on every
/// change so a lost write is corrected by the next one.
pub struct TallySynchronizer {
    pairs: Vec<TallyPair>,
}

impl TallySynchronizer {
    pub fn new(pairs: Vec<TallyPair>) -> Self {
        Self { pairs }
    }

    pub fn apply(&self, sources: &SwitcherSources) {
        tracing::debug!("Tally set sources: preview {:?} program {:?}", sources.preview, sources.program);
        for (idx, pair) in self.pairs.iter().enumerate() {
            let input = InputIndex::try_from(idx + 1).ok();
            if input.is_some() && sources.program == input {
                pair.set(false, true);
            } else if input.is_some() && sources.preview == input {
                pair.set(true, false);
            } else {
                pair.set(false, false);
            }
        }
    }
}

impl SourcesListener for TallySynchronizer {
    fn sources_changed(&self, change: &SourcesChange) {
        self.apply(&change.current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingOutput;

    fn recorded(n: usize) -> (TallySynchronizer, Vec<(RecordingOutput, RecordingOutput)>) {
        let lines: Vec<_> = (0..n).map(|_| (RecordingOutput::default(), RecordingOutput::default())).collect();
        let pairs = lines.iter().map(|(l, r)| TallyPair::new(l.clone(), r.clone())).collect();
        (TallySynchronizer::new(pairs), lines)
    }

    fn states(lines: &[(RecordingOutput, RecordingOutput)]) -> Vec<(Option<bool>, Option<bool>)> {
        lines.iter().map(|(l, r)| (l.last(), r.last())).collect()
    }

    #[test]
    fn program_red_preview_green_rest_off() {
        let (sync, lines) = recorded(3);
        sync.apply(&SwitcherSources::new(Some(1), Some(2)));
        assert_eq!(
            states(&lines),
            vec![(Some(true), Some(false)), (Some(false), Some(true)), (Some(false), Some(false))]
        );
    }

    #[test]
    fn clearing_program_leaves_preview_lit() {
        let (sync, lines) = recorded(3);
        sync.apply(&SwitcherSources::new(Some(1), Some(2)));
        sync.apply(&SwitcherSources::new(Some(1), None));
        assert_eq!(
            states(&lines),
            vec![(Some(true), Some(false)), (Some(false), Some(false)), (Some(false), Some(false))]
        );
    }

    #[test]
    fn program_wins_when_same_input_is_on_both() {
        let (sync, lines) = recorded(2);
        sync.apply(&SwitcherSources::new(Some(2), Some(2)));
        assert_eq!(states(&lines)[1], (Some(false), Some(true)));
    }

    #[test]
    fn every_change_rewrites_every_pair() {
        let (sync, lines) = recorded(3);
        sync.apply(&SwitcherSources::new(Some(1), Some(2)));
        sync.apply(&SwitcherSources::new(Some(1), Some(3)));
        for (left, right) in &lines {
            assert_eq!(left.writes().len(), 2);
            assert_eq!(right.writes().len(), 2);
        }
    }

    #[test]
    fn listener_applies_current_sources() {
        let (sync, lines) = recorded(2);
        sync.sources_changed(&SourcesChange {
            revision: 1,
            previous: SwitcherSources::default(),
            current: SwitcherSources::new(None, Some(1)),
            resync: true,
        });
        assert_eq!(states(&lines)[0], (Some(false), Some(true)));
    }

    #[test]
    fn sysfs_gpio_writes_values_and_unexports() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("gpio17")).unwrap();

        let pin = SysfsGpio::export(dir.path(), 17).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("gpio17/direction")).unwrap(), "out");
        pin.write(true);
        assert_eq!(fs::read_to_string(dir.path().join("gpio17/value")).unwrap(), "1");
        pin.write(false);
        assert_eq!(fs::read_to_string(dir.path().join("gpio17/value")).unwrap(), "0");

        drop(pin);
        assert_eq!(fs::read_to_string(dir.path().join("unexport")).unwrap(), "17");
    }

    #[test]
    fn falls_back_to_logging_without_gpio() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-gpio");
        let pairs = select_outputs(&missing, &[[1, 2], [3, 4]]);
        assert_eq!(pairs.len(), 2);

        // Export "succeeds" but the kernel never creates the pin directory.
        let pairs = select_outputs(dir.path(), &[[5, 6]]);
        assert_eq!(pairs.len(), 1);
        assert_eq!(fs::read_to_string(dir.path().join("export")).unwrap(), "5");
    }
}
