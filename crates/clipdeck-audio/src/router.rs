//! Output routing across two phase-locked destinations.
//!
//! Every graph node is created fanned out to both the main and auxiliary
//! gain stages; the router tracks per-path gain, device binding, and the
//! enable/mute flags, and computes the effective gains applied to whatever
//! node is currently live.

use std::sync::Arc;

use clipdeck_core::{gain_from_percent, DecodedBuffer, DeviceSelection, OutputPath, Result};
use tracing::{debug, warn};

/// Parameters for creating one graph node.
///
/// Both gains are always present: a node is never connected to only one
/// output path.
#[derive(Clone)]
pub struct NodeSpec {
    pub buffer: Arc<DecodedBuffer>,
    /// Playhead offset to start from, in seconds.
    pub offset_secs: f64,
    /// Rate multiplier (1.0 = normal speed).
    pub rate: f64,
    pub looping: bool,
    pub main_gain: f32,
    pub aux_gain: f32,
}

/// A live, schedulable rendering of one decoded buffer.
///
/// Dropping the node tears it down and stops its output.
pub trait GraphNode: Send {
    fn set_rate(&mut self, rate: f64);
    fn set_looping(&mut self, looping: bool);
    fn set_gains(&mut self, main: f32, aux: f32);
}

/// Platform output capability the router drives.
pub trait OutputBackend: Send {
    /// Create and start a node playing `spec.buffer` from `spec.offset_secs`.
    fn start_node(&mut self, spec: NodeSpec) -> Result<Box<dyn GraphNode>>;

    /// Rebind a path's physical destination.
    fn bind_device(&mut self, path: OutputPath, selection: &DeviceSelection) -> Result<()>;

    /// Release any device-specific routing resource held for a path,
    /// restoring it to the system default destination.
    fn release_path(&mut self, path: OutputPath);
}

struct PathState {
    gain: f32,
    /// `None` until a device has been chosen for this path.
    device: Option<DeviceSelection>,
    enabled: bool,
}

/// Router owning the backend and both output paths.
pub struct OutputRouter {
    backend: Box<dyn OutputBackend>,
    main: PathState,
    aux: PathState,
    muted: bool,
}

impl OutputRouter {
    pub fn new(backend: Box<dyn OutputBackend>) -> Self {
        Self {
            backend,
            main: PathState {
                gain: 1.0,
                device: Some(DeviceSelection::Default),
                enabled: true,
            },
            aux: PathState {
                gain: 0.0,
                device: None,
                enabled: false,
            },
            muted: false,
        }
    }

    /// Create a node fanned out to both paths at the current effective gains.
    pub fn start_node(
        &mut self,
        buffer: Arc<DecodedBuffer>,
        offset_secs: f64,
        rate: f64,
        looping: bool,
    ) -> Result<Box<dyn GraphNode>> {
        let (main_gain, aux_gain) = self.effective_gains();
        self.backend.start_node(NodeSpec {
            buffer,
            offset_secs,
            rate,
            looping,
            main_gain,
            aux_gain,
        })
    }

    /// Effective (gain stage) values after enable/mute rules:
    /// the aux path is audible only when enabled with a device selected.
    pub fn effective_gains(&self) -> (f32, f32) {
        if self.muted {
            return (0.0, 0.0);
        }
        let aux = if self.aux.enabled && self.aux.device.is_some() {
            self.aux.gain
        } else {
            0.0
        };
        (self.main.gain, aux)
    }

    /// Set path volumes from percentages in `[0, 100]`.
    pub fn set_volumes(&mut self, main_percent: f64, aux_percent: Option<f64>) {
        self.main.gain = gain_from_percent(main_percent);
        if let Some(percent) = aux_percent {
            self.aux.gain = gain_from_percent(percent);
        }
    }

    /// Enable or disable the auxiliary path. Disabling forces its gain
    /// stage to zero and releases its device routing resource.
    pub fn set_aux_enabled(&mut self, enabled: bool) {
        if self.aux.enabled == enabled {
            return;
        }
        self.aux.enabled = enabled;

        if enabled {
            if let Some(selection) = self.aux.device.clone() {
                self.bind_or_degrade(OutputPath::Aux, selection);
            }
        } else {
            self.backend.release_path(OutputPath::Aux);
        }
    }

    /// Rebind a path's destination device.
    ///
    /// `"default"` means the system default and never triggers
    /// device-specific rebinding; an unavailable device degrades to the
    /// default destination instead of failing playback.
    pub fn set_device(&mut self, path: OutputPath, device_id: &str) {
        let selection = DeviceSelection::from_id(device_id);

        if selection == DeviceSelection::Default {
            self.path_mut(path).device = Some(DeviceSelection::Default);
            self.backend.release_path(path);
            return;
        }

        if path == OutputPath::Aux && !self.aux.enabled {
            // Remember the choice; binding happens when aux is enabled.
            self.aux.device = Some(selection);
            return;
        }

        self.bind_or_degrade(path, selection);
    }

    fn bind_or_degrade(&mut self, path: OutputPath, selection: DeviceSelection) {
        match self.backend.bind_device(path, &selection) {
            Ok(()) => {
                debug!("Bound {path:?} output to {selection:?}");
                self.path_mut(path).device = Some(selection);
            }
            Err(e) => {
                warn!("Device bind failed for {path:?} ({e}); using default output");
                self.path_mut(path).device = Some(DeviceSelection::Default);
                self.backend.release_path(path);
            }
        }
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub const fn muted(&self) -> bool {
        self.muted
    }

    pub const fn aux_enabled(&self) -> bool {
        self.aux.enabled
    }

    /// Stored (pre-mute, pre-enable) gain of a path.
    pub const fn path_gain(&self, path: OutputPath) -> f32 {
        match path {
            OutputPath::Main => self.main.gain,
            OutputPath::Aux => self.aux.gain,
        }
    }

    /// Currently selected device of a path, if any was ever chosen.
    pub fn path_device(&self, path: OutputPath) -> Option<&DeviceSelection> {
        match path {
            OutputPath::Main => self.main.device.as_ref(),
            OutputPath::Aux => self.aux.device.as_ref(),
        }
    }

    fn path_mut(&mut self, path: OutputPath) -> &mut PathState {
        match path {
            OutputPath::Main => &mut self.main,
            OutputPath::Aux => &mut self.aux,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;

    fn router() -> (OutputRouter, crate::mock::MockHandle) {
        let backend = MockBackend::new();
        let handle = backend.handle();
        (OutputRouter::new(Box::new(backend)), handle)
    }

    #[test]
    fn test_volumes_scale_and_clamp() {
        let (mut router, _) = router();
        router.set_volumes(80.0, Some(250.0));
        assert!((router.path_gain(OutputPath::Main) - 0.8).abs() < f32::EPSILON);
        assert!((router.path_gain(OutputPath::Aux) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_aux_silent_until_enabled_with_device() {
        let (mut router, _) = router();
        router.set_volumes(100.0, Some(60.0));

        // Gain stored but not audible: aux disabled, no device.
        assert!((router.effective_gains().1 - 0.0).abs() < f32::EPSILON);

        router.set_device(OutputPath::Aux, "usb-dac");
        router.set_aux_enabled(true);
        assert!((router.effective_gains().1 - 0.6).abs() < f32::EPSILON);

        router.set_aux_enabled(false);
        assert!((router.effective_gains().1 - 0.0).abs() < f32::EPSILON);
        // The stored gain survives the disable.
        assert!((router.path_gain(OutputPath::Aux) - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn test_aux_disable_releases_routing() {
        let (mut router, handle) = router();
        router.set_device(OutputPath::Aux, "usb-dac");
        router.set_aux_enabled(true);
        assert_eq!(handle.bind_count(), 1);

        router.set_aux_enabled(false);
        assert!(handle.released_paths().contains(&OutputPath::Aux));
    }

    #[test]
    fn test_default_device_skips_rebinding() {
        let (mut router, handle) = router();
        router.set_device(OutputPath::Main, "default");
        assert_eq!(handle.bind_count(), 0);
        assert_eq!(
            router.path_device(OutputPath::Main),
            Some(&DeviceSelection::Default)
        );
    }

    #[test]
    fn test_bind_failure_degrades_to_default() {
        let (mut router, handle) = router();
        handle.fail_next_bind();

        router.set_device(OutputPath::Main, "broken-dac");
        assert_eq!(
            router.path_device(OutputPath::Main),
            Some(&DeviceSelection::Default)
        );
        assert!(handle.released_paths().contains(&OutputPath::Main));
    }

    #[test]
    fn test_mute_silences_both_paths() {
        let (mut router, _) = router();
        router.set_volumes(90.0, Some(70.0));
        router.set_device(OutputPath::Aux, "usb-dac");
        router.set_aux_enabled(true);

        router.set_muted(true);
        assert_eq!(router.effective_gains(), (0.0, 0.0));

        router.set_muted(false);
        let (main, aux) = router.effective_gains();
        assert!((main - 0.9).abs() < f32::EPSILON);
        assert!((aux - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn test_node_spec_carries_both_gains() {
        let (mut router, handle) = router();
        router.set_volumes(50.0, Some(25.0));
        let buffer = Arc::new(DecodedBuffer::new(vec![0.0; 800], 8000, 1));
        let _node = router
            .start_node(buffer, 0.0, 1.0, false)
            .expect("start node");

        let spec = handle.last_spec().expect("spec recorded");
        assert!((spec.main_gain - 0.5).abs() < f32::EPSILON);
        // Aux disabled: fanned out with zero gain, but still connected.
        assert!((spec.aux_gain - 0.0).abs() < f32::EPSILON);
    }
}
