mod openvr;
mod openxr;

pub use self::openvr::OpenVrBackend;
pub use self::openxr::OpenXrBackend;

use super::action_manifest::BindingManifest;
use super::{ActionType, InputError};
use glam::{Mat4, Vec2, Vec3};
use std::collections::{HashMap, VecDeque};

/// Backend handle of an action set.
pub type SetHandle = u64;
/// Backend handle of an action.
pub type ActionHandle = u64;

#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct DigitalSample {
    pub active: bool,
    pub state: bool,
    pub changed: bool,
    pub seconds_ago: f32,
}

/// Float actions only use `state.x`.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct AnalogSample {
    pub active: bool,
    pub state: Vec2,
    pub changed: bool,
    pub seconds_ago: f32,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PoseSample {
    pub active: bool,
    pub valid: bool,
    pub device_connected: bool,
    pub pose: Mat4,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
    pub seconds_ago: f32,
}

impl Default for PoseSample {
    fn default() -> Self {
        Self {
            active: false,
            valid: false,
            device_connected: false,
            pose: Mat4::IDENTITY,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            seconds_ago: 0.0,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct HapticPulse {
    pub start_seconds_from_now: f32,
    pub duration_seconds: f32,
    pub frequency: f32,
    pub amplitude: f32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum QuitReason {
    Shutdown,
    ProcessQuit,
    ApplicationTransition,
}

/// Runtime lifecycle notifications, independent of actions.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    DeviceActivated { handle: u64, is_controller: bool },
    DeviceDeactivated { handle: u64 },
    FocusChanged { focused: bool },
    Quit(QuitReason),
}

#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct RawDigital<T> {
    pub active: bool,
    pub state: bool,
    /// Only honoured by runtimes that report it themselves.
    pub changed: bool,
    pub time: T,
}

#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct RawAnalog<T> {
    pub active: bool,
    pub state: Vec2,
    /// Native delta, where the runtime has one. The action layer computes its own.
    pub delta: Vec2,
    pub time: T,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RawPose<T> {
    pub active: bool,
    pub valid: bool,
    pub device_connected: bool,
    pub pose: Mat4,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
    pub time: T,
}

impl<T: Default> Default for RawPose<T> {
    fn default() -> Self {
        Self {
            active: false,
            valid: false,
            device_connected: false,
            pose: Mat4::IDENTITY,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            time: T::default(),
        }
    }
}

type SampleKey = (String, u64);

/// Input state as the runtime bridge sees it, keyed by action URL and controller handle.
///
/// `T` is the runtime's native timestamp type.
#[derive(Debug, Clone)]
pub struct RawInputState<T> {
    pub focused: bool,
    digital: HashMap<SampleKey, RawDigital<T>>,
    analog: HashMap<SampleKey, RawAnalog<T>>,
    pose: HashMap<SampleKey, RawPose<T>>,
    events: VecDeque<RuntimeEvent>,
    haptics: Vec<(String, u64, HapticPulse)>,
}

impl<T> Default for RawInputState<T> {
    fn default() -> Self {
        Self {
            focused: true,
            digital: HashMap::new(),
            analog: HashMap::new(),
            pose: HashMap::new(),
            events: VecDeque::new(),
            haptics: Vec::new(),
        }
    }
}

impl<T: Copy> RawInputState<T> {
    pub fn set_digital(&mut self, url: &str, controller: u64, value: RawDigital<T>) {
        self.digital.insert((url.to_owned(), controller), value);
    }

    pub fn set_analog(&mut self, url: &str, controller: u64, value: RawAnalog<T>) {
        self.analog.insert((url.to_owned(), controller), value);
    }

    pub fn set_pose(&mut self, url: &str, controller: u64, value: RawPose<T>) {
        self.pose.insert((url.to_owned(), controller), value);
    }

    pub fn digital(&self, url: &str, controller: u64) -> Option<RawDigital<T>> {
        self.digital.get(&(url.to_owned(), controller)).copied()
    }

    pub fn analog(&self, url: &str, controller: u64) -> Option<RawAnalog<T>> {
        self.analog.get(&(url.to_owned(), controller)).copied()
    }

    pub fn pose(&self, url: &str, controller: u64) -> Option<RawPose<T>> {
        self.pose.get(&(url.to_owned(), controller)).copied()
    }

    pub fn push_event(&mut self, event: RuntimeEvent) {
        self.events.push_back(event);
    }

    pub(super) fn pop_event(&mut self) -> Option<RuntimeEvent> {
        self.events.pop_front()
    }

    pub(super) fn record_haptic(&mut self, url: &str, controller: u64, pulse: HapticPulse) {
        self.haptics.push((url.to_owned(), controller, pulse));
    }

    /// Haptic pulses triggered since the last call, for the bridge to forward.
    pub fn take_haptics(&mut self) -> Vec<(String, u64, HapticPulse)> {
        std::mem::take(&mut self.haptics)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct BackendAction {
    pub set: SetHandle,
    pub ty: ActionType,
    pub url: String,
}

/// What the action layer needs from a runtime.
pub trait InputBackend {
    fn create_action_set(&mut self, url: &str) -> Result<SetHandle, InputError>;
    fn create_action(
        &mut self,
        set: SetHandle,
        ty: ActionType,
        url: &str,
    ) -> Result<ActionHandle, InputError>;
    /// One-time step after which actions are pollable.
    fn attach_bindings(&mut self, manifest: &BindingManifest) -> Result<(), InputError>;
    /// Syncs all given sets in a single runtime call.
    fn sync(&mut self, sets: &[SetHandle]) -> Result<(), InputError>;
    fn is_focused(&self) -> bool;
    fn digital(&self, action: ActionHandle, controller: u64) -> Option<DigitalSample>;
    fn analog(&self, action: ActionHandle, controller: u64) -> Option<AnalogSample>;
    fn pose(&self, action: ActionHandle, controller: u64) -> Option<PoseSample>;
    fn trigger_haptic(
        &mut self,
        action: ActionHandle,
        controller: u64,
        pulse: &HapticPulse,
    ) -> Result<(), InputError>;
    fn poll_runtime_event(&mut self) -> Option<RuntimeEvent>;
}

/// The runtimes the action layer can run on.
#[derive(Debug)]
pub enum Backend {
    OpenVr(OpenVrBackend),
    OpenXr(OpenXrBackend),
}

impl From<OpenVrBackend> for Backend {
    fn from(value: OpenVrBackend) -> Self {
        Self::OpenVr(value)
    }
}

impl From<OpenXrBackend> for Backend {
    fn from(value: OpenXrBackend) -> Self {
        Self::OpenXr(value)
    }
}

macro_rules! dispatch {
    ($self:ident, $b:ident => $body:expr) => {
        match $self {
            Backend::OpenVr($b) => $body,
            Backend::OpenXr($b) => $body,
        }
    };
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenVr(_) => "OpenVR",
            Self::OpenXr(_) => "OpenXR",
        }
    }
}

impl InputBackend for Backend {
    fn create_action_set(&mut self, url: &str) -> Result<SetHandle, InputError> {
        dispatch!(self, b => b.create_action_set(url))
    }

    fn create_action(
        &mut self,
        set: SetHandle,
        ty: ActionType,
        url: &str,
    ) -> Result<ActionHandle, InputError> {
        dispatch!(self, b => b.create_action(set, ty, url))
    }

    fn attach_bindings(&mut self, manifest: &BindingManifest) -> Result<(), InputError> {
        dispatch!(self, b => b.attach_bindings(manifest))
    }

    fn sync(&mut self, sets: &[SetHandle]) -> Result<(), InputError> {
        dispatch!(self, b => b.sync(sets))
    }

    fn is_focused(&self) -> bool {
        dispatch!(self, b => b.is_focused())
    }

    fn digital(&self, action: ActionHandle, controller: u64) -> Option<DigitalSample> {
        dispatch!(self, b => b.digital(action, controller))
    }

    fn analog(&self, action: ActionHandle, controller: u64) -> Option<AnalogSample> {
        dispatch!(self, b => b.analog(action, controller))
    }

    fn pose(&self, action: ActionHandle, controller: u64) -> Option<PoseSample> {
        dispatch!(self, b => b.pose(action, controller))
    }

    fn trigger_haptic(
        &mut self,
        action: ActionHandle,
        controller: u64,
        pulse: &HapticPulse,
    ) -> Result<(), InputError> {
        dispatch!(self, b => b.trigger_haptic(action, controller, pulse))
    }

    fn poll_runtime_event(&mut self) -> Option<RuntimeEvent> {
        dispatch!(self, b => b.poll_runtime_event())
    }
}
