pub mod action_manifest;
pub mod backend;
pub mod devices;


pub use backend::{
    Backend, HapticPulse, InputBackend, OpenVrBackend, OpenXrBackend, QuitReason, RuntimeEvent,
};

use action_manifest::{BindingManifest, ManifestParseError};
use backend::{ActionHandle, SetHandle};
use derive_more::Display;
use devices::DeviceManager;
use glam::{Mat4, Vec2, Vec3};
use log::{debug, info, trace, warn};
use parking_lot::{Mutex, MutexGuard, RwLock};
use slotmap::{new_key_type, SlotMap};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::OnceLock;

new_key_type! {
    pub struct ActionSetKey;
    pub struct ActionKey;
}

/// Pulse played when a float action crosses its digital threshold.
pub const THRESHOLD_PULSE: HapticPulse = HapticPulse {
    start_seconds_from_now: 0.0,
    duration_seconds: 0.03,
    frequency: 50.0,
    amplitude: 0.4,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ActionType {
    Digital,
    /// A float input reported as a button once it passes a threshold.
    DigitalFromFloat,
    Float,
    Vec2,
    Pose,
    Haptic,
}

#[derive(Debug, Display)]
pub enum InputError {
    #[display("backend unavailable: {_0}")]
    BackendUnavailable(String),
    InvalidHandle,
    WrongType,
    #[display("{_0}")]
    Manifest(ManifestParseError),
    NotAttached,
    AlreadyAttached,
}

impl std::error::Error for InputError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Manifest(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ManifestParseError> for InputError {
    fn from(value: ManifestParseError) -> Self {
        Self::Manifest(value)
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DigitalEvent {
    pub action: ActionKey,
    pub controller: u64,
    pub active: bool,
    pub state: bool,
    pub changed: bool,
    /// Seconds since the state was sampled.
    pub time: f32,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct AnalogEvent {
    pub action: ActionKey,
    pub controller: u64,
    pub active: bool,
    /// Float actions only use `x`.
    pub state: Vec2,
    /// Change since the previous poll.
    pub delta: Vec2,
    pub time: f32,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PoseEvent {
    pub action: ActionKey,
    pub controller: u64,
    pub active: bool,
    pub pose: Mat4,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
    pub valid: bool,
    pub device_connected: bool,
    pub time: f32,
}

impl PoseEvent {
    /// Whether the pose can be used for interaction.
    pub fn is_usable(&self) -> bool {
        self.device_connected && self.active && self.valid
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ActionEvent {
    Digital(DigitalEvent),
    Analog(AnalogEvent),
    Pose(PoseEvent),
    Quit { reason: QuitReason },
}

impl ActionEvent {
    pub fn action(&self) -> Option<ActionKey> {
        match self {
            Self::Digital(e) => Some(e.action),
            Self::Analog(e) => Some(e.action),
            Self::Pose(e) => Some(e.action),
            Self::Quit { .. } => None,
        }
    }
}

#[derive(Debug)]
struct ActionSet {
    url: String,
    handle: SetHandle,
    actions: Vec<ActionKey>,
}

#[derive(Debug)]
enum ActionData {
    Digital,
    DigitalFromFloat {
        threshold: f32,
        haptic: Option<ActionKey>,
        /// Last float value and digital state per controller.
        last: HashMap<u64, (f32, bool)>,
    },
    Float {
        last: HashMap<u64, f32>,
    },
    Vec2 {
        last: HashMap<u64, Vec2>,
    },
    Pose,
    Haptic,
}

impl ActionData {
    fn new(ty: ActionType) -> Self {
        match ty {
            ActionType::Digital => Self::Digital,
            ActionType::DigitalFromFloat => Self::DigitalFromFloat {
                threshold: 0.5,
                haptic: None,
                last: HashMap::new(),
            },
            ActionType::Float => Self::Float {
                last: HashMap::new(),
            },
            ActionType::Vec2 => Self::Vec2 {
                last: HashMap::new(),
            },
            ActionType::Pose => Self::Pose,
            ActionType::Haptic => Self::Haptic,
        }
    }

    fn ty(&self) -> ActionType {
        match self {
            Self::Digital => ActionType::Digital,
            Self::DigitalFromFloat { .. } => ActionType::DigitalFromFloat,
            Self::Float { .. } => ActionType::Float,
            Self::Vec2 { .. } => ActionType::Vec2,
            Self::Pose => ActionType::Pose,
            Self::Haptic => ActionType::Haptic,
        }
    }
}

#[derive(Debug)]
struct Action {
    url: String,
    handle: ActionHandle,
    data: ActionData,
}

/// The action layer: turns backend input into a uniform stream of [`ActionEvent`]s.
pub struct Input {
    backend: Mutex<Backend>,
    set_map: RwLock<SlotMap<ActionSetKey, ActionSet>>,
    action_map: RwLock<SlotMap<ActionKey, Action>>,
    events: Mutex<VecDeque<ActionEvent>>,
    manifest: OnceLock<BindingManifest>,
}

impl Input {
    pub fn new(backend: impl Into<Backend>) -> Self {
        let backend = backend.into();
        info!("using the {} input backend", backend.name());
        Self {
            backend: Mutex::new(backend),
            set_map: Default::default(),
            action_map: Default::default(),
            events: Default::default(),
            manifest: OnceLock::new(),
        }
    }

    /// Direct access to the backend, for the runtime bridge to feed raw state.
    pub fn backend(&self) -> MutexGuard<'_, Backend> {
        self.backend.lock()
    }

    /// Loads the actions manifest and its binding files. Only the first manifest counts.
    pub fn load_manifest(&self, path: &Path) -> Result<(), InputError> {
        let manifest = BindingManifest::load(path)
            .inspect_err(|e| warn!("Failed to load action manifest: {e}"))?;
        self.set_manifest(manifest);
        Ok(())
    }

    pub fn parse_manifest(&self, json: &str, binding_files: &[&str]) -> Result<(), InputError> {
        let manifest = BindingManifest::parse(json, binding_files)
            .inspect_err(|e| warn!("Failed to parse action manifest: {e}"))?;
        self.set_manifest(manifest);
        Ok(())
    }

    fn set_manifest(&self, manifest: BindingManifest) {
        if self.manifest.set(manifest).is_err() {
            warn!("action manifest already loaded, ignoring new one");
        }
    }

    pub fn manifest(&self) -> Option<&BindingManifest> {
        self.manifest.get()
    }

    pub fn create_action_set(&self, url: &str) -> Result<ActionSetKey, InputError> {
        let handle = self
            .backend
            .lock()
            .create_action_set(url)
            .inspect_err(|e| warn!("Couldn't create action set {url}: {e}"))?;
        let key = self.set_map.write().insert(ActionSet {
            url: url.to_owned(),
            handle,
            actions: Vec::new(),
        });
        debug!("created action set {url} ({key:?})");
        Ok(key)
    }

    /// Creates an action in `set`. Float thresholds are set with
    /// [`Self::connect_digital_from_float`].
    pub fn connect(
        &self,
        set: ActionSetKey,
        ty: ActionType,
        url: &str,
    ) -> Result<ActionKey, InputError> {
        let set_handle = self
            .set_map
            .read()
            .get(set)
            .map(|s| s.handle)
            .ok_or(InputError::InvalidHandle)?;

        if let Some(manifest) = self.manifest.get() {
            if manifest.action_type(url).is_none() {
                debug!("action {url} is not declared in the manifest");
            }
        }

        let handle = self
            .backend
            .lock()
            .create_action(set_handle, ty, url)
            .inspect_err(|e| warn!("Couldn't create action {url}: {e}"))?;
        let key = self.action_map.write().insert(Action {
            url: url.to_owned(),
            handle,
            data: ActionData::new(ty),
        });
        if let Some(set_data) = self.set_map.write().get_mut(set) {
            set_data.actions.push(key);
            trace!("created action {url} in {}", set_data.url);
        }
        Ok(key)
    }

    /// Creates a float action that reports as digital, with an optional haptic pulse on
    /// every threshold crossing.
    pub fn connect_digital_from_float(
        &self,
        set: ActionSetKey,
        url: &str,
        threshold: f32,
        haptic_url: Option<&str>,
    ) -> Result<ActionKey, InputError> {
        let key = self.connect(set, ActionType::DigitalFromFloat, url)?;
        self.set_digital_from_float_threshold(key, threshold)?;
        if let Some(haptic_url) = haptic_url {
            let haptic = match self.find_action(haptic_url) {
                Some(haptic) => haptic,
                None => self.connect(set, ActionType::Haptic, haptic_url)?,
            };
            self.set_digital_from_float_haptic(key, haptic)?;
        }
        Ok(key)
    }

    pub fn set_digital_from_float_threshold(
        &self,
        action: ActionKey,
        new_threshold: f32,
    ) -> Result<(), InputError> {
        let mut action_map = self.action_map.write();
        let action = action_map.get_mut(action).ok_or(InputError::InvalidHandle)?;
        let ActionData::DigitalFromFloat { threshold, .. } = &mut action.data else {
            return Err(InputError::WrongType);
        };
        *threshold = new_threshold;
        Ok(())
    }

    pub fn set_digital_from_float_haptic(
        &self,
        action: ActionKey,
        haptic_action: ActionKey,
    ) -> Result<(), InputError> {
        let mut action_map = self.action_map.write();
        if action_map.get(haptic_action).map(|a| a.data.ty()) != Some(ActionType::Haptic) {
            return Err(InputError::WrongType);
        }
        let action = action_map.get_mut(action).ok_or(InputError::InvalidHandle)?;
        let ActionData::DigitalFromFloat { haptic, .. } = &mut action.data else {
            return Err(InputError::WrongType);
        };
        *haptic = Some(haptic_action);
        Ok(())
    }

    pub fn find_action(&self, url: &str) -> Option<ActionKey> {
        self.action_map
            .read()
            .iter()
            .find(|(_, a)| a.url == url)
            .map(|(key, _)| key)
    }

    pub fn action_type(&self, action: ActionKey) -> Option<ActionType> {
        self.action_map.read().get(action).map(|a| a.data.ty())
    }

    /// Makes the created actions pollable, using the loaded manifest's bindings.
    pub fn attach_bindings(&self) -> Result<(), InputError> {
        let empty = BindingManifest::default();
        let manifest = self.manifest.get().unwrap_or(&empty);
        self.backend.lock().attach_bindings(manifest)?;
        info!(
            "attached bindings for {} interaction profiles",
            manifest.profiles.len()
        );
        Ok(())
    }

    /// Syncs `sets` in one backend call and queues an event per action and connected
    /// controller. Does nothing while the session is unfocused.
    pub fn poll(&self, sets: &[ActionSetKey], devices: &DeviceManager) -> Result<(), InputError> {
        let mut backend = self.backend.lock();
        if !backend.is_focused() {
            trace!("not polling, session unfocused");
            return Ok(());
        }

        let set_map = self.set_map.read();
        let handles = sets
            .iter()
            .map(|key| set_map.get(*key).map(|s| s.handle))
            .collect::<Option<Vec<_>>>()
            .ok_or(InputError::InvalidHandle)?;
        backend.sync(&handles)?;

        let controllers = devices.controller_handles();
        let mut action_map = self.action_map.write();
        let mut events = Vec::new();
        let mut haptics = Vec::new();

        for key in sets.iter().flat_map(|s| &set_map[*s].actions) {
            let Some(action) = action_map.get_mut(*key) else {
                continue;
            };

            for &controller in &controllers {
                match &mut action.data {
                    ActionData::Digital => {
                        let Some(sample) = backend.digital(action.handle, controller) else {
                            continue;
                        };
                        events.push(ActionEvent::Digital(DigitalEvent {
                            action: *key,
                            controller,
                            active: sample.active,
                            state: sample.state,
                            changed: sample.changed,
                            time: sample.seconds_ago,
                        }));
                    }
                    ActionData::DigitalFromFloat {
                        threshold,
                        haptic,
                        last,
                    } => {
                        let Some(sample) = backend.analog(action.handle, controller) else {
                            continue;
                        };
                        let value = sample.state.x;
                        let (last_value, last_state) =
                            last.get(&controller).copied().unwrap_or_default();
                        let t = *threshold;

                        let crossed = (last_value < t && value >= t) || (last_value >= t && value < t);
                        if crossed {
                            if let Some(haptic) = haptic {
                                haptics.push((*haptic, controller));
                            }
                        }

                        let state = value >= t;
                        last.insert(controller, (value, state));
                        events.push(ActionEvent::Digital(DigitalEvent {
                            action: *key,
                            controller,
                            active: sample.active,
                            state,
                            changed: sample.changed && state != last_state,
                            time: sample.seconds_ago,
                        }));
                    }
                    ActionData::Float { last } => {
                        let Some(sample) = backend.analog(action.handle, controller) else {
                            continue;
                        };
                        let value = sample.state.x;
                        let previous = last.insert(controller, value).unwrap_or(0.0);
                        events.push(ActionEvent::Analog(AnalogEvent {
                            action: *key,
                            controller,
                            active: sample.active,
                            state: Vec2::new(value, 0.0),
                            delta: Vec2::new(value - previous, 0.0),
                            time: sample.seconds_ago,
                        }));
                    }
                    ActionData::Vec2 { last } => {
                        let Some(sample) = backend.analog(action.handle, controller) else {
                            continue;
                        };
                        let previous = last.insert(controller, sample.state).unwrap_or(Vec2::ZERO);
                        events.push(ActionEvent::Analog(AnalogEvent {
                            action: *key,
                            controller,
                            active: sample.active,
                            state: sample.state,
                            delta: sample.state - previous,
                            time: sample.seconds_ago,
                        }));
                    }
                    ActionData::Pose => {
                        let Some(sample) = backend.pose(action.handle, controller) else {
                            continue;
                        };
                        events.push(ActionEvent::Pose(PoseEvent {
                            action: *key,
                            controller,
                            active: sample.active,
                            pose: sample.pose,
                            velocity: sample.velocity,
                            angular_velocity: sample.angular_velocity,
                            valid: sample.valid,
                            device_connected: sample.device_connected,
                            time: sample.seconds_ago,
                        }));
                    }
                    // Haptics have no input to poll.
                    ActionData::Haptic => break,
                }
            }
        }

        for (haptic, controller) in haptics {
            let Some(handle) = action_map.get(haptic).map(|a| a.handle) else {
                continue;
            };
            if let Err(e) = backend.trigger_haptic(handle, controller, &THRESHOLD_PULSE) {
                warn!("Couldn't trigger threshold haptic: {e}");
            }
        }

        trace!("polled {} action events", events.len());
        self.events.lock().extend(events);
        Ok(())
    }

    pub fn trigger_haptic(
        &self,
        action: ActionKey,
        controller: u64,
        pulse: &HapticPulse,
    ) -> Result<(), InputError> {
        let handle = {
            let action_map = self.action_map.read();
            let action = action_map.get(action).ok_or(InputError::InvalidHandle)?;
            if action.data.ty() != ActionType::Haptic {
                return Err(InputError::WrongType);
            }
            action.handle
        };
        self.backend
            .lock()
            .trigger_haptic(handle, controller, pulse)
    }

    /// Applies pending runtime events: device (de)activation goes to `devices`, quit
    /// requests are queued as [`ActionEvent::Quit`].
    pub fn process_runtime_events(&self, devices: &DeviceManager) {
        loop {
            // Don't hold the backend lock while touching the registry.
            let Some(event) = self.backend.lock().poll_runtime_event() else {
                break;
            };

            match event {
                RuntimeEvent::DeviceActivated {
                    handle,
                    is_controller,
                } => {
                    let _ = devices.add(handle, is_controller);
                }
                RuntimeEvent::DeviceDeactivated { handle } => {
                    let _ = devices.remove(handle);
                }
                RuntimeEvent::FocusChanged { focused } => {
                    debug!("session focus changed: {focused}");
                }
                RuntimeEvent::Quit(reason) => {
                    info!("runtime requested quit: {reason:?}");
                    self.events.lock().push_back(ActionEvent::Quit { reason });
                }
            }
        }
    }

    /// Takes the oldest queued event.
    pub fn next_event(&self) -> Option<ActionEvent> {
        self.events.lock().pop_front()
    }
}
