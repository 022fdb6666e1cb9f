use super::{
    ActionHandle, AnalogSample, BackendAction, DigitalSample, HapticPulse, InputBackend,
    PoseSample, RawInputState, RuntimeEvent, SetHandle,
};
use crate::input::action_manifest::{BindingComponent, BindingManifest};
use crate::input::{ActionType, InputError};
use glam::Vec2;
use log::{debug, info, trace, warn};
use std::collections::{BTreeMap, HashMap};

/// The OpenXR flavour: actions live in sets named after the URL, bindings are suggested
/// per interaction profile once, and state is latched at sync.
///
/// Timestamps are absolute nanoseconds on the runtime clock.
#[derive(Debug)]
pub struct OpenXrBackend {
    raw: RawInputState<i64>,
    display_time: i64,
    sets: Vec<String>,
    actions: Vec<BackendAction>,
    attached: bool,
    /// Binding paths per interaction profile.
    suggested: BTreeMap<String, Vec<(ActionHandle, String)>>,
    digital: HashMap<(ActionHandle, u64), DigitalSample>,
    analog: HashMap<(ActionHandle, u64), AnalogSample>,
    pose: HashMap<(ActionHandle, u64), PoseSample>,
}

impl Default for OpenXrBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '_' | '-' | '.'))
}

fn unavailable(url: &str) -> InputError {
    InputError::BackendUnavailable(format!("invalid action url {url}"))
}

/// Splits `/actions/<set>/(in|out)/<name>` into set and action name.
fn split_action_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("/actions/")?;
    let mut parts = rest.split('/');
    let set = parts.next()?;
    let direction = parts.next()?;
    let name = parts.next()?;
    if parts.next().is_some() || !matches!(direction, "in" | "out") {
        return None;
    }
    (valid_name(set) && valid_name(name)).then_some((set, name))
}

fn component_suffix(component: BindingComponent) -> Option<&'static str> {
    match component {
        BindingComponent::Click => Some("click"),
        BindingComponent::Pull => Some("value"),
        BindingComponent::Touch => Some("touch"),
        BindingComponent::Force => Some("force"),
        // .../trackpad instead of .../trackpad/x
        BindingComponent::Position | BindingComponent::None | BindingComponent::Unknown => None,
    }
}

impl OpenXrBackend {
    pub fn new() -> Self {
        Self {
            raw: RawInputState::default(),
            display_time: 0,
            sets: Vec::new(),
            actions: Vec::new(),
            attached: false,
            suggested: BTreeMap::new(),
            digital: HashMap::new(),
            analog: HashMap::new(),
            pose: HashMap::new(),
        }
    }

    pub fn raw(&self) -> &RawInputState<i64> {
        &self.raw
    }

    pub fn raw_mut(&mut self) -> &mut RawInputState<i64> {
        &mut self.raw
    }

    /// Predicted display time of the current frame, in nanoseconds.
    pub fn set_display_time(&mut self, nanos: i64) {
        self.display_time = nanos;
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn suggested_bindings(&self, interaction_profile: &str) -> Option<&[(ActionHandle, String)]> {
        self.suggested.get(interaction_profile).map(Vec::as_slice)
    }

    fn action(&self, handle: ActionHandle) -> Option<&BackendAction> {
        let index = usize::try_from(handle).ok()?.checked_sub(1)?;
        self.actions.get(index)
    }

    fn is_bound(&self, handle: ActionHandle) -> bool {
        self.suggested
            .values()
            .any(|bindings| bindings.iter().any(|(h, _)| *h == handle))
    }

    fn seconds_ago(&self, time: i64) -> f32 {
        ((self.display_time - time) as f64 / 1e9) as f32
    }

    fn latch(&mut self, handle: ActionHandle) {
        let Some(action) = self.action(handle).cloned() else {
            return;
        };
        let bound = self.is_bound(handle);

        match action.ty {
            ActionType::Digital => {
                for ((url, controller), raw) in &self.raw.digital {
                    if *url != action.url {
                        continue;
                    }
                    let previous = self.digital.get(&(handle, *controller)).copied();
                    let active = bound && raw.active;
                    let state = active && raw.state;
                    // Before the first sync the action reads as released.
                    let sample = DigitalSample {
                        active,
                        state,
                        changed: previous.map_or(state, |p| p.state != state),
                        seconds_ago: self.seconds_ago(raw.time),
                    };
                    self.digital.insert((handle, *controller), sample);
                }
            }
            ActionType::DigitalFromFloat | ActionType::Float | ActionType::Vec2 => {
                for ((url, controller), raw) in &self.raw.analog {
                    if *url != action.url {
                        continue;
                    }
                    let previous = self.analog.get(&(handle, *controller)).copied();
                    let active = bound && raw.active;
                    let state = if active { raw.state } else { Default::default() };
                    let sample = AnalogSample {
                        active,
                        state,
                        changed: previous.map_or(state != Vec2::ZERO, |p| p.state != state),
                        seconds_ago: self.seconds_ago(raw.time),
                    };
                    self.analog.insert((handle, *controller), sample);
                }
            }
            ActionType::Pose => {
                for ((url, controller), raw) in &self.raw.pose {
                    if *url != action.url {
                        continue;
                    }
                    let active = bound && raw.active;
                    let sample = PoseSample {
                        active,
                        valid: active && raw.valid,
                        device_connected: raw.device_connected,
                        pose: raw.pose,
                        velocity: raw.velocity,
                        angular_velocity: raw.angular_velocity,
                        seconds_ago: self.seconds_ago(raw.time),
                    };
                    self.pose.insert((handle, *controller), sample);
                }
            }
            ActionType::Haptic => {}
        }
    }
}

impl InputBackend for OpenXrBackend {
    fn create_action_set(&mut self, url: &str) -> Result<SetHandle, InputError> {
        if self.attached {
            return Err(InputError::AlreadyAttached);
        }
        let name = url
            .strip_prefix("/actions/")
            .filter(|name| valid_name(name))
            .ok_or_else(|| unavailable(url))?;
        self.sets.push(name.to_owned());
        debug!("created action set {name}");
        Ok(self.sets.len() as SetHandle)
    }

    fn create_action(
        &mut self,
        set: SetHandle,
        ty: ActionType,
        url: &str,
    ) -> Result<ActionHandle, InputError> {
        if self.attached {
            return Err(InputError::AlreadyAttached);
        }
        let set_name = usize::try_from(set)
            .ok()
            .and_then(|s| s.checked_sub(1))
            .and_then(|s| self.sets.get(s))
            .ok_or(InputError::InvalidHandle)?;
        let (url_set, name) = split_action_url(url).ok_or_else(|| unavailable(url))?;
        if url_set != set_name {
            warn!("action {name} does not belong to set {set_name}");
            return Err(unavailable(url));
        }

        self.actions.push(BackendAction {
            set,
            ty,
            url: url.to_owned(),
        });
        Ok(self.actions.len() as ActionHandle)
    }

    fn attach_bindings(&mut self, manifest: &BindingManifest) -> Result<(), InputError> {
        if self.attached {
            return Err(InputError::AlreadyAttached);
        }

        for profile in &manifest.profiles {
            let mut suggested = Vec::new();
            for binding in &profile.bindings {
                let Some(handle) = self
                    .actions
                    .iter()
                    .position(|a| a.url == binding.action)
                    .map(|i| (i + 1) as ActionHandle)
                else {
                    debug!("skipping action {} not connected by application", binding.action);
                    continue;
                };

                for input in &binding.input_paths {
                    let path = match component_suffix(input.component) {
                        Some(suffix) => format!("{}/{suffix}", input.path),
                        None => input.path.clone(),
                    };
                    trace!("{} -> {path}", binding.action);
                    suggested.push((handle, path));
                }
            }
            debug!(
                "suggested {} bindings for {}",
                suggested.len(),
                profile.interaction_profile
            );
            self.suggested
                .insert(profile.interaction_profile.clone(), suggested);
        }

        self.attached = true;
        info!("attached {} action sets", self.sets.len());
        Ok(())
    }

    fn sync(&mut self, sets: &[SetHandle]) -> Result<(), InputError> {
        if sets.iter().any(|&s| s == 0 || s as usize > self.sets.len()) {
            return Err(InputError::InvalidHandle);
        }
        if !self.raw.focused {
            trace!("sync while session not focused");
            return Ok(());
        }

        let handles: Vec<ActionHandle> = self
            .actions
            .iter()
            .enumerate()
            .filter(|(_, a)| sets.contains(&a.set))
            .map(|(i, _)| (i + 1) as ActionHandle)
            .collect();
        for handle in handles {
            self.latch(handle);
        }
        Ok(())
    }

    fn is_focused(&self) -> bool {
        self.raw.focused
    }

    fn digital(&self, action: ActionHandle, controller: u64) -> Option<DigitalSample> {
        self.action(action)?;
        if !self.attached {
            return Some(DigitalSample::default());
        }
        self.digital.get(&(action, controller)).copied()
    }

    fn analog(&self, action: ActionHandle, controller: u64) -> Option<AnalogSample> {
        self.action(action)?;
        if !self.attached {
            return Some(AnalogSample::default());
        }
        self.analog.get(&(action, controller)).copied()
    }

    fn pose(&self, action: ActionHandle, controller: u64) -> Option<PoseSample> {
        self.action(action)?;
        if !self.attached {
            return Some(PoseSample::default());
        }
        self.pose.get(&(action, controller)).copied()
    }

    fn trigger_haptic(
        &mut self,
        action: ActionHandle,
        controller: u64,
        pulse: &HapticPulse,
    ) -> Result<(), InputError> {
        let action = self.action(action).ok_or(InputError::InvalidHandle)?;
        if action.ty != ActionType::Haptic {
            return Err(InputError::WrongType);
        }
        if !self.attached {
            return Err(InputError::NotAttached);
        }
        let url = action.url.clone();
        self.raw.record_haptic(&url, controller, *pulse);
        Ok(())
    }

    fn poll_runtime_event(&mut self) -> Option<RuntimeEvent> {
        let event = self.raw.pop_event()?;
        if let RuntimeEvent::FocusChanged { focused } = event {
            self.raw.focused = focused;
        }
        Some(event)
    }
}
