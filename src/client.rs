#[cfg(test)]
mod tests;

use crate::container::Fov;
use crate::controller::Controller;
use crate::input::devices::{DeviceEvent, DeviceManager};
use crate::input::{
    ActionEvent, ActionKey, ActionSetKey, ActionType, AnalogEvent, Backend, DigitalEvent, Input,
    InputError, PoseEvent, QuitReason,
};
use crate::input_synth::{Button, InputSynth, SynthEvent};
use crate::render_lock::RenderLock;
use crate::settings::{Settings, SettingsError};
use crate::window::{Surface, Window, WindowFlags, WindowKey};
use crate::window_manager::{WindowEvent, WindowManager};
use derive_more::Display;
use glam::Mat4;
use log::{debug, info, trace, warn};
use std::collections::VecDeque;
use std::path::Path;
use std::time::Instant;

#[derive(Debug, Display)]
pub enum ClientError {
    #[display("{_0}")]
    Input(InputError),
    #[display("{_0}")]
    Settings(SettingsError),
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Input(e) => Some(e),
            Self::Settings(e) => Some(e),
        }
    }
}

impl From<InputError> for ClientError {
    fn from(value: InputError) -> Self {
        Self::Input(value)
    }
}

impl From<SettingsError> for ClientError {
    fn from(value: SettingsError) -> Self {
        Self::Settings(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Window(WindowEvent),
    Synth(SynthEvent),
    Device(DeviceEvent),
    /// Menu pressed while pointing at nothing.
    Menu { controller: u64 },
    ButtonPressed { window: WindowKey, controller: u64 },
    Quit(QuitReason),
}

struct WmActions {
    hand_pose: ActionKey,
    hand_grip: ActionKey,
    grab_window: ActionKey,
    reset_orientation: ActionKey,
    menu: ActionKey,
    push_pull_scale: ActionKey,
    push_pull: ActionKey,
}

impl WmActions {
    fn connect(input: &Input, set: ActionSetKey, settings: &Settings) -> Result<Self, InputError> {
        Ok(Self {
            hand_pose: input.connect(set, ActionType::Pose, "/actions/wm/in/hand_pose")?,
            hand_grip: input.connect(
                set,
                ActionType::Pose,
                "/actions/wm/in/hand_pose_hand_grip",
            )?,
            grab_window: input.connect_digital_from_float(
                set,
                "/actions/wm/in/grab_window",
                settings.grab_window_threshold,
                Some("/actions/wm/out/haptic"),
            )?,
            reset_orientation: input.connect(
                set,
                ActionType::Digital,
                "/actions/wm/in/reset_orientation",
            )?,
            menu: input.connect(set, ActionType::Digital, "/actions/wm/in/menu")?,
            push_pull_scale: input.connect(
                set,
                ActionType::Vec2,
                "/actions/wm/in/push_pull_scale",
            )?,
            push_pull: input.connect(set, ActionType::Vec2, "/actions/wm/in/push_pull")?,
        })
    }
}

struct SynthActions {
    left_click: ActionKey,
    right_click: ActionKey,
    middle_click: ActionKey,
    scroll: ActionKey,
}

impl SynthActions {
    fn connect(input: &Input, set: ActionSetKey) -> Result<Self, InputError> {
        let digital = |url| input.connect(set, ActionType::Digital, url);
        Ok(Self {
            left_click: digital("/actions/mouse_synth/in/left_click")?,
            right_click: digital("/actions/mouse_synth/in/right_click")?,
            middle_click: digital("/actions/mouse_synth/in/middle_click")?,
            scroll: input.connect(set, ActionType::Vec2, "/actions/mouse_synth/in/scroll")?,
        })
    }
}

/// Runs the interaction core: one [`Client::frame`] call per tick moves input from the
/// backend through hover and grab handling to desktop input synthesis.
pub struct Client {
    input: Input,
    devices: DeviceManager,
    wm: WindowManager,
    synth: InputSynth,
    render_lock: RenderLock,
    settings: Settings,
    wm_set: ActionSetKey,
    synth_set: ActionSetKey,
    wm_actions: WmActions,
    synth_actions: SynthActions,
    last_poll: Option<Instant>,
    events: VecDeque<ClientEvent>,
}

impl Client {
    /// Creates the window manager and mouse synth action sets on `backend`.
    ///
    /// For backends that need bindings attached, load a manifest with
    /// [`Client::load_manifest`] before the first frame.
    pub fn new(backend: impl Into<Backend>, settings: Settings) -> Result<Self, ClientError> {
        settings
            .validate()
            .inspect_err(|e| warn!("Refusing settings: {e}"))?;
        let input = Input::new(backend);
        let wm_set = input.create_action_set("/actions/wm")?;
        let wm_actions = WmActions::connect(&input, wm_set, &settings)?;
        let synth_set = input.create_action_set("/actions/mouse_synth")?;
        let synth_actions = SynthActions::connect(&input, synth_set)?;
        info!("client created on {}", input.backend().name());

        let render_lock = RenderLock::new();
        Ok(Self {
            devices: DeviceManager::with_pointer_length(settings.pointer_default_length),
            wm: WindowManager::new(settings.clone(), render_lock.clone()),
            synth: InputSynth::new(&settings),
            input,
            render_lock,
            settings,
            wm_set,
            synth_set,
            wm_actions,
            synth_actions,
            last_poll: None,
            events: VecDeque::new(),
        })
    }

    /// Loads the action manifest and its binding files, then attaches the bindings.
    pub fn load_manifest(&self, path: &Path) -> Result<(), InputError> {
        self.input.load_manifest(path)?;
        self.input.attach_bindings()
    }

    /// Like [`Client::load_manifest`], from in-memory JSON.
    pub fn parse_manifest(&self, json: &str, binding_files: &[&str]) -> Result<(), InputError> {
        self.input.parse_manifest(json, binding_files)?;
        self.input.attach_bindings()
    }

    pub fn input(&self) -> &Input {
        &self.input
    }

    /// The device registry. Activation and controller poses come in through
    /// [`Client::frame`]; tracked poses of every device and model names are the host's
    /// to feed with [`DeviceManager::update_poses`] and [`DeviceManager::set_model_name`].
    pub fn devices(&self) -> &DeviceManager {
        &self.devices
    }

    pub fn window_manager(&self) -> &WindowManager {
        &self.wm
    }

    pub fn window_manager_mut(&mut self) -> &mut WindowManager {
        &mut self.wm
    }

    pub fn input_synth(&self) -> &InputSynth {
        &self.synth
    }

    /// Take this around the render pass once [`RenderLock::init`] was called.
    pub fn render_lock(&self) -> &RenderLock {
        &self.render_lock
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Switches to `settings`. Invalid settings are refused and the current ones kept.
    pub fn apply_settings(&mut self, settings: Settings) -> Result<(), SettingsError> {
        settings
            .validate()
            .inspect_err(|e| warn!("Refusing settings: {e}"))?;
        let grab = self.wm_actions.grab_window;
        if let Err(e) = self
            .input
            .set_digital_from_float_threshold(grab, settings.grab_window_threshold)
        {
            warn!("Couldn't update grab threshold: {e}");
        }
        self.synth.apply_settings(&settings);
        self.wm.set_settings(settings.clone());
        self.settings = settings;
        Ok(())
    }

    pub fn add_window(&mut self, window: Window) -> WindowKey {
        self.wm.add_window(window)
    }

    /// Adds a button at `transform`. Grabbing it sends [`ClientEvent::ButtonPressed`].
    pub fn add_button(&mut self, surface: Box<dyn Surface>, transform: &Mat4) -> WindowKey {
        let key = self
            .wm
            .add_window(Window::new(surface, WindowFlags::HOVERABLE | WindowFlags::BUTTON));
        self.wm.set_transform(key, transform);
        self.wm.save_reset_transform(key);
        key
    }

    /// Removes a window, releasing it from any controller that hovers or grabs it.
    pub fn remove_window(&mut self, key: WindowKey) -> Option<Window> {
        for mut controller in self.devices.controllers() {
            let mut touched = false;
            if controller.grab_state.grabbed == Some(key) {
                controller.reset_grab_state();
                touched = true;
            }
            if controller.hover_state.hovered == Some(key) {
                controller.reset_hover_state();
                touched = true;
            }
            if touched {
                let _ = self.devices.put_controller(controller);
            }
        }
        self.wm.remove_window(key)
    }

    /// One tick of the interaction loop.
    pub fn frame(&mut self, now: Instant, head: &Mat4, fov: &Fov) {
        self.process_device_events(now);

        let dt_ms = self
            .last_poll
            .map_or(0.0, |last| now.saturating_duration_since(last).as_secs_f32() * 1000.0);

        let controllers = self.devices.controllers();
        let poll_synth = controllers.iter().any(Controller::is_hovering)
            && !controllers.iter().any(Controller::is_grabbing);
        // The synth set only while a window could receive desktop input.
        let sets = [self.wm_set, self.synth_set];
        let count = if poll_synth { 2 } else { 1 };
        match self.input.poll(&sets[..count], &self.devices) {
            Ok(()) => {
                while let Some(event) = self.input.next_event() {
                    self.dispatch_action(event, now, dt_ms);
                }
            }
            Err(e) => warn!("Failed to poll actions: {e}"),
        }

        self.wm.step_containers(head, fov, &self.devices, now);

        for handle in self.devices.controller_handles() {
            self.with_controller(handle, |client, controller| {
                if !controller.is_pointer_pose_valid() {
                    return;
                }
                controller.step_orientation_reset(now);
                client.wm.update_controller(controller);
            });
            self.dispatch_window_events(now);
        }

        self.wm.step_transitions(now);
        self.last_poll = Some(now);
    }

    pub fn next_event(&mut self) -> Option<ClientEvent> {
        self.events.pop_front()
    }

    fn process_device_events(&mut self, now: Instant) {
        self.input.process_runtime_events(&self.devices);
        while let Some(event) = self.devices.next_event() {
            let gone = match &event {
                DeviceEvent::Activated(handle) => {
                    if self.synth.primary_controller().is_none() {
                        self.synth.make_primary(*handle);
                    }
                    None
                }
                DeviceEvent::Deactivated(controller) => Some(controller.clone()),
            };
            self.events.push_back(ClientEvent::Device(event));
            if let Some(controller) = gone {
                self.controller_gone(controller, now);
            }
        }
        self.drain_synth_events();
    }

    /// Lets go of whatever a deactivated controller held and hands its role on.
    fn controller_gone(&mut self, mut controller: Controller, now: Instant) {
        let handle = controller.handle();
        self.wm.release_controller(&mut controller);
        self.dispatch_window_events(now);

        if self.synth.primary_controller() != Some(handle) {
            return;
        }
        match self.devices.controller_handles().first() {
            Some(&next) => self.synth.make_primary(next),
            None => {
                debug!("last controller {handle} is gone");
                self.synth.clear_primary();
            }
        }
    }

    /// Runs `f` on a snapshot of the controller and writes it back.
    fn with_controller<R>(
        &mut self,
        handle: u64,
        f: impl FnOnce(&mut Self, &mut Controller) -> R,
    ) -> Option<R> {
        let mut controller = self
            .devices
            .controller(handle)
            .inspect_err(|e| debug!("skipping controller event: {e}"))
            .ok()?;
        let result = f(self, &mut controller);
        let _ = self.devices.put_controller(controller);
        Some(result)
    }

    fn dispatch_action(&mut self, event: ActionEvent, now: Instant, dt_ms: f32) {
        match event {
            ActionEvent::Quit { reason } => self.events.push_back(ClientEvent::Quit(reason)),
            ActionEvent::Pose(pose) => self.on_pose(&pose),
            ActionEvent::Digital(digital) => self.on_digital(&digital, now),
            ActionEvent::Analog(analog) => self.on_analog(&analog, dt_ms),
        }
        self.dispatch_window_events(now);
    }

    fn on_pose(&mut self, event: &PoseEvent) {
        let usable = event.is_usable();
        if event.action == self.wm_actions.hand_pose {
            self.with_controller(event.controller, |_, c| {
                c.update_pointer_pose(event.pose, usable)
            });
        } else if event.action == self.wm_actions.hand_grip {
            self.with_controller(event.controller, |_, c| {
                c.update_grip_pose(event.pose, usable)
            });
        }
    }

    fn on_digital(&mut self, event: &DigitalEvent, now: Instant) {
        let action = event.action;
        let controller = event.controller;
        let pressed = event.changed && event.state;

        if action == self.wm_actions.grab_window {
            if !event.changed {
                return;
            }
            self.with_controller(controller, |client, c| {
                if event.state {
                    client.wm.check_grab(c);
                } else {
                    client.wm.check_release(c);
                }
            });
        } else if action == self.wm_actions.reset_orientation {
            if pressed {
                self.with_controller(controller, |_, c| c.reset_orientation(now));
            }
        } else if action == self.wm_actions.menu {
            let hovering = self
                .devices
                .controller(controller)
                .is_ok_and(|c| c.is_hovering());
            if pressed && !hovering {
                debug!("menu from controller {controller}");
                self.events.push_back(ClientEvent::Menu { controller });
            }
        } else if action == self.synth_actions.left_click {
            self.synth
                .left_click(controller, event.state, event.changed, now);
        } else if action == self.synth_actions.right_click {
            self.synth
                .click(controller, Button::Right, event.state, event.changed, now);
        } else if action == self.synth_actions.middle_click {
            self.synth
                .click(controller, Button::Middle, event.state, event.changed, now);
        }
        self.drain_synth_events();
    }

    fn on_analog(&mut self, event: &AnalogEvent, dt_ms: f32) {
        let action = event.action;
        if action == self.wm_actions.push_pull_scale {
            self.with_controller(event.controller, |client, c| {
                client.wm.update_pose(c, event.state, dt_ms)
            });
        } else if action == self.wm_actions.push_pull {
            let threshold = self.settings.analog_threshold;
            self.with_controller(event.controller, |client, c| {
                if c.is_grabbing() && event.state.y.abs() > threshold {
                    client.wm.push_pull(c, event.state.y, dt_ms);
                }
            });
        } else if action == self.synth_actions.scroll {
            self.synth.scroll(event.controller, event.state, event.delta);
            self.drain_synth_events();
        }
    }

    fn is_grabbed(&self, window: WindowKey) -> bool {
        self.devices
            .controllers()
            .iter()
            .any(|c| c.grab_state.grabbed == Some(window))
    }

    fn dispatch_window_events(&mut self, now: Instant) {
        let primary = self.synth.primary_controller();
        while let Some(event) = self.wm.next_event() {
            match event {
                WindowEvent::GrabStart { window, controller } => {
                    self.grab_start(window, controller);
                }
                WindowEvent::Hover(hover) if primary == Some(hover.controller) => {
                    let window = self.wm.window(hover.window).filter(|w| !w.is_button());
                    let controller = self.devices.controller(hover.controller);
                    if let (Some(window), Ok(controller)) = (window, controller) {
                        self.synth.move_cursor(
                            hover.window,
                            window,
                            controller.pointer_pose(),
                            hover.point,
                            now,
                        );
                    }
                }
                WindowEvent::HoverStart { controller, .. } if primary == Some(controller) => {
                    self.synth.reset_scroll();
                }
                WindowEvent::HoverEnd { .. } => self.synth.reset_press_state(),
                WindowEvent::NoHover { controller, .. } if primary == Some(controller) => {
                    self.synth.reset_scroll();
                }
                _ => {}
            }
            self.events.push_back(ClientEvent::Window(event));
        }
        self.drain_synth_events();
    }

    fn grab_start(&mut self, window: WindowKey, controller: u64) {
        if self.wm.window(window).is_some_and(Window::is_button) {
            debug!("button {window:?} pressed by controller {controller}");
            self.events
                .push_back(ClientEvent::ButtonPressed { window, controller });
            return;
        }
        if self.is_grabbed(window) {
            trace!("{window:?} is already grabbed");
            return;
        }
        self.with_controller(controller, |client, c| client.wm.drag_start(c));
    }

    fn drain_synth_events(&mut self) {
        while let Some(event) = self.synth.next_event() {
            self.events.push_back(ClientEvent::Synth(event));
        }
    }
}
