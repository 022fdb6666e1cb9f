use super::{
    ActionHandle, AnalogSample, BackendAction, DigitalSample, HapticPulse, InputBackend,
    PoseSample, RawInputState, RuntimeEvent, SetHandle,
};
use crate::input::action_manifest::BindingManifest;
use crate::input::{ActionType, InputError};
use log::{debug, trace};

const URL_PREFIX: &str = "/actions/";

/// The OpenVR flavour: URLs are used verbatim and bindings are resolved by the runtime.
///
/// Timestamps are seconds relative to now, negative for the past.
#[derive(Debug, Default)]
pub struct OpenVrBackend {
    raw: RawInputState<f32>,
    sets: Vec<String>,
    actions: Vec<BackendAction>,
}

impl OpenVrBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(&self) -> &RawInputState<f32> {
        &self.raw
    }

    pub fn raw_mut(&mut self) -> &mut RawInputState<f32> {
        &mut self.raw
    }

    fn action(&self, handle: ActionHandle) -> Option<&BackendAction> {
        let index = usize::try_from(handle).ok()?.checked_sub(1)?;
        self.actions.get(index)
    }
}

fn check_url(url: &str) -> Result<(), InputError> {
    if url.starts_with(URL_PREFIX) && url.len() > URL_PREFIX.len() {
        Ok(())
    } else {
        Err(InputError::BackendUnavailable(format!(
            "invalid action url {url}"
        )))
    }
}

impl InputBackend for OpenVrBackend {
    fn create_action_set(&mut self, url: &str) -> Result<SetHandle, InputError> {
        check_url(url)?;
        self.sets.push(url.to_owned());
        debug!("created action set {url}");
        Ok(self.sets.len() as SetHandle)
    }

    fn create_action(
        &mut self,
        set: SetHandle,
        ty: ActionType,
        url: &str,
    ) -> Result<ActionHandle, InputError> {
        if set == 0 || set as usize > self.sets.len() {
            return Err(InputError::InvalidHandle);
        }
        check_url(url)?;
        self.actions.push(BackendAction {
            set,
            ty,
            url: url.to_owned(),
        });
        Ok(self.actions.len() as ActionHandle)
    }

    fn attach_bindings(&mut self, _manifest: &BindingManifest) -> Result<(), InputError> {
        trace!("bindings are resolved by the runtime");
        Ok(())
    }

    fn sync(&mut self, sets: &[SetHandle]) -> Result<(), InputError> {
        if sets.iter().any(|&s| s == 0 || s as usize > self.sets.len()) {
            return Err(InputError::InvalidHandle);
        }
        trace!("updating state of {} action sets", sets.len());
        Ok(())
    }

    fn is_focused(&self) -> bool {
        self.raw.focused
    }

    fn digital(&self, action: ActionHandle, controller: u64) -> Option<DigitalSample> {
        let action = self.action(action)?;
        let raw = self.raw.digital(&action.url, controller)?;
        Some(DigitalSample {
            active: raw.active,
            state: raw.state,
            changed: raw.changed,
            seconds_ago: -raw.time,
        })
    }

    fn analog(&self, action: ActionHandle, controller: u64) -> Option<AnalogSample> {
        let action = self.action(action)?;
        let raw = self.raw.analog(&action.url, controller)?;
        Some(AnalogSample {
            active: raw.active,
            state: raw.state,
            changed: true,
            seconds_ago: -raw.time,
        })
    }

    fn pose(&self, action: ActionHandle, controller: u64) -> Option<PoseSample> {
        let action = self.action(action)?;
        let raw = self.raw.pose(&action.url, controller)?;
        Some(PoseSample {
            active: raw.active,
            valid: raw.valid,
            device_connected: raw.device_connected,
            pose: raw.pose,
            velocity: raw.velocity,
            angular_velocity: raw.angular_velocity,
            seconds_ago: -raw.time,
        })
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::backend::{RawAnalog, RawDigital};
    use glam::Vec2;

    #[test]
    fn urls_need_actions_prefix() {
        let mut b = OpenVrBackend::new();
        assert!(matches!(
            b.create_action_set("wm"),
            Err(InputError::BackendUnavailable(_))
        ));
        let set = b.create_action_set("/actions/wm").unwrap();
        assert!(b
            .create_action(set, ActionType::Digital, "/actions/wm/in/menu")
            .is_ok());
        assert!(matches!(
            b.create_action(set + 1, ActionType::Digital, "/actions/wm/in/menu"),
            Err(InputError::InvalidHandle)
        ));
    }

    #[test]
    fn samples_read_through_with_relative_time() {
        let mut b = OpenVrBackend::new();
        let set = b.create_action_set("/actions/wm").unwrap();
        let menu = b
            .create_action(set, ActionType::Digital, "/actions/wm/in/menu")
            .unwrap();
        let stick = b
            .create_action(set, ActionType::Vec2, "/actions/wm/in/push_pull_scale")
            .unwrap();

        b.raw_mut().set_digital(
            "/actions/wm/in/menu",
            7,
            RawDigital {
                active: true,
                state: true,
                changed: true,
                time: -0.25,
            },
        );
        b.raw_mut().set_analog(
            "/actions/wm/in/push_pull_scale",
            7,
            RawAnalog {
                active: true,
                state: Vec2::new(0.5, 0.0),
                delta: Vec2::ZERO,
                time: 0.0,
            },
        );
        b.sync(&[set]).unwrap();

        let d = b.digital(menu, 7).unwrap();
        assert!(d.state && d.changed);
        assert_eq!(d.seconds_ago, 0.25);
        assert!(b.analog(stick, 7).unwrap().changed);
        assert_eq!(b.digital(menu, 8), None);
    }

    #[test]
    fn haptic_needs_haptic_action() {
        let mut b = OpenVrBackend::new();
        let set = b.create_action_set("/actions/wm").unwrap();
        let menu = b
            .create_action(set, ActionType::Digital, "/actions/wm/in/menu")
            .unwrap();
        let haptic = b
            .create_action(set, ActionType::Haptic, "/actions/wm/out/haptic")
            .unwrap();
        let pulse = HapticPulse {
            start_seconds_from_now: 0.0,
            duration_seconds: 0.03,
            frequency: 50.0,
            amplitude: 0.4,
        };
        assert!(matches!(
            b.trigger_haptic(menu, 1, &pulse),
            Err(InputError::WrongType)
        ));
        b.trigger_haptic(haptic, 1, &pulse).unwrap();
        assert_eq!(
            b.raw_mut().take_haptics(),
            vec![("/actions/wm/out/haptic".to_owned(), 1, pulse)]
        );
    }
}
