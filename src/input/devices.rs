use crate::controller::Controller;
use derive_more::Display;
use glam::Mat4;
use log::{debug, trace, warn};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Display, Copy, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[display("no device with handle {_0}")]
    DeviceNotFound(u64),
    #[display("device {_0} is already known")]
    AlreadyKnown(u64),
}

impl std::error::Error for DeviceError {}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Activated(u64),
    /// The controller's last state. It is no longer in the registry, so anything it
    /// hovered or grabbed has to be released from this snapshot.
    Deactivated(Controller),
}

impl DeviceEvent {
    pub fn handle(&self) -> u64 {
        match self {
            Self::Activated(handle) => *handle,
            Self::Deactivated(controller) => controller.handle(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub handle: u64,
    pub pose: Mat4,
    pub pose_valid: bool,
    pub model_name: String,
    controller: Option<Controller>,
}

impl Device {
    pub fn is_controller(&self) -> bool {
        self.controller.is_some()
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TrackedPose {
    pub handle: u64,
    pub pose: Mat4,
    pub valid: bool,
}

#[derive(Default)]
struct Registry {
    devices: BTreeMap<u64, Device>,
    events: VecDeque<DeviceEvent>,
}

/// Registry of tracked devices, keyed by runtime handle.
///
/// Every operation takes the registry's reentrant lock for its duration and releases it
/// before returning, so registry calls may be made while handling a [`DeviceEvent`].
pub struct DeviceManager {
    registry: ReentrantMutex<RefCell<Registry>>,
    pointer_default_length: f32,
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceManager {
    pub fn new() -> Self {
        Self::with_pointer_length(5.0)
    }

    pub fn with_pointer_length(pointer_default_length: f32) -> Self {
        Self {
            registry: Default::default(),
            pointer_default_length,
        }
    }

    /// Adds a device. Adding a known handle changes nothing and fails.
    pub fn add(&self, handle: u64, is_controller: bool) -> Result<(), DeviceError> {
        let guard = self.registry.lock();
        let mut registry = guard.borrow_mut();
        if registry.devices.contains_key(&handle) {
            debug!("device {handle} already added");
            return Err(DeviceError::AlreadyKnown(handle));
        }

        let controller = is_controller.then(|| {
            let mut controller = Controller::new(handle);
            controller.set_pointer_default_length(self.pointer_default_length);
            controller
        });
        registry.devices.insert(
            handle,
            Device {
                handle,
                pose: Mat4::IDENTITY,
                pose_valid: false,
                model_name: String::new(),
                controller,
            },
        );
        if is_controller {
            registry.events.push_back(DeviceEvent::Activated(handle));
        }
        debug!("added device {handle} (controller: {is_controller})");
        Ok(())
    }

    pub fn remove(&self, handle: u64) -> Result<(), DeviceError> {
        let guard = self.registry.lock();
        let mut registry = guard.borrow_mut();
        let Some(device) = registry.devices.remove(&handle) else {
            warn!("tried to remove unknown device {handle}");
            return Err(DeviceError::DeviceNotFound(handle));
        };

        if let Some(controller) = device.controller {
            registry.events.push_back(DeviceEvent::Deactivated(controller));
        }
        debug!("removed device {handle}");
        Ok(())
    }

    /// Applies a batch of tracked poses. Devices missing from the batch become invalid;
    /// invalid poses keep the last valid one.
    pub fn update_poses(&self, poses: &[TrackedPose]) {
        let guard = self.registry.lock();
        let mut registry = guard.borrow_mut();
        for device in registry.devices.values_mut() {
            let update = poses.iter().find(|p| p.handle == device.handle);
            device.pose_valid = update.is_some_and(|p| p.valid);
            if let Some(TrackedPose {
                pose, valid: true, ..
            }) = update
            {
                device.pose = *pose;
            }
        }
        trace!("updated poses of {} devices", registry.devices.len());
    }

    pub fn set_model_name(&self, handle: u64, name: &str) -> Result<(), DeviceError> {
        let guard = self.registry.lock();
        let mut registry = guard.borrow_mut();
        let device = registry
            .devices
            .get_mut(&handle)
            .ok_or(DeviceError::DeviceNotFound(handle))?;
        device.model_name = name.to_owned();
        Ok(())
    }

    pub fn contains(&self, handle: u64) -> bool {
        self.registry.lock().borrow().devices.contains_key(&handle)
    }

    pub fn device(&self, handle: u64) -> Option<Device> {
        self.registry.lock().borrow().devices.get(&handle).cloned()
    }

    pub fn controller_handles(&self) -> Vec<u64> {
        self.registry
            .lock()
            .borrow()
            .devices
            .values()
            .filter(|d| d.is_controller())
            .map(|d| d.handle)
            .collect()
    }

    pub fn controllers(&self) -> Vec<Controller> {
        self.registry
            .lock()
            .borrow()
            .devices
            .values()
            .filter_map(|d| d.controller.clone())
            .collect()
    }

    /// A snapshot of a controller's state. Write changes back with [`Self::put_controller`].
    pub fn controller(&self, handle: u64) -> Result<Controller, DeviceError> {
        self.registry
            .lock()
            .borrow()
            .devices
            .get(&handle)
            .and_then(|d| d.controller.clone())
            .ok_or(DeviceError::DeviceNotFound(handle))
            .inspect_err(|_| trace!("no controller {handle}"))
    }

    pub fn put_controller(&self, controller: Controller) -> Result<(), DeviceError> {
        let guard = self.registry.lock();
        let mut registry = guard.borrow_mut();
        let handle = controller.handle();
        let slot = registry
            .devices
            .get_mut(&handle)
            .and_then(|d| d.controller.as_mut())
            .ok_or(DeviceError::DeviceNotFound(handle))?;
        *slot = controller;
        Ok(())
    }

    pub fn next_event(&self) -> Option<DeviceEvent> {
        self.registry.lock().borrow_mut().events.pop_front()
    }
}
