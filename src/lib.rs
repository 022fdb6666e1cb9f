//! Interaction core for desktop windows floating in a VR scene.
//!
//! The crate turns backend input (two flavours, see [`input::Backend`]) into a uniform
//! action event stream, tracks per-controller hover and grab state against the managed
//! windows, keeps containers attached to the head or a hand, and synthesizes desktop
//! pointer input with shake compensation.

pub mod client;
pub mod container;
pub mod controller;
pub mod input;
pub mod input_synth;
pub mod math;
pub mod render_lock;
pub mod settings;
pub mod window;
pub mod window_manager;

pub use client::{Client, ClientError, ClientEvent};
pub use container::{Attachment, Container, ContainerError, ContainerKey, Fov, Layout};
pub use controller::{Controller, GrabState, HoverState, TransformLock};
pub use input::devices::{DeviceError, DeviceEvent, DeviceManager};
pub use input::{ActionEvent, ActionKey, ActionSetKey, ActionType, Backend, Input, InputError};
pub use input_synth::{Button, InputSynth, SynthEvent};
pub use render_lock::RenderLock;
pub use settings::{Settings, SettingsError};
pub use window::{QuadSurface, Surface, Window, WindowFlags};
pub use window_manager::{HoverMode, WindowEvent, WindowKey, WindowManager};

use std::sync::Once;

/// Installs an `env_logger` logger honouring `RUST_LOG`.
///
/// Safe to call any number of times; only the first call has an effect. Hosts that bring
/// their own `log` implementation should not call this.
pub fn init_logging() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let _ = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or("info"),
        )
        .format_module_path(true)
        .is_test(cfg!(test))
        .try_init();
    });
}
