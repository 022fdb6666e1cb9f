use derive_more::Display;
use log::{debug, info, warn};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Display)]
pub enum ManifestParseError {
    #[display("couldn't read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[display("malformed manifest: {_0}")]
    Json(serde_json::Error),
}

impl std::error::Error for ManifestParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Json(e) => Some(e),
        }
    }
}

impl From<serde_json::Error> for ManifestParseError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
pub enum BindingType {
    #[serde(rename = "boolean")]
    Boolean,
    #[serde(rename = "vector1")]
    Float,
    #[serde(rename = "vector2")]
    Vec2,
    #[serde(rename = "pose")]
    Pose,
    #[serde(rename = "vibration")]
    Haptic,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize)]
pub enum BindingMode {
    /// No mode given, as for poses and haptics.
    #[default]
    None,
    #[serde(rename = "button")]
    Button,
    #[serde(rename = "trackpad")]
    Trackpad,
    #[serde(rename = "joystick")]
    AnalogStick,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BindingComponent {
    /// Poses and haptics bind the bare path.
    None,
    Click,
    Pull,
    Position,
    Touch,
    Force,
    Unknown,
}

impl From<&str> for BindingComponent {
    fn from(value: &str) -> Self {
        match value {
            "click" => Self::Click,
            "pull" => Self::Pull,
            "position" => Self::Position,
            "touch" => Self::Touch,
            "force" => Self::Force,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DefaultBinding {
    pub controller_type: String,
    pub binding_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActionManifestEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: BindingType,
}

/// The actions manifest: declared actions plus the binding files per controller type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActionManifest {
    #[serde(default)]
    pub default_bindings: Vec<DefaultBinding>,
    pub actions: Vec<ActionManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputPath {
    pub component: BindingComponent,
    pub path: String,
    pub mode: BindingMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub action: String,
    pub input_paths: Vec<InputPath>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileBindings {
    pub interaction_profile: String,
    pub bindings: Vec<Binding>,
}

#[derive(Deserialize)]
struct BindingFile {
    interaction_profile: String,
    #[serde(default)]
    bindings: BTreeMap<String, ActionSetBindings>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ActionSetBindings {
    sources: Vec<Source>,
    haptics: Vec<Output>,
    poses: Vec<Output>,
}

#[derive(Deserialize)]
struct Source {
    path: String,
    #[serde(default)]
    mode: BindingMode,
    #[serde(default)]
    inputs: BTreeMap<String, SourceInput>,
}

#[derive(Deserialize)]
struct SourceInput {
    output: String,
}

#[derive(Deserialize)]
struct Output {
    path: String,
    output: String,
}

/// A parsed actions manifest with all of its binding files.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BindingManifest {
    pub actions: Vec<ActionManifestEntry>,
    pub default_bindings: Vec<DefaultBinding>,
    pub profiles: Vec<ProfileBindings>,
}

pub fn load_manifest(json: &str) -> Result<ActionManifest, ManifestParseError> {
    let manifest: ActionManifest = serde_json::from_str(json)?;
    for action in manifest
        .actions
        .iter()
        .filter(|a| a.ty == BindingType::Unknown)
    {
        warn!("action {} has an unknown type", action.name);
    }
    Ok(manifest)
}

/// Parses a binding file, grouping its inputs per action.
///
/// Inputs bound to actions the manifest does not declare are skipped.
pub fn parse_binding_file(
    json: &str,
    actions: &[ActionManifestEntry],
) -> Result<ProfileBindings, ManifestParseError> {
    let file: BindingFile = serde_json::from_str(json)?;
    let mut bindings: Vec<Binding> = Vec::new();

    let mut add = |action: &str, input_path: InputPath| {
        if !actions.iter().any(|a| a.name == action) {
            warn!(
                "{}: binding for undeclared action {action}, skipping",
                file.interaction_profile
            );
            return;
        }
        match bindings.iter_mut().find(|b| b.action == action) {
            Some(binding) => binding.input_paths.push(input_path),
            None => bindings.push(Binding {
                action: action.to_owned(),
                input_paths: vec![input_path],
            }),
        }
    };

    for (set, set_bindings) in &file.bindings {
        debug!("parsing bindings of set {set} for {}", file.interaction_profile);
        for source in &set_bindings.sources {
            for (component, input) in &source.inputs {
                add(
                    &input.output,
                    InputPath {
                        component: component.as_str().into(),
                        path: source.path.clone(),
                        mode: source.mode,
                    },
                );
            }
        }
        for output in set_bindings.haptics.iter().chain(&set_bindings.poses) {
            add(
                &output.output,
                InputPath {
                    component: BindingComponent::None,
                    path: output.path.clone(),
                    mode: BindingMode::None,
                },
            );
        }
    }

    Ok(ProfileBindings {
        interaction_profile: file.interaction_profile,
        bindings,
    })
}

impl BindingManifest {
    /// Parses an in-memory manifest and the contents of its binding files.
    pub fn parse(manifest_json: &str, binding_files: &[&str]) -> Result<Self, ManifestParseError> {
        let manifest = load_manifest(manifest_json)?;
        let profiles = binding_files
            .iter()
            .map(|json| parse_binding_file(json, &manifest.actions))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            actions: manifest.actions,
            default_bindings: manifest.default_bindings,
            profiles,
        })
    }

    /// Loads the manifest at `path` and every binding file it references, relative to it.
    pub fn load(path: &Path) -> Result<Self, ManifestParseError> {
        let read = |path: &Path| {
            std::fs::read_to_string(path).map_err(|source| ManifestParseError::Io {
                path: path.to_owned(),
                source,
            })
        };

        let manifest = load_manifest(&read(path)?)?;
        let dir = path.parent().unwrap_or(Path::new("."));
        let mut profiles = Vec::with_capacity(manifest.default_bindings.len());
        for default in &manifest.default_bindings {
            let binding_path = dir.join(&default.binding_url);
            let profile = parse_binding_file(&read(&binding_path)?, &manifest.actions)?;
            debug!(
                "loaded {} bindings for {} ({})",
                profile.bindings.len(),
                default.controller_type,
                profile.interaction_profile
            );
            profiles.push(profile);
        }

        info!("loaded action manifest {}", path.display());
        Ok(Self {
            actions: manifest.actions,
            default_bindings: manifest.default_bindings,
            profiles,
        })
    }

    pub fn action_type(&self, name: &str) -> Option<BindingType> {
        self.actions.iter().find(|a| a.name == name).map(|a| a.ty)
    }
}
