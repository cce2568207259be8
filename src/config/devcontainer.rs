use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::core::{Hook, RunnerError, RunnerResult};

/// Shell used to wrap string lifecycle commands.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Canonical devcontainer manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevContainerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    // Image source
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(alias = "dockerFile", skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildProps>,

    // Docker Compose, recognised only to be rejected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_compose_file: Option<StringArray>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_services: Option<StringArray>,

    // General
    #[serde(default)]
    pub container_env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privileged: Option<bool>,
    #[serde(default)]
    pub cap_add: Vec<String>,
    #[serde(default)]
    pub security_opt: Vec<String>,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_mount: Option<Mount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_folder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_port: Option<AppPort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customizations: Option<Customizations>,

    // Lifecycle
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initialize_command: Option<LifecycleCommand>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_create_command: Option<LifecycleCommand>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_content_command: Option<LifecycleCommand>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_create_command: Option<LifecycleCommand>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_start_command: Option<LifecycleCommand>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_attach_command: Option<LifecycleCommand>,

    /// Directory holding the manifest, relative to the project root.
    #[serde(skip)]
    pub config_dir: PathBuf,
}

/// `build` block of the manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildProps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default)]
    pub args: BTreeMap<String, String>,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub cache_from: StringArray,
}

/// Where the container image comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    Image(String),
    Build(BuildProps),
}

impl DevContainerConfig {
    pub fn uses_compose(&self) -> bool {
        self.docker_compose_file
            .as_ref()
            .map_or(false, |files| !files.is_empty())
            || self.service.is_some()
            || self.run_services.as_ref().map_or(false, |s| !s.is_empty())
    }

    /// Validates that exactly one image source is configured.
    pub fn image_source(&self) -> RunnerResult<ImageSource> {
        if self.uses_compose() {
            return Err(RunnerError::ComposeUnsupported);
        }

        match (&self.image, &self.dockerfile, &self.build) {
            (Some(image), None, None) => Ok(ImageSource::Image(image.clone())),
            (None, Some(_), None) | (None, None, Some(_)) => self
                .build_props()
                .map(ImageSource::Build)
                .ok_or(RunnerError::DockerfileNotFound),
            _ => Err(RunnerError::InvalidConfig),
        }
    }

    /// Dockerfile build settings from `build`, or from the top-level
    /// `dockerfile`. The top-level `context` fills in a missing build context.
    pub fn build_props(&self) -> Option<BuildProps> {
        match (&self.build, &self.dockerfile) {
            (Some(build), _) if build.dockerfile.is_some() => {
                let mut build = build.clone();
                if build.context.is_none() {
                    build.context = self.context.clone();
                }
                Some(build)
            }
            (_, Some(dockerfile)) => Some(BuildProps {
                dockerfile: Some(dockerfile.clone()),
                context: self.context.clone(),
                ..Default::default()
            }),
            _ => None,
        }
    }

    pub fn lifecycle_command(&self, hook: Hook) -> Option<&LifecycleCommand> {
        match hook {
            Hook::Initialize => self.initialize_command.as_ref(),
            Hook::OnCreate => self.on_create_command.as_ref(),
            Hook::UpdateContent => self.update_content_command.as_ref(),
            Hook::PostCreate => self.post_create_command.as_ref(),
            Hook::PostStart => self.post_start_command.as_ref(),
            Hook::PostAttach => self.post_attach_command.as_ref(),
        }
    }

    /// Tasks listed under `customizations.hide.tasks`.
    pub fn hidden_tasks(&self) -> &[String] {
        self.customizations
            .as_ref()
            .and_then(|c| c.hide.as_ref())
            .map(|hide| hide.tasks.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Customizations {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hide: Option<HideCustomization>,
    /// Other tool namespaces, kept opaque.
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HideCustomization {
    #[serde(default)]
    pub tasks: Vec<String>,
}

// ---------------------------------------------------------------------------
// Mount
// ---------------------------------------------------------------------------

/// A mount, written either as `type=bind,source=/a,target=/b` or as an object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Mount {
    #[serde(rename = "type")]
    pub typ: String,
    pub source: String,
    #[serde(rename = "target")]
    pub destination: String,
    #[serde(rename = "readonly", skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
}

fn parse_flag(value: &str) -> Result<bool, String> {
    match value.trim() {
        "" | "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        other => Err(format!("invalid readonly value {other:?}")),
    }
}

impl FromStr for Mount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut mount = Mount::default();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = match part.split_once('=') {
                Some((key, value)) => (key.trim(), value),
                None if matches!(part, "readonly" | "ro") => (part, ""),
                None => return Err(format!("invalid mount option {part:?}, expected key=value")),
            };
            match key {
                "type" => mount.typ = value.to_string(),
                "source" | "src" => mount.source = value.to_string(),
                "target" | "destination" | "dst" => mount.destination = value.to_string(),
                "readonly" | "ro" => mount.read_only = parse_flag(value)?,
                _ => {}
            }
        }
        Ok(mount)
    }
}

#[derive(Deserialize)]
struct MountObject {
    #[serde(rename = "type", default)]
    typ: String,
    #[serde(default, alias = "src")]
    source: String,
    #[serde(default, alias = "destination", alias = "dst")]
    target: String,
    #[serde(default, alias = "readOnly", alias = "ro")]
    readonly: bool,
}

impl<'de> Deserialize<'de> for Mount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MountVisitor;

        impl<'de> Visitor<'de> for MountVisitor {
            type Value = Mount;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mount string (type=...,source=...,target=...) or a mount object")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Mount, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<Mount, A::Error> {
                let obj = MountObject::deserialize(de::value::MapAccessDeserializer::new(map))?;
                Ok(Mount {
                    typ: obj.typ,
                    source: obj.source,
                    destination: obj.target,
                    read_only: obj.readonly,
                })
            }
        }

        deserializer.deserialize_any(MountVisitor)
    }
}

// ---------------------------------------------------------------------------
// LifecycleCommand
// ---------------------------------------------------------------------------

/// Named argument vectors for one lifecycle hook. A bare string or array is
/// stored under the empty name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LifecycleCommand(pub BTreeMap<String, Vec<String>>);

impl LifecycleCommand {
    pub fn shell(command: &str) -> Vec<String> {
        vec![DEFAULT_SHELL.to_string(), "-c".to_string(), command.to_string()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<const N: usize> From<[(&str, Vec<&str>); N]> for LifecycleCommand {
    fn from(entries: [(&str, Vec<&str>); N]) -> Self {
        LifecycleCommand(
            entries
                .into_iter()
                .map(|(name, args)| (name.to_string(), args.into_iter().map(String::from).collect()))
                .collect(),
        )
    }
}

/// Either a shell string or an argument vector.
struct CommandArgs(Vec<String>);

impl<'de> Deserialize<'de> for CommandArgs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ArgsVisitor;

        impl<'de> Visitor<'de> for ArgsVisitor {
            type Value = CommandArgs;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a command string or an array of strings")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<CommandArgs, E> {
                Ok(CommandArgs(LifecycleCommand::shell(v)))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, seq: A) -> Result<CommandArgs, A::Error> {
                let args = Vec::<String>::deserialize(de::value::SeqAccessDeserializer::new(seq))?;
                Ok(CommandArgs(args))
            }
        }

        deserializer.deserialize_any(ArgsVisitor)
    }
}

impl<'de> Deserialize<'de> for LifecycleCommand {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LifecycleVisitor;

        impl<'de> Visitor<'de> for LifecycleVisitor {
            type Value = LifecycleCommand;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a command string, an array of strings, or an object of named commands")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<LifecycleCommand, E> {
                Ok(LifecycleCommand(BTreeMap::from([(
                    String::new(),
                    LifecycleCommand::shell(v),
                )])))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, seq: A) -> Result<LifecycleCommand, A::Error> {
                let args = Vec::<String>::deserialize(de::value::SeqAccessDeserializer::new(seq))?;
                Ok(LifecycleCommand(BTreeMap::from([(String::new(), args)])))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<LifecycleCommand, A::Error> {
                let mut commands = BTreeMap::new();
                while let Some((name, args)) = map.next_entry::<String, CommandArgs>()? {
                    commands.insert(name, args.0);
                }
                Ok(LifecycleCommand(commands))
            }
        }

        deserializer.deserialize_any(LifecycleVisitor)
    }
}

// ---------------------------------------------------------------------------
// StringArray / AppPort
// ---------------------------------------------------------------------------

/// A string or an array of strings, normalised to a list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StringArray(pub Vec<String>);

impl StringArray {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for StringArray {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct StringArrayVisitor;

        impl<'de> Visitor<'de> for StringArrayVisitor {
            type Value = StringArray;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a string or an array of strings")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<StringArray, E> {
                Ok(StringArray(vec![v.to_string()]))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, seq: A) -> Result<StringArray, A::Error> {
                Vec::<String>::deserialize(de::value::SeqAccessDeserializer::new(seq)).map(StringArray)
            }
        }

        deserializer.deserialize_any(StringArrayVisitor)
    }
}

/// Ports to publish on the loopback interface. Entries are `PORT` or
/// `HOST:CONTAINER`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AppPort(pub Vec<String>);

struct PortEntry(String);

struct PortVisitor;

impl<'de> Visitor<'de> for PortVisitor {
    type Value = PortEntry;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a port number or string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<PortEntry, E> {
        Ok(PortEntry(v.to_string()))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<PortEntry, E> {
        Ok(PortEntry(v.to_string()))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<PortEntry, E> {
        u64::try_from(v)
            .map(|v| PortEntry(v.to_string()))
            .map_err(|_| E::custom(format!("invalid port {v}")))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<PortEntry, E> {
        if v.fract() == 0.0 && v >= 0.0 {
            Ok(PortEntry((v as u64).to_string()))
        } else {
            Err(E::custom(format!("invalid port {v}")))
        }
    }
}

impl<'de> Deserialize<'de> for PortEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(PortVisitor)
    }
}

impl<'de> Deserialize<'de> for AppPort {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AppPortVisitor;

        impl<'de> Visitor<'de> for AppPortVisitor {
            type Value = AppPort;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a port, a port string, or an array of ports")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<AppPort, E> {
                PortVisitor.visit_str(v).map(|p| AppPort(vec![p.0]))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<AppPort, E> {
                PortVisitor.visit_u64(v).map(|p| AppPort(vec![p.0]))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<AppPort, E> {
                PortVisitor.visit_i64(v).map(|p| AppPort(vec![p.0]))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<AppPort, E> {
                PortVisitor.visit_f64(v).map(|p| AppPort(vec![p.0]))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<AppPort, A::Error> {
                let mut ports = Vec::new();
                while let Some(port) = seq.next_element::<PortEntry>()? {
                    ports.push(port.0);
                }
                Ok(AppPort(ports))
            }
        }

        deserializer.deserialize_any(AppPortVisitor)
    }
}
