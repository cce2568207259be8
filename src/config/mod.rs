pub mod devcontainer;
pub mod parser;

pub use devcontainer::{
    AppPort, BuildProps, Customizations, DevContainerConfig, HideCustomization, ImageSource,
    LifecycleCommand, Mount, StringArray, DEFAULT_SHELL,
};
pub use parser::{find_config, load_config, parse_config, parse_jsonc, FoundConfig};
