//! Modules: manifests, catalogue, packaging and the execution engine

mod builder;
mod builtin;
mod catalogue;
mod engine;
mod manifest;
mod options;
mod packaging;
mod runnable;

pub use builder::build_module;
pub use catalogue::ModuleCatalogue;
pub use engine::{EngineDeps, EngineSettings, EngineState, ModuleEngine};
pub use manifest::{
    AgentSideConfig, ModuleManifest, ModuleSummary, OptionSpec, BUILTIN_EXEC, GENERIC_PLATFORM,
    MANIFEST_FILE,
};
pub use options::{parse_env_str, OptionSet, OptionValue, DOWNLOAD_ADDR, INTERACTIVE_ARGS};
pub use packaging::{sha256_file, sha256_hex, stage_archive, stage_in_memory, StagedPayload};
pub use runnable::{BuiltinCommand, RunnableModule};
