//! Module catalogue: built-ins plus manifests found on disk

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use wp_core::ModuleError;

use super::manifest::{ModuleManifest, ModuleSummary, MANIFEST_FILE};
use super::runnable::{BuiltinCommand, RunnableModule};

/// Every module the coordinator can run, by name
#[derive(Debug, Clone)]
pub struct ModuleCatalogue {
    modules: BTreeMap<String, RunnableModule>,
}

impl ModuleCatalogue {
    /// A catalogue holding only the built-in modules
    pub fn with_builtins() -> Self {
        let modules = BuiltinCommand::ALL
            .into_iter()
            .map(|command| (command.name().to_string(), RunnableModule::builtin(command)))
            .collect();
        Self { modules }
    }

    /// Built-ins plus every module found in `module_dirs`.
    ///
    /// Local (plugin) modules are copied into `<workspace_dir>/modules/<name>`
    /// and run from there. Broken modules are skipped with a warning.
    pub fn load(module_dirs: &[PathBuf], workspace_dir: &Path) -> Self {
        let mut catalogue = Self::with_builtins();
        for dir in module_dirs {
            catalogue.load_dir(dir, workspace_dir);
        }
        tracing::info!("Loaded {} modules", catalogue.len());
        catalogue
    }

    fn load_dir(&mut self, dir: &Path, workspace_dir: &Path) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                tracing::error!("Failed to scan {}: {}", dir.display(), e);
                return;
            }
        };
        tracing::debug!("Scanning {} for modules", dir.display());

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() || !path.join(MANIFEST_FILE).is_file() {
                continue;
            }
            match load_module(&path, workspace_dir) {
                Ok(manifest) => {
                    tracing::debug!("Loaded module {:?}", manifest.name);
                    self.register(manifest);
                }
                Err(e) => tracing::warn!("Skipping module in {}: {}", path.display(), e),
            }
        }
    }

    /// Add (or replace) a module
    pub fn register(&mut self, manifest: ModuleManifest) {
        let module = RunnableModule::resolve(manifest);
        self.modules.insert(module.name().to_string(), module);
    }

    pub fn get(&self, name: &str) -> Option<&RunnableModule> {
        self.modules.get(name)
    }

    /// Look up a module or fail with a configuration error
    pub fn resolve(&self, name: &str) -> Result<&RunnableModule, ModuleError> {
        self.get(name)
            .ok_or_else(|| ModuleError::Configuration(format!("no such module: {:?}", name)))
    }

    /// Module names in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Modules whose `"<name>: <comment>"` contains the keyword's
    /// characters in order, ignoring case
    pub fn search(&self, keyword: &str) -> Vec<Arc<ModuleManifest>> {
        self.modules
            .values()
            .map(RunnableModule::manifest)
            .filter(|m| fuzzy_match(keyword, &format!("{}: {}", m.name, m.comment)))
            .cloned()
            .collect()
    }

    /// Summary row for one module
    pub fn details(&self, name: &str) -> Option<ModuleSummary> {
        self.get(name).map(|m| m.manifest().summary())
    }
}

impl Default for ModuleCatalogue {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn load_module(path: &Path, workspace_dir: &Path) -> Result<ModuleManifest, ModuleError> {
    let mut manifest = ModuleManifest::load(path)?;
    if manifest.is_local {
        let dir_name = path
            .file_name()
            .ok_or_else(|| ModuleError::Configuration(format!("bad module path {}", path.display())))?;
        let copy = workspace_dir.join("modules").join(dir_name);
        if copy != path {
            copy_dir(path, &copy)?;
            manifest.path = copy;
        }
    }
    Ok(manifest)
}

fn copy_dir(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

fn fuzzy_match(keyword: &str, text: &str) -> bool {
    let mut text = text.chars().flat_map(char::to_lowercase);
    keyword
        .chars()
        .flat_map(char::to_lowercase)
        .all(|k| text.any(|c| c == k))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_module(root: &Path, name: &str, body: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(MANIFEST_FILE), body).unwrap();
        std::fs::write(dir.join("payload.sh"), "echo hi").unwrap();
    }

    #[test]
    fn test_fuzzy_match() {
        assert!(fuzzy_match("pfwd", "port_fwd: Forward ports"));
        assert!(fuzzy_match("PORT", "port_fwd: x"));
        assert!(!fuzzy_match("dwfp", "port_fwd: x"));
        assert!(fuzzy_match("", "anything"));
    }

    #[test]
    fn test_load_skips_broken_modules() {
        let modules = tempfile::tempdir().unwrap();
        let workspace = tempfile::tempdir().unwrap();
        write_module(modules.path(), "good", r#"{"name": "good", "comment": "works"}"#);
        write_module(modules.path(), "broken", "{ not json");
        write_module(
            modules.path(),
            "undocumented",
            r#"{"name": "undocumented", "options": {"x": {"val": "1"}}}"#,
        );

        let catalogue = ModuleCatalogue::load(&[modules.path().to_path_buf()], workspace.path());
        assert!(catalogue.get("good").is_some());
        assert!(catalogue.get("broken").is_none());
        assert!(catalogue.get("undocumented").is_none());
        assert!(catalogue.get("port_fwd").is_some());
        assert_eq!(catalogue.len(), BuiltinCommand::ALL.len() + 1);
    }

    #[test]
    fn test_local_module_copied_to_workspace() {
        let modules = tempfile::tempdir().unwrap();
        let workspace = tempfile::tempdir().unwrap();
        write_module(modules.path(), "plug", r#"{"name": "plug", "isLocal": true}"#);

        let catalogue = ModuleCatalogue::load(&[modules.path().to_path_buf()], workspace.path());
        let module = catalogue.get("plug").unwrap();
        assert!(matches!(module, RunnableModule::Plugin(_)));
        assert_eq!(module.manifest().path, workspace.path().join("modules").join("plug"));
        assert!(workspace.path().join("modules/plug/payload.sh").is_file());
    }

    #[test]
    fn test_search_and_details() {
        let catalogue = ModuleCatalogue::with_builtins();
        let found: Vec<_> = catalogue.search("proxy").iter().map(|m| m.name.clone()).collect();
        assert_eq!(found, vec!["proxy"]);

        let details = catalogue.details("cmd_exec").unwrap();
        assert_eq!(details.exec, "built-in");
        assert!(catalogue.details("nope").is_none());
        assert!(catalogue.resolve("nope").is_err());
    }
}
