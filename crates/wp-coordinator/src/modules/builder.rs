//! Coordinator-side module builds

use tokio::process::Command;

use wp_core::ModuleError;

use super::manifest::ModuleManifest;
use super::options::OptionSet;

/// Run the module's build command in its directory.
///
/// Every option is exported as an environment variable. Returns the
/// combined output; a non-zero exit becomes [`ModuleError::BuildFailure`]
/// carrying that output verbatim.
pub async fn build_module(manifest: &ModuleManifest, options: &OptionSet) -> Result<String, ModuleError> {
    tracing::info!("Building {}...", manifest.name);

    let output = Command::new("sh")
        .arg("-c")
        .arg(&manifest.build)
        .current_dir(&manifest.path)
        .envs(options.iter().map(|(name, option)| (name, option.value.as_str())))
        .kill_on_drop(true)
        .output()
        .await?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        return Err(ModuleError::BuildFailure {
            module: manifest.name.clone(),
            output: combined,
        });
    }
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::manifest::OptionSpec;

    fn manifest(dir: &std::path::Path, build: &str) -> ModuleManifest {
        let mut manifest = ModuleManifest::new("m");
        manifest.path = dir.to_path_buf();
        manifest.build = build.to_string();
        manifest
            .options
            .insert("GREETING".into(), OptionSpec::new("what to say", "hello"));
        manifest
    }

    #[tokio::test]
    async fn test_build_sees_options_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = manifest(dir.path(), "echo $GREETING > out.txt && echo done");
        let options = OptionSet::from_manifest(&manifest);

        let output = build_module(&manifest, &options).await.unwrap();
        assert_eq!(output.trim(), "done");
        let written = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(written.trim(), "hello");
    }

    #[tokio::test]
    async fn test_failed_build_keeps_output() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = manifest(dir.path(), "echo compiling; echo boom >&2; exit 2");
        let options = OptionSet::from_manifest(&manifest);

        match build_module(&manifest, &options).await {
            Err(ModuleError::BuildFailure { module, output }) => {
                assert_eq!(module, "m");
                assert!(output.contains("compiling"));
                assert!(output.contains("boom"));
            }
            other => panic!("expected build failure, got {:?}", other),
        }
    }
}
