//! Staging module payloads under the web root

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};

use wp_core::ModuleError;

use super::manifest::ModuleManifest;

/// A payload file agents can download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedPayload {
    /// Full path under the web root
    pub path: PathBuf,
    /// File name agents request
    pub file_name: String,
    /// SHA-256 of the hosted file, hex
    pub checksum: String,
    /// An existing archive was used as is
    pub reused: bool,
}

impl StagedPayload {
    fn new(path: PathBuf, reused: bool) -> Result<Self, ModuleError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ModuleError::Configuration(format!("bad payload path {}", path.display())))?;
        let checksum = sha256_file(&path)?;
        Ok(Self {
            path,
            file_name,
            checksum,
            reused,
        })
    }
}

/// SHA-256 hex digest of a file, read in 64 KB chunks
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 65536];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// SHA-256 hex digest of a string
pub fn sha256_hex(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// Write through a temp file so readers never see a partial payload
fn write_atomically(
    dest: &Path,
    write: impl FnOnce(File) -> std::io::Result<()>,
) -> std::io::Result<()> {
    let tmp = dest.with_extension("partial");
    let result = File::create(&tmp).and_then(write);
    match result {
        Ok(()) => std::fs::rename(&tmp, dest),
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            Err(e)
        }
    }
}

/// Compress the module's single declared file to `<www_root>/<name>.gz`
pub fn stage_in_memory(manifest: &ModuleManifest, www_root: &Path) -> Result<StagedPayload, ModuleError> {
    let file = manifest.agent.files.first().ok_or_else(|| {
        ModuleError::Configuration(format!(
            "no files found for module {} in {}",
            manifest.name,
            manifest.path.display()
        ))
    })?;
    let data = std::fs::read(manifest.path.join(file))?;

    std::fs::create_dir_all(www_root)?;
    let hosted = www_root.join(format!("{}.gz", manifest.name));
    tracing::info!("Compressing {} for in-memory delivery...", manifest.name);
    write_atomically(&hosted, |out| {
        let mut encoder = GzEncoder::new(out, Compression::best());
        encoder.write_all(&data)?;
        encoder.finish()?.sync_all()
    })?;

    let staged = StagedPayload::new(hosted, false)?;
    tracing::info!(
        "Created {:.4}MB payload ({}) for module '{}'",
        file_size_mb(&staged.path),
        staged.path.display(),
        manifest.name
    );
    Ok(staged)
}

/// Pack the module directory into `<www_root>/<name>.tar.gz`.
///
/// An archive already at that path is reused without recompressing;
/// module content is assumed stable for the life of the process.
pub fn stage_archive(manifest: &ModuleManifest, www_root: &Path) -> Result<StagedPayload, ModuleError> {
    let archive = www_root.join(format!("{}.tar.gz", manifest.name));
    if archive.is_file() {
        tracing::info!("Using cached {}", archive.display());
        return StagedPayload::new(archive, true);
    }

    std::fs::create_dir_all(www_root)?;
    tracing::info!("Compressing {} with tar.gz...", manifest.name);
    write_atomically(&archive, |out| {
        let encoder = GzEncoder::new(out, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);
        builder.append_dir_all(&manifest.name, &manifest.path)?;
        builder.into_inner()?.finish()?.sync_all()
    })?;

    let staged = StagedPayload::new(archive, false)?;
    tracing::info!(
        "Created {:.4}MB archive ({}) for module '{}'",
        file_size_mb(&staged.path),
        staged.path.display(),
        manifest.name
    );
    Ok(staged)
}

fn file_size_mb(path: &Path) -> f64 {
    std::fs::metadata(path)
        .map(|m| m.len() as f64 / 1024.0 / 1024.0)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;

    fn module(dir: &Path) -> ModuleManifest {
        std::fs::write(dir.join("x.bin"), b"\x7fELF payload").unwrap();
        std::fs::write(dir.join("run.sh"), "./x.bin").unwrap();
        let mut manifest = ModuleManifest::new("m");
        manifest.path = dir.to_path_buf();
        manifest.agent.files = vec!["x.bin".into()];
        manifest
    }

    #[test]
    fn test_in_memory_payload_round_trips() {
        let src = tempfile::tempdir().unwrap();
        let www = tempfile::tempdir().unwrap();
        let staged = stage_in_memory(&module(src.path()), www.path()).unwrap();

        assert_eq!(staged.file_name, "m.gz");
        assert_eq!(staged.checksum, sha256_file(&staged.path).unwrap());

        let mut decoded = Vec::new();
        GzDecoder::new(File::open(&staged.path).unwrap())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, b"\x7fELF payload");
    }

    #[test]
    fn test_in_memory_needs_a_file() {
        let src = tempfile::tempdir().unwrap();
        let www = tempfile::tempdir().unwrap();
        let mut manifest = module(src.path());
        manifest.agent.files.clear();
        assert!(matches!(
            stage_in_memory(&manifest, www.path()),
            Err(ModuleError::Configuration(_))
        ));
    }

    #[test]
    fn test_archive_reused_when_present() {
        let src = tempfile::tempdir().unwrap();
        let www = tempfile::tempdir().unwrap();
        let manifest = module(src.path());

        let first = stage_archive(&manifest, www.path()).unwrap();
        assert!(!first.reused);
        let modified = std::fs::metadata(&first.path).unwrap().modified().unwrap();

        let second = stage_archive(&manifest, www.path()).unwrap();
        assert!(second.reused);
        assert_eq!(first.checksum, second.checksum);
        assert_eq!(std::fs::metadata(&second.path).unwrap().modified().unwrap(), modified);
    }

    #[test]
    fn test_archive_contains_module_dir() {
        let src = tempfile::tempdir().unwrap();
        let www = tempfile::tempdir().unwrap();
        let staged = stage_archive(&module(src.path()), www.path()).unwrap();

        let mut archive = tar::Archive::new(GzDecoder::new(File::open(&staged.path).unwrap()));
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n == "m/x.bin"));
        assert!(names.iter().any(|n| n == "m/run.sh"));
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
