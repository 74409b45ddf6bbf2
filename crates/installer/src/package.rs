//! Package unpacking into a staging directory.

use std::{
    io::Read,
    path::{Component, Path, PathBuf},
};

use {
    jamra_extensions::manifest::MANIFEST_FILE,
    serde_json::json,
    sha2::{Digest, Sha256},
    tempfile::TempDir,
    tracing::warn,
};

use crate::{
    error::{Context, Error, Result},
    index::IndexEntry,
};

pub const PACKAGE_JSON: &str = "package.json";

/// An unpacked package waiting to be validated and moved into place.
/// Dropping it deletes whatever is still in the staging directory.
#[derive(Debug)]
pub struct StagedPackage {
    dir: TempDir,
    /// Relative `/`-separated paths, sorted.
    pub files: Vec<String>,
}

impl StagedPackage {
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    #[must_use]
    pub fn contains(&self, file: &str) -> bool {
        self.files.binary_search_by(|f| f.as_str().cmp(file)).is_ok()
    }

    fn add_file(&mut self, file: &str) {
        if let Err(pos) = self.files.binary_search_by(|f| f.as_str().cmp(file)) {
            self.files.insert(pos, file.to_string());
        }
    }

    /// Write a `manifest.json` derived from the index entry when the package
    /// ships without one.
    pub fn ensure_manifest(&mut self, entry: &IndexEntry) -> Result<()> {
        if self.contains(MANIFEST_FILE) {
            return Ok(());
        }
        let declared = normalize_relative(&entry.entrypoint);
        let compiled = compiled_entry(&declared)
            .filter(|js| self.contains(js))
            .unwrap_or(declared);
        let manifest = json!({
            "id": entry.id,
            "name": entry.name,
            "version": entry.version,
            "entry": compiled,
            "author": entry.author,
            "description": entry.description,
            "language": entry.language,
        });
        std::fs::write(
            self.path().join(MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest)?,
        )?;
        self.add_file(MANIFEST_FILE);
        Ok(())
    }

    /// Write a `package.json` carrying the entry's declared dependencies.
    pub fn ensure_package_json(&mut self, entry: &IndexEntry) -> Result<()> {
        if entry.dependencies.is_empty() || self.contains(PACKAGE_JSON) {
            return Ok(());
        }
        let package = json!({
            "name": entry.id,
            "version": entry.version,
            "dependencies": entry.dependencies,
        });
        std::fs::write(
            self.path().join(PACKAGE_JSON),
            serde_json::to_string_pretty(&package)?,
        )?;
        self.add_file(PACKAGE_JSON);
        Ok(())
    }

    /// Move the staged tree to `dest`, replacing anything already there.
    pub fn persist(self, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let previous = if dest.exists() {
            let aside = set_aside_path(dest);
            std::fs::rename(dest, &aside).with_context(|| {
                format!("failed to move previous install {} aside", dest.display())
            })?;
            Some(aside)
        } else {
            None
        };

        if let Err(e) = std::fs::rename(self.dir.path(), dest) {
            if let Some(aside) = &previous
                && let Err(restore) = std::fs::rename(aside, dest)
            {
                warn!(
                    path = %aside.display(),
                    error = %restore,
                    "failed to restore previous install"
                );
            }
            return Err::<(), _>(e).with_context(|| {
                format!(
                    "failed to move {} to {}",
                    self.dir.path().display(),
                    dest.display()
                )
            });
        }

        if let Some(aside) = previous
            && let Err(e) = std::fs::remove_dir_all(&aside)
        {
            warn!(path = %aside.display(), error = %e, "failed to remove previous install");
        }
        Ok(())
    }
}

/// Hidden sibling of `dest` that bootstrap scans skip.
fn set_aside_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{name}.previous-{}", uuid::Uuid::new_v4().simple()))
}

/// Hex sha256 of the downloaded package.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Unpack a gzip tarball into a fresh directory under `staging_root`.
///
/// Only regular files are extracted. Absolute paths and `..` abort the
/// unpack. A directory shared by every file is stripped unless the
/// `entrypoint` already resolves without stripping it.
pub fn unpack(bytes: &[u8], staging_root: &Path, entrypoint: &str) -> Result<StagedPackage> {
    std::fs::create_dir_all(staging_root)?;
    let dir = tempfile::Builder::new()
        .prefix("pkg-")
        .tempdir_in(staging_root)
        .with_context(|| format!("failed to create staging dir in {}", staging_root.display()))?;

    let decoder = flate2::read::GzDecoder::new(bytes);
    let mut archive = tar::Archive::new(decoder);
    let mut entries: Vec<(PathBuf, Vec<u8>)> = Vec::new();
    for entry in archive
        .entries()
        .context("failed to read extension package")?
    {
        let mut entry = entry.context("failed to read extension package")?;
        let entry_type = entry.header().entry_type();
        if !entry_type.is_file() {
            if entry_type.is_symlink() || entry_type.is_hard_link() {
                warn!(path = ?entry.path().ok(), "skipping link entry in extension package");
            }
            continue;
        }
        let path = entry.path()?.into_owned();
        let Some(relative) = sanitize_archive_path(&path)? else {
            continue;
        };
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;
        entries.push((relative, contents));
    }

    let entrypoint = PathBuf::from(normalize_relative(entrypoint));
    let entry_at_root = entries.iter().any(|(path, _)| *path == entrypoint);
    if !entry_at_root && let Some(prefix) = shared_top_dir(&entries) {
        for (path, _) in &mut entries {
            if let Ok(stripped) = path.strip_prefix(&prefix) {
                *path = stripped.to_path_buf();
            }
        }
    }

    let canonical_root = std::fs::canonicalize(dir.path())?;
    let mut files = Vec::with_capacity(entries.len());
    for (relative, contents) in entries {
        let dest = dir.path().join(&relative);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
            let canonical_parent = std::fs::canonicalize(parent)?;
            if !canonical_parent.starts_with(&canonical_root) {
                return Err(Error::validation(format!(
                    "archive entry escaped staging directory: {}",
                    relative.display()
                )));
            }
        }
        std::fs::write(&dest, contents)?;
        files.push(to_slash(&relative));
    }
    files.sort();
    files.dedup();

    Ok(StagedPackage { dir, files })
}

fn sanitize_archive_path(path: &Path) -> Result<Option<PathBuf>> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {},
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::validation(format!(
                    "archive contains unsafe path component: {}",
                    path.display()
                )));
            },
        }
    }
    if clean.as_os_str().is_empty() {
        return Ok(None);
    }
    Ok(Some(clean))
}

fn shared_top_dir(entries: &[(PathBuf, Vec<u8>)]) -> Option<PathBuf> {
    let mut shared: Option<&std::ffi::OsStr> = None;
    for (path, _) in entries {
        let mut components = path.components();
        let first = components.next()?;
        components.next()?;
        match shared {
            None => shared = Some(first.as_os_str()),
            Some(existing) if existing == first.as_os_str() => {},
            Some(_) => return None,
        }
    }
    shared.map(PathBuf::from)
}

fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Strip a leading `./` and any backslashes from an entry path.
#[must_use]
pub fn normalize_relative(path: &str) -> String {
    let path = path.replace('\\', "/");
    let mut path = path.as_str();
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    path.trim_start_matches('/').to_string()
}

fn compiled_entry(entry: &str) -> Option<String> {
    let stem = entry
        .strip_suffix(".tsx")
        .or_else(|| entry.strip_suffix(".ts"))?;
    Some(format!("{stem}.js"))
}
