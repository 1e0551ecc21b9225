//! All-or-nothing artifact persistence.
//!
//! Artifacts are written into a hidden staging directory next to the target and
//! only moved into place by [`StagedDir::commit`]. Dropping an uncommitted
//! stage removes it, so a failed or cancelled run leaves nothing behind.

use crate::core::error::ResolverError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use ulid::Ulid;

/// Pretty JSON with a trailing newline; the byte form of every artifact.
pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<Vec<u8>, ResolverError> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

fn sibling_path(target: &Path, tag: &str) -> Result<PathBuf, ResolverError> {
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            ResolverError::ValidationError(format!(
                "output path has no file name: {}",
                target.display()
            ))
        })?;
    let parent = target.parent().unwrap_or_else(|| Path::new(""));
    Ok(parent.join(format!(".{}.{}-{}", name, tag, Ulid::new())))
}

/// Write a single JSON file via temp file + rename.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ResolverError> {
    let bytes = to_pretty_json(value)?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let tmp = sibling_path(path, "tmp")?;
    if let Err(e) = fs::write(&tmp, &bytes) {
        let _ = fs::remove_file(&tmp);
        return Err(ResolverError::IoError(e));
    }
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        ResolverError::IoError(e)
    })
}

pub struct StagedDir {
    target: PathBuf,
    staging: PathBuf,
    /// relative path -> owner, for collision detection and commit order
    written: BTreeMap<PathBuf, String>,
    committed: bool,
}

impl StagedDir {
    pub fn create(target: &Path) -> Result<Self, ResolverError> {
        let staging = sibling_path(target, "staging")?;
        if let Some(parent) = staging.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::create_dir(&staging)?;
        Ok(StagedDir {
            target: target.to_path_buf(),
            staging,
            written: BTreeMap::new(),
            committed: false,
        })
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Relative paths staged so far, in commit order.
    pub fn staged_files(&self) -> impl Iterator<Item = &Path> {
        self.written.keys().map(|p| p.as_path())
    }

    /// Stage `value` at `rel`. Two different owners claiming one path is a
    /// collision; the same owner rewriting its own file is allowed.
    pub fn write_json<T: Serialize>(
        &mut self,
        rel: &Path,
        value: &T,
        owner: &str,
    ) -> Result<(), ResolverError> {
        if rel.is_absolute()
            || rel.components().any(|c| c.as_os_str() == "..")
            || rel.starts_with(REPLACED_DIR)
        {
            return Err(ResolverError::ValidationError(format!(
                "staged path must stay inside the output: {}",
                rel.display()
            )));
        }
        if let Some(existing) = self.written.get(rel)
            && existing != owner
        {
            return Err(ResolverError::FileCollision {
                path: rel.display().to_string(),
                first: existing.clone(),
                second: owner.to_string(),
            });
        }
        let full = self.staging.join(rel);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&full, to_pretty_json(value)?)?;
        self.written.insert(rel.to_path_buf(), owner.to_string());
        Ok(())
    }

    /// Move staged files into the target.
    ///
    /// A missing target receives the whole staging directory in one rename.
    /// An existing target keeps unrelated files; staged files replace
    /// same-named ones. Destinations are checked before anything moves, and a
    /// rename failing midway puts every moved and replaced file back.
    pub fn commit(mut self) -> Result<PathBuf, ResolverError> {
        if !self.target.exists() {
            fs::rename(&self.staging, &self.target)?;
        } else {
            self.check_destinations()?;
            let mut journal = CommitJournal::default();
            for rel in self.written.keys() {
                if let Err(e) = self.move_in(rel, &mut journal) {
                    journal.rollback();
                    return Err(e);
                }
            }
            fs::remove_dir_all(&self.staging)?;
        }
        self.committed = true;
        Ok(self.target.clone())
    }

    fn check_destinations(&self) -> Result<(), ResolverError> {
        for (rel, owner) in &self.written {
            let dest = self.target.join(rel);
            if fs::symlink_metadata(&dest).is_ok_and(|m| m.is_dir()) {
                return Err(ResolverError::FileCollision {
                    path: dest.display().to_string(),
                    first: "existing directory".to_string(),
                    second: owner.clone(),
                });
            }
            for ancestor in rel.ancestors().skip(1) {
                if ancestor.as_os_str().is_empty() {
                    continue;
                }
                let dir = self.target.join(ancestor);
                if fs::metadata(&dir).is_ok_and(|m| !m.is_dir()) {
                    return Err(ResolverError::FileCollision {
                        path: dir.display().to_string(),
                        first: "existing file".to_string(),
                        second: owner.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn move_in(&self, rel: &Path, journal: &mut CommitJournal) -> Result<(), ResolverError> {
        let dest = self.target.join(rel);
        let staged = self.staging.join(rel);
        if let Some(parent) = dest.parent() {
            journal.ensure_dir(parent)?;
        }
        if fs::symlink_metadata(&dest).is_ok() {
            let backup = self.staging.join(REPLACED_DIR).join(rel);
            if let Some(parent) = backup.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(&dest, &backup)?;
            journal.replaced.push((backup, dest.clone()));
        }
        fs::rename(&staged, &dest)?;
        journal.placed.push((dest, staged));
        Ok(())
    }
}

/// Files displaced from an existing target wait here until commit finishes.
const REPLACED_DIR: &str = ".replaced";

/// Undo log for a commit into an existing target.
#[derive(Debug, Default)]
struct CommitJournal {
    created_dirs: Vec<PathBuf>,
    /// (backup, original location)
    replaced: Vec<(PathBuf, PathBuf)>,
    /// (location in target, staged location)
    placed: Vec<(PathBuf, PathBuf)>,
}

impl CommitJournal {
    fn ensure_dir(&mut self, dir: &Path) -> Result<(), ResolverError> {
        let missing: Vec<&Path> = dir
            .ancestors()
            .take_while(|d| !d.as_os_str().is_empty() && !d.exists())
            .collect();
        for d in missing.into_iter().rev() {
            fs::create_dir(d)?;
            self.created_dirs.push(d.to_path_buf());
        }
        Ok(())
    }

    fn rollback(self) {
        for (dest, staged) in self.placed.iter().rev() {
            let _ = fs::rename(dest, staged);
        }
        for (backup, dest) in self.replaced.iter().rev() {
            let _ = fs::rename(backup, dest);
        }
        for dir in self.created_dirs.iter().rev() {
            let _ = fs::remove_dir(dir);
        }
    }
}

impl Drop for StagedDir {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_dir_all(&self.staging);
        }
    }
}
