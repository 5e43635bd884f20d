//! Copy a directory tree into another while honouring a deny-list of paths.

use crate::process::run_process;
use crate::RuntimeError;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Add and overwrite only. Used to populate a fresh stage.
    Copy,
    /// Also delete destination entries absent from the source. Used when
    /// syncing a stage back into the active directory.
    Mirror,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    pub copied: usize,
    pub deleted: usize,
}

/// Excluded paths are relative to both roots; an exclusion covers the path
/// itself and everything below it.
fn is_excluded(rel: &Path, excluded: &[PathBuf]) -> bool {
    excluded.iter().any(|ex| rel.starts_with(ex))
}

struct Walker<'a> {
    src_root: &'a Path,
    dest_root: &'a Path,
    excluded: &'a [PathBuf],
    started: Instant,
    timeout: Duration,
    stats: SyncStats,
}

impl Walker<'_> {
    fn check_deadline(&self) -> Result<(), RuntimeError> {
        if self.started.elapsed() >= self.timeout {
            return Err(RuntimeError::Timeout {
                command: format!(
                    "sync {} -> {}",
                    self.src_root.display(),
                    self.dest_root.display()
                ),
                timeout: self.timeout,
            });
        }
        Ok(())
    }

    fn copy_dir(&mut self, rel: &Path) -> Result<(), RuntimeError> {
        for entry in fs::read_dir(self.src_root.join(rel))? {
            let entry = entry?;
            let child_rel = rel.join(entry.file_name());
            if is_excluded(&child_rel, self.excluded) {
                continue;
            }
            self.check_deadline()?;

            let ft = entry.file_type()?;
            let dest = self.dest_root.join(&child_rel);
            let existing = fs::symlink_metadata(&dest).ok();

            if ft.is_dir() {
                match existing {
                    Some(m) if m.is_dir() => {}
                    Some(_) => {
                        fs::remove_file(&dest)?;
                        fs::create_dir(&dest)?;
                    }
                    None => fs::create_dir(&dest)?,
                }
                self.copy_dir(&child_rel)?;
            } else {
                if let Some(m) = existing {
                    if m.is_dir() {
                        fs::remove_dir_all(&dest)?;
                    } else if ft.is_symlink() || m.file_type().is_symlink() {
                        fs::remove_file(&dest)?;
                    }
                }
                if ft.is_symlink() {
                    copy_symlink(&entry.path(), &dest)?;
                } else {
                    fs::copy(entry.path(), &dest)?;
                }
                self.stats.copied += 1;
            }
        }
        Ok(())
    }

    fn delete_extraneous(&mut self, rel: &Path) -> Result<(), RuntimeError> {
        for entry in fs::read_dir(self.dest_root.join(rel))? {
            let entry = entry?;
            let child_rel = rel.join(entry.file_name());
            if is_excluded(&child_rel, self.excluded) {
                continue;
            }
            self.check_deadline()?;

            let ft = entry.file_type()?;
            match fs::symlink_metadata(self.src_root.join(&child_rel)) {
                Err(_) => {
                    if ft.is_dir() {
                        fs::remove_dir_all(entry.path())?;
                    } else {
                        fs::remove_file(entry.path())?;
                    }
                    self.stats.deleted += 1;
                }
                Ok(m) if m.is_dir() && ft.is_dir() => self.delete_extraneous(&child_rel)?,
                Ok(_) => {}
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dest: &Path) -> Result<(), RuntimeError> {
    let target = fs::read_link(src)?;
    std::os::unix::fs::symlink(target, dest)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dest: &Path) -> Result<(), RuntimeError> {
    fs::copy(src, dest)?;
    Ok(())
}

/// Natively sync `src` into `dest`, skipping `excluded` on both sides.
pub fn sync_tree(
    src: &Path,
    dest: &Path,
    excluded: &[PathBuf],
    mode: SyncMode,
    timeout: Duration,
) -> Result<SyncStats, RuntimeError> {
    if !src.is_dir() {
        return Err(RuntimeError::SyncFailed(format!(
            "source is not a directory: {}",
            src.display()
        )));
    }
    fs::create_dir_all(dest)?;

    let mut walker = Walker {
        src_root: src,
        dest_root: dest,
        excluded,
        started: Instant::now(),
        timeout,
        stats: SyncStats::default(),
    };
    walker.copy_dir(Path::new(""))?;
    if mode == SyncMode::Mirror {
        walker.delete_extraneous(Path::new(""))?;
    }
    debug!(
        "synced {} -> {} ({} copied, {} deleted)",
        src.display(),
        dest.display(),
        walker.stats.copied,
        walker.stats.deleted
    );
    Ok(walker.stats)
}

/// Build the `rsync` argument list equivalent to [`sync_tree`].
pub fn rsync_args(src: &Path, dest: &Path, excluded: &[PathBuf], mode: SyncMode) -> Vec<String> {
    let mut args = vec!["--archive".to_owned(), "--quiet".to_owned()];
    if mode == SyncMode::Mirror {
        args.push("--delete".to_owned());
    }
    for ex in excluded {
        args.push(format!("--exclude=/{}", ex.display()));
    }
    args.push(format!("{}/", src.display()));
    args.push(format!("{}/", dest.display()));
    args
}

pub fn rsync_tree(
    rsync: &str,
    src: &Path,
    dest: &Path,
    excluded: &[PathBuf],
    mode: SyncMode,
    timeout: Duration,
) -> Result<(), RuntimeError> {
    fs::create_dir_all(dest)?;
    run_process(
        rsync,
        &rsync_args(src, dest, excluded, mode),
        src,
        timeout,
        &[],
    )?;
    Ok(())
}
