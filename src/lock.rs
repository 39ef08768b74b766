//! A filesystem lock guarding concurrent full index rebuilds: a sibling
//! `.lock` file created exclusively (`create_new`) holding the locking
//! process's PID, removed automatically when the guard drops.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

pub struct RebuildLock {
    path: PathBuf,
}

impl RebuildLock {
    /// Acquire the lock at `<state_dir>/<name>.lock`, failing if another
    /// process already holds it.
    pub fn acquire(state_dir: &Path, name: &str) -> Result<Self> {
        fs::create_dir_all(state_dir)?;
        let path = state_dir.join(format!("{name}.lock"));

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("{} is already locked by another process", path.display()))?;

        writeln!(file, "{}", std::process::id())?;
        Ok(Self { path })
    }

    /// Same as `acquire`, but if the lock file exists and its PID is no
    /// longer running, steals it instead of failing — guards against a
    /// crashed process leaving a stale lock behind forever.
    pub fn acquire_or_steal_stale(state_dir: &Path, name: &str) -> Result<Self> {
        fs::create_dir_all(state_dir)?;
        let path = state_dir.join(format!("{name}.lock"));

        if path.exists() {
            let held_pid = fs::read_to_string(&path)
                .ok()
                .and_then(|s| s.trim().parse::<u32>().ok());
            let alive = held_pid
                .map(|pid| Path::new(&format!("/proc/{pid}")).exists())
                .unwrap_or(false);
            if !alive {
                fs::remove_file(&path).ok();
            } else {
                bail!("{} is held by running process {:?}", path.display(), held_pid);
            }
        }

        Self::acquire(state_dir, name)
    }
}

impl Drop for RebuildLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
