//! Advisory lock on the index file for other processes.
//!
//! Held for the whole read-merge-write. Acquisition blocks; contention is
//! logged once.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Exclusive advisory lock, released on drop.
#[derive(Debug)]
pub struct IndexLock {
    path: PathBuf,
    _file: File,
}

impl IndexLock {
    /// Lock file used for `index_path`: `index.yaml` locks `index.yaml.lock`.
    pub fn lock_path(index_path: &Path) -> PathBuf {
        let mut name = index_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        index_path.with_file_name(name)
    }

    /// Block until the lock for `index_path` is held.
    pub fn acquire(index_path: &Path) -> io::Result<Self> {
        let path = Self::lock_path(index_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        lock_exclusive(&file, &path)?;
        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File, path: &Path) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    use std::time::Instant;

    let fd = file.as_raw_fd();
    if unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) } == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() != Some(libc::EWOULDBLOCK) {
        return Err(err);
    }

    tracing::warn!(lock = %path.display(), "index is locked by another process, waiting");
    let start = Instant::now();
    loop {
        if unsafe { libc::flock(fd, libc::LOCK_EX) } == 0 {
            break;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
    tracing::info!(
        lock = %path.display(),
        waited_secs = start.elapsed().as_secs_f64(),
        "index lock acquired after contention"
    );
    Ok(())
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File, path: &Path) -> io::Result<()> {
    tracing::debug!(lock = %path.display(), "advisory locking unavailable on this platform");
    Ok(())
}
