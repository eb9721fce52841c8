//! Cross-process serialization for plugin installers. Installing a plugin writes a file at a
//! platform-conventional cache location; concurrent processes electing to auto-install must
//! not race on it. The contract: a stat of the target short-circuits when it is already
//! installed, otherwise an exclusive lock on `<target>.lock` is polled with a bounded timeout
//! and held while the installer runs.

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::Error;

/// Default period between attempts to acquire the installation lock.
pub const RETRY_LOCK_PERIOD: Duration = Duration::from_millis(1000);

/// Default bound on how long to wait for the installation lock before reporting
/// [`Error::LockTimeout`].
pub const INSTALL_LOCK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Outcome of [`acquire_install_lock`].
#[derive(Debug)]
pub enum InstallLockStatus {
    /// The target file already exists; no installation is needed and no lock was taken.
    AlreadyInstalled,
    /// The lock was acquired; the caller should install the target and then drop the lock.
    Acquired(InstallLock),
}

/// An exclusive advisory lock on `<target>.lock`, released on drop. The lock file itself is
/// left on disk.
#[derive(Debug)]
pub struct InstallLock {
    file: File,
    lock_path: PathBuf,
}

impl InstallLock {
    /// Path of the lock file backing this lock.
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        let result = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        if result != 0 {
            tracing::warn!(
                lock = %self.lock_path.display(),
                "failed to release the installation lock; remove the lock file manually if it goes stale"
            );
        }
    }
}

/// Checks whether `target` is already installed and otherwise acquires the installation lock
/// for it, using the default poll period and timeout.
pub fn acquire_install_lock(target: &Path) -> Result<InstallLockStatus, Error> {
    acquire_install_lock_with(target, RETRY_LOCK_PERIOD, INSTALL_LOCK_TIMEOUT)
}

/// Like [`acquire_install_lock`] with an explicit poll period and timeout bound.
pub fn acquire_install_lock_with(
    target: &Path,
    retry_period: Duration,
    timeout: Duration,
) -> Result<InstallLockStatus, Error> {
    // Already installed? Nothing to lock.
    match std::fs::metadata(target) {
        Ok(_) => return Ok(InstallLockStatus::AlreadyInstalled),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => {
            return Err(Error::unknown(format!(
                "failed to stat install target '{}': {error}",
                target.display()
            )));
        }
    }

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|error| {
            Error::unknown(format!(
                "failed to create install directory '{}': {error}",
                parent.display()
            ))
        })?;
    }

    let lock_path = PathBuf::from(format!("{}.lock", target.display()));
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(|error| {
            Error::unknown(format!("failed to open lock file '{}': {error}", lock_path.display()))
        })?;

    let deadline = Instant::now() + timeout;
    loop {
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(InstallLockStatus::Acquired(InstallLock { file, lock_path }));
        }
        let errno = std::io::Error::last_os_error();
        if errno.kind() != std::io::ErrorKind::WouldBlock {
            return Err(Error::unknown(format!(
                "failed to acquire lock '{}': {errno}",
                lock_path.display()
            )));
        }
        if Instant::now() >= deadline {
            return Err(Error::lock_timeout(lock_path.display().to_string()));
        }
        std::thread::sleep(retry_period.min(deadline.saturating_duration_since(Instant::now())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static UNIQUE: AtomicUsize = AtomicUsize::new(0);

    fn scratch_target(name: &str) -> PathBuf {
        let unique = UNIQUE.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "sable-install-{}-{unique}-{name}",
            std::process::id()
        ))
    }

    #[test]
    fn test_already_installed_short_circuits() {
        let target = scratch_target("installed");
        std::fs::write(&target, b"plugin bytes").unwrap();
        let status = acquire_install_lock(&target).unwrap();
        assert!(matches!(status, InstallLockStatus::AlreadyInstalled));
        std::fs::remove_file(&target).unwrap();
    }

    #[test]
    fn test_lock_acquire_and_release() {
        let target = scratch_target("missing");
        let status = acquire_install_lock(&target).unwrap();
        let lock = match status {
            InstallLockStatus::Acquired(lock) => lock,
            InstallLockStatus::AlreadyInstalled => panic!("target does not exist"),
        };
        assert!(lock.lock_path().exists());

        // A second contender times out while the lock is held.
        let error = acquire_install_lock_with(
            &target,
            Duration::from_millis(10),
            Duration::from_millis(50),
        )
        .unwrap_err();
        assert!(matches!(error, Error::LockTimeout { .. }));

        // After release, the lock can be re-acquired immediately.
        drop(lock);
        let status = acquire_install_lock_with(
            &target,
            Duration::from_millis(10),
            Duration::from_millis(500),
        )
        .unwrap();
        assert!(matches!(status, InstallLockStatus::Acquired(_)));
    }
}
