//! Cross-process lock on the tunnel state directory
//!
//! Serializes port allocation and record creation between concurrent
//! `ktm` invocations sharing one state directory.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Name of the lock file inside the state directory
pub const LOCK_FILE_NAME: &str = ".lock";

/// Exclusive advisory lock, released on drop
#[derive(Debug)]
pub struct StateLock {
    file: File,
}

impl StateLock {
    /// Block until the lock on `dir` is held
    ///
    /// Creates the directory and lock file if needed.
    pub fn acquire(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(LOCK_FILE_NAME))?;
        lock_exclusive(&file)?;
        Ok(Self { file })
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    loop {
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if result == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> io::Result<()> {
    Ok(())
}

impl Drop for StateLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
    }
}
