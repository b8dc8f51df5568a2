use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::EngineError;

/// Where downloaded bytes land: a filesystem path the engine owns, or a
/// file descriptor owned by the host's storage sandbox.
#[derive(Debug, Clone)]
pub enum OutputTarget {
    Path(PathBuf),
    /// Raw descriptor handed across the FFI boundary (SAF on Android).
    Fd(i32),
}

impl OutputTarget {
    pub fn from_request(output_path: &str, output_fd: i32) -> Result<Self, EngineError> {
        if output_fd > 0 {
            return Ok(Self::Fd(output_fd));
        }
        if output_path.trim().is_empty() {
            return Err(EngineError::InvalidRequest(
                "output path or descriptor is required".to_string(),
            ));
        }
        Ok(Self::Path(PathBuf::from(output_path)))
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Path(p) => Some(p),
            Self::Fd(_) => None,
        }
    }

    pub fn is_fd(&self) -> bool {
        matches!(self, Self::Fd(_))
    }

    pub(crate) fn open_for_write(&self) -> Result<File, EngineError> {
        match self {
            Self::Path(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                Ok(File::create(path)?)
            }
            #[cfg(unix)]
            Self::Fd(fd) => {
                use std::os::fd::FromRawFd;
                // Ownership transfers from the host for the duration of one
                // download; the File close returns it.
                Ok(unsafe { File::from_raw_fd(*fd) })
            }
            #[cfg(not(unix))]
            Self::Fd(_) => Err(EngineError::InvalidRequest(
                "fd outputs are only supported on unix targets".to_string(),
            )),
        }
    }

    /// Remove a partial file after failure. Descriptor outputs are left for
    /// the host's sandbox to reclaim; never unlink through an fd.
    pub(crate) fn cleanup_on_error(&self) {
        if let Self::Path(path) = self {
            let text = path.to_string_lossy();
            if text.trim().is_empty() || text.starts_with("/proc/self/fd/") {
                return;
            }
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_mapping() {
        assert!(matches!(
            OutputTarget::from_request("/tmp/x.flac", 0).unwrap(),
            OutputTarget::Path(_)
        ));
        assert!(matches!(
            OutputTarget::from_request("", 7).unwrap(),
            OutputTarget::Fd(7)
        ));
        assert!(OutputTarget::from_request("", 0).is_err());
    }

    #[test]
    fn cleanup_only_touches_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.flac");
        std::fs::write(&path, b"half").unwrap();

        OutputTarget::Path(path.clone()).cleanup_on_error();
        assert!(!path.exists());

        // No-ops that must not panic.
        OutputTarget::Fd(3).cleanup_on_error();
        OutputTarget::Path(PathBuf::from("/proc/self/fd/3")).cleanup_on_error();
    }
}
