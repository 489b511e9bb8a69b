//! Host path translation for container bind mounts

use std::path::Path;

/// Host platform, as far as bind mount sources are concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    /// Paths are passed to the runtime unchanged
    Unix,
    /// Drive paths are rewritten to the `/c/...` form the runtime expects
    Windows,
}

impl HostPlatform {
    /// Platform of the running host
    pub fn current() -> Self {
        if cfg!(windows) {
            HostPlatform::Windows
        } else {
            HostPlatform::Unix
        }
    }

    /// Bind mount source for a host directory
    pub fn bind_source(&self, dir: &Path) -> String {
        let dir = dir.to_string_lossy();
        match self {
            HostPlatform::Unix => dir.into_owned(),
            HostPlatform::Windows => windows_bind_source(&dir),
        }
    }

    /// Full bind specification mounting `dir` read-only at `target`
    pub fn read_only_bind(&self, dir: &Path, target: &str) -> String {
        format!("{}:{target}:ro", self.bind_source(dir))
    }
}

/// `C:\Users\me\Temp` → `/c/Users/me/Temp`
fn windows_bind_source(dir: &str) -> String {
    let dir = dir.replace('\\', "/");
    match dir.split_once(':') {
        Some((drive, rest))
            if drive.len() == 1 && drive.chars().all(|c| c.is_ascii_alphabetic()) =>
        {
            format!("/{}{rest}", drive.to_ascii_lowercase())
        }
        _ => dir,
    }
}
