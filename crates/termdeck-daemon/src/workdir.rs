use std::path::PathBuf;
use std::sync::Arc;
use std::sync::RwLock;

/// Working directory for future session spawns.
///
/// The workbench's file browser updates this through its own endpoint;
/// already-running sessions are unaffected. Shared by value: clones see
/// the same underlying directory.
#[derive(Debug, Clone)]
pub struct Workdir {
    inner: Arc<RwLock<PathBuf>>,
}

impl Workdir {
    /// Starts at the daemon's current directory.
    pub fn new() -> Self {
        let dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        Self::at(dir)
    }

    pub fn at(dir: PathBuf) -> Self {
        Self {
            inner: Arc::new(RwLock::new(dir)),
        }
    }

    pub fn get(&self) -> PathBuf {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set(&self, dir: PathBuf) {
        *self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = dir;
    }
}

impl Default for Workdir {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_directory() {
        let workdir = Workdir::at(PathBuf::from("/tmp"));
        let other = workdir.clone();
        other.set(PathBuf::from("/var"));
        assert_eq!(workdir.get(), PathBuf::from("/var"));
    }
}
