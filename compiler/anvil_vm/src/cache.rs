//! The artifact disk cache.
//!
//! Artifacts are keyed by module fingerprint, method id, pipeline option
//! fingerprint and the shape of the profile they were compiled against;
//! any of those changing produces a different file. Entries that fail to
//! deserialize are deleted and recompiled. I/O failures only cost us the
//! cache, so they are logged at debug and otherwise ignored.

use std::fs;
use std::path::Path;

use anvil_codegen::Artifact;
use tracing::debug;

pub(crate) struct CacheKey {
    pub module: u64,
    pub mid: u16,
    pub options: u64,
    pub shape: u64,
}

impl CacheKey {
    fn file_name(&self) -> String {
        format!(
            "{:016x}-m{}-{:016x}-{:016x}.lirc",
            self.module, self.mid, self.options, self.shape
        )
    }
}

pub(crate) fn load(dir: &Path, key: &CacheKey) -> Option<Artifact> {
    let path = dir.join(key.file_name());
    let bytes = fs::read(&path).ok()?;
    match bincode::deserialize::<Artifact>(&bytes) {
        Ok(artifact) if artifact.mid.raw() == key.mid => Some(artifact),
        Ok(_) | Err(_) => {
            debug!(path = %path.display(), "discarding corrupt cached artifact");
            let _ = fs::remove_file(&path);
            None
        }
    }
}

pub(crate) fn store(dir: &Path, key: &CacheKey, artifact: &Artifact) {
    if let Err(e) = fs::create_dir_all(dir) {
        debug!(dir = %dir.display(), error = %e, "cannot create artifact cache directory");
        return;
    }
    let Ok(bytes) = bincode::serialize(artifact) else {
        return;
    };
    let path = dir.join(key.file_name());
    if let Err(e) = fs::write(&path, bytes) {
        debug!(path = %path.display(), error = %e, "cannot write cached artifact");
    }
}
