//! Filesystem persistence for the capability registry.
//!
//! Layout: one directory slot per capability id, holding two JSON
//! records (`metadata.json` and `artifact.json`). Writes go through a
//! temp file plus rename so a slot is never left half-written. Reload
//! tolerates corrupt slots: they are logged and skipped, never fatal.

use super::capability::{Artifact, CapabilityMetadata};
use crate::error::RegistryError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const METADATA_FILE: &str = "metadata.json";
const ARTIFACT_FILE: &str = "artifact.json";

/// Durable slot-per-capability store
pub struct RegistryStore {
    root: PathBuf,
}

impl RegistryStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: &Path) -> Result<Self, RegistryError> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Persist both records of a capability slot.
    pub fn save(
        &self,
        id: &str,
        metadata: &CapabilityMetadata,
        artifact: &Artifact,
    ) -> Result<(), RegistryError> {
        let slot = self.root.join(id);
        fs::create_dir_all(&slot)?;

        write_json(&slot.join(METADATA_FILE), metadata)?;
        write_json(&slot.join(ARTIFACT_FILE), artifact)?;

        debug!(id, "persisted capability slot");
        Ok(())
    }

    /// Load every parseable slot. Corrupt or incomplete slots are
    /// skipped with a warning.
    pub fn load_all(&self) -> Result<Vec<(CapabilityMetadata, Artifact)>, RegistryError> {
        let mut loaded = Vec::new();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }

            let slot = entry.path();
            match read_slot(&slot) {
                Ok(pair) => loaded.push(pair),
                Err(e) => {
                    warn!(slot = %slot.display(), error = %e, "skipping unreadable registry slot");
                }
            }
        }

        info!(count = loaded.len(), "loaded capability registry");
        Ok(loaded)
    }
}

fn read_slot(slot: &Path) -> anyhow::Result<(CapabilityMetadata, Artifact)> {
    let metadata: CapabilityMetadata =
        serde_json::from_str(&fs::read_to_string(slot.join(METADATA_FILE))?)?;
    let artifact: Artifact = serde_json::from_str(&fs::read_to_string(slot.join(ARTIFACT_FILE))?)?;
    Ok((metadata, artifact))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), RegistryError> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
