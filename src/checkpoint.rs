//! Durable snapshots of the training state under the training directory.
//!
//! Every snapshot is a safetensors file called `model.ckpt-<step>.safetensors`. A JSON index
//! named `checkpoint` lists the retained snapshots, oldest first, and names the newest one.

use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    TrainErr,
    error::Result,
    tensors::{self, TensorFile},
};

pub const INDEX_FILE: &str = "checkpoint";
const PREFIX: &str = "model.ckpt-";
const EXTENSION: &str = "safetensors";

/// The contents of the `checkpoint` index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointIndex {
    pub model_checkpoint_path: String,
    pub all_model_checkpoint_paths: Vec<String>,
}

/// Writes snapshots and keeps at most `max_to_keep` of them around.
#[derive(Debug)]
pub struct Saver {
    dir: PathBuf,
    max_to_keep: usize,
    kept: VecDeque<String>,
}

impl Saver {
    pub const MAX_TO_KEEP: usize = 5;

    /// Creates a new `Saver` writing into `dir`, creating it if needed.
    ///
    /// Snapshots listed in an existing index count towards `max_to_keep`.
    pub fn new(dir: impl Into<PathBuf>, max_to_keep: usize) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let kept = read_index(&dir)?
            .map(|index| index.all_model_checkpoint_paths.into())
            .unwrap_or_default();

        Ok(Self {
            dir,
            max_to_keep: max_to_keep.max(1),
            kept,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `state` as the snapshot for `global_step` and updates the index.
    ///
    /// # Returns
    /// The path of the new snapshot.
    pub fn save(&mut self, state: &TensorFile, global_step: u64) -> Result<PathBuf> {
        let name = checkpoint_name(global_step);
        let path = self.dir.join(&name);

        let bytes = tensors::serialize(&state.tensors, state.metadata.clone())
            .map_err(|reason| TrainErr::Checkpoint {
                path: path.clone(),
                reason,
            })?;
        write_atomic(&path, &bytes)?;

        let mut kept = self.kept.clone();
        kept.retain(|k| *k != name);
        kept.push_back(name.clone());
        let stale_count = kept.len().saturating_sub(self.max_to_keep);
        let stale: Vec<String> = kept.drain(..stale_count).collect();

        // The index must never name a deleted snapshot, so prune only once it's written.
        let index = CheckpointIndex {
            model_checkpoint_path: name,
            all_model_checkpoint_paths: kept.iter().cloned().collect(),
        };
        let json = serde_json::to_vec_pretty(&index)?;
        write_atomic(&self.dir.join(INDEX_FILE), &json)?;
        self.kept = kept;

        for stale in stale {
            let stale = self.dir.join(stale);
            match fs::remove_file(&stale) {
                Ok(()) => debug!("removed old checkpoint {}", stale.display()),
                Err(e) => warn!("failed to remove old checkpoint {}: {e}", stale.display()),
            }
        }

        info!(global_step = global_step; "saved checkpoint {}", path.display());
        Ok(path)
    }
}

/// Returns the newest snapshot in `dir`, if there is one.
///
/// # Errors
/// A `Checkpoint` error if the index exists but can't be parsed.
pub fn latest_checkpoint(dir: &Path) -> Result<Option<PathBuf>> {
    Ok(read_index(dir)?
        .filter(|index| !index.model_checkpoint_path.is_empty())
        .map(|index| dir.join(index.model_checkpoint_path)))
}

/// Reads a snapshot, or any safetensors file holding `f32` tensors.
pub fn load(path: &Path) -> Result<TensorFile> {
    let bytes = fs::read(path).map_err(|e| TrainErr::Checkpoint {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    tensors::deserialize(&bytes).map_err(|reason| TrainErr::Checkpoint {
        path: path.to_path_buf(),
        reason,
    })
}

/// Returns the file name of the snapshot for `global_step`.
pub fn checkpoint_name(global_step: u64) -> String {
    format!("{PREFIX}{global_step}.{EXTENSION}")
}

fn read_index(dir: &Path) -> Result<Option<CheckpointIndex>> {
    let path = dir.join(INDEX_FILE);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| TrainErr::Checkpoint {
            path,
            reason: e.to_string(),
        })
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::tensors::NamedTensor;

    fn state(step: u64) -> TensorFile {
        TensorFile {
            tensors: vec![NamedTensor::new("w", vec![2], vec![step as f32, 1.])],
            metadata: HashMap::from([("global_step".to_string(), step.to_string())]),
        }
    }

    #[test]
    fn empty_dir_has_no_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(latest_checkpoint(dir.path()).unwrap(), None);
    }

    #[test]
    fn latest_points_to_the_last_save() {
        let dir = tempfile::tempdir().unwrap();
        let mut saver = Saver::new(dir.path(), Saver::MAX_TO_KEEP).unwrap();

        saver.save(&state(10), 10).unwrap();
        let path = saver.save(&state(20), 20).unwrap();

        let latest = latest_checkpoint(dir.path()).unwrap().unwrap();
        assert_eq!(latest, path);
        assert!(latest.ends_with("model.ckpt-20.safetensors"));

        let file = load(&latest).unwrap();
        assert_eq!(file.metadata["global_step"], "20");
        assert_eq!(file.get("w").unwrap().values, vec![20., 1.]);
    }

    #[test]
    fn prunes_old_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let mut saver = Saver::new(dir.path(), 2).unwrap();

        for step in [1, 2, 3] {
            saver.save(&state(step), step).unwrap();
        }

        assert!(!dir.path().join(checkpoint_name(1)).exists());
        assert!(dir.path().join(checkpoint_name(2)).exists());
        assert!(dir.path().join(checkpoint_name(3)).exists());

        let index: CheckpointIndex =
            serde_json::from_slice(&fs::read(dir.path().join(INDEX_FILE)).unwrap()).unwrap();
        assert_eq!(index.model_checkpoint_path, checkpoint_name(3));
        assert_eq!(
            index.all_model_checkpoint_paths,
            vec![checkpoint_name(2), checkpoint_name(3)]
        );
    }

    #[test]
    fn a_new_saver_continues_the_index() {
        let dir = tempfile::tempdir().unwrap();
        Saver::new(dir.path(), 2).unwrap().save(&state(1), 1).unwrap();

        let mut saver = Saver::new(dir.path(), 2).unwrap();
        saver.save(&state(2), 2).unwrap();
        saver.save(&state(3), 3).unwrap();

        assert!(!dir.path().join(checkpoint_name(1)).exists());
    }

    #[test]
    fn saving_the_same_step_twice_keeps_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut saver = Saver::new(dir.path(), 5).unwrap();

        saver.save(&state(7), 7).unwrap();
        saver.save(&state(7), 7).unwrap();

        let index: CheckpointIndex =
            serde_json::from_slice(&fs::read(dir.path().join(INDEX_FILE)).unwrap()).unwrap();
        assert_eq!(index.all_model_checkpoint_paths, vec![checkpoint_name(7)]);
    }

    #[test]
    fn failed_index_write_keeps_the_indexed_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut saver = Saver::new(dir.path(), 1).unwrap();
        saver.save(&state(1), 1).unwrap();

        // A directory in the way of the temporary index makes the index write fail.
        fs::create_dir(dir.path().join(INDEX_FILE).with_extension("tmp")).unwrap();
        assert!(saver.save(&state(2), 2).is_err());

        let latest = latest_checkpoint(dir.path()).unwrap().unwrap();
        assert!(latest.ends_with(checkpoint_name(1)));
        assert_eq!(load(&latest).unwrap().metadata["global_step"], "1");
    }

    #[test]
    fn index_only_lists_existing_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let mut saver = Saver::new(dir.path(), 1).unwrap();

        for step in [1, 2, 3] {
            saver.save(&state(step), step).unwrap();

            let index: CheckpointIndex =
                serde_json::from_slice(&fs::read(dir.path().join(INDEX_FILE)).unwrap()).unwrap();
            assert_eq!(index.all_model_checkpoint_paths, vec![checkpoint_name(step)]);
            assert!(dir.path().join(&index.model_checkpoint_path).exists());
        }
        assert!(!dir.path().join(checkpoint_name(2)).exists());
    }

    #[test]
    fn corrupt_index_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(INDEX_FILE), b"not json").unwrap();

        let err = latest_checkpoint(dir.path()).unwrap_err();
        assert!(matches!(err, TrainErr::Checkpoint { .. }));
    }

    #[test]
    fn loading_garbage_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.safetensors");
        fs::write(&path, b"\x01\x02\x03").unwrap();

        assert!(matches!(load(&path), Err(TrainErr::Checkpoint { .. })));
        assert!(matches!(
            load(&dir.path().join("missing.safetensors")),
            Err(TrainErr::Checkpoint { .. })
        ));
    }
}
