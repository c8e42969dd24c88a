use std::{collections::HashMap, fs, path::Path};

use ndarray::Array2;

use crate::{
    TrainErr,
    error::Result,
    tensors::{self, NamedTensor},
};

pub const FRAMES: &str = "frames";
pub const AUDIO: &str = "audio";
pub const GROUND_TRUTH: &str = "ground_truth";

/// The amount of emotion dimensions annotated per time step, arousal and valence.
pub const NUM_DIMENSIONS: usize = 2;

/// The sizes shared by every record of a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordDims {
    pub seq_len: usize,
    pub frame_dim: usize,
    pub audio_dim: usize,
}

/// A single annotated clip: per time step video features, audio samples and the
/// (arousal, valence) annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub frames: Array2<f32>,
    pub audio: Array2<f32>,
    pub ground_truth: Array2<f32>,
}

impl Record {
    /// Creates a new `Record` checking that every array covers the same time steps.
    pub fn new(frames: Array2<f32>, audio: Array2<f32>, ground_truth: Array2<f32>) -> Result<Self> {
        let seq_len = frames.nrows();

        for (what, got) in [(AUDIO, audio.dim()), (GROUND_TRUTH, ground_truth.dim())] {
            if got.0 != seq_len {
                return Err(TrainErr::ShapeMismatch {
                    what,
                    got: vec![got.0, got.1],
                    expected: vec![seq_len, got.1],
                });
            }
        }

        if ground_truth.ncols() != NUM_DIMENSIONS {
            return Err(TrainErr::ShapeMismatch {
                what: GROUND_TRUTH,
                got: ground_truth.shape().to_vec(),
                expected: vec![seq_len, NUM_DIMENSIONS],
            });
        }

        Ok(Self {
            frames,
            audio,
            ground_truth,
        })
    }

    pub fn dims(&self) -> RecordDims {
        RecordDims {
            seq_len: self.frames.nrows(),
            frame_dim: self.frames.ncols(),
            audio_dim: self.audio.ncols(),
        }
    }

    /// Reads a record from a safetensors file.
    pub fn load(path: &Path) -> Result<Self> {
        let malformed = |reason: String| TrainErr::MalformedRecord {
            path: path.to_path_buf(),
            reason,
        };

        let bytes = fs::read(path)?;
        let mut file = tensors::deserialize(&bytes).map_err(malformed)?;

        let mut take = |name: &str| -> Result<Array2<f32>> {
            let tensor = file
                .take(name)
                .ok_or_else(|| malformed(format!("missing tensor {name}")))?;

            let &[rows, cols] = tensor.shape.as_slice() else {
                return Err(malformed(format!(
                    "tensor {name} has shape {:?}, expected 2 dimensions",
                    tensor.shape
                )));
            };

            Array2::from_shape_vec((rows, cols), tensor.values)
                .map_err(|e| malformed(format!("tensor {name}: {e}")))
        };

        let frames = take(FRAMES)?;
        let audio = take(AUDIO)?;
        let ground_truth = take(GROUND_TRUTH)?;

        Self::new(frames, audio, ground_truth).map_err(|e| malformed(e.to_string()))
    }

    /// Writes the record as a safetensors file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tensors = [
            (FRAMES, &self.frames),
            (AUDIO, &self.audio),
            (GROUND_TRUTH, &self.ground_truth),
        ]
        .into_iter()
        .map(|(name, array)| {
            NamedTensor::new(name, array.shape().to_vec(), array.iter().copied().collect())
        })
        .collect::<Vec<_>>();

        let bytes = tensors::serialize(&tensors, HashMap::new()).map_err(|reason| {
            TrainErr::MalformedRecord {
                path: path.to_path_buf(),
                reason,
            }
        })?;

        fs::write(path, bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;

    fn record(seq_len: usize) -> Record {
        Record::new(
            Array2::from_elem((seq_len, 6), 0.5),
            Array2::from_shape_fn((seq_len, 4), |(t, i)| (t * 4 + i) as f32),
            Array2::from_elem((seq_len, 2), -0.25),
        )
        .unwrap()
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.safetensors");

        let original = record(3);
        original.save(&path).unwrap();

        let loaded = Record::load(&path).unwrap();
        assert_eq!(loaded, original);
        assert_eq!(
            loaded.dims(),
            RecordDims {
                seq_len: 3,
                frame_dim: 6,
                audio_dim: 4
            }
        );
    }

    #[test]
    fn misaligned_time_steps() {
        let err = Record::new(
            Array2::zeros((3, 6)),
            Array2::zeros((2, 4)),
            Array2::zeros((3, 2)),
        )
        .unwrap_err();

        assert!(matches!(err, TrainErr::ShapeMismatch { what: AUDIO, .. }));
    }

    #[test]
    fn missing_tensor_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.safetensors");
        let tensors = [NamedTensor::new(FRAMES, vec![1, 1], vec![0.0])];
        fs::write(&path, tensors::serialize(&tensors, HashMap::new()).unwrap()).unwrap();

        let err = Record::load(&path).unwrap_err();
        assert!(matches!(err, TrainErr::MalformedRecord { .. }));
    }

    #[test]
    fn garbage_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.safetensors");
        fs::write(&path, b"nope").unwrap();

        assert!(matches!(
            Record::load(&path).unwrap_err(),
            TrainErr::MalformedRecord { .. }
        ));
    }
}
