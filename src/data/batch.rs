use ndarray::{Array3, ArrayView2, Axis};

use super::{Record, record::NUM_DIMENSIONS};
use crate::{TrainErr, error::Result};

/// A batch of clips, every array shaped `(batch, time, features)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub frames: Array3<f32>,
    pub audio: Array3<f32>,
    pub ground_truth: Array3<f32>,
}

impl Batch {
    /// Creates a new `Batch` checking that the arrays agree on the batch and time axes and that
    /// the ground truth has one column per emotion dimension.
    pub fn new(frames: Array3<f32>, audio: Array3<f32>, ground_truth: Array3<f32>) -> Result<Self> {
        let (b, t, _) = frames.dim();

        for (what, shape) in [("audio", audio.shape()), ("ground_truth", ground_truth.shape())] {
            if shape[..2] != [b, t] {
                return Err(TrainErr::ShapeMismatch {
                    what,
                    got: shape.to_vec(),
                    expected: vec![b, t, shape[2]],
                });
            }
        }

        if ground_truth.dim().2 != NUM_DIMENSIONS {
            return Err(TrainErr::ShapeMismatch {
                what: "ground_truth",
                got: ground_truth.shape().to_vec(),
                expected: vec![b, t, NUM_DIMENSIONS],
            });
        }

        Ok(Self {
            frames,
            audio,
            ground_truth,
        })
    }

    /// Stacks records with identical dimensions into a batch.
    pub fn from_records(records: &[Record]) -> Result<Self> {
        let Some(first) = records.first() else {
            return Err(TrainErr::ShapeMismatch {
                what: "batch",
                got: vec![0],
                expected: vec![1],
            });
        };

        let dims = first.dims();
        if let Some(other) = records.iter().find(|r| r.dims() != dims) {
            let other = other.dims();
            return Err(TrainErr::ShapeMismatch {
                what: "record",
                got: vec![other.seq_len, other.frame_dim, other.audio_dim],
                expected: vec![dims.seq_len, dims.frame_dim, dims.audio_dim],
            });
        }

        let stack = |views: Vec<ArrayView2<f32>>| {
            let shape = views[0].shape().to_vec();
            ndarray::stack(Axis(0), &views).map_err(|_| TrainErr::ShapeMismatch {
                what: "stacked records",
                got: views.iter().map(|v| v.len()).collect(),
                expected: shape,
            })
        };

        let frames = stack(records.iter().map(|r| r.frames.view()).collect())?;
        let audio = stack(records.iter().map(|r| r.audio.view()).collect())?;
        let ground_truth = stack(records.iter().map(|r| r.ground_truth.view()).collect())?;

        Self::new(frames, audio, ground_truth)
    }

    /// The amount of clips in the batch.
    pub fn len(&self) -> usize {
        self.frames.dim().0
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn seq_len(&self) -> usize {
        self.frames.dim().1
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;

    fn record(seq_len: usize, value: f32) -> Record {
        Record::new(
            Array2::from_elem((seq_len, 3), value),
            Array2::from_elem((seq_len, 2), value),
            Array2::from_elem((seq_len, 2), value),
        )
        .unwrap()
    }

    #[test]
    fn stacks_along_batch_axis() {
        let batch = Batch::from_records(&[record(4, 0.), record(4, 1.)]).unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.seq_len(), 4);
        assert_eq!(batch.frames.dim(), (2, 4, 3));
        assert_eq!(batch.ground_truth[[1, 3, 1]], 1.);
    }

    #[test]
    fn rejects_mixed_lengths() {
        let err = Batch::from_records(&[record(4, 0.), record(5, 0.)]).unwrap_err();
        assert!(matches!(err, TrainErr::ShapeMismatch { what: "record", .. }));
    }

    #[test]
    fn rejects_wrong_dimension_count() {
        let err = Batch::new(
            Array3::zeros((1, 2, 3)),
            Array3::zeros((1, 2, 3)),
            Array3::zeros((1, 2, 3)),
        )
        .unwrap_err();

        assert!(matches!(err, TrainErr::ShapeMismatch { what: "ground_truth", .. }));
    }
}
