use std::ops::Range;

use machine_learning::{MlErr, arch::Sequential, params::ParamStore};
use ndarray::{Array3, ArrayView2, ArrayView3, Axis, s};
use rand::Rng;

use crate::{TrainErr, data::Batch, error::Result};

const HEAD_SCOPE: &str = "head";

/// An input stream of the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Audio,
    Video,
}

impl Modality {
    /// The variable scope of the backbone that reads this modality.
    pub fn scope(&self) -> &'static str {
        match self {
            Modality::Audio => "audio/backbone",
            Modality::Video => "video/backbone",
        }
    }

    fn input<'b>(&self, batch: &'b Batch) -> ArrayView3<'b, f32> {
        match self {
            Modality::Audio => batch.audio.view(),
            Modality::Video => batch.frames.view(),
        }
    }
}

/// A per modality feature extractor.
#[derive(Debug, Clone)]
pub struct Branch {
    modality: Modality,
    net: Sequential,
    range: Range<usize>,
}

impl Branch {
    pub fn new(modality: Modality, net: Sequential) -> Self {
        Self {
            modality,
            net,
            range: 0..0,
        }
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }
}

/// Maps every time step of a batch to an (arousal, valence) prediction.
///
/// Each branch embeds its modality independently, the embeddings are concatenated and a shared
/// head regresses both emotion dimensions:
///
/// ```text
/// audio  (b·t, a) -> audio/backbone -> (b·t, h) ─┐
///                                                ├─ concat -> head -> (b·t, 2)
/// frames (b·t, f) -> video/backbone -> (b·t, h) ─┘
/// ```
#[derive(Debug, Clone)]
pub struct EmotionNet {
    branches: Vec<Branch>,
    head: Sequential,
    head_range: Range<usize>,
}

impl EmotionNet {
    pub fn new(branches: Vec<Branch>, head: Sequential) -> Self {
        Self {
            branches,
            head,
            head_range: 0..0,
        }
    }

    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    /// Returns the amount of parameters in the network.
    pub fn size(&self) -> usize {
        self.branches.iter().map(|b| b.net.size()).sum::<usize>() + self.head.size()
    }

    /// Registers and initializes every variable of the network in `store`.
    pub fn init_params<R: Rng>(&mut self, store: &mut ParamStore, rng: &mut R) -> Result<()> {
        for branch in &mut self.branches {
            branch.range = branch.net.init_params(branch.modality.scope(), store, rng)?;
        }

        self.head_range = self.head.init_params(HEAD_SCOPE, store, rng)?;
        Ok(())
    }

    /// Predicts both emotion dimensions for every time step of `batch`.
    ///
    /// # Returns
    /// An array shaped `(batch, time, 2)`.
    pub fn forward(&mut self, params: &[f32], batch: &Batch) -> Result<Array3<f32>> {
        self.check_len(params.len())?;
        let (b, t) = (batch.len(), batch.seq_len());

        let mut features = Vec::with_capacity(self.branches.len());
        for branch in &mut self.branches {
            let x = flatten_time(branch.modality.input(batch))?;
            features.push(branch.net.forward(&params[branch.range.clone()], x)?);
        }

        let views: Vec<ArrayView2<f32>> = features.iter().map(|f| f.view()).collect();
        let joined = ndarray::concatenate(Axis(1), &views).map_err(|_| TrainErr::ShapeMismatch {
            what: "branch features",
            got: views.iter().map(|v| v.nrows()).collect(),
            expected: vec![b * t],
        })?;

        let out = self
            .head
            .forward(&params[self.head_range.clone()], joined.view())?;
        let k = out.ncols();

        out.into_shape_with_order((b, t, k))
            .map_err(|_| TrainErr::ShapeMismatch {
                what: "prediction",
                got: vec![b * t, k],
                expected: vec![b, t, k],
            })
    }

    /// Accumulates into `grad` the gradient of the loss given its derivative with respect to
    /// the last prediction.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d_prediction: ArrayView3<f32>,
    ) -> Result<()> {
        self.check_len(params.len())?;
        self.check_len(grad.len())?;

        let (b, t, k) = d_prediction.dim();
        let d = d_prediction
            .to_owned()
            .into_shape_with_order((b * t, k))
            .map_err(|_| TrainErr::ShapeMismatch {
                what: "prediction delta",
                got: vec![b, t, k],
                expected: vec![b * t, k],
            })?;

        let hr = self.head_range.clone();
        let d_features = self.head.backward(&params[hr.clone()], &mut grad[hr], d)?;

        let mut offset = 0;
        for branch in &mut self.branches {
            let width = branch.net.output_dim();
            let d_branch = d_features.slice(s![.., offset..offset + width]).to_owned();
            let r = branch.range.clone();
            branch.net.backward(&params[r.clone()], &mut grad[r], d_branch)?;
            offset += width;
        }

        Ok(())
    }

    /// The L2 penalty `Σ w² / 2` over every weight matrix of the network.
    pub fn weight_penalty(&self, params: &[f32]) -> f32 {
        self.sections()
            .map(|(net, range)| net.weight_penalty(&params[range]))
            .sum()
    }

    /// Adds the gradient of `scale · weight_penalty` to `grad`.
    pub fn add_weight_penalty_grad(&self, params: &[f32], grad: &mut [f32], scale: f32) {
        if scale == 0. {
            return;
        }

        for (net, range) in self.sections() {
            net.add_weight_penalty_grad(&params[range.clone()], &mut grad[range], scale);
        }
    }

    fn sections(&self) -> impl Iterator<Item = (&Sequential, Range<usize>)> {
        self.branches
            .iter()
            .map(|b| (&b.net, b.range.clone()))
            .chain([(&self.head, self.head_range.clone())])
    }

    fn check_len(&self, got: usize) -> Result<()> {
        let expected = self.head_range.end;
        if got < expected || self.head_range.is_empty() {
            return Err(MlErr::SizeMismatch {
                what: "network parameters",
                got,
                expected,
            }
            .into());
        }

        Ok(())
    }
}

fn flatten_time(x: ArrayView3<f32>) -> Result<ArrayView2<f32>> {
    let (b, t, d) = x.dim();
    x.into_shape_with_order((b * t, d))
        .map_err(|_| TrainErr::ShapeMismatch {
            what: "flattened input",
            got: vec![b, t, d],
            expected: vec![b * t, d],
        })
}
