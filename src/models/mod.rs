//! The networks that can be trained, and the registry that maps a `ModelKind` to the function
//! that builds it.

mod emotion_net;

use std::{fmt, str::FromStr};

use clap::ValueEnum;
use machine_learning::arch::{Sequential, activations::ActFn, layers::Layer};
use serde::Serialize;

use crate::{TrainErr, data::RecordDims, error::Result};

pub use emotion_net::{Branch, EmotionNet, Modality};

/// Which modalities the network looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Audio,
    Video,
    Both,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Audio => "audio",
            ModelKind::Video => "video",
            ModelKind::Both => "both",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = TrainErr;

    fn from_str(s: &str) -> Result<Self> {
        ModelKind::value_variants()
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| TrainErr::UnknownModel(s.to_string()))
    }
}

/// The sizes a network is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelDims {
    pub frame_dim: usize,
    pub audio_dim: usize,
    pub hidden_units: usize,
}

impl ModelDims {
    pub fn new(record: RecordDims, hidden_units: usize) -> Self {
        Self {
            frame_dim: record.frame_dim,
            audio_dim: record.audio_dim,
            hidden_units,
        }
    }
}

/// Builds an untrained network.
pub type Constructor = fn(&ModelDims) -> EmotionNet;

/// Looks up the constructor for `kind`.
pub fn get_model(kind: ModelKind) -> Constructor {
    match kind {
        ModelKind::Audio => audio_model,
        ModelKind::Video => video_model,
        ModelKind::Both => multimodal_model,
    }
}

/// Looks up the constructor for the model called `name`.
///
/// # Errors
/// `UnknownModel` if no model is registered under `name`.
pub fn get_model_by_name(name: &str) -> Result<Constructor> {
    name.parse().map(get_model)
}

fn backbone(input_dim: usize, hidden: usize) -> Sequential {
    Sequential::new([
        Layer::dense((input_dim, hidden), Some(ActFn::relu())),
        Layer::dense((hidden, hidden), Some(ActFn::relu())),
    ])
}

fn head(input_dim: usize, hidden: usize) -> Sequential {
    Sequential::new([
        Layer::dense((input_dim, hidden), Some(ActFn::tanh())),
        Layer::dense((hidden, 2), None),
    ])
}

fn audio_model(dims: &ModelDims) -> EmotionNet {
    let h = dims.hidden_units;
    let branches = vec![Branch::new(Modality::Audio, backbone(dims.audio_dim, h))];
    EmotionNet::new(branches, head(h, h))
}

fn video_model(dims: &ModelDims) -> EmotionNet {
    let h = dims.hidden_units;
    let branches = vec![Branch::new(Modality::Video, backbone(dims.frame_dim, h))];
    EmotionNet::new(branches, head(h, h))
}

fn multimodal_model(dims: &ModelDims) -> EmotionNet {
    let h = dims.hidden_units;
    let branches = vec![
        Branch::new(Modality::Audio, backbone(dims.audio_dim, h)),
        Branch::new(Modality::Video, backbone(dims.frame_dim, h)),
    ];
    EmotionNet::new(branches, head(2 * h, h))
}
