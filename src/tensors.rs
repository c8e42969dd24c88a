//! Reading and writing named `f32` tensors in the safetensors format, shared by the dataset
//! records and the checkpoints.

use std::{borrow::Cow, collections::HashMap};

use safetensors::tensor::{Dtype, SafeTensors, TensorView, View};

/// A named, shaped `f32` tensor held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl NamedTensor {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, values: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            shape,
            values,
        }
    }
}

/// The decoded contents of a safetensors buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TensorFile {
    pub tensors: Vec<NamedTensor>,
    pub metadata: HashMap<String, String>,
}

impl TensorFile {
    pub fn get(&self, name: &str) -> Option<&NamedTensor> {
        self.tensors.iter().find(|t| t.name == name)
    }

    /// Removes the tensor called `name` from the file.
    pub fn take(&mut self, name: &str) -> Option<NamedTensor> {
        let i = self.tensors.iter().position(|t| t.name == name)?;
        Some(self.tensors.swap_remove(i))
    }
}

struct F32View<'a> {
    shape: &'a [usize],
    values: &'a [f32],
}

impl View for F32View<'_> {
    fn dtype(&self) -> Dtype {
        Dtype::F32
    }

    fn shape(&self) -> &[usize] {
        self.shape
    }

    fn data(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(bytemuck::cast_slice(self.values))
    }

    fn data_len(&self) -> usize {
        std::mem::size_of_val(self.values)
    }
}

/// Encodes `tensors` and `metadata` as a safetensors buffer.
///
/// # Returns
/// The encoded bytes, or a description of what went wrong.
pub fn serialize(
    tensors: &[NamedTensor],
    metadata: HashMap<String, String>,
) -> Result<Vec<u8>, String> {
    for t in tensors {
        let expected = t.shape.iter().product::<usize>();
        if t.values.len() != expected {
            return Err(format!(
                "tensor {} has {} values but shape {:?}",
                t.name,
                t.values.len(),
                t.shape
            ));
        }
    }

    let views = tensors.iter().map(|t| {
        let view = F32View {
            shape: &t.shape,
            values: &t.values,
        };
        (t.name.as_str(), view)
    });

    let metadata = (!metadata.is_empty()).then_some(metadata);
    safetensors::tensor::serialize(views, &metadata).map_err(|e| e.to_string())
}

/// Decodes a safetensors buffer, every tensor must hold `f32` values.
pub fn deserialize(bytes: &[u8]) -> Result<TensorFile, String> {
    let (_, header) = SafeTensors::read_metadata(bytes).map_err(|e| e.to_string())?;
    let metadata = header.metadata().clone().unwrap_or_default();

    let file = SafeTensors::deserialize(bytes).map_err(|e| e.to_string())?;
    let mut tensors = file
        .tensors()
        .into_iter()
        .map(|(name, view)| decode(name, &view))
        .collect::<Result<Vec<_>, _>>()?;
    tensors.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(TensorFile { tensors, metadata })
}

fn decode(name: String, view: &TensorView<'_>) -> Result<NamedTensor, String> {
    if view.dtype() != Dtype::F32 {
        return Err(format!("tensor {name} is {:?}, expected F32", view.dtype()));
    }

    let values = view
        .data()
        .chunks_exact(4)
        .map(bytemuck::pod_read_unaligned::<f32>)
        .collect();

    Ok(NamedTensor::new(name, view.shape().to_vec(), values))
}
