use std::ops::Range;

/// A named, shaped window over the flat parameter buffer of a `ParamStore`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    name: String,
    shape: Vec<usize>,
    range: Range<usize>,
}

impl Variable {
    pub(super) fn new(name: String, shape: Vec<usize>, offset: usize) -> Self {
        let len = shape.iter().product::<usize>();

        Self {
            name,
            shape,
            range: offset..offset + len,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// The position of this variable's values inside the flat buffer.
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}
