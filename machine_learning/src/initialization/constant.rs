use super::ParamGen;

/// Repeats a single value, used for biases.
#[derive(Debug, Clone)]
pub struct ConstParamGen {
    value: f32,
    left: usize,
}

impl ConstParamGen {
    /// A generator yielding `value` exactly `count` times.
    pub fn new(value: f32, count: usize) -> Self {
        Self { value, left: count }
    }

    /// A generator yielding `count` zeros.
    pub fn zeros(count: usize) -> Self {
        Self::new(0., count)
    }
}

impl ParamGen for ConstParamGen {
    fn sample(&mut self, n: usize) -> Option<Vec<f32>> {
        let take = n.min(self.left);
        if take == 0 {
            return None;
        }

        self.left -= take;
        Some(vec![self.value; take])
    }
}
