/// A source of initial values for a model's variables.
///
/// Generators are finite: once they run out, `sample` returns `None` and a variable that
/// still needs values can't be registered.
pub trait ParamGen {
    /// Draws up to `n` values, fewer if the generator is about to run out.
    fn sample(&mut self, n: usize) -> Option<Vec<f32>>;

    /// Draws exactly `n` values.
    ///
    /// # Returns
    /// The values, or how many were still missing when the generator ran out.
    fn fill(&mut self, n: usize) -> Result<Vec<f32>, usize> {
        let mut values = Vec::with_capacity(n);

        while values.len() < n {
            match self.sample(n - values.len()) {
                Some(chunk) if !chunk.is_empty() => values.extend(chunk),
                _ => return Err(n - values.len()),
            }
        }

        Ok(values)
    }
}
