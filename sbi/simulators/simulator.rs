use crate::{
    error::SimulationError,
    record::SampleRecord,
    shape::{BatchShape, ShapeLike},
};

/// Anything that turns a batch shape plus keyword context into a batched record.
///
/// Every tensor in the returned record has `batch_shape` as its leading dimensions.
pub trait Simulator: Send + Sync {
    /// Draws one batch.
    fn sample(
        &self,
        batch_shape: &BatchShape,
        context: &SampleRecord,
    ) -> Result<SampleRecord, SimulationError>;

    /// Normalizes `batch_shape` and draws one batch without extra context.
    fn simulate(&self, batch_shape: impl ShapeLike) -> Result<SampleRecord, SimulationError>
    where
        Self: Sized,
    {
        let batch_shape = batch_shape.into_batch_shape()?;
        self.sample(&batch_shape, &SampleRecord::new())
    }
}

impl<S: Simulator + ?Sized> Simulator for Box<S> {
    fn sample(
        &self,
        batch_shape: &BatchShape,
        context: &SampleRecord,
    ) -> Result<SampleRecord, SimulationError> {
        (**self).sample(batch_shape, context)
    }
}
