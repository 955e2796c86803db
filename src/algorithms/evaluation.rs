use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::errors::LUTError;
use crate::storage::point_data::PointData;

///
/// The expensive function being tabulated.
///
/// A graceful failure is reported through `PointData::error_code` (with
/// whatever sentinel QoIs the evaluator chooses). Returning `Err` is a hard
/// failure and aborts the whole batch.
///
pub trait Evaluator : Send + Sync
{
    fn evaluate(&self, parameters: &[f64]) -> Result<PointData, LUTError>;
}

impl<F> Evaluator for F
where F: Fn(&[f64]) -> Result<PointData, LUTError> + Send + Sync
{
    #[inline]
    fn evaluate(&self, parameters: &[f64]) -> Result<PointData, LUTError> {
        self(parameters)
    }
}

///
/// Evaluates independent points in parallel and joins before returning.
/// Results are in the same order as `points`.
///
pub(crate) struct BatchEvaluation<'a, E: Evaluator + ?Sized>
{
    pub evaluator: &'a E,
    pub num_outputs: usize,
    pub num_threads: Option<usize>,
}

impl<E: Evaluator + ?Sized> BatchEvaluation<'_, E>
{
    pub(crate) fn run(&self, points: &[Vec<f64>]) -> Result<Vec<PointData>, LUTError>
    {
        let evaluate = ||
        {
            points.par_iter().map(|point|
            {
                let data = self.evaluator.evaluate(point)?;
                if data.num_qois() != self.num_outputs
                {
                    return Err(LUTError::QoiLengthMismatch { expected: self.num_outputs, found: data.num_qois() });
                }
                Ok(data)
            }).collect::<Result<Vec<_>, LUTError>>()
        };
        match self.num_threads
        {
            Some(num_threads) =>
            {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(num_threads.min(points.len()).max(1))
                    .build()
                    .map_err(|e| LUTError::ThreadPoolFailed(e.to_string()))?;
                pool.install(evaluate)
            },
            None => evaluate(),
        }
    }
}
