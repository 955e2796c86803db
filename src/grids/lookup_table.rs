use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, IntoParallelRefMutIterator, ParallelIterator};

use crate::errors::LUTError;
use crate::grids::generator::{ParameterAxis, QuantityOfInterest};
use crate::grids::hypercube_tree::HypercubeTree;
use crate::storage::bounding_box::BoundingBox;

///
/// Read-only view of a generated table. Borrowing the generator keeps
/// queries and generation from overlapping; any number of readers may
/// query concurrently.
///
#[derive(Clone, Debug)]
pub struct LookupTable<'a>
{
    tree: &'a HypercubeTree,
    scaling: BoundingBox,
    parameters: &'a [ParameterAxis],
    qois: &'a [QuantityOfInterest],
    num_evaluations: usize,
    meets_tolerances: bool,
}

impl<'a> LookupTable<'a>
{
    pub(crate) fn new(tree: &'a HypercubeTree, scaling: BoundingBox, parameters: &'a [ParameterAxis], qois: &'a [QuantityOfInterest],
                      num_evaluations: usize, meets_tolerances: bool) -> Self
    {
        Self { tree, scaling, parameters, qois, num_evaluations, meets_tolerances }
    }

    #[inline]
    pub fn bounding_box(&self) -> &BoundingBox
    {
        &self.scaling
    }

    ///
    /// Interpolate at one point given in real parameter values.
    ///
    pub fn interpolate_point(&self, x: &[f64]) -> Result<Vec<f64>, LUTError>
    {
        if x.len() != self.scaling.ndim()
        {
            return Err(LUTError::DimensionMismatch { expected: self.scaling.ndim(), found: x.len() });
        }
        if !self.scaling.contains(x)
        {
            return Err(LUTError::OutOfDomain);
        }
        self.tree.interpolate(&self.scaling.to_unit_coordinate(x))
    }

    ///
    /// Interpolate at several points. Fails on the first point that cannot
    /// be interpolated.
    ///
    pub fn interpolate(&self, points: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, LUTError>
    {
        points.iter().map(|x| self.interpolate_point(x)).collect()
    }

    ///
    /// Interpolate in parallel. Each point gets its own result so one bad
    /// point does not hide the others.
    ///
    pub fn interpolate_batch(&self, points: &[Vec<f64>]) -> Vec<Result<Vec<f64>, LUTError>>
    {
        let mut results: Vec<Result<Vec<f64>, LUTError>> = Vec::with_capacity(points.len());
        results.resize_with(points.len(), || Ok(Vec::new()));
        points.par_iter().zip(results.par_iter_mut()).for_each(|(x, y)|
        {
            *y = self.interpolate_point(x);
        });
        results
    }

    #[inline]
    pub fn num_evaluations(&self) -> usize
    {
        self.num_evaluations
    }

    #[inline]
    pub fn meets_tolerances(&self) -> bool
    {
        self.meets_tolerances
    }

    pub fn parameter_names(&self) -> Vec<&str>
    {
        self.parameters.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn qoi_names(&self) -> Vec<&str>
    {
        self.qois.iter().map(|q| q.name.as_str()).collect()
    }

    pub fn parameter_points(&self) -> Vec<Vec<f64>>
    {
        let registry = self.tree.registry();
        registry.handles()
            .filter(|&h| registry.is_evaluated(h))
            .filter_map(|h| registry.coordinate(h).ok().map(|x| self.scaling.to_real_coordinate(x)))
            .collect()
    }

    pub fn function_values(&self) -> Vec<Vec<f64>>
    {
        let registry = self.tree.registry();
        registry.handles()
            .filter_map(|h| registry.data(h).ok().flatten().map(|data| data.qois().to_vec()))
            .collect()
    }
}
