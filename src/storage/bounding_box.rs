use serde::{Deserialize, Serialize};

use crate::storage::corner_registry::TOL;

///
/// Axis aligned box described by its lower and upper corners.
///
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct BoundingBox
{
    pub lower: Vec<f64>,
    pub upper: Vec<f64>
}

impl Default for BoundingBox
{
    #[inline]
    fn default() -> Self {
        Self { lower: vec![], upper: vec![] }
    }
}

impl BoundingBox
{
    #[inline]
    pub fn new(lower: &[f64], upper: &[f64]) -> Self
    {
        Self { lower: lower.to_vec(), upper: upper.to_vec() }
    }

    ///
    /// Unit hypercube `[0,1]^num_inputs`.
    ///
    pub fn with_dim(num_inputs: usize) -> Self
    {
        Self { lower: vec![0.0; num_inputs], upper: vec![1.0; num_inputs] }
    }

    #[inline]
    pub fn ndim(&self) -> usize
    {
        self.lower.len()
    }

    #[inline]
    pub fn width(&self, dim: usize) -> f64
    {
        self.upper[dim] - self.lower[dim]
    }

    #[inline]
    pub fn midpoint(&self) -> Vec<f64>
    {
        self.lower.iter().zip(&self.upper).map(|(l, u)| 0.5 * (l + u)).collect()
    }

    ///
    /// Corner selected by the bits of `index`: bit `j` set takes the upper
    /// bound on axis `j`, unset takes the lower bound.
    ///
    pub fn corner(&self, index: usize) -> Vec<f64>
    {
        (0..self.ndim()).map(|d| if (index >> d) & 1 == 1 { self.upper[d] } else { self.lower[d] }).collect()
    }

    #[inline]
    pub fn to_unit_coordinate(&self, point: &[f64]) -> Vec<f64>
    {
        let mut r = vec![0.0; point.len()];
        for i in 0..point.len()
        {
            r[i] = (point[i] - self.lower[i])/(self.upper[i] - self.lower[i]);
        }
        r
    }

    #[inline]
    pub fn to_real_coordinate(&self, point: &[f64]) -> Vec<f64>
    {
        let mut r = point.to_vec();
        self.to_real_coordinate_in_place(&mut r);
        r
    }

    #[inline]
    pub fn to_real_coordinate_in_place(&self, point: &mut [f64])
    {
        for i in 0..point.len()
        {
            point[i] = self.lower[i] + (self.upper[i] - self.lower[i]) * point[i];
        }
    }

    ///
    /// Inclusive on both ends.
    ///
    #[inline]
    pub fn contains(&self, point: &[f64]) -> bool
    {
        #[allow(clippy::needless_range_loop)]
        for d in 0..point.len()
        {
            if self.lower[d] > point[d] || self.upper[d] < point[d]
            {
                return false;
            }
        }
        true
    }

    ///
    /// Same as `contains`, widened by the corner identity tolerance.
    ///
    #[inline]
    pub(crate) fn contains_within_tolerance(&self, point: &[f64]) -> bool
    {
        #[allow(clippy::needless_range_loop)]
        for d in 0..point.len()
        {
            if self.lower[d] - TOL > point[d] || self.upper[d] + TOL < point[d]
            {
                return false;
            }
        }
        true
    }
}
