use serde::{Deserialize, Serialize};

///
/// Result of evaluating the tabulated function at one point: the quantities
/// of interest, the evaluator's error code (0 = success) and, once a
/// prediction for this point has been compared against it, the absolute
/// prediction error for each QoI.
///
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PointData
{
    pub(crate) qois: Vec<f64>,
    pub(crate) error_code: u32,
    pub(crate) error_estimates: Option<Vec<f64>>,
}

impl PointData
{
    pub fn new(qois: Vec<f64>, error_code: u32) -> Self
    {
        Self { qois, error_code, error_estimates: None }
    }

    pub fn success(qois: Vec<f64>) -> Self
    {
        Self::new(qois, 0)
    }

    #[inline]
    pub fn qois(&self) -> &[f64]
    {
        &self.qois
    }

    #[inline]
    pub fn num_qois(&self) -> usize
    {
        self.qois.len()
    }

    #[inline]
    pub fn error_code(&self) -> u32
    {
        self.error_code
    }

    #[inline]
    pub fn is_success(&self) -> bool
    {
        self.error_code == 0
    }

    #[inline]
    pub fn error_estimates(&self) -> Option<&[f64]>
    {
        self.error_estimates.as_deref()
    }

    ///
    /// Attach |predicted - real| per QoI. Only the first attachment sticks.
    ///
    pub(crate) fn attach_error_estimates(&mut self, predicted: &PointData)
    {
        if self.error_estimates.is_none()
        {
            self.error_estimates = Some(self.absolute_difference(predicted));
        }
    }

    pub(crate) fn absolute_difference(&self, other: &PointData) -> Vec<f64>
    {
        self.qois.iter().zip(&other.qois).map(|(a, b)| (b - a).abs()).collect()
    }
}
