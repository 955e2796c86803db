use crate::errors::LUTError;
use crate::storage::bounding_box::BoundingBox;

///
/// Weight of corner `corner_index` at the unit coordinate `t`. Bit `j` of the
/// corner index selects `t[j]` (upper side) or `1 - t[j]` (lower side).
///
#[inline]
pub fn corner_weight(corner_index: usize, t: &[f64]) -> f64
{
    let mut weight = 1.0;
    for (j, &tj) in t.iter().enumerate()
    {
        weight *= if (corner_index >> j) & 1 == 1 { tj } else { 1.0 - tj };
    }
    weight
}

///
/// N-linear interpolation inside a single box from the values at its 2^D
/// corners, ordered by binary corner index.
///
pub(crate) struct InterpolationOperation<'a>(pub &'a BoundingBox);

impl InterpolationOperation<'_>
{
    #[inline]
    pub(crate) fn interpolate(&self, x: &[f64], corner_values: &[&[f64]], result: &mut [f64]) -> Result<(), LUTError>
    {
        let num_inputs = self.0.ndim();
        if x.len() != num_inputs
        {
            return Err(LUTError::DimensionMismatch { expected: num_inputs, found: x.len() });
        }
        if corner_values.len() != 1 << num_inputs
        {
            return Err(LUTError::DimensionMismatch { expected: 1 << num_inputs, found: corner_values.len() });
        }
        let t = self.0.to_unit_coordinate(x);
        result.fill(0.0);
        for (corner, values) in corner_values.iter().enumerate()
        {
            let weight = corner_weight(corner, &t);
            // keeps non-finite sentinels at other corners out of the sum
            if weight == 0.0
            {
                continue;
            }
            for (r, &v) in result.iter_mut().zip(values.iter())
            {
                *r += weight * v;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use proptest::prelude::*;

    fn affine(x: &[f64]) -> f64
    {
        1.5 - 2.0 * x[0] + 0.25 * x[1] + 3.0 * x[2]
    }

    #[test]
    fn test_weights_sum_to_one()
    {
        let t = [0.3, 0.9, 0.05];
        let sum: f64 = (0..8).map(|c| corner_weight(c, &t)).sum();
        assert!((sum - 1.0).abs() < 1e-14);
    }

    #[test]
    fn test_exact_at_corners()
    {
        let bbox = BoundingBox::new(&[0.0, 0.0], &[2.0, 4.0]);
        let values: Vec<[f64; 2]> = (0..4).map(|c| [c as f64, 10.0 * c as f64 + 1.0]).collect();
        let corner_values: Vec<&[f64]> = values.iter().map(|v| &v[..]).collect();
        let op = InterpolationOperation(&bbox);
        let mut result = [0.0; 2];
        for c in 0..4
        {
            op.interpolate(&bbox.corner(c), &corner_values, &mut result).unwrap();
            assert_eq!(result, values[c]);
        }
    }

    #[test]
    fn test_failed_corner_sentinel_ignored_on_opposite_face()
    {
        let bbox = BoundingBox::new(&[0.0, 0.0], &[2.0, 4.0]);
        let op = InterpolationOperation(&bbox);
        for sentinel in [f64::INFINITY, f64::NAN]
        {
            let values = [[1.0], [2.0], [3.0], [sentinel]];
            let corner_values: Vec<&[f64]> = values.iter().map(|v| &v[..]).collect();
            let mut result = [0.0];
            for c in 0..3
            {
                op.interpolate(&bbox.corner(c), &corner_values, &mut result).unwrap();
                assert_eq!(result, values[c]);
            }
            // lower edge on axis 1 never touches corner 3
            op.interpolate(&[0.5, 0.0], &corner_values, &mut result).unwrap();
            assert_eq!(result, [1.25]);
        }
    }

    #[test]
    fn test_dimension_mismatch()
    {
        let bbox = BoundingBox::with_dim(2);
        let v = [0.0];
        let corner_values: Vec<&[f64]> = vec![&v[..]; 4];
        let mut result = [0.0];
        let op = InterpolationOperation(&bbox);
        assert!(matches!(op.interpolate(&[0.5], &corner_values, &mut result), Err(LUTError::DimensionMismatch { expected: 2, found: 1 })));
        assert!(matches!(op.interpolate(&[0.5, 0.5], &corner_values[..3], &mut result), Err(LUTError::DimensionMismatch { .. })));
    }

    proptest! {
        #[test]
        fn affine_functions_are_reproduced(x0 in 1.0f64..3.0, x1 in -1.0f64..0.0, x2 in 0.0f64..0.5) {
            let bbox = BoundingBox::new(&[1.0, -1.0, 0.0], &[3.0, 0.0, 0.5]);
            let values: Vec<[f64; 1]> = (0..8).map(|c| [affine(&bbox.corner(c))]).collect();
            let corner_values: Vec<&[f64]> = values.iter().map(|v| &v[..]).collect();
            let mut result = [0.0];
            InterpolationOperation(&bbox).interpolate(&[x0, x1, x2], &corner_values, &mut result).unwrap();
            prop_assert!((result[0] - affine(&[x0, x1, x2])).abs() < 1e-12);
        }
    }
}
