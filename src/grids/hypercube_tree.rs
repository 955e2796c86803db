use bitfield_struct::bitfield;
use indexmap::IndexSet;
use rustc_hash::FxBuildHasher;
use serde::{Deserialize, Serialize};

use crate::algorithms::interpolation::InterpolationOperation;
use crate::algorithms::refinement::{select_leaf, LeafError, RefinementOptions};
use crate::errors::LUTError;
use crate::storage::bounding_box::BoundingBox;
use crate::storage::corner_registry::{CornerHandle, CornerRegistry};
use crate::storage::point_data::PointData;

pub type BoxId = usize;

/// Largest supported dimension; a box has 2^D corners and 2^D children.
pub const MAX_DIMENSION: usize = 16;
pub type CornerSet = IndexSet<CornerHandle, FxBuildHasher>;

#[bitfield(u8, new=false)]
#[derive(Serialize, Deserialize, PartialEq, Eq)]
pub struct BoxFlags
{
    pub is_leaf: bool,
    /// every prediction made for this box has been matched by a real value
    pub is_fully_evaluated: bool,
    #[bits(6)]
    pub _empty: u8
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
struct PredictedCorner
{
    handle: CornerHandle,
    data: PointData,
    matched: bool,
}

///
/// One node of the subdivision tree. Corners are stored in binary index
/// order (bit `j` set = upper bound on axis `j`) and refer to slots in the
/// tree's `CornerRegistry`. Once a box is subdivided its corners and
/// predictions are dropped; the children and the registry hold everything.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HypercubeBox
{
    bounds: BoundingBox,
    generation: u32,
    parent: Option<BoxId>,
    children: Vec<BoxId>,
    corners: Vec<CornerHandle>,
    predicted: Vec<PredictedCorner>,
    max_error: Vec<f64>,
    flags: BoxFlags,
}

impl HypercubeBox
{
    #[inline]
    pub fn bounds(&self) -> &BoundingBox
    {
        &self.bounds
    }

    #[inline]
    pub fn generation(&self) -> u32
    {
        self.generation
    }

    #[inline]
    pub fn parent(&self) -> Option<BoxId>
    {
        self.parent
    }

    #[inline]
    pub fn children(&self) -> &[BoxId]
    {
        &self.children
    }

    #[inline]
    pub fn corners(&self) -> &[CornerHandle]
    {
        &self.corners
    }

    #[inline]
    pub fn is_leaf(&self) -> bool
    {
        self.flags.is_leaf()
    }

    #[inline]
    pub fn is_fully_evaluated(&self) -> bool
    {
        self.flags.is_fully_evaluated()
    }

    ///
    /// Largest |predicted - real| per QoI over the corners predicted when
    /// this box was created. `None` until all of them have real values.
    ///
    pub fn max_error_per_qoi(&self) -> Option<&[f64]>
    {
        if self.is_fully_evaluated() { Some(&self.max_error) } else { None }
    }

    pub fn predicted_value(&self, handle: CornerHandle) -> Option<&PointData>
    {
        self.predicted.iter().find(|p| p.handle == handle).map(|p| &p.data)
    }
}

///
/// Adaptive partition of a hypercube into boxes. Boxes live in an arena
/// indexed by `BoxId`; the root is always `ROOT`.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HypercubeTree
{
    num_inputs: usize,
    num_outputs: usize,
    registry: CornerRegistry,
    boxes: Vec<HypercubeBox>,
}

impl HypercubeTree
{
    pub const ROOT: BoxId = 0;

    ///
    /// Create a tree holding a single unevaluated root box.
    ///
    pub fn new(bounds: BoundingBox, num_outputs: usize) -> Result<Self, LUTError>
    {
        let num_inputs = bounds.ndim();
        if bounds.upper.len() != num_inputs
        {
            return Err(LUTError::DimensionMismatch { expected: num_inputs, found: bounds.upper.len() });
        }
        if num_inputs == 0 || num_inputs > MAX_DIMENSION
        {
            return Err(LUTError::InvalidDimension { found: num_inputs, max: MAX_DIMENSION });
        }
        for d in 0..num_inputs
        {
            if !(bounds.width(d) > 0.0)
            {
                return Err(LUTError::InvalidBounds { lower: bounds.lower[d], upper: bounds.upper[d] });
            }
        }
        let mut tree = Self { num_inputs, num_outputs, registry: CornerRegistry::new(), boxes: Vec::new() };
        tree.create_box(None, bounds);
        Ok(tree)
    }

    #[inline]
    pub fn num_inputs(&self) -> usize
    {
        self.num_inputs
    }

    #[inline]
    pub fn num_outputs(&self) -> usize
    {
        self.num_outputs
    }

    #[inline]
    pub fn registry(&self) -> &CornerRegistry
    {
        &self.registry
    }

    #[inline]
    pub fn len(&self) -> usize
    {
        self.boxes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool
    {
        self.boxes.is_empty()
    }

    pub fn get_box(&self, id: BoxId) -> Result<&HypercubeBox, LUTError>
    {
        self.boxes.get(id).ok_or(LUTError::InvalidBox(id))
    }

    pub fn root(&self) -> &HypercubeBox
    {
        &self.boxes[Self::ROOT]
    }

    pub fn leaves(&self) -> impl Iterator<Item = (BoxId, &HypercubeBox)> + '_
    {
        self.boxes.iter().enumerate().filter(|(_, b)| b.is_leaf())
    }

    pub fn num_leaves(&self) -> usize
    {
        self.leaves().count()
    }

    pub fn max_generation(&self) -> u32
    {
        self.leaves().map(|(_, b)| b.generation).max().unwrap_or(0)
    }

    ///
    /// Corners with no real data yet, in canonical coordinate order.
    ///
    pub fn unevaluated_corners(&self) -> Vec<CornerHandle>
    {
        self.registry.handles().filter(|&h| !self.registry.is_evaluated(h)).collect()
    }

    fn create_box(&mut self, parent: Option<BoxId>, bounds: BoundingBox) -> (BoxId, Vec<CornerHandle>)
    {
        let generation = parent.map_or(0, |p| self.boxes[p].generation + 1);
        let num_corners = 1 << self.num_inputs;
        let mut corners = Vec::with_capacity(num_corners);
        let mut new_corners = Vec::new();
        for i in 0..num_corners
        {
            let handle = self.registry.resolve(&bounds.corner(i));
            if !self.registry.is_evaluated(handle)
            {
                new_corners.push(handle);
            }
            corners.push(handle);
        }
        let mut flags = BoxFlags::default();
        flags.set_is_leaf(true);
        self.boxes.push(HypercubeBox
        {
            bounds, generation, parent, children: Vec::new(), corners, predicted: Vec::new(),
            max_error: vec![0.0; self.num_outputs], flags
        });
        (self.boxes.len() - 1, new_corners)
    }

    ///
    /// Corners of this box and of all its descendants.
    ///
    pub fn get_corners(&self, id: BoxId) -> Result<CornerSet, LUTError>
    {
        self.get_box(id)?;
        let mut set = CornerSet::default();
        let mut stack = vec![id];
        while let Some(id) = stack.pop()
        {
            let b = &self.boxes[id];
            set.extend(b.corners.iter().copied());
            stack.extend(b.children.iter().rev().copied());
        }
        Ok(set)
    }

    ///
    /// Split a fully evaluated leaf into 2^D half-size children.
    ///
    /// Every corner introduced by the split is given a predicted value
    /// interpolated from this box before its corners are dropped. Returns
    /// the corners that need a real evaluation.
    ///
    pub fn subdivide(&mut self, id: BoxId) -> Result<Vec<CornerHandle>, LUTError>
    {
        let b = self.get_box(id)?;
        if !b.is_leaf()
        {
            return Err(LUTError::BoxNotLeaf(id));
        }
        if b.corners.iter().any(|&h| !self.registry.is_evaluated(h))
        {
            return Err(LUTError::BoxNotEvaluated(id));
        }
        let bounds = b.bounds.clone();
        let mid = bounds.midpoint();

        let mut new_corners = CornerSet::default();
        let mut children = Vec::with_capacity(1 << self.num_inputs);
        for c in 0..1usize << self.num_inputs
        {
            let mut lower = bounds.lower.clone();
            let mut upper = mid.clone();
            for d in 0..self.num_inputs
            {
                if (c >> d) & 1 == 1
                {
                    lower[d] = mid[d];
                    upper[d] = bounds.upper[d];
                }
            }
            let (child, fresh) = self.create_box(Some(id), BoundingBox::new(&lower, &upper));
            children.push(child);
            new_corners.extend(fresh);
        }

        let mut predictions = Vec::with_capacity(new_corners.len());
        for &handle in &new_corners
        {
            let x = self.registry.coordinate(handle)?.to_vec();
            predictions.push((handle, PointData::success(self.interpolate_point(id, &x)?)));
        }

        let parent = &mut self.boxes[id];
        parent.children = children;
        parent.flags.set_is_leaf(false);
        parent.corners = Vec::new();
        parent.predicted = Vec::new();

        for (handle, data) in predictions
        {
            self.assign_qoi_values(handle, data, true)?;
        }
        Ok(new_corners.into_iter().collect())
    }

    fn leaves_with_corner(&self, handle: CornerHandle, coordinate: &[f64]) -> Vec<BoxId>
    {
        let mut found = Vec::new();
        let mut stack = vec![Self::ROOT];
        while let Some(id) = stack.pop()
        {
            let b = &self.boxes[id];
            if !b.bounds.contains_within_tolerance(coordinate)
            {
                continue;
            }
            if b.is_leaf()
            {
                if b.corners.contains(&handle)
                {
                    found.push(id);
                }
            }
            else
            {
                stack.extend(b.children.iter().rev().copied());
            }
        }
        found
    }

    ///
    /// Record a value for a corner in every box that references it.
    ///
    /// A real value is attached to the corner itself. Where a box holds a
    /// prediction for the corner, the absolute difference becomes the
    /// corner's error estimate and feeds the box's maximum error per QoI.
    ///
    pub fn assign_qoi_values(&mut self, handle: CornerHandle, data: PointData, is_predicted: bool) -> Result<(), LUTError>
    {
        if data.num_qois() != self.num_outputs
        {
            return Err(LUTError::QoiLengthMismatch { expected: self.num_outputs, found: data.num_qois() });
        }
        let coordinate = self.registry.coordinate(handle)?.to_vec();
        let boxes = self.leaves_with_corner(handle, &coordinate);
        if is_predicted
        {
            for id in boxes
            {
                let b = &mut self.boxes[id];
                if b.predicted.iter().any(|p| p.handle == handle)
                {
                    continue;
                }
                b.predicted.push(PredictedCorner { handle, data: data.clone(), matched: false });
                b.flags.set_is_fully_evaluated(false);
                if self.registry.is_evaluated(handle)
                {
                    self.match_prediction(id, handle)?;
                }
            }
        }
        else
        {
            self.registry.attach(handle, data)?;
            for id in boxes
            {
                self.match_prediction(id, handle)?;
            }
        }
        Ok(())
    }

    fn match_prediction(&mut self, id: BoxId, handle: CornerHandle) -> Result<(), LUTError>
    {
        let b = &mut self.boxes[id];
        let Some(predicted) = b.predicted.iter_mut().find(|p| p.handle == handle && !p.matched) else
        {
            return Ok(());
        };
        let real = self.registry.data_mut(handle)?.ok_or(LUTError::BoxNotEvaluated(id))?;
        predicted.matched = true;
        for (max, diff) in b.max_error.iter_mut().zip(real.absolute_difference(&predicted.data))
        {
            *max = f64::max(*max, diff);
        }
        real.attach_error_estimates(&predicted.data);

        if b.predicted.iter().all(|p| p.matched)
        {
            if Self::all_corners_failed(&self.registry, &b.corners)
            {
                b.max_error.fill(0.0);
            }
            b.flags.set_is_fully_evaluated(true);
        }
        Ok(())
    }

    ///
    /// Refining around a region where every evaluation failed is wasted
    /// effort, so such boxes report zero error.
    ///
    fn all_corners_failed(registry: &CornerRegistry, corners: &[CornerHandle]) -> bool
    {
        corners.iter().all(|&h| matches!(registry.data(h), Ok(Some(data)) if !data.is_success()))
    }

    ///
    /// Error estimate used to rank a leaf for refinement, or `None` when the
    /// leaf cannot compete yet. A leaf that was never predicted (the root
    /// before its first split) has an unknown, hence infinite, error.
    ///
    pub fn leaf_error(&self, id: BoxId, qoi: usize) -> Option<f64>
    {
        let b = self.boxes.get(id)?;
        if !b.is_leaf() || b.corners.iter().any(|&h| !self.registry.is_evaluated(h))
        {
            return None;
        }
        if b.predicted.is_empty()
        {
            return Some(if Self::all_corners_failed(&self.registry, &b.corners) { 0.0 } else { f64::INFINITY });
        }
        b.max_error_per_qoi().and_then(|e| e.get(qoi).copied())
    }

    pub fn find_box_with_largest_error_estimate(&self, qoi: usize, tolerance: f64, max_generation_gap: u32) -> Result<Option<BoxId>, LUTError>
    {
        if qoi >= self.num_outputs
        {
            return Err(LUTError::InvalidQoi(qoi));
        }
        let candidates = self.leaves().filter_map(|(id, b)|
        {
            self.leaf_error(id, qoi).map(|error| LeafError { id, generation: b.generation, error })
        });
        Ok(select_leaf(candidates, self.max_generation(), RefinementOptions::new(tolerance, max_generation_gap)))
    }

    ///
    /// Leaf containing `x`. Bounds are inclusive; on a shared face the child
    /// with the lowest binary index wins.
    ///
    pub fn get_box_containing_point(&self, x: &[f64]) -> Result<BoxId, LUTError>
    {
        if x.len() != self.num_inputs
        {
            return Err(LUTError::DimensionMismatch { expected: self.num_inputs, found: x.len() });
        }
        if !self.root().bounds.contains(x)
        {
            return Err(LUTError::OutOfDomain);
        }
        let mut id = Self::ROOT;
        while !self.boxes[id].is_leaf()
        {
            id = *self.boxes[id].children.iter()
                .find(|&&c| self.boxes[c].bounds.contains(x))
                .ok_or(LUTError::OutOfDomain)?;
        }
        Ok(id)
    }

    pub fn interpolate_point(&self, id: BoxId, x: &[f64]) -> Result<Vec<f64>, LUTError>
    {
        let b = self.get_box(id)?;
        if !b.is_leaf() && b.corners.is_empty()
        {
            return Err(LUTError::BoxNotLeaf(id));
        }
        let mut corner_values = Vec::with_capacity(b.corners.len());
        for &h in &b.corners
        {
            let data = self.registry.data(h)?.ok_or(LUTError::BoxNotEvaluated(id))?;
            corner_values.push(data.qois());
        }
        let mut result = vec![0.0; self.num_outputs];
        InterpolationOperation(&b.bounds).interpolate(x, &corner_values, &mut result)?;
        Ok(result)
    }

    #[inline]
    pub fn interpolate(&self, x: &[f64]) -> Result<Vec<f64>, LUTError>
    {
        let id = self.get_box_containing_point(x)?;
        self.interpolate_point(id, x)
    }
}
