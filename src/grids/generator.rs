use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::algorithms::evaluation::{BatchEvaluation, Evaluator};
use crate::errors::LUTError;
use crate::grids::hypercube_tree::{HypercubeTree, MAX_DIMENSION};
use crate::grids::lookup_table::LookupTable;
use crate::serialization::{self, SerializationFormat};
use crate::storage::bounding_box::BoundingBox;
use crate::storage::checkpoint_log::CheckpointLog;
use crate::storage::corner_registry::CornerHandle;
use crate::storage::point_data::PointData;

pub const ARCHIVE_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterAxis
{
    pub name: String,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantityOfInterest
{
    pub name: String,
    /// Absolute tolerance on the error estimate.
    pub tolerance: f64,
}

///
/// Where the generator writes itself after every batch.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArchiveTarget
{
    pub path: PathBuf,
    pub format: SerializationFormat,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions
{
    /// Generation stops at the first batch boundary at or past this count.
    pub max_num_evaluations: usize,
    pub max_generation_gap: u32,
    /// Size of a dedicated worker pool. `None` runs batches on the global
    /// rayon pool.
    pub num_threads: Option<usize>,
    pub checkpoint_log: Option<PathBuf>,
    pub archive: Option<ArchiveTarget>,
}

impl Default for GenerationOptions
{
    fn default() -> Self
    {
        Self { max_num_evaluations: usize::MAX, max_generation_gap: 4, num_threads: None, checkpoint_log: None, archive: None }
    }
}

impl GenerationOptions
{
    pub fn new(max_num_evaluations: usize) -> Self
    {
        Self { max_num_evaluations, ..Default::default() }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenerationState
{
    #[default]
    Fresh,
    Seeding,
    Refining,
    Converged,
    Exhausted,
}

#[derive(Serialize)]
struct ArchiveRef<'a>
{
    version: u32,
    generator: &'a LookupTableGenerator,
}

#[derive(Deserialize)]
struct Archive
{
    version: u32,
    generator: LookupTableGenerator,
}

#[derive(Deserialize)]
struct ArchiveHeader
{
    version: u32,
}

///
/// Drives adaptive refinement of a lookup table over named parameter axes.
///
/// Parameters and QoIs are registered first, then `generate` seeds the root
/// box and keeps subdividing the leaf with the largest error estimate until
/// every QoI is within tolerance or the evaluation budget is spent. QoIs are
/// refined in registration order, so register them in order of importance.
/// `generate` can be called again after a budget stop, after a hard
/// evaluator failure, or on a generator read back from an archive, and it
/// continues exactly where the previous run stopped.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LookupTableGenerator
{
    num_inputs: usize,
    parameters: Vec<ParameterAxis>,
    qois: Vec<QuantityOfInterest>,
    options: GenerationOptions,
    tree: Option<HypercubeTree>,
    state: GenerationState,
    current_qoi: usize,
    num_evaluations: usize,
    meets_tolerances: bool,
}

impl LookupTableGenerator
{
    pub fn new(num_inputs: usize) -> Result<Self, LUTError>
    {
        Self::with_options(num_inputs, GenerationOptions::default())
    }

    ///
    /// Creates an empty generator for a table of `num_inputs` parameters.
    /// Every box has 2^num_inputs corners, so the dimension must lie in
    /// `1..=MAX_DIMENSION`.
    ///
    pub fn with_options(num_inputs: usize, options: GenerationOptions) -> Result<Self, LUTError>
    {
        if num_inputs == 0 || num_inputs > MAX_DIMENSION
        {
            return Err(LUTError::InvalidDimension { found: num_inputs, max: MAX_DIMENSION });
        }
        Ok(Self
        {
            num_inputs,
            parameters: Vec::new(),
            qois: Vec::new(),
            options,
            tree: None,
            state: GenerationState::Fresh,
            current_qoi: 0,
            num_evaluations: 0,
            meets_tolerances: false,
        })
    }

    ///
    /// Registers the next parameter axis. Axes map to tree dimensions in
    /// registration order.
    ///
    pub fn add_parameter(&mut self, name: impl Into<String>, lower: f64, upper: f64) -> Result<(), LUTError>
    {
        let name = name.into();
        if self.generation_has_begun()
        {
            return Err(LUTError::GenerationAlreadyBegun);
        }
        if self.parameters.iter().any(|p| p.name == name)
        {
            return Err(LUTError::DuplicateParameter(name));
        }
        if self.parameters.len() == self.num_inputs
        {
            return Err(LUTError::TooManyParameters(self.num_inputs));
        }
        if !(lower < upper) || !lower.is_finite() || !upper.is_finite()
        {
            return Err(LUTError::InvalidBounds { lower, upper });
        }
        self.parameters.push(ParameterAxis { name, lower, upper });
        Ok(())
    }

    ///
    /// Appends a QoI to the refinement priority order.
    ///
    pub fn add_qoi(&mut self, name: impl Into<String>, tolerance: f64) -> Result<(), LUTError>
    {
        if self.generation_has_begun()
        {
            return Err(LUTError::GenerationAlreadyBegun);
        }
        self.qois.push(QuantityOfInterest { name: name.into(), tolerance });
        Ok(())
    }

    ///
    /// Changes a tolerance. On a table that has already stopped, the next
    /// call to `generate` resumes refinement from this QoI.
    ///
    pub fn set_qoi_tolerance(&mut self, index: usize, tolerance: f64) -> Result<(), LUTError>
    {
        let qoi = self.qois.get_mut(index).ok_or(LUTError::InvalidQoi(index))?;
        qoi.tolerance = tolerance;
        if self.generation_has_begun()
        {
            self.current_qoi = self.current_qoi.min(index);
            if index == 0
            {
                self.meets_tolerances = false;
            }
            if self.state == GenerationState::Converged
            {
                self.state = GenerationState::Refining;
            }
        }
        Ok(())
    }

    #[inline]
    pub fn options(&self) -> &GenerationOptions
    {
        &self.options
    }

    pub fn set_max_num_evaluations(&mut self, max_num_evaluations: usize)
    {
        self.options.max_num_evaluations = max_num_evaluations;
    }

    pub fn set_max_generation_gap(&mut self, max_generation_gap: u32)
    {
        self.options.max_generation_gap = max_generation_gap;
    }

    pub fn set_num_threads(&mut self, num_threads: Option<usize>)
    {
        self.options.num_threads = num_threads;
    }

    pub fn set_checkpoint_log(&mut self, path: Option<PathBuf>)
    {
        self.options.checkpoint_log = path;
    }

    pub fn set_archive(&mut self, archive: Option<ArchiveTarget>)
    {
        self.options.archive = archive;
    }

    fn check_layout(&self) -> Result<(), LUTError>
    {
        if self.parameters.len() != self.num_inputs
        {
            return Err(LUTError::ParametersIncomplete { expected: self.num_inputs, found: self.parameters.len() });
        }
        if self.qois.is_empty()
        {
            return Err(LUTError::NoQoisRegistered);
        }
        Ok(())
    }

    ///
    /// Real parameter bounds; maps the unit cube the tree lives on.
    ///
    pub fn parameter_bounds(&self) -> BoundingBox
    {
        let lower: Vec<f64> = self.parameters.iter().map(|p| p.lower).collect();
        let upper: Vec<f64> = self.parameters.iter().map(|p| p.upper).collect();
        BoundingBox::new(&lower, &upper)
    }

    fn checkpoint_log(&self) -> Option<CheckpointLog>
    {
        self.options.checkpoint_log.as_ref().map(|path|
        {
            CheckpointLog::new(path.clone(), self.parameter_names(), self.qoi_names())
        })
    }

    fn started_tree(&self) -> Result<&HypercubeTree, LUTError>
    {
        self.tree.as_ref().ok_or(LUTError::GenerationNotStarted)
    }

    ///
    /// Runs (or resumes) generation. Returns whether the first QoI met its
    /// tolerance everywhere before the evaluation budget ran out.
    ///
    #[tracing::instrument(skip_all, fields(num_inputs = self.num_inputs, num_qois = self.qois.len()))]
    pub fn generate<E: Evaluator + ?Sized>(&mut self, evaluator: &E) -> Result<bool, LUTError>
    {
        self.check_layout()?;
        if self.state == GenerationState::Fresh
        {
            self.tree = Some(HypercubeTree::new(BoundingBox::with_dim(self.num_inputs), self.qois.len())?);
            self.state = GenerationState::Seeding;
            if let Some(log) = self.checkpoint_log()
            {
                log.reset()?;
            }
            info!(num_corners = 1usize << self.num_inputs, "seeding lookup table");
        }

        // seed corners, or the batch a hard failure interrupted
        let pending = self.started_tree()?.unevaluated_corners();
        if !pending.is_empty()
        {
            self.evaluate_corners(evaluator, pending)?;
        }

        match self.state
        {
            GenerationState::Converged => return Ok(self.meets_tolerances),
            GenerationState::Seeding | GenerationState::Exhausted => self.state = GenerationState::Refining,
            _ => {}
        }

        let max_generation_gap = self.options.max_generation_gap;
        while self.current_qoi < self.qois.len()
        {
            let qoi = self.current_qoi;
            let tolerance = self.qois[qoi].tolerance;
            loop
            {
                if self.num_evaluations >= self.options.max_num_evaluations
                {
                    self.state = GenerationState::Exhausted;
                    info!(num_evaluations = self.num_evaluations, qoi = %self.qois[qoi].name, "evaluation budget exhausted");
                    self.save_archive()?;
                    return Ok(self.meets_tolerances);
                }
                let tree = self.tree.as_mut().ok_or(LUTError::GenerationNotStarted)?;
                let Some(id) = tree.find_box_with_largest_error_estimate(qoi, tolerance, max_generation_gap)?
                else
                {
                    break;
                };
                let generation = tree.get_box(id)?.generation();
                let new_corners = tree.subdivide(id)?;
                debug!(box_id = id, generation, qoi, num_new_corners = new_corners.len(), "subdividing box");
                self.evaluate_corners(evaluator, new_corners)?;
            }
            if qoi == 0
            {
                self.meets_tolerances = true;
            }
            info!(qoi = %self.qois[qoi].name, num_evaluations = self.num_evaluations, "quantity of interest within tolerance");
            self.current_qoi += 1;
        }
        self.state = GenerationState::Converged;
        info!(num_evaluations = self.num_evaluations, num_leaves = self.num_leaves(), "lookup table converged");
        self.save_archive()?;
        Ok(self.meets_tolerances)
    }

    ///
    /// Evaluates one batch of corners at their real coordinates and applies
    /// every result before returning. The log and archive are updated only
    /// after the whole batch has been applied.
    ///
    fn evaluate_corners<E: Evaluator + ?Sized>(&mut self, evaluator: &E, handles: Vec<CornerHandle>) -> Result<(), LUTError>
    {
        let scaling = self.parameter_bounds();
        let log = self.checkpoint_log();
        let batch = BatchEvaluation { evaluator, num_outputs: self.qois.len(), num_threads: self.options.num_threads };
        let tree = self.tree.as_mut().ok_or(LUTError::GenerationNotStarted)?;

        let mut points = Vec::with_capacity(handles.len());
        for &handle in &handles
        {
            points.push(scaling.to_real_coordinate(tree.registry().coordinate(handle)?));
        }
        let results = batch.run(&points)?;
        for ((&handle, x), data) in handles.iter().zip(&points).zip(results)
        {
            if !data.is_success()
            {
                warn!(error_code = data.error_code(), point = ?x, "evaluation returned an error code");
            }
            tree.assign_qoi_values(handle, data, false)?;
        }

        if let Some(log) = &log
        {
            let mut rows = Vec::with_capacity(handles.len());
            for (&handle, x) in handles.iter().zip(&points)
            {
                let data = tree.registry().data(handle)?.ok_or(LUTError::InvalidCorner(handle.id()))?;
                rows.push((x.as_slice(), data));
            }
            log.append(rows)?;
        }
        self.num_evaluations += handles.len();
        self.save_archive()
    }

    fn save_archive(&self) -> Result<(), LUTError>
    {
        if let Some(target) = &self.options.archive
        {
            self.write(&target.path, target.format)?;
        }
        Ok(())
    }

    #[inline]
    pub fn num_inputs(&self) -> usize
    {
        self.num_inputs
    }

    #[inline]
    pub fn num_qois(&self) -> usize
    {
        self.qois.len()
    }

    #[inline]
    pub fn num_evaluations(&self) -> usize
    {
        self.num_evaluations
    }

    #[inline]
    pub fn state(&self) -> GenerationState
    {
        self.state
    }

    #[inline]
    pub fn meets_tolerances(&self) -> bool
    {
        self.meets_tolerances
    }

    #[inline]
    pub fn generation_has_begun(&self) -> bool
    {
        self.state != GenerationState::Fresh
    }

    pub fn parameters(&self) -> &[ParameterAxis]
    {
        &self.parameters
    }

    pub fn qois(&self) -> &[QuantityOfInterest]
    {
        &self.qois
    }

    pub fn parameter_names(&self) -> Vec<String>
    {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }

    pub fn qoi_names(&self) -> Vec<String>
    {
        self.qois.iter().map(|q| q.name.clone()).collect()
    }

    pub fn num_boxes(&self) -> usize
    {
        self.tree.as_ref().map_or(0, |t| t.len())
    }

    pub fn num_leaves(&self) -> usize
    {
        self.tree.as_ref().map_or(0, |t| t.num_leaves())
    }

    pub fn max_generation(&self) -> u32
    {
        self.tree.as_ref().map_or(0, |t| t.max_generation())
    }

    pub fn tree(&self) -> Option<&HypercubeTree>
    {
        self.tree.as_ref()
    }

    ///
    /// Evaluated corners in canonical order, with real coordinates.
    ///
    fn evaluated_points(&self) -> Vec<(Vec<f64>, &PointData)>
    {
        let Some(tree) = &self.tree else { return Vec::new() };
        let scaling = self.parameter_bounds();
        let registry = tree.registry();
        registry.handles().filter_map(|h|
        {
            let data = registry.data(h).ok().flatten()?;
            let x = registry.coordinate(h).ok()?;
            Some((scaling.to_real_coordinate(x), data))
        }).collect()
    }

    pub fn parameter_points(&self) -> Vec<Vec<f64>>
    {
        self.evaluated_points().into_iter().map(|(x, _)| x).collect()
    }

    pub fn function_values(&self) -> Vec<Vec<f64>>
    {
        self.evaluated_points().into_iter().map(|(_, data)| data.qois().to_vec()).collect()
    }

    pub fn error_codes(&self) -> Vec<u32>
    {
        self.evaluated_points().into_iter().map(|(_, data)| data.error_code()).collect()
    }

    ///
    /// Prediction errors of every evaluated point, `None` for points that
    /// were never predicted (the seed corners).
    ///
    pub fn error_estimates(&self) -> Vec<Option<Vec<f64>>>
    {
        self.evaluated_points().into_iter().map(|(_, data)| data.error_estimates().map(<[f64]>::to_vec)).collect()
    }

    ///
    /// Read-only view of the table for querying.
    ///
    pub fn lookup_table(&self) -> Result<LookupTable<'_>, LUTError>
    {
        let tree = self.started_tree()?;
        Ok(LookupTable::new(tree, self.parameter_bounds(), &self.parameters, &self.qois, self.num_evaluations, self.meets_tolerances))
    }

    pub fn interpolate(&self, points: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, LUTError>
    {
        self.lookup_table()?.interpolate(points)
    }

    pub fn write_buffer(&self, format: SerializationFormat) -> Result<Vec<u8>, LUTError>
    {
        serialization::serialize(&ArchiveRef { version: ARCHIVE_VERSION, generator: self }, format)
    }

    ///
    /// Writes the full generator state (tree, registry, counters and
    /// options). The evaluator is not stored.
    ///
    pub fn write(&self, path: impl AsRef<Path>, format: SerializationFormat) -> Result<(), LUTError>
    {
        let buffer = self.write_buffer(format)?;
        let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
        file.write_all(&buffer)?;
        file.flush()?;
        Ok(())
    }

    pub fn read_buffer(buffer: &[u8], format: SerializationFormat) -> Result<Self, LUTError>
    {
        let header: ArchiveHeader = serialization::deserialize(buffer, format)?;
        if header.version != ARCHIVE_VERSION
        {
            return Err(LUTError::IncompatibleArchive { found: header.version, expected: ARCHIVE_VERSION });
        }
        let Archive { version, generator } = serialization::deserialize(buffer, format)?;
        debug!(version, num_evaluations = generator.num_evaluations, "read archive");
        Ok(generator)
    }

    pub fn read<Reader: std::io::Read>(mut reader: Reader, format: SerializationFormat) -> Result<Self, LUTError>
    {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::read_buffer(&bytes, format)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn exp_1d(x: &[f64]) -> Result<PointData, LUTError>
    {
        Ok(PointData::success(vec![x[0].exp()]))
    }

    fn smooth_2d(x: &[f64]) -> Result<PointData, LUTError>
    {
        Ok(PointData::success(vec![(3.0 * x[0]).sin() * (2.0 * x[1]).cos() + x[0] * x[1], (x[0] - x[1]).powi(2)]))
    }

    fn exp_generator(max_num_evaluations: usize, tolerance: f64) -> LookupTableGenerator
    {
        let mut generator = LookupTableGenerator::with_options(1, GenerationOptions::new(max_num_evaluations)).unwrap();
        generator.add_parameter("x", 0.0, 1.0).unwrap();
        generator.add_qoi("exp", tolerance).unwrap();
        generator
    }

    fn smooth_generator(max_num_evaluations: usize) -> LookupTableGenerator
    {
        let mut generator = LookupTableGenerator::with_options(2, GenerationOptions::new(max_num_evaluations)).unwrap();
        generator.add_parameter("a", -1.0, 1.0).unwrap();
        generator.add_parameter("b", 0.0, 2.0).unwrap();
        generator.add_qoi("wave", 1e-4).unwrap();
        generator.add_qoi("square", 1e-4).unwrap();
        generator
    }

    #[test]
    fn test_exponential_single_split()
    {
        let mut generator = exp_generator(3, 1e-3);
        assert!(!generator.generate(&exp_1d).unwrap());
        assert_eq!(generator.num_evaluations(), 3);
        assert_eq!(generator.state(), GenerationState::Exhausted);
        assert_eq!(generator.num_boxes(), 3);
        assert_eq!(generator.parameter_points(), vec![vec![0.0], vec![0.5], vec![1.0]]);

        let estimates = generator.error_estimates();
        assert!(estimates[0].is_none() && estimates[2].is_none());
        let e = estimates[1].as_ref().unwrap()[0];
        assert!((e - ((1.0 + 1f64.exp()) / 2.0 - 0.5f64.exp())).abs() < 1e-12);
        assert!((e - 0.2107).abs() < 1e-3);

        let values = generator.interpolate(&[vec![0.25]]).unwrap();
        assert!((values[0][0] - (1.0 + 0.5f64.exp()) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_affine_table_converges_after_one_split()
    {
        let mut generator = LookupTableGenerator::new(2).unwrap();
        generator.add_parameter("a", 0.0, 1.0).unwrap();
        generator.add_parameter("b", 0.0, 1.0).unwrap();
        generator.add_qoi("plane", 1e-9).unwrap();
        let f = |x: &[f64]| -> Result<PointData, LUTError> { Ok(PointData::success(vec![2.0 * x[0] - x[1] + 0.25])) };
        assert!(generator.generate(&f).unwrap());
        assert_eq!(generator.state(), GenerationState::Converged);
        assert_eq!(generator.num_evaluations(), 9);
        assert_eq!(generator.num_leaves(), 4);
        assert_eq!(generator.max_generation(), 1);
    }

    #[test]
    fn test_evaluator_sees_real_coordinates()
    {
        let mut generator = LookupTableGenerator::with_options(1, GenerationOptions::new(20)).unwrap();
        generator.add_parameter("g_Na", 10.0, 20.0).unwrap();
        generator.add_qoi("apd", 1e-3).unwrap();
        let f = |x: &[f64]| -> Result<PointData, LUTError>
        {
            assert!((10.0..=20.0).contains(&x[0]));
            Ok(PointData::success(vec![(x[0] / 10.0).ln()]))
        };
        generator.generate(&f).unwrap();
        let points = generator.parameter_points();
        assert_eq!(points.first(), Some(&vec![10.0]));
        assert_eq!(points.last(), Some(&vec![20.0]));
        for (x, y) in points.iter().zip(generator.function_values())
        {
            assert!((y[0] - (x[0] / 10.0).ln()).abs() < 1e-15);
        }
        let table = generator.lookup_table().unwrap();
        assert!(table.interpolate_point(&[15.0]).is_ok());
        assert!(matches!(table.interpolate_point(&[25.0]), Err(LUTError::OutOfDomain)));
    }

    #[test]
    fn test_resumed_run_matches_straight_run()
    {
        let mut straight = smooth_generator(80);
        straight.generate(&smooth_2d).unwrap();

        let mut first = smooth_generator(30);
        first.generate(&smooth_2d).unwrap();
        assert_eq!(first.state(), GenerationState::Exhausted);
        let buffer = first.write_buffer(SerializationFormat::BincodeLz4).unwrap();
        let mut resumed = LookupTableGenerator::read_buffer(&buffer, SerializationFormat::BincodeLz4).unwrap();
        assert!(resumed.generation_has_begun());
        assert_eq!(resumed.num_evaluations(), first.num_evaluations());
        resumed.set_max_num_evaluations(80);
        resumed.generate(&smooth_2d).unwrap();

        assert_eq!(resumed.num_evaluations(), straight.num_evaluations());
        assert_eq!(resumed.num_boxes(), straight.num_boxes());
        assert_eq!(resumed.state(), straight.state());
        assert_eq!(resumed.meets_tolerances(), straight.meets_tolerances());
        assert_eq!(resumed.parameter_points(), straight.parameter_points());
        assert_eq!(resumed.function_values(), straight.function_values());
        assert_eq!(resumed.error_estimates(), straight.error_estimates());
    }

    #[test]
    fn test_hard_failure_aborts_and_resumes()
    {
        let calls = AtomicUsize::new(0);
        let flaky = |x: &[f64]| -> Result<PointData, LUTError>
        {
            if calls.fetch_add(1, Ordering::SeqCst) == 4
            {
                return Err(LUTError::evaluation_failed("solver diverged"));
            }
            exp_1d(x)
        };
        let mut generator = exp_generator(12, 1e-6);
        assert!(matches!(generator.generate(&flaky), Err(LUTError::EvaluationFailed(_))));
        let before = generator.num_evaluations();
        assert!(before < 5);

        generator.generate(&exp_1d).unwrap();
        let mut straight = exp_generator(12, 1e-6);
        straight.generate(&exp_1d).unwrap();
        assert_eq!(generator.num_evaluations(), straight.num_evaluations());
        assert_eq!(generator.parameter_points(), straight.parameter_points());
        assert_eq!(generator.function_values(), straight.function_values());
    }

    #[test]
    fn test_error_codes_do_not_stop_generation()
    {
        let f = |x: &[f64]| -> Result<PointData, LUTError>
        {
            if x[0] > 0.7 { Ok(PointData::new(vec![-1.0], 3)) } else { exp_1d(x) }
        };
        let mut generator = exp_generator(15, 1e-4);
        generator.generate(&f).unwrap();
        let codes = generator.error_codes();
        assert_eq!(codes.len(), generator.num_evaluations());
        assert!(codes.contains(&3));
        assert!(codes.contains(&0));
    }

    #[test]
    fn test_parameter_registration_errors()
    {
        let mut generator = LookupTableGenerator::new(2).unwrap();
        generator.add_parameter("a", 0.0, 1.0).unwrap();
        assert!(matches!(generator.add_parameter("a", 0.0, 1.0), Err(LUTError::DuplicateParameter(_))));
        assert!(matches!(generator.add_parameter("b", 1.0, 1.0), Err(LUTError::InvalidBounds { .. })));
        assert!(matches!(generator.add_parameter("b", 0.0, f64::INFINITY), Err(LUTError::InvalidBounds { .. })));
        assert!(matches!(generator.generate(&smooth_2d), Err(LUTError::ParametersIncomplete { expected: 2, found: 1 })));
        generator.add_parameter("b", 0.0, 1.0).unwrap();
        assert!(matches!(generator.add_parameter("c", 0.0, 1.0), Err(LUTError::TooManyParameters(2))));
        assert!(matches!(generator.generate(&smooth_2d), Err(LUTError::NoQoisRegistered)));
        assert!(!generator.generation_has_begun());
        assert!(matches!(generator.lookup_table(), Err(LUTError::GenerationNotStarted)));
    }

    #[test]
    fn test_unsupported_dimensions_rejected()
    {
        assert!(matches!(LookupTableGenerator::new(0), Err(LUTError::InvalidDimension { found: 0, .. })));
        assert!(matches!(LookupTableGenerator::with_options(64, GenerationOptions::new(10)), Err(LUTError::InvalidDimension { found: 64, .. })));
        assert!(LookupTableGenerator::new(MAX_DIMENSION + 1).is_err());
        let generator = LookupTableGenerator::new(MAX_DIMENSION).unwrap();
        assert_eq!(generator.num_inputs(), MAX_DIMENSION);
    }

    #[test]
    fn test_layout_is_frozen_once_generation_begins()
    {
        let mut generator = exp_generator(3, 1e-3);
        generator.generate(&exp_1d).unwrap();
        assert!(matches!(generator.add_qoi("other", 1.0), Err(LUTError::GenerationAlreadyBegun)));
        assert!(matches!(generator.add_parameter("y", 0.0, 1.0), Err(LUTError::GenerationAlreadyBegun)));
        assert!(matches!(generator.set_qoi_tolerance(1, 1.0), Err(LUTError::InvalidQoi(1))));
    }

    #[test]
    fn test_wrong_qoi_count_from_evaluator()
    {
        let f = |_: &[f64]| -> Result<PointData, LUTError> { Ok(PointData::success(vec![1.0, 2.0])) };
        let mut generator = exp_generator(10, 1e-3);
        assert!(matches!(generator.generate(&f), Err(LUTError::QoiLengthMismatch { expected: 1, found: 2 })));
        assert_eq!(generator.num_evaluations(), 0);
    }

    #[test]
    fn test_first_qoi_decides_convergence()
    {
        let mut generator = LookupTableGenerator::with_options(1, GenerationOptions::new(10)).unwrap();
        generator.add_parameter("x", 0.0, 1.0).unwrap();
        generator.add_qoi("line", 1e-6).unwrap();
        generator.add_qoi("steep", 1e-9).unwrap();
        let f = |x: &[f64]| -> Result<PointData, LUTError> { Ok(PointData::success(vec![x[0], (20.0 * x[0]).exp()])) };
        assert!(generator.generate(&f).unwrap());
        assert_eq!(generator.state(), GenerationState::Exhausted);
        assert!(generator.num_evaluations() >= 10);
    }

    #[test]
    fn test_budget_exhausted_before_first_qoi_converges()
    {
        let mut generator = smooth_generator(12);
        assert!(!generator.generate(&smooth_2d).unwrap());
        assert!(!generator.meets_tolerances());
        assert_eq!(generator.state(), GenerationState::Exhausted);
        // seeding (4), root split (5), one more split of at most 5
        assert!(generator.num_evaluations() >= 12 && generator.num_evaluations() <= 14);
    }

    #[test]
    fn test_tightened_tolerance_resumes_refinement()
    {
        let mut generator = exp_generator(usize::MAX, 1e-1);
        assert!(generator.generate(&exp_1d).unwrap());
        let coarse = generator.num_evaluations();
        assert!(generator.generate(&exp_1d).unwrap());
        assert_eq!(generator.num_evaluations(), coarse);

        generator.set_qoi_tolerance(0, 1e-3).unwrap();
        assert!(!generator.meets_tolerances());
        assert!(generator.generate(&exp_1d).unwrap());
        assert!(generator.num_evaluations() > coarse);
        assert_eq!(generator.state(), GenerationState::Converged);
    }

    #[test]
    fn test_checkpoint_log_written_per_batch()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exp.log");
        let mut generator = exp_generator(3, 1e-3);
        generator.set_checkpoint_log(Some(path.clone()));
        generator.generate(&exp_1d).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "1\t1\tx\texp");
        assert_eq!(lines[1].split('\t').count(), 3);
        assert!(lines[3].starts_with("0.5\t0\t"));
        assert_eq!(lines[3].split('\t').count(), 4);
    }

    #[test]
    fn test_archive_written_after_every_batch()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.lut");
        let mut generator = smooth_generator(20);
        generator.set_archive(Some(ArchiveTarget { path: path.clone(), format: SerializationFormat::Bincode }));
        generator.generate(&smooth_2d).unwrap();

        let file = std::fs::File::open(&path).unwrap();
        let restored = LookupTableGenerator::read(file, SerializationFormat::Bincode).unwrap();
        assert_eq!(restored.num_evaluations(), generator.num_evaluations());
        assert_eq!(restored.state(), GenerationState::Exhausted);
        assert_eq!(restored.options(), generator.options());
        let queries = vec![vec![0.3, 1.1], vec![-0.9, 0.2]];
        assert_eq!(restored.interpolate(&queries).unwrap(), generator.interpolate(&queries).unwrap());
    }

    #[test]
    fn test_json_archive_roundtrip()
    {
        let mut generator = exp_generator(7, 1e-4);
        generator.generate(&exp_1d).unwrap();
        let buffer = generator.write_buffer(SerializationFormat::JsonLz4).unwrap();
        let restored = LookupTableGenerator::read_buffer(&buffer, SerializationFormat::JsonLz4).unwrap();
        assert_eq!(restored.parameter_points(), generator.parameter_points());
        assert_eq!(restored.qoi_names(), vec!["exp".to_string()]);
    }

    #[test]
    fn test_incompatible_archive_version()
    {
        let generator = exp_generator(3, 1e-3);
        let buffer = serialization::serialize(&ArchiveRef { version: ARCHIVE_VERSION + 1, generator: &generator }, SerializationFormat::Json).unwrap();
        assert!(matches!(
            LookupTableGenerator::read_buffer(&buffer, SerializationFormat::Json),
            Err(LUTError::IncompatibleArchive { found, expected: ARCHIVE_VERSION }) if found == ARCHIVE_VERSION + 1
        ));
        assert!(LookupTableGenerator::read_buffer(b"not an archive", SerializationFormat::Json).is_err());
    }

    #[test]
    fn test_dedicated_thread_pool_matches_global_pool()
    {
        let mut pooled = smooth_generator(40);
        pooled.set_num_threads(Some(2));
        pooled.generate(&smooth_2d).unwrap();
        let mut global = smooth_generator(40);
        global.generate(&smooth_2d).unwrap();
        assert_eq!(pooled.parameter_points(), global.parameter_points());
        assert_eq!(pooled.function_values(), global.function_values());
    }
}
