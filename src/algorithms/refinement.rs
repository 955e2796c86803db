///
/// Controls which leaf is refined next for one quantity of interest.
///
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefinementOptions
{
    /// Leaves with an error estimate above this are refinement candidates.
    pub tolerance: f64,
    /// Largest tolerated difference between the deepest leaf and the
    /// shallowest leaf that is still above tolerance.
    pub max_generation_gap: u32,
}

impl RefinementOptions
{
    pub fn new(tolerance: f64, max_generation_gap: u32) -> Self
    {
        Self { tolerance, max_generation_gap }
    }
}

///
/// Error estimate of one fully evaluated leaf for the QoI being refined.
///
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeafError
{
    pub id: usize,
    pub generation: u32,
    pub error: f64,
}

///
/// Picks the leaf to subdivide next.
///
/// Normally this is the leaf with the largest error above tolerance. When
/// the deepest leaf in the tree (`max_leaf_generation`) is at least
/// `max_generation_gap` generations below the shallowest offending leaf, the
/// shallowest offending leaf is chosen instead so that coarse regions are
/// not starved. Ties go to the larger error, then to the earlier leaf.
///
pub fn select_leaf<I: IntoIterator<Item = LeafError>>(leaves: I, max_leaf_generation: u32, options: RefinementOptions) -> Option<usize>
{
    let mut worst: Option<LeafError> = None;
    let mut shallowest: Option<LeafError> = None;
    for leaf in leaves
    {
        if !(leaf.error > options.tolerance)
        {
            continue;
        }
        if worst.map_or(true, |w| leaf.error > w.error)
        {
            worst = Some(leaf);
        }
        if shallowest.map_or(true, |s| leaf.generation < s.generation || (leaf.generation == s.generation && leaf.error > s.error))
        {
            shallowest = Some(leaf);
        }
    }
    let (worst, shallowest) = (worst?, shallowest?);
    if max_leaf_generation.saturating_sub(shallowest.generation) >= options.max_generation_gap
    {
        Some(shallowest.id)
    }
    else
    {
        Some(worst.id)
    }
}
