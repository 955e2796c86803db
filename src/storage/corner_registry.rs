use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::LUTError;
use crate::storage::point_data::PointData;

/// Two coordinates closer than this on every axis are the same corner.
pub const TOL: f64 = 1e-12;

///
/// Stable identity of a corner within one tree.
///
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CornerHandle(pub(crate) u32);

impl CornerHandle
{
    #[inline]
    pub fn id(&self) -> u32
    {
        self.0
    }
}

///
/// Lexicographic comparison where axes closer than `TOL` compare equal and
/// the comparison carries on to the next axis.
///
pub fn compare_coordinates(a: &[f64], b: &[f64]) -> Ordering
{
    for (x, y) in a.iter().zip(b)
    {
        if (x - y).abs() <= TOL
        {
            continue;
        }
        return x.total_cmp(y);
    }
    a.len().cmp(&b.len())
}

#[derive(Clone, Debug)]
struct CornerKey(Vec<f64>);

impl PartialEq for CornerKey
{
    fn eq(&self, other: &Self) -> bool {
        compare_coordinates(&self.0, &other.0) == Ordering::Equal
    }
}
impl Eq for CornerKey {}

impl PartialOrd for CornerKey
{
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CornerKey
{
    fn cmp(&self, other: &Self) -> Ordering {
        compare_coordinates(&self.0, &other.0)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct CornerEntry
{
    coordinate: Vec<f64>,
    data: Option<PointData>,
}

///
/// Deduplicates corner coordinates across a whole tree. Each distinct
/// coordinate (up to `TOL`) owns one slot, and evaluated data is attached to
/// the slot rather than to any box, so boxes sharing a vertex share its data.
///
/// Only the entries are persisted; the ordered index is rebuilt on load.
///
#[derive(Clone, Debug, Default)]
pub struct CornerRegistry
{
    entries: Vec<CornerEntry>,
    index: BTreeMap<CornerKey, CornerHandle>,
}

impl CornerRegistry
{
    pub fn new() -> Self
    {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }

    ///
    /// Returns the handle of the registered coordinate matching `point`,
    /// inserting a new unevaluated slot if there is none.
    ///
    pub fn resolve(&mut self, point: &[f64]) -> CornerHandle
    {
        let key = CornerKey(point.to_vec());
        if let Some(&handle) = self.index.get(&key)
        {
            return handle;
        }
        let handle = CornerHandle(self.entries.len() as u32);
        self.entries.push(CornerEntry { coordinate: key.0.clone(), data: None });
        self.index.insert(key, handle);
        handle
    }

    pub fn find(&self, point: &[f64]) -> Option<CornerHandle>
    {
        self.index.get(&CornerKey(point.to_vec())).copied()
    }

    fn entry(&self, handle: CornerHandle) -> Result<&CornerEntry, LUTError>
    {
        self.entries.get(handle.0 as usize).ok_or(LUTError::InvalidCorner(handle.0))
    }

    fn entry_mut(&mut self, handle: CornerHandle) -> Result<&mut CornerEntry, LUTError>
    {
        self.entries.get_mut(handle.0 as usize).ok_or(LUTError::InvalidCorner(handle.0))
    }

    pub fn coordinate(&self, handle: CornerHandle) -> Result<&[f64], LUTError>
    {
        Ok(&self.entry(handle)?.coordinate)
    }

    pub fn data(&self, handle: CornerHandle) -> Result<Option<&PointData>, LUTError>
    {
        Ok(self.entry(handle)?.data.as_ref())
    }

    #[inline]
    pub fn is_evaluated(&self, handle: CornerHandle) -> bool
    {
        matches!(self.entries.get(handle.0 as usize), Some(CornerEntry { data: Some(_), .. }))
    }

    ///
    /// Attach evaluated data to a corner. A corner is evaluated exactly once.
    ///
    pub fn attach(&mut self, handle: CornerHandle, data: PointData) -> Result<(), LUTError>
    {
        let entry = self.entry_mut(handle)?;
        if entry.data.is_some()
        {
            return Err(LUTError::CornerAlreadyEvaluated(handle.0));
        }
        entry.data = Some(data);
        Ok(())
    }

    pub(crate) fn data_mut(&mut self, handle: CornerHandle) -> Result<Option<&mut PointData>, LUTError>
    {
        Ok(self.entry_mut(handle)?.data.as_mut())
    }

    ///
    /// Handles in canonical (tolerance-lexicographic) coordinate order.
    ///
    pub fn handles(&self) -> impl Iterator<Item = CornerHandle> + '_
    {
        self.index.values().copied()
    }

    fn from_entries(entries: Vec<CornerEntry>) -> Self
    {
        let mut index = BTreeMap::new();
        for (i, entry) in entries.iter().enumerate()
        {
            index.entry(CornerKey(entry.coordinate.clone())).or_insert(CornerHandle(i as u32));
        }
        Self { entries, index }
    }
}

impl Serialize for CornerRegistry
{
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.entries.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CornerRegistry
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = Vec::<CornerEntry>::deserialize(deserializer)?;
        Ok(Self::from_entries(entries))
    }
}
