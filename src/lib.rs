pub mod algorithms;
pub mod errors;
pub mod grids;
pub mod serialization;
pub mod storage;

pub use algorithms::evaluation::Evaluator;
pub use errors::LUTError;
pub use grids::generator::{ArchiveTarget, GenerationOptions, GenerationState, LookupTableGenerator};
pub use grids::lookup_table::LookupTable;
pub use storage::point_data::PointData;
