pub mod evaluation;
pub mod interpolation;
pub mod refinement;
