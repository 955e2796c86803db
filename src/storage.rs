pub mod bounding_box;
pub mod checkpoint_log;
pub mod corner_registry;
pub mod point_data;
