pub mod generator;
pub mod hypercube_tree;
pub mod lookup_table;
