pub mod artifact;
pub mod batcher;
pub mod dataset;
pub mod evaluate;
pub mod loader;
pub mod network;
pub mod normalize;
pub mod predict;
pub mod registry;
pub mod train;
