//! Data ingestion and sample generation.

pub mod dataset;
pub mod preprocessor;
pub mod scaler;

pub use dataset::{random_split, SubsetDataset, WindowBatch, WindowBatcher, WindowDataset, WindowSample};
pub use preprocessor::{EntityCatalog, PreparedData, Preprocessor, Series};
pub use scaler::MeanScaler;
