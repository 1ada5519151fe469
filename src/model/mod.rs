//! The forecast network and its building blocks.

pub mod deepar;
pub mod gaussian;
pub mod init;
pub mod lstm;

pub use deepar::{DeepAr, DeepArConfig, EntityEmbedding, YearEncoder, YEAR_FEATURES};
pub use gaussian::GaussianHead;
pub use lstm::{CellState, LstmCell, StackState, StackedLstm};
