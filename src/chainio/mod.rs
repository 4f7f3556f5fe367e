pub mod export;
pub mod import;

pub use export::{ChainExporter, ExportError};
pub use import::{ChainImporter, ImportError, ImportSummary};
