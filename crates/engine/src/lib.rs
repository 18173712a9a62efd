pub mod error;
pub mod extractor;
pub mod job;
pub mod retry;

pub use error::ExtractError;
pub use extractor::{EngineConfig, ExtractReport, Extractor};
pub use job::JobSpec;
