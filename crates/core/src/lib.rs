pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod record;
pub mod script;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, ConvertOptions,
    DirectoriesConfig,
};
pub use directory::{
    run_validate_all, BatchHandle, BatchSummary, ChangeEvent, DirectoryConverter, DirectoryError,
    DirectorySnapshot, StatusCounts,
};
pub use engine::{is_convertible, ConversionEngine, ConversionJob, JobKind};
pub use error::{AggregateError, ConvertError, ErrorKind, Location};
pub use record::{FileRecord, FileStatus, RecordId};
