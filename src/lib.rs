pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod estimate;
pub mod events;
pub mod ffmpeg;
pub mod fstools;
pub mod job;
pub mod presets;
pub mod progress;
pub mod resolver;

#[cfg(test)]
mod test_support;

pub use batch::{Batch, JobRequest, OutputPolicy};
pub use config::EngineConfig;
pub use engine::{BatchReport, CancelHandle, ConversionEngine};
pub use error::{ConvertError, Result};
pub use events::ConversionEvent;
pub use job::{ConversionJob, JobStatus};
pub use presets::{Preset, PresetSet};
pub use resolver::{FormatOverride, OutputOverride, ResolutionOverride};
