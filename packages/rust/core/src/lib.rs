//! Core pipeline orchestration for imageset.
//!
//! This crate ties together prompt expansion, image search, per-image
//! scraping/downloading/captioning and dataset persistence into the
//! end-to-end [`DatasetBuilder::build`] workflow.

pub mod assembler;
pub mod pipeline;
pub mod pool;

pub use assembler::{load_dataset, persist_dataset};
pub use pipeline::{BuildSummary, DatasetBuilder, ProgressReporter, Services, SilentProgress};
pub use pool::WorkerPool;
