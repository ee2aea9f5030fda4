//! Photo ingestion.
//!
//! Uploads are staged, hashed, checked for duplicates, placed under
//! `<root>/<YYYY>/<MM>/` and committed to the catalog, with compensating
//! cleanup when a commit fails after placement.

mod capture_metadata;
mod duplicate_guard;
mod hasher;
mod pipeline;
mod placement;
mod staging;

pub use capture_metadata::extract_capture_timestamp;
pub use duplicate_guard::{CommitOutcome, DuplicateCheck, DuplicateGuard, LocationLock};
pub use hasher::{hash_file, hash_reader};
pub use pipeline::{IngestionError, IngestionPipeline, PipelineSettings};
pub use placement::{stored_name, PlacementResolver};
pub use staging::{Placement, StagedFile, StagingArea, StagingError};
