//! sef-resolve
//!
//! Storage event finality: the decisions, without the IO.
//!
//! - Outcome resolution: an ordered rule cascade over the two self-reports,
//!   with a statistical fallback for users whose reports are chronically
//!   inconclusive.
//! - Eligible window: `[checkpoint, now - finality)` plus the row predicate
//!   every store must apply.
//! - Checkpoint watermark: the checkpoint only ever moves forward.
//!
//! Deterministic, pure logic. No IO. No clock reads.

mod checkpoint;
mod outcome;
mod window;

pub use checkpoint::{CheckpointAdvance, CheckpointWatermark};
pub use outcome::{resolve, ExchangeCodes, Outcome, Resolution, ResolutionRule, ResolvePolicy};
pub use window::EventWindow;
