//! Core domain model for notewatch: raw and canonical daily-note snapshots,
//! the normalizer, the derived-state calculator and structured messages.

pub mod calendar;
pub mod derive;
pub mod message;
pub mod normalize;
pub mod snapshot;

pub use derive::{derive, format_remaining, DerivedState, Eta, ExpeditionProgress};
pub use message::{Block, Field, StructuredMessage};
pub use normalize::{normalize, parse_utc_offset, NormalizationError, CLOCK_SKEW_TOLERANCE_SECS};
pub use snapshot::{
    AccountRef, CanonicalSnapshot, Commissions, Counter, Expedition, Expeditions, RawExpedition,
    RawRemaining, RawSnapshot, RawTime, Region, Resource,
};

pub const CRATE_NAME: &str = "notewatch-core";
