//! InfraFlow Discovery
//!
//! Consumes a live resource listing and pairs it with managed records.
//!
//! - [`LiveResourceLister`]: the seam to whatever knows about live resources
//! - [`Scanner`]: concurrent per-type listing with failures recorded, not fatal
//! - [`Correlator`]: exact ID, natural key / tag, then fuzzy name matching

pub mod correlate;
pub mod error;
pub mod lister;
pub mod naming;
pub mod scanner;

pub use correlate::{
    CorrelationReport, Correlator, DEFAULT_NAME_MATCH_THRESHOLD, MANAGED_ID_TAG, MatchBasis,
    NaturalKey, ResourceCorrelation,
};
pub use error::{DiscoveryError, Result};
pub use lister::{DiscoveredResource, LiveResourceLister, SnapshotLister, StaticLister};
pub use naming::{name_similarity, normalize_name};
pub use scanner::{ScanFailure, ScanOutcome, Scanner};
