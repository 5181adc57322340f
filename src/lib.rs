// Tolerant statistics engine for bicycle rental/tour operation exports.
//
// The source documents come in two historical conventions (namespaced and
// non-namespaced, with fields at varying depths and under alternate names);
// the engine reconciles both and folds them into consistent aggregates.
// Load a document once with `CyclingStats::from_file`, then call the
// aggregation methods any number of times.

pub mod analytics;
pub mod dom;
pub mod error;
pub mod model;
pub mod report;

// Re-export key types for convenience
pub use dom::{parse_document, Element, Locator};
pub use error::{Result, StatsError};
pub use model::{BikeStats, CyclingStats, GuideStats, MonthlySummary, PathStats, PricingMode};
