pub mod playbook;
pub mod router;
pub mod scoring;
pub mod weights;

pub use playbook::{matching_branches, nominal_window, playbook_days_to_win, playbook_steps};
pub use router::{ConversionStats, EnrichmentSink, PlaybookRouter};
pub use scoring::{priority_for_score, ScoringEngine, PROVISIONAL_DAYS_TO_WIN};
pub use weights::WeightVector;
