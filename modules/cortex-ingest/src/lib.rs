pub mod adapter;
pub mod court_docket;
pub mod ingestor;
pub mod normalize;
pub mod regulatory_calendar;
pub mod talent_tracker;

pub use adapter::{HttpFeed, SignalFeed, SourceAdapter};
pub use court_docket::{docket_urgency, CourtDocketAdapter, DocketRecord};
pub use ingestor::{AdapterStats, Ingestor};
pub use normalize::normalize_signal;
pub use regulatory_calendar::{CalendarEntry, RegulatoryCalendarAdapter};
pub use talent_tracker::{talent_urgency, DepartureRecord, SeniorityTier, TalentTrackerAdapter};
