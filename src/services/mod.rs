//! Collaborator Services
//!
//! Interfaces to the request/response data store the duel core consumes:
//! persisted match records, the ranking list and the achievement catalog.
//! The core only calls these best-effort from detached tasks; a failure here
//! never holds up a session.

pub mod achievements;
pub mod records;

pub use achievements::{Achievement, AchievementCatalog, StaticAchievementCatalog, MILESTONES};
pub use records::{InMemoryRecordStore, MatchRecord, MatchRecordStore, RankedEntry, RecordError};
