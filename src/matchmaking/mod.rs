//! Periodic team formation
//!
//! This module contains the tick scheduler that turns the head of the queue
//! into matches, the team formation policy, and the match creation handoff.

pub mod handoff;
pub mod scheduler;
pub mod teams;

pub use handoff::{MatchCreation, PublishingMatchCreation, RecordedMatch, RecordingMatchCreation};
pub use scheduler::{MatchReport, SchedulerConfig, TickOutcome, TickScheduler};
pub use teams::{alternate, AlternatingTeamFormation, TeamFormation};
