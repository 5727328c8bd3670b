//! Data models for rafflescope.

mod raffle;

pub use raffle::{RaffleDraft, RaffleId, RaffleRecord, RecordOrigin};
