//! rafflescope - raffle ticket-count and deadline extraction engine.
//!
//! Pulls entry counts and deadlines out of raffle storefronts, preferring
//! structured JSON endpoints and falling back to a headless browser when a
//! page only renders its data client-side.

pub mod config;
pub mod models;
pub mod scrapers;

pub use models::RaffleRecord;
pub use scrapers::{RaffleQueue, ScrapeError};
