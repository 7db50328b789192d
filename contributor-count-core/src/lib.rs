#![doc = "contributor-count-core: provider-agnostic contributor counting engine."]

//! This crate holds all logic for counting the distinct humans who committed to an
//! organization, group, workspace or project within a trailing window.
//!
//! Data flows provider client → [`fetch`] → [`filter`] → [`aggregate`] → [`report`];
//! [`counter::count_contributors`] drives one run end to end.
//!
//! # Usage
//! The CLI crate resolves tokens and flags, then hands an explicit [`config::CountConfig`],
//! a [`window::TimeWindow`] and a [`contract::ProviderClient`] to the counter.

pub mod aggregate;
pub mod config;
pub mod contract;
pub mod counter;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod providers;
pub mod report;
pub mod window;
