//! Design Hub - a feed aggregator for design publications
//!
//! Fetches RSS, Atom and JSON feeds from a configured catalog, merges them
//! newest first behind a two-tier cache, and serves them as a JSON API with
//! favorite, read and push-notification support.

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod normalize;
pub mod notify;
pub mod parser;
pub mod registry;
pub mod routes;
pub mod sanitize;
pub mod service;
