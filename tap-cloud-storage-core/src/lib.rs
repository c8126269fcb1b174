#![doc = "tap-cloud-storage-core: core logic library for tap-cloud-storage."]

//! This crate holds the data models and the incremental download engine.
//! It knows nothing about a particular storage service: objects are listed
//! and fetched through [`contract::ObjectStorage`].
//!
//! # Usage
//! Load a [`config::TapConfig`] and a [`state::State`], then call
//! [`synchronise::synchronise`] with a storage implementation.

pub mod config;
pub mod contract;
pub mod download;
pub mod error;
pub mod state;
pub mod synchronise;
