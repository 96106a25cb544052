#![doc = "cfcp-core: core logic library for cfcp."]

//! This crate holds everything needed to copy a local file into the container
//! filesystem of a running Cloud Foundry application: the `cf` subprocess
//! wrapper, the parsed platform metadata, the exclusion filter, the remote-copy
//! transports and the orchestrator that ties them together.
//!
//! # Usage
//! Construct a [`copier::Copier`] with a [`platform::CfClient`] and a
//! [`transport::Transport`], then call [`copier::Copier::copy`].

pub mod contract;
pub mod copier;
pub mod error;
pub mod exclude;
pub mod platform;
pub mod runner;
pub mod transport;
