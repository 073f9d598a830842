//! Library to backup MySQL databases and application directories.
//!
//! A run is driven by a root configuration file in `KEY=VALUE` form. The root
//! file may reference further configuration files with `@name=path`, every
//! referenced file becomes a group which is backed up on its own. See the
//! [`orchestrator`] module for the processing of a run and the [`backends`]
//! module for the different backup types.

#![forbid(unsafe_code)]

pub mod archive;
pub mod backends;
pub mod cli;
pub mod config;
pub mod exec;
pub mod orchestrator;
pub mod runlog;
pub mod util;
