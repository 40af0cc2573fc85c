//! Command implementations for the triage CLI.
//!
//! Each command returns its rendered output; `main` decides where it goes.

pub(crate) mod demux;
pub(crate) mod extract;
pub(crate) mod unzip;
