//! Bootstrap-and-launch domain logic for the cytotoxic scheduler.
//!
//! Probes the host for the tools the app needs, installs the missing ones,
//! prepares the app directory and Python environment, hands the app to the
//! process supervisor and checks once that it came up. External systems sit
//! behind the capability traits in [`probe`], [`provision`], [`workspace`]
//! and [`supervisor`] so the workflow in [`pipeline`] runs against fakes in
//! tests.

pub mod config;
pub mod console;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod launch;
pub mod layout;
pub mod pipeline;
pub mod probe;
pub mod provision;
pub mod settings;
pub mod subprocess;
pub mod supervisor;
pub mod tools;
pub mod verify;
pub mod workspace;
