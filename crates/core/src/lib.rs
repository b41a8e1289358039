#![forbid(unsafe_code)]

//! Domain model for course catalogs and per-viewer lesson progress.
//!
//! Everything here is pure: no I/O, no clocks other than the injectable
//! [`Clock`]. Storage adapters live in the `storage` crate and orchestration
//! in `services`.

pub mod error;
pub mod model;
pub mod time;

pub use error::Error;
pub use time::Clock;
