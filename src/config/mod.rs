//! Configuration management
//!
//! Node settings: addresses, storage location, mining difficulty and
//! network timeouts. Built once in `main` and handed to constructors.

pub mod settings;

pub use settings::Settings;
