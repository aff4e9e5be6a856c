//! State management module
//!
//! This module handles all form session state, including:
//! - Pending, not-yet-applied edit parameters (edit.rs)
//! - The applied transformation configuration and its merge (config.rs)
//! - Shared data structures (data.rs)
//! - Persistence of saved transformations (library.rs)

pub mod config;
pub mod data;
pub mod edit;
pub mod library;
