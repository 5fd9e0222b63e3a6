//! Policy layer for wiretaps.
//!
//! This module provides the TOML-based configuration system ([`config`]) and
//! the decision engine ([`evaluator`]) that determines whether each outbound
//! request is passed through, redacted, or blocked.

pub mod config;
pub mod evaluator;
