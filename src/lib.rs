//! # Santorini NNet
//!
//! Policy/value network for Santorini self-play, built on the Burn ML
//! framework. A versioned registry assembles one of several architectures
//! from dense, convolutional, residual and partial-pooling stages; the
//! evaluator turns an encoded board and a legal-move mask into
//! log-probabilities over actions and per-player values in (-1, 1).
//!
//! ## Modules
//!
//! - [`layers`]: Partial-pooling operators, normalization and residual blocks
//! - [`pipeline`]: Stage graphs and the shape-checking builder
//! - [`registry`]: Version id to architecture builder mapping
//! - [`evaluator`]: Masked, normalized evaluation and weight persistence
//! - [`encoding`]: Board shape and input layouts
//! - [`config`]: TOML configuration loading and validation
//! - [`error`]: Structured error types

#![recursion_limit = "256"]

pub mod config;
pub mod encoding;
pub mod error;
pub mod evaluator;
pub mod layers;
pub mod pipeline;
pub mod registry;

pub use config::{EvaluatorConfig, Hyperparameters};
pub use encoding::{BoardShape, InputLayout};
pub use evaluator::{Evaluation, Evaluator, MASKED_LOGIT};
pub use registry::ArchitectureRegistry;
