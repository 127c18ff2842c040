#![forbid(unsafe_code)]

//! Deterministic visual markers over the elements of a live document, so an
//! automation agent can find and drive them from screenshots alone.

pub mod channel;
pub mod commands;
pub mod config;
pub mod constants;
pub mod controller;
pub mod dom;
pub mod encoder;
pub mod error;
pub mod reconciler;
pub mod renderer;
pub mod resolver;
pub mod runtime;

pub use config::{ConfigPatch, MarkerConfig, MarkerPosition};
pub use controller::{LifecycleState, MarkerContext};
pub use dom::Document;
pub use encoder::{Encoder, VisualCode};
pub use error::{MarkerError, Result};
