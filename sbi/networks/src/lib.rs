#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]

//! Forward-only network layers: dense layers and a small residual network.

/// Dense layers and activations.
#[path = "../dense.rs"]
pub mod dense;

/// Residual network.
#[path = "../resnet.rs"]
pub mod resnet;

/// Network errors.
#[path = "../error.rs"]
pub mod error;

pub use dense::{Activation, Dense};
pub use error::NetworkError;
pub use resnet::{ResNet, ResNetConfig};
