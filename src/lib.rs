#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod error;
#[cfg(feature = "relay")]
pub mod relay;
pub(crate) mod serde_helpers;
pub mod session;
pub mod transport;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;
