//! perioscope-common: Shared error taxonomy and the sandboxed HTTP client
//! used by every Perioscope crate that talks to the network.

pub mod error;
pub mod sandbox;

pub use error::{ErrorKind, PerioscopeError, Result};
