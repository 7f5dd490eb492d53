//! Applications.
//!
//! An application bundles a top supervisor, its environment and the
//! applications it depends on. The node loads it, starts it (dependencies
//! first), and applies its [`StartType`] when its root process exits on its
//! own.

mod core;
mod error;
mod types;

pub use error::ApplicationError;
pub use types::{Application, ApplicationInfo, ApplicationSpec, StartType};

pub(crate) use self::core::AppController;
