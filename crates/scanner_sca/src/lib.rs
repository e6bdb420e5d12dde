//! Software composition analysis (SCA) scan backend
//!
//! Inspects the dependency manifests of a local project directory.

mod manifests;
mod scanner;

pub use manifests::Manifest;
pub use scanner::{DependencyScanner, BACKEND_NAME};
