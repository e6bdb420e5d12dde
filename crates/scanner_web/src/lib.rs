//! Web application (DAST) scan backend

mod scanner;

pub use scanner::{WebAppScanner, BACKEND_NAME};
