//! Cloud configuration posture scan backend

mod scanner;

pub use scanner::{CloudCredentials, CloudPostureScanner, BACKEND_NAME};
