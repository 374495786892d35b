//! Shared wire types for the auth demos.
//!
//! The auth service and its callers both depend on these; in a real
//! deployment they would live in a small shared crate.
#![allow(dead_code)]

use serde::{Deserialize, Serialize};

/// Event name the auth service answers.
pub const LOGIN: &str = "LOGIN";

/// `data` of a `LOGIN` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub token: String,
}

/// The authenticated user returned for a valid token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub _id: String,
    pub role: u8,
}

/// Stand-in for token verification.
pub fn verify(token: &str) -> Option<AuthUser> {
    // ---
    match token {
        "student-token" => Some(AuthUser {
            _id: "u1".into(),
            role: 0,
        }),
        "instructor-token" => Some(AuthUser {
            _id: "u2".into(),
            role: 1,
        }),
        _ => None,
    }
}

pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}
