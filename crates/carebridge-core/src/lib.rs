//! Carebridge Core Types
//!
//! This crate provides the fundamental types shared by every Carebridge crate:
//! - The normalized response envelope and error codes
//! - Audit event and audit context types
//! - The access/refresh token pair
//! - Core error types

pub mod audit;
pub mod envelope;
pub mod error;
pub mod token;

pub use audit::{AuditContext, AuditEvent, AuditResult};
pub use envelope::{ApiError, ErrorCode, ResponseEnvelope, new_request_id, respond_error, respond_ok};
pub use error::{Error, Result};
pub use token::TokenPair;
