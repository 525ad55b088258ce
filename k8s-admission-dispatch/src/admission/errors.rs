// Copyright 2024 The Kubernetes Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Admission error types.

use crate::api::meta::Status;
use std::fmt;
use thiserror::Error;

/// Result type for admission operations.
pub type AdmissionResult<T> = Result<T, AdmissionError>;

/// Status reasons used on the admission path.
pub const REASON_FORBIDDEN: &str = "Forbidden";
pub const REASON_UNAUTHORIZED: &str = "Unauthorized";
pub const REASON_INVALID: &str = "Invalid";
pub const REASON_REQUEST_ENTITY_TOO_LARGE: &str = "RequestEntityTooLarge";

/// AdmissionError represents errors that can occur during admission.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// BadRequest indicates a malformed request.
    #[error("{0}")]
    BadRequest(String),

    /// Rejected is an explicit denial returned by a webhook or a policy.
    /// The status message is already fully formatted.
    #[error("{}", .status.message)]
    Rejected { hook: String, status: Status },

    /// CallingHook is a hook failure under a Fail policy: the call could not
    /// be made, timed out, returned garbage, or its match was inconclusive.
    #[error("failed calling webhook \"{hook}\": {reason}")]
    CallingHook {
        hook: String,
        reason: String,
        status_code: u16,
    },

    /// Internal represents an internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// NotFound indicates a resource was not found.
    #[error("{kind} \"{name}\" not found")]
    NotFound { kind: String, name: String },

    /// Invalid reports a configuration object that failed validation.
    #[error("{kind} \"{name}\" is invalid: {errors}")]
    Invalid {
        kind: String,
        name: String,
        errors: FieldErrorList,
    },

    /// NotReady is returned until every configuration source has synced.
    #[error("not yet ready to handle request")]
    NotReady,
}

impl AdmissionError {
    /// Create a new BadRequest error.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        AdmissionError::BadRequest(msg.into())
    }

    /// Create a NotFound error.
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        AdmissionError::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an Internal error.
    pub fn internal_error(msg: impl Into<String>) -> Self {
        AdmissionError::Internal(msg.into())
    }

    /// Create an Invalid error for a configuration object.
    pub fn invalid(kind: impl Into<String>, name: impl Into<String>, errors: Vec<FieldError>) -> Self {
        AdmissionError::Invalid {
            kind: kind.into(),
            name: name.into(),
            errors: FieldErrorList(errors),
        }
    }

    /// Converts the status a webhook returned with `allowed: false` into a
    /// denial naming the hook. Codes below 400 are replaced with 403.
    pub fn webhook_denied(hook: &str, result: Option<&Status>) -> Self {
        let (message, reason, code) = match result {
            Some(status) => (status.message.as_str(), status.reason.as_str(), status.code),
            None => ("", "", 0),
        };
        let message = if !message.is_empty() {
            format!("admission webhook \"{}\" denied the request: {}", hook, message)
        } else if !reason.is_empty() {
            format!("admission webhook \"{}\" denied the request: {}", hook, reason)
        } else {
            format!("admission webhook \"{}\" denied the request without explanation", hook)
        };
        let code = if code < 400 { 403 } else { code };
        let reason = if reason.is_empty() { REASON_FORBIDDEN } else { reason };
        AdmissionError::Rejected {
            hook: hook.to_string(),
            status: Status::failure(code, reason, &message),
        }
    }

    /// Create a denial from a validating admission policy.
    pub fn policy_denied(policy: &str, binding: &str, message: &str, reason: &str) -> Self {
        let code = match reason {
            REASON_UNAUTHORIZED => 401,
            REASON_INVALID => 422,
            REASON_REQUEST_ENTITY_TOO_LARGE => 413,
            _ => 403,
        };
        let reason = if reason.is_empty() { REASON_FORBIDDEN } else { reason };
        AdmissionError::Rejected {
            hook: policy.to_string(),
            status: Status::failure(
                code,
                reason,
                &format!(
                    "ValidatingAdmissionPolicy '{}' with binding '{}' denied request: {}",
                    policy, binding, message
                ),
            ),
        }
    }

    /// Create a fail-closed hook failure.
    pub fn calling_hook(hook: impl Into<String>, reason: impl Into<String>) -> Self {
        AdmissionError::CallingHook {
            hook: hook.into(),
            reason: reason.into(),
            status_code: 500,
        }
    }

    /// HTTP status code the error maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            AdmissionError::BadRequest(_) => 400,
            AdmissionError::Rejected { status, .. } => u16::try_from(status.code).unwrap_or(403),
            AdmissionError::CallingHook { status_code, .. } => *status_code,
            AdmissionError::NotFound { .. } => 404,
            AdmissionError::NotReady => 503,
            AdmissionError::Invalid { .. } => 422,
            AdmissionError::Internal(_) => 500,
        }
    }
}

/// FieldError represents a field-level error.
#[derive(Debug, Clone)]
pub struct FieldError {
    pub field: String,
    pub error_type: FieldErrorType,
    pub value: String,
    pub supported_values: Vec<String>,
    pub detail: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_type {
            FieldErrorType::NotSupported => {
                write!(
                    f,
                    "{}: Unsupported value: \"{}\": supported values: {}",
                    self.field,
                    self.value,
                    self.supported_values
                        .iter()
                        .map(|s| format!("\"{}\"", s))
                        .collect::<Vec<_>>()
                        .join(", ")
                )?
            }
            FieldErrorType::Required => write!(f, "{}: Required value", self.field)?,
            FieldErrorType::Invalid => {
                write!(f, "{}: Invalid value: \"{}\"", self.field, self.value)?
            }
            FieldErrorType::Duplicate => {
                write!(f, "{}: Duplicate value: \"{}\"", self.field, self.value)?
            }
            FieldErrorType::TooMany => write!(f, "{}: Too many: {}", self.field, self.value)?,
        }
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        Ok(())
    }
}

/// FieldErrorType represents the type of field error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldErrorType {
    /// NotSupported indicates the value is not in the list of supported values.
    NotSupported,
    /// Required indicates a required field is missing.
    Required,
    /// Invalid indicates an invalid value.
    Invalid,
    /// Duplicate indicates a value that must be unique was repeated.
    Duplicate,
    /// TooMany indicates a list exceeded its maximum length.
    TooMany,
}

/// FieldErrorList renders as `[a, b]`.
#[derive(Debug, Clone, Default)]
pub struct FieldErrorList(pub Vec<FieldError>);

impl fmt::Display for FieldErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let errors: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        write!(f, "[{}]", errors.join(", "))
    }
}

fn field_error(field: &str, error_type: FieldErrorType, value: &str, detail: &str) -> FieldError {
    FieldError {
        field: field.to_string(),
        error_type,
        value: value.to_string(),
        supported_values: Vec::new(),
        detail: detail.to_string(),
    }
}

/// Helper function to create a "not supported" field error.
pub fn field_not_supported(field: &str, value: &str, supported: Vec<&str>) -> FieldError {
    FieldError {
        supported_values: supported.into_iter().map(String::from).collect(),
        ..field_error(field, FieldErrorType::NotSupported, value, "")
    }
}

pub fn field_required(field: &str, detail: &str) -> FieldError {
    field_error(field, FieldErrorType::Required, "", detail)
}

pub fn field_invalid(field: &str, value: &str, detail: &str) -> FieldError {
    field_error(field, FieldErrorType::Invalid, value, detail)
}

pub fn field_duplicate(field: &str, value: &str) -> FieldError {
    field_error(field, FieldErrorType::Duplicate, value, "")
}

pub fn field_too_many(field: &str, actual: usize, max: usize) -> FieldError {
    field_error(
        field,
        FieldErrorType::TooMany,
        &actual.to_string(),
        &format!("must have at most {} items", max),
    )
}
