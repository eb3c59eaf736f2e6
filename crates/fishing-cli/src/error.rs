use crate::model::ValidationError;
use crate::reference::ReferenceDataError;
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    User,
    Runtime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    pub fn user(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::User,
            code: "user.invalid_input",
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Runtime,
            code: "runtime.failure",
            message: message.into(),
        }
    }

    pub fn spot_not_found(query: &str) -> Self {
        Self {
            kind: ErrorKind::User,
            code: "user.spot_not_found",
            message: format!("no fishing spot matches: {query}"),
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = code;
        self
    }

    pub fn runtime_with_trace(prefix: &str, trace: &[String]) -> Self {
        if trace.is_empty() {
            return Self::runtime(prefix);
        }

        let mut message = String::from(prefix);
        message.push_str(" (trace: ");
        message.push_str(&trace.join(" | "));
        message.push(')');
        Self::runtime(message)
    }

    pub fn exit_code(&self) -> i32 {
        match self.kind {
            ErrorKind::User => 2,
            ErrorKind::Runtime => 1,
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(value: ValidationError) -> Self {
        Self::user(value.to_string())
    }
}

impl From<ReferenceDataError> for AppError {
    fn from(value: ReferenceDataError) -> Self {
        Self::runtime(value.to_string()).with_code("runtime.reference_data")
    }
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        Self::runtime(value.to_string()).with_code("runtime.spot_store")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_exit_codes_follow_kind() {
        assert_eq!(AppError::user("bad").exit_code(), 2);
        assert_eq!(AppError::runtime("boom").exit_code(), 1);
        assert_eq!(AppError::spot_not_found("x").exit_code(), 2);
    }

    #[test]
    fn error_trace_is_appended_when_present() {
        let error = AppError::runtime_with_trace(
            "feature query failed",
            &["ecobank: http error (503)".to_string()],
        );
        assert_eq!(
            error.message,
            "feature query failed (trace: ecobank: http error (503))"
        );
        assert_eq!(
            AppError::runtime_with_trace("plain", &[]).message,
            "plain".to_string()
        );
    }

    #[test]
    fn error_validation_maps_to_user_kind() {
        let error = AppError::from(ValidationError::MissingLocationInput);
        assert_eq!(error.kind, ErrorKind::User);
        assert_eq!(error.code, "user.invalid_input");
    }

    #[test]
    fn error_spot_not_found_carries_query() {
        let error = AppError::spot_not_found("을왕리");
        assert_eq!(error.code, "user.spot_not_found");
        assert!(error.message.contains("을왕리"));
    }
}
