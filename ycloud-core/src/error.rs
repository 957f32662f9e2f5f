//! API error taxonomy shared by every control-plane client

use std::fmt;

/// Status codes reported by the cloud control plane
///
/// The platform speaks gRPC status codes both in REST error bodies and in
/// failed operations, so the same code space covers both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiCode {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl ApiCode {
    /// Map a numeric gRPC status code
    pub fn from_grpc(code: i32) -> Self {
        match code {
            1 => ApiCode::Cancelled,
            3 => ApiCode::InvalidArgument,
            4 => ApiCode::DeadlineExceeded,
            5 => ApiCode::NotFound,
            6 => ApiCode::AlreadyExists,
            7 => ApiCode::PermissionDenied,
            8 => ApiCode::ResourceExhausted,
            9 => ApiCode::FailedPrecondition,
            10 => ApiCode::Aborted,
            11 => ApiCode::OutOfRange,
            12 => ApiCode::Unimplemented,
            13 => ApiCode::Internal,
            14 => ApiCode::Unavailable,
            15 => ApiCode::DataLoss,
            16 => ApiCode::Unauthenticated,
            _ => ApiCode::Unknown,
        }
    }

    /// Map an HTTP status when the body carries no usable code
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 => ApiCode::InvalidArgument,
            401 => ApiCode::Unauthenticated,
            403 => ApiCode::PermissionDenied,
            404 => ApiCode::NotFound,
            409 => ApiCode::AlreadyExists,
            412 => ApiCode::FailedPrecondition,
            429 => ApiCode::ResourceExhausted,
            499 => ApiCode::Cancelled,
            501 => ApiCode::Unimplemented,
            502..=504 => ApiCode::Unavailable,
            500..=599 => ApiCode::Internal,
            _ => ApiCode::Unknown,
        }
    }

    /// Failures worth retrying for idempotent calls
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ApiCode::Unavailable | ApiCode::DeadlineExceeded | ApiCode::Aborted
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ApiCode::Cancelled => "Cancelled",
            ApiCode::Unknown => "Unknown",
            ApiCode::InvalidArgument => "InvalidArgument",
            ApiCode::DeadlineExceeded => "DeadlineExceeded",
            ApiCode::NotFound => "NotFound",
            ApiCode::AlreadyExists => "AlreadyExists",
            ApiCode::PermissionDenied => "PermissionDenied",
            ApiCode::ResourceExhausted => "ResourceExhausted",
            ApiCode::FailedPrecondition => "FailedPrecondition",
            ApiCode::Aborted => "Aborted",
            ApiCode::OutOfRange => "OutOfRange",
            ApiCode::Unimplemented => "Unimplemented",
            ApiCode::Internal => "Internal",
            ApiCode::Unavailable => "Unavailable",
            ApiCode::DataLoss => "DataLoss",
            ApiCode::Unauthenticated => "Unauthenticated",
        }
    }
}

impl fmt::Display for ApiCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned by a single control-plane or object-storage call
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: ApiCode,
    /// Server message, verbatim
    pub message: String,
    /// Service-specific code such as S3's `BucketNotEmpty`
    pub service_code: Option<String>,
}

impl ApiError {
    pub fn new(code: ApiCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            service_code: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ApiCode::NotFound, message)
    }

    /// Network failure before any response was received
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ApiCode::Unavailable, message)
    }

    pub fn with_service_code(mut self, code: impl Into<String>) -> Self {
        self.service_code = Some(code.into());
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.code == ApiCode::NotFound
    }

    pub fn is_transient(&self) -> bool {
        self.code.is_transient()
    }

    pub fn has_service_code(&self, code: &str) -> bool {
        self.service_code.as_deref() == Some(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grpc_codes_round_trip_known_values() {
        assert_eq!(ApiCode::from_grpc(5), ApiCode::NotFound);
        assert_eq!(ApiCode::from_grpc(9), ApiCode::FailedPrecondition);
        assert_eq!(ApiCode::from_grpc(14), ApiCode::Unavailable);
        assert_eq!(ApiCode::from_grpc(0), ApiCode::Unknown);
        assert_eq!(ApiCode::from_grpc(42), ApiCode::Unknown);
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(ApiCode::from_http_status(404), ApiCode::NotFound);
        assert_eq!(ApiCode::from_http_status(503), ApiCode::Unavailable);
        assert_eq!(ApiCode::from_http_status(500), ApiCode::Internal);
        assert!(ApiCode::from_http_status(503).is_transient());
        assert!(!ApiCode::from_http_status(403).is_transient());
    }

    #[test]
    fn service_code_matching() {
        let err = ApiError::new(
            ApiCode::FailedPrecondition,
            "The bucket you tried to delete is not empty",
        )
        .with_service_code("BucketNotEmpty");
        assert!(err.has_service_code("BucketNotEmpty"));
        assert!(!err.has_service_code("NoSuchBucket"));
        assert_eq!(
            err.to_string(),
            "FailedPrecondition: The bucket you tried to delete is not empty"
        );
    }
}
