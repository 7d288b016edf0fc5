//! Error handling.

use axum::{
    extract::multipart::{MultipartError, MultipartRejection},
    extract::rejection::JsonRejection,
    http::header,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ndarray::ShapeError;
use serde::{Deserialize, Serialize};
use std::error::Error;
use thiserror::Error;
use tokio::sync::AcquireError;
use tracing::{event, Level};

/// Mosaicist server error type
///
/// This type encapsulates the various errors that may occur.
/// Each variant may result in a different API error response.
#[derive(Debug, Error)]
pub enum MosaicistError {
    /// Error writing a mosaic archive
    #[error("failed to write mosaic archive")]
    Archive(#[from] zip::result::ZipError),

    /// The climatology baseline is absent on the map-server
    #[error("no climatology raster found for {instant}")]
    ClimatologyNotFound { instant: String },

    /// Raster payload could not be decoded
    #[error("failed to decode raster: {reason}")]
    Decode { reason: String },

    /// No rasters were retrieved across the whole requested time range
    #[error("no rasters found for the requested time range")]
    EmptyResult,

    /// Raster could not be encoded
    #[error("failed to encode raster: {reason}")]
    Encode { reason: String },

    /// Non-success response from the remote map-server
    #[error("request to {url} failed with status {status}")]
    Fetch {
        url: String,
        status: reqwest::StatusCode,
    },

    /// Error sending a request to the remote map-server
    #[error("error communicating with the remote map-server")]
    HttpRequest(#[from] reqwest::Error),

    /// Invalid date components
    #[error("invalid time instant")]
    InvalidInstant(#[from] time::error::ComponentRange),

    /// Invalid URL
    #[error("invalid URL")]
    InvalidUrl(#[from] url::ParseError),

    /// Filesystem error
    #[error("filesystem operation failed")]
    Io(#[from] std::io::Error),

    /// Malformed JSON in a remote map-server response
    #[error("malformed response from the remote map-server")]
    MalformedResponse(#[from] serde_json::Error),

    /// Error reading a multipart field
    #[error("multipart request data is not valid")]
    Multipart(#[from] MultipartError),

    /// Request was not a valid multipart request
    #[error("multipart request data is not valid")]
    MultipartRejection(#[from] MultipartRejection),

    /// Failure creating or updating a mosaic store
    #[error("failed to save mosaic {store}")]
    Publish {
        store: String,
        #[source]
        source: Box<MosaicistError>,
    },

    /// Error deserialising request data
    #[error("request data is not valid")]
    RequestDataJsonRejection(#[from] JsonRejection),

    /// Error validating request data (single error)
    #[error("request data is not valid")]
    RequestDataValidationSingle(#[from] validator::ValidationError),

    /// Error validating request data (multiple errors)
    #[error("request data is not valid")]
    RequestDataValidation(#[from] validator::ValidationErrors),

    /// Error acquiring a semaphore
    #[error("error acquiring resources")]
    SemaphoreAcquireError(#[from] AcquireError),

    /// Error creating ndarray Array from Shape
    #[error("failed to create array from shape")]
    ShapeInvalid(#[from] ShapeError),

    /// Rasters combined in one operation do not share a grid
    #[error("rasters do not share the same grid ({expected} vs {actual})")]
    ShapeMismatch { expected: String, actual: String },

    /// Error joining a blocking task
    #[error("background task failed")]
    TaskJoin(#[from] tokio::task::JoinError),

    /// Error formatting a time instant
    #[error("failed to format time instant")]
    TimeFormat(#[from] time::error::Format),

    /// Error converting between integer types
    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),

    /// Invalid input detected before any side effect took place
    #[error("{message}")]
    Validation { message: String },
}

impl MosaicistError {
    /// Shorthand for a [MosaicistError::Validation] error.
    pub fn validation(message: impl Into<String>) -> Self {
        MosaicistError::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for a [MosaicistError::Decode] error.
    pub fn decode(reason: impl std::fmt::Display) -> Self {
        MosaicistError::Decode {
            reason: reason.to_string(),
        }
    }

    /// Wrap an error raised while saving a mosaic store.
    ///
    /// Validation errors are passed through untouched since they are reported before any side
    /// effect takes place.
    pub fn publish(store: &str, error: MosaicistError) -> Self {
        match error {
            MosaicistError::Validation { .. } | MosaicistError::Publish { .. } => error,
            error => MosaicistError::Publish {
                store: store.to_string(),
                source: Box::new(error),
            },
        }
    }
}

impl IntoResponse for MosaicistError {
    /// Convert from a `MosaicistError` into an [axum::response::Response].
    fn into_response(self) -> Response {
        ErrorResponse::from(self).into_response()
    }
}

/// Body of error response
///
/// Implements serde (de)serialise.
#[derive(Deserialize, Serialize)]
struct ErrorBody {
    /// Main error message
    message: String,

    /// Optional list of causes
    #[serde(skip_serializing_if = "Option::is_none")]
    caused_by: Option<Vec<String>>,
}

impl ErrorBody {
    /// Return a new ErrorBody
    ///
    /// # Arguments
    ///
    /// * `error`: The error that occurred
    fn new<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        let message = error.to_string();
        let mut caused_by = None;
        let mut current = error.source();
        while let Some(source) = current {
            let mut causes: Vec<String> = caused_by.unwrap_or_default();
            causes.push(source.to_string());
            caused_by = Some(causes);
            current = source.source();
        }
        // Remove duplicate entries.
        if let Some(caused_by) = caused_by.as_mut() {
            caused_by.dedup()
        }
        ErrorBody { message, caused_by }
    }
}

/// A response to send in error cases
///
/// Implements serde (de)serialise.
#[derive(Deserialize, Serialize)]
struct ErrorResponse {
    /// HTTP status of the response
    #[serde(skip)]
    status: StatusCode,

    /// Response body
    error: ErrorBody,
}

impl ErrorResponse {
    /// Return a new ErrorResponse
    ///
    /// # Arguments
    ///
    /// * `status`: HTTP status of the response
    /// * `error`: The error that occurred. This will be formatted into a suitable `ErrorBody`
    fn new<E>(status: StatusCode, error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        ErrorResponse {
            status,
            error: ErrorBody::new(error),
        }
    }

    /// Return a 400 bad request ErrorResponse
    fn bad_request<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    /// Return a 404 not found ErrorResponse
    fn not_found<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::NOT_FOUND, error)
    }

    /// Return a 500 internal server error ErrorResponse
    fn internal_server_error<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }

    /// Return a 502 bad gateway ErrorResponse
    fn bad_gateway<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::BAD_GATEWAY, error)
    }
}

impl From<MosaicistError> for ErrorResponse {
    /// Convert from a `MosaicistError` into an `ErrorResponse`.
    fn from(error: MosaicistError) -> Self {
        let response = match &error {
            // Bad request
            MosaicistError::InvalidInstant(_)
            | MosaicistError::InvalidUrl(_)
            | MosaicistError::Multipart(_)
            | MosaicistError::MultipartRejection(_)
            | MosaicistError::RequestDataJsonRejection(_)
            | MosaicistError::RequestDataValidationSingle(_)
            | MosaicistError::RequestDataValidation(_)
            | MosaicistError::ShapeMismatch { .. }
            | MosaicistError::Validation { .. } => Self::bad_request(&error),

            // Not found
            MosaicistError::ClimatologyNotFound { .. } | MosaicistError::EmptyResult => {
                Self::not_found(&error)
            }

            // Bad gateway: the remote map-server misbehaved.
            MosaicistError::Fetch { .. }
            | MosaicistError::HttpRequest(_)
            | MosaicistError::MalformedResponse(_) => Self::bad_gateway(&error),

            // Internal server error
            MosaicistError::Archive(_)
            | MosaicistError::Decode { .. }
            | MosaicistError::Encode { .. }
            | MosaicistError::Io(_)
            | MosaicistError::Publish { .. }
            | MosaicistError::SemaphoreAcquireError(_)
            | MosaicistError::ShapeInvalid(_)
            | MosaicistError::TaskJoin(_)
            | MosaicistError::TimeFormat(_)
            | MosaicistError::TryFromInt(_) => Self::internal_server_error(&error),
        };

        // Log server errors.
        if response.status.is_server_error() {
            event!(Level::ERROR, "{}", error.to_string());
            let mut current = error.source();
            while let Some(source) = current {
                event!(Level::ERROR, "Caused by: {}", source.to_string());
                current = source.source();
            }
        }

        response
    }
}

impl IntoResponse for ErrorResponse {
    /// Convert from an `ErrorResponse` into an `axum::response::Response`.
    ///
    /// Renders the response as JSON.
    fn into_response(self) -> Response {
        let json_body = serde_json::to_string_pretty(&self);
        match json_body {
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to serialise error response: {}", err),
            )
                .into_response(),
            Ok(json_body) => (
                self.status,
                [(&header::CONTENT_TYPE, mime::APPLICATION_JSON.to_string())],
                json_body,
            )
                .into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use hyper::HeaderMap;

    // Jump through the hoops to get the body as a string.
    async fn body_string(response: Response) -> String {
        String::from_utf8(
            hyper::body::to_bytes(response.into_body())
                .await
                .unwrap()
                .to_vec(),
        )
        .unwrap()
    }

    async fn test_mosaicist_error(
        error: MosaicistError,
        status: StatusCode,
        message: &str,
        caused_by: Option<Vec<&'static str>>,
    ) {
        let response = error.into_response();
        assert_eq!(status, response.status());
        let mut headers = HeaderMap::new();
        headers.insert(&header::CONTENT_TYPE, "application/json".parse().unwrap());
        assert_eq!(headers, *response.headers());
        let error_response: ErrorResponse =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(message.to_string(), error_response.error.message);
        // Map Vec items from str to String
        let caused_by = caused_by.map(|cb| cb.iter().map(|s| s.to_string()).collect());
        assert_eq!(caused_by, error_response.error.caused_by);
    }

    #[tokio::test]
    async fn climatology_not_found() {
        let error = MosaicistError::ClimatologyNotFound {
            instant: "2000-06".to_string(),
        };
        let message = "no climatology raster found for 2000-06";
        test_mosaicist_error(error, StatusCode::NOT_FOUND, message, None).await;
    }

    #[tokio::test]
    async fn decode_error() {
        let error = MosaicistError::decode("not a TIFF");
        let message = "failed to decode raster: not a TIFF";
        test_mosaicist_error(error, StatusCode::INTERNAL_SERVER_ERROR, message, None).await;
    }

    #[tokio::test]
    async fn empty_result() {
        let error = MosaicistError::EmptyResult;
        let message = "no rasters found for the requested time range";
        test_mosaicist_error(error, StatusCode::NOT_FOUND, message, None).await;
    }

    #[tokio::test]
    async fn encode_error() {
        let error = MosaicistError::Encode {
            reason: "value -9999 is not representable as uint8".to_string(),
        };
        let message = "failed to encode raster: value -9999 is not representable as uint8";
        test_mosaicist_error(error, StatusCode::INTERNAL_SERVER_ERROR, message, None).await;
    }

    #[tokio::test]
    async fn fetch_error() {
        let error = MosaicistError::Fetch {
            url: "http://example.com/ows".to_string(),
            status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
        };
        let message = "request to http://example.com/ows failed with status 503 Service Unavailable";
        test_mosaicist_error(error, StatusCode::BAD_GATEWAY, message, None).await;
    }

    #[tokio::test]
    async fn invalid_instant() {
        let error = MosaicistError::InvalidInstant(time::Month::try_from(13).unwrap_err());
        let response = error.into_response();
        assert_eq!(StatusCode::BAD_REQUEST, response.status());
        let error_response: ErrorResponse =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!("invalid time instant", error_response.error.message);
        let caused_by = error_response.error.caused_by.unwrap();
        assert_eq!(1, caused_by.len());
        assert!(caused_by[0].contains("month"), "caused by: {caused_by:?}");
    }

    #[tokio::test]
    async fn io_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let error = MosaicistError::Io(io_error);
        let message = "filesystem operation failed";
        let caused_by = Some(vec!["denied"]);
        test_mosaicist_error(error, StatusCode::INTERNAL_SERVER_ERROR, message, caused_by).await;
    }

    #[tokio::test]
    async fn malformed_response() {
        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error = MosaicistError::MalformedResponse(json_error);
        let message = "malformed response from the remote map-server";
        let caused_by = Some(vec!["EOF while parsing an object at line 1 column 1"]);
        test_mosaicist_error(error, StatusCode::BAD_GATEWAY, message, caused_by).await;
    }

    #[tokio::test]
    async fn publish_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let error = MosaicistError::publish("PREC", MosaicistError::Io(io_error));
        let message = "failed to save mosaic PREC";
        let caused_by = Some(vec!["filesystem operation failed", "gone"]);
        test_mosaicist_error(error, StatusCode::INTERNAL_SERVER_ERROR, message, caused_by).await;
    }

    #[tokio::test]
    async fn publish_passes_validation_through() {
        let error = MosaicistError::publish(
            "PREC",
            MosaicistError::validation("expected exactly 2 property files, found 3"),
        );
        let message = "expected exactly 2 property files, found 3";
        test_mosaicist_error(error, StatusCode::BAD_REQUEST, message, None).await;
    }

    #[tokio::test]
    async fn request_data_validation_single() {
        let validation_error = validator::ValidationError::new("foo");
        let error = MosaicistError::RequestDataValidationSingle(validation_error);
        let message = "request data is not valid";
        let caused_by = Some(vec!["Validation error: foo [{}]"]);
        test_mosaicist_error(error, StatusCode::BAD_REQUEST, message, caused_by).await;
    }

    #[tokio::test]
    async fn request_data_validation() {
        let mut validation_errors = validator::ValidationErrors::new();
        let validation_error = validator::ValidationError::new("foo");
        validation_errors.add("bar", validation_error);
        let error = MosaicistError::RequestDataValidation(validation_errors);
        let message = "request data is not valid";
        let caused_by = Some(vec!["bar: Validation error: foo [{}]"]);
        test_mosaicist_error(error, StatusCode::BAD_REQUEST, message, caused_by).await;
    }

    #[tokio::test]
    async fn semaphore_acquire_error() {
        let sem = tokio::sync::Semaphore::new(1);
        sem.close();
        let error = MosaicistError::SemaphoreAcquireError(sem.acquire().await.unwrap_err());
        let message = "error acquiring resources";
        let caused_by = Some(vec!["semaphore closed"]);
        test_mosaicist_error(error, StatusCode::INTERNAL_SERVER_ERROR, message, caused_by).await;
    }

    #[tokio::test]
    async fn shape_error() {
        let error = MosaicistError::ShapeInvalid(ShapeError::from_kind(
            ndarray::ErrorKind::OutOfBounds,
        ));
        let message = "failed to create array from shape";
        let caused_by = Some(vec!["ShapeError/OutOfBounds: out of bounds indexing"]);
        test_mosaicist_error(error, StatusCode::INTERNAL_SERVER_ERROR, message, caused_by).await;
    }

    #[tokio::test]
    async fn shape_mismatch() {
        let error = MosaicistError::ShapeMismatch {
            expected: "2x2".to_string(),
            actual: "3x2".to_string(),
        };
        let message = "rasters do not share the same grid (2x2 vs 3x2)";
        test_mosaicist_error(error, StatusCode::BAD_REQUEST, message, None).await;
    }

    #[tokio::test]
    async fn try_from_int_error() {
        let error = MosaicistError::TryFromInt(u8::try_from(-1_i8).unwrap_err());
        let message = "out of range integral type conversion attempted";
        let caused_by = None;
        test_mosaicist_error(error, StatusCode::INTERNAL_SERVER_ERROR, message, caused_by).await;
    }

    #[tokio::test]
    async fn validation_error() {
        let error = MosaicistError::validation("file name must match <name>_YYYYMM.tif");
        let message = "file name must match <name>_YYYYMM.tif";
        test_mosaicist_error(error, StatusCode::BAD_REQUEST, message, None).await;
    }
}
