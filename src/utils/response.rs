//! JSON response helpers for the request API and the status probe.
//!
//! Successful calls answer with a JSON document, failures with
//! `{"error": "..."}`, matching what the web client expects.

use http::{header, HeaderValue, Response, StatusCode};
use serde::Serialize;

use crate::core::DeskError;

/// Standard content types
pub mod content_type {
    pub const TEXT_PLAIN: &str = "text/plain";
    pub const APPLICATION_JSON: &str = "application/json";
}

#[derive(Serialize)]
struct MessageBody<'a> {
    message: &'a str,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

pub struct ResponseBuilder;

impl ResponseBuilder {
    /// Serialize `data` as the body of a response with the given status.
    pub fn json<T: Serialize>(status: StatusCode, data: &T) -> Response<Vec<u8>> {
        match serde_json::to_vec(data) {
            Ok(body) => Response::builder()
                .status(status)
                .header(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static(content_type::APPLICATION_JSON),
                )
                .body(body)
                .unwrap_or_else(|e| {
                    log::error!("Failed to build JSON response: {}", e);
                    Self::fallback()
                }),
            Err(e) => {
                log::error!("Failed to serialize JSON response: {}", e);
                Self::fallback()
            }
        }
    }

    pub fn success_json<T: Serialize>(data: &T) -> Response<Vec<u8>> {
        Self::json(StatusCode::OK, data)
    }

    /// `200 {"message": ...}` confirmation.
    pub fn message(message: &str) -> Response<Vec<u8>> {
        Self::json(StatusCode::OK, &MessageBody { message })
    }

    /// `{"error": ...}` with the given status.
    pub fn error_json(status: StatusCode, message: &str) -> Response<Vec<u8>> {
        Self::json(status, &ErrorBody { error: message })
    }

    /// Translate an operation failure into its HTTP answer.
    pub fn from_error(err: &DeskError) -> Response<Vec<u8>> {
        match err {
            DeskError::Storage(_) => log::error!("{err}"),
            DeskError::Consistency(_) => log::warn!("{err}"),
            DeskError::Validation(_) | DeskError::NotFound(_) => log::debug!("{err}"),
        }
        Self::error_json(err.status_code(), &err.public_message())
    }

    fn fallback() -> Response<Vec<u8>> {
        let mut resp = Response::new(b"Internal Server Error".to_vec());
        *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        resp.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(content_type::TEXT_PLAIN),
        );
        resp
    }
}

/// Common error response helpers
pub struct CommonErrors;

impl CommonErrors {
    pub fn bad_request(message: &str) -> Response<Vec<u8>> {
        ResponseBuilder::error_json(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found() -> Response<Vec<u8>> {
        ResponseBuilder::error_json(StatusCode::NOT_FOUND, "Not Found")
    }

    pub fn method_not_allowed() -> Response<Vec<u8>> {
        ResponseBuilder::error_json(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_response() {
        let response = ResponseBuilder::message("done");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body(), br#"{"message":"done"}"#);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            content_type::APPLICATION_JSON
        );
    }

    #[test]
    fn test_error_response() {
        let response = ResponseBuilder::error_json(StatusCode::BAD_REQUEST, "Invalid input");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.body(), br#"{"error":"Invalid input"}"#);
    }

    #[test]
    fn test_json_response() {
        use serde_json::json;
        let data = json!({"message": "success", "code": 200});
        let response = ResponseBuilder::success_json(&data);
        assert_eq!(response.status(), StatusCode::OK);
        let expected = r#"{"code":200,"message":"success"}"#;
        assert_eq!(response.body(), expected.as_bytes());
    }

    #[test]
    fn test_from_error() {
        let response = ResponseBuilder::from_error(&DeskError::NotFound(
            "Request not found.".to_string(),
        ));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.body(), br#"{"error":"Request not found."}"#);

        let response =
            ResponseBuilder::from_error(&DeskError::Storage("io: disk full".to_string()));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!String::from_utf8_lossy(response.body()).contains("disk full"));
    }

    #[test]
    fn test_common_errors() {
        let response = CommonErrors::bad_request("Missing parameter");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(CommonErrors::not_found().status(), StatusCode::NOT_FOUND);
        assert_eq!(
            CommonErrors::method_not_allowed().status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
    }
}
