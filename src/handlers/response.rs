use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::error::{AppError, Result};

/// Encodes `value` with sonic-rs into a JSON response.
pub fn json_response<T: serde::Serialize>(status: StatusCode, value: &T) -> Result<Response> {
    let body = sonic_rs::to_string(value)
        .map_err(|e| AppError::Internal(format!("Failed to encode response: {}", e)))?;

    Ok((status, [(http::header::CONTENT_TYPE, "application/json")], body).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn encodes_json_with_status() {
        let response =
            json_response(StatusCode::CREATED, &sonic_rs::json!({ "ok": true })).unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers()[http::header::CONTENT_TYPE],
            "application/json"
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], br#"{"ok":true}"#);
    }
}
