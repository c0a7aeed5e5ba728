use std::collections::HashMap;

use axum::extract::{FromRequest, Multipart, Query, Request};
use axum::http::header;
use axum::Form;

use crate::error::ApiError;

/// Request parameters gathered from the query string and, if present, a multipart or
/// url-encoded form body. Body fields win over query fields; file fields are ignored.
#[derive(Debug, Default, Clone)]
pub struct FormParams(HashMap<String, String>);

impl FormParams {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// The trimmed value of `key`, or `BadRequest` if it is missing or blank.
    pub fn require(&self, key: &str) -> Result<&str, ApiError> {
        self.get(key)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ApiError::BadRequest(format!("Missing parameter: {key}")))
    }
}

#[axum::async_trait]
impl<S> FromRequest<S> for FormParams
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let mut params: HashMap<String, String> =
            Query::<HashMap<String, String>>::try_from_uri(req.uri())
                .map(|Query(query)| query)
                .unwrap_or_default();

        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            let mut multipart = Multipart::from_request(req, state)
                .await
                .map_err(|err| ApiError::BadRequest(err.body_text()))?;
            while let Some(field) = multipart
                .next_field()
                .await
                .map_err(|err| ApiError::BadRequest(err.body_text()))?
            {
                if field.file_name().is_some() {
                    continue;
                }
                let Some(name) = field.name().map(str::to_owned) else {
                    continue;
                };
                let value = field
                    .text()
                    .await
                    .map_err(|err| ApiError::BadRequest(err.body_text()))?;
                params.insert(name, value);
            }
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(form) = Form::<HashMap<String, String>>::from_request(req, state)
                .await
                .map_err(|err| ApiError::BadRequest(err.body_text()))?;
            params.extend(form);
        }

        Ok(Self(params))
    }
}
