//! Ingest request bodies
//!
//! Devices post the same fields as JSON, urlencoded forms or multipart.
//! Multipart may carry the camera snapshot as a file part named `image`;
//! JSON may carry it as base64 (optionally a `data:` URL).

use std::collections::HashMap;

use axum::{
    async_trait,
    extract::{FromRequest, Multipart, Request},
    http::header::CONTENT_TYPE,
    Form, Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::Value;

use crate::error::ApiError;
use crate::ingest::{CounterHistoryFields, EventFields};

const IMAGE_FIELD: &str = "image";

#[derive(Debug, Default)]
pub struct IngestForm {
    fields: HashMap<String, String>,
    image: Option<Vec<u8>>,
}

impl IngestForm {
    pub fn get(&self, name: &str) -> Option<String> {
        self.fields.get(name).cloned()
    }

    pub fn image(&self) -> Option<&[u8]> {
        self.image.as_deref()
    }

    pub fn event_fields(&self) -> EventFields {
        EventFields {
            serial: self.get("sn"),
            count: self.get("count"),
            time_stamp: self.get("time_stamp"),
        }
    }

    pub fn counter_history_fields(&self) -> CounterHistoryFields {
        CounterHistoryFields {
            serial: self.get("sn"),
            total_in: self.get("total_in"),
            total_out: self.get("total_out"),
            passby: self.get("passby"),
            turnback: self.get("turnback"),
            avg_stay_time: self.get("avg_stay_time"),
            start_time: self.get("start_time"),
            end_time: self.get("end_time"),
        }
    }

    fn from_json(body: Value) -> Result<Self, ApiError> {
        let Value::Object(map) = body else {
            return Err(ApiError::Validation("Request body must be a JSON object".to_string()));
        };

        let mut form = IngestForm::default();
        for (name, value) in map {
            let text = match value {
                Value::Null => continue,
                Value::String(s) => s,
                other => other.to_string(),
            };
            if name == IMAGE_FIELD {
                form.image = decode_base64_image(&text)?;
            } else {
                form.fields.insert(name, text);
            }
        }
        Ok(form)
    }

    async fn from_multipart(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = IngestForm::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::Validation(format!("Malformed multipart body: {}", e)))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if name == IMAGE_FIELD {
                let is_file = field.file_name().is_some();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("Unreadable image part: {}", e)))?;
                form.image = if is_file {
                    Some(bytes.to_vec()).filter(|b| !b.is_empty())
                } else {
                    decode_base64_image(&String::from_utf8_lossy(&bytes))?
                };
            } else {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::Validation(format!("Unreadable field {}: {}", name, e)))?;
                form.fields.insert(name, text);
            }
        }
        Ok(form)
    }
}

/// Decode a base64 image, accepting a `data:image/...;base64,` prefix.
/// Blank input means no image.
pub fn decode_base64_image(raw: &str) -> Result<Option<Vec<u8>>, ApiError> {
    let raw = raw.trim();
    let payload = match raw.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => raw,
    };
    if payload.is_empty() {
        return Ok(None);
    }

    STANDARD
        .decode(payload)
        .map(Some)
        .map_err(|_| ApiError::Validation("image is not valid base64".to_string()))
}

#[async_trait]
impl<S> FromRequest<S> for IngestForm
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| ApiError::Validation(e.body_text()))?;
            Self::from_multipart(multipart).await
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(fields) = Form::<HashMap<String, String>>::from_request(req, state)
                .await
                .map_err(|e| ApiError::Validation(e.body_text()))?;
            let mut form = IngestForm::default();
            for (name, value) in fields {
                if name == IMAGE_FIELD {
                    form.image = decode_base64_image(&value)?;
                } else {
                    form.fields.insert(name, value);
                }
            }
            Ok(form)
        } else if content_type.starts_with("application/json") {
            let Json(body) = Json::<Value>::from_request(req, state)
                .await
                .map_err(|e| ApiError::Validation(e.body_text()))?;
            Self::from_json(body)
        } else {
            Err(ApiError::Validation(
                "Unsupported content type; use JSON, form or multipart".to_string(),
            ))
        }
    }
}
