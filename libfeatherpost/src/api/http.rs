//! HTTP implementation of the publishing API
//!
//! All error classification happens here, at the HTTP boundary: downstream
//! logic switches on [`ApiErrorKind`], never on error text.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiErrorKind, ApiResult};
use crate::types::ProcessingState;

use super::{ProcessingInfo, PublishingApi, TokenGrant};

pub struct HttpPublishingApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPublishingApi {
    pub fn new(base_url: &str, timeout: Duration) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &ApiConfig) -> ApiResult<Self> {
        Self::new(&config.base_url, Duration::from_secs(config.timeout_secs))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: Option<T>,
}

#[derive(Deserialize)]
struct PostData {
    id: Option<String>,
}

#[derive(Deserialize)]
struct MediaData {
    id: Option<String>,
    processing_info: Option<ProcessingInfoPayload>,
}

#[derive(Deserialize)]
struct ProcessingInfoPayload {
    state: String,
    check_after_secs: Option<u64>,
}

impl ProcessingInfoPayload {
    fn into_info(self) -> ProcessingInfo {
        ProcessingInfo {
            state: ProcessingState::from_str(&self.state),
            check_after_secs: self.check_after_secs,
        }
    }
}

#[derive(Deserialize)]
struct TokenPayload {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

/// Map a provider status and response body to an error classification
fn classify_status(status: u16, body: &str) -> ApiErrorKind {
    match status {
        401 => ApiErrorKind::AuthExpired,
        403 if body.to_lowercase().contains("duplicate") => ApiErrorKind::Duplicate,
        403 => ApiErrorKind::Forbidden,
        429 => ApiErrorKind::RateLimited,
        500..=599 => ApiErrorKind::Server,
        _ => ApiErrorKind::Invalid,
    }
}

async fn error_from_response(response: reqwest::Response, context: &str) -> ApiError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ApiError::new(
        classify_status(status, &body),
        Some(status),
        format!("{}: HTTP {}: {}", context, status, body),
    )
}

fn network_error(err: reqwest::Error, context: &str) -> ApiError {
    ApiError::network(format!("{}: {}", context, err))
}

fn parse_error(err: reqwest::Error, context: &str) -> ApiError {
    ApiError::new(
        ApiErrorKind::Invalid,
        None,
        format!("{}: unparseable response: {}", context, err),
    )
}

#[async_trait]
impl PublishingApi for HttpPublishingApi {
    async fn create_post(
        &self,
        access_token: &str,
        text: &str,
        media_ids: &[String],
    ) -> ApiResult<String> {
        let mut body = serde_json::json!({ "text": text });
        if !media_ids.is_empty() {
            body["media"] = serde_json::json!({ "media_ids": media_ids });
        }

        let response = self
            .client
            .post(self.url("/tweets"))
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| network_error(e, "create post"))?;

        if !response.status().is_success() {
            return Err(error_from_response(response, "create post").await);
        }

        let status = response.status().as_u16();
        let envelope: DataEnvelope<PostData> = response
            .json()
            .await
            .map_err(|e| parse_error(e, "create post"))?;

        envelope.data.and_then(|d| d.id).ok_or_else(|| {
            ApiError::new(
                ApiErrorKind::NoPostId,
                Some(status),
                "create post: response carried no post id",
            )
        })
    }

    async fn upload_image(
        &self,
        access_token: &str,
        bytes: Vec<u8>,
        media_type: &str,
    ) -> ApiResult<String> {
        let part = Part::bytes(bytes)
            .file_name("media")
            .mime_str(media_type)
            .map_err(|e| {
                ApiError::new(
                    ApiErrorKind::Invalid,
                    None,
                    format!("upload image: bad media type {}: {}", media_type, e),
                )
            })?;

        let form = Form::new()
            .part("media", part)
            .text("media_type", media_type.to_string())
            .text("media_category", "tweet_image");

        let response = self
            .client
            .post(self.url("/media/upload"))
            .bearer_auth(access_token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| network_error(e, "upload image"))?;

        if !response.status().is_success() {
            return Err(error_from_response(response, "upload image").await);
        }

        let status = response.status().as_u16();
        let envelope: DataEnvelope<MediaData> = response
            .json()
            .await
            .map_err(|e| parse_error(e, "upload image"))?;

        envelope.data.and_then(|d| d.id).ok_or_else(|| {
            ApiError::new(
                ApiErrorKind::Invalid,
                Some(status),
                "upload image: response carried no media id",
            )
        })
    }

    async fn initialize_upload(
        &self,
        access_token: &str,
        total_bytes: u64,
        media_type: &str,
        media_category: &str,
    ) -> ApiResult<String> {
        let body = serde_json::json!({
            "media_category": media_category,
            "media_type": media_type,
            "total_bytes": total_bytes,
            "shared": false,
        });

        let response = self
            .client
            .post(self.url("/media/upload/initialize"))
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| network_error(e, "initialize upload"))?;

        if !response.status().is_success() {
            return Err(error_from_response(response, "initialize upload").await);
        }

        let status = response.status().as_u16();
        let envelope: DataEnvelope<MediaData> = response
            .json()
            .await
            .map_err(|e| parse_error(e, "initialize upload"))?;

        envelope.data.and_then(|d| d.id).ok_or_else(|| {
            ApiError::new(
                ApiErrorKind::Invalid,
                Some(status),
                "initialize upload: response carried no media id",
            )
        })
    }

    async fn append_chunk(
        &self,
        access_token: &str,
        media_id: &str,
        chunk: Vec<u8>,
        segment_index: u32,
    ) -> ApiResult<()> {
        let form = Form::new()
            .part("media", Part::bytes(chunk).file_name("media"))
            .text("segment_index", segment_index.to_string());

        let response = self
            .client
            .post(self.url(&format!("/media/upload/{}/append", media_id)))
            .bearer_auth(access_token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| network_error(e, "append chunk"))?;

        if !response.status().is_success() {
            return Err(error_from_response(response, "append chunk").await);
        }

        Ok(())
    }

    async fn finalize_upload(
        &self,
        access_token: &str,
        media_id: &str,
    ) -> ApiResult<Option<ProcessingInfo>> {
        let response = self
            .client
            .post(self.url(&format!("/media/upload/{}/finalize", media_id)))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| network_error(e, "finalize upload"))?;

        if !response.status().is_success() {
            return Err(error_from_response(response, "finalize upload").await);
        }

        let envelope: DataEnvelope<MediaData> = response
            .json()
            .await
            .map_err(|e| parse_error(e, "finalize upload"))?;

        Ok(envelope
            .data
            .and_then(|d| d.processing_info)
            .map(ProcessingInfoPayload::into_info))
    }

    async fn upload_status(
        &self,
        access_token: &str,
        media_id: &str,
    ) -> ApiResult<ProcessingInfo> {
        let response = self
            .client
            .get(self.url("/media/upload"))
            .bearer_auth(access_token)
            .query(&[("command", "STATUS"), ("media_id", media_id)])
            .send()
            .await
            .map_err(|e| network_error(e, "upload status"))?;

        if !response.status().is_success() {
            return Err(error_from_response(response, "upload status").await);
        }

        let status = response.status().as_u16();
        let envelope: DataEnvelope<MediaData> = response
            .json()
            .await
            .map_err(|e| parse_error(e, "upload status"))?;

        envelope
            .data
            .and_then(|d| d.processing_info)
            .map(ProcessingInfoPayload::into_info)
            .ok_or_else(|| {
                ApiError::new(
                    ApiErrorKind::Invalid,
                    Some(status),
                    "upload status: response carried no processing info",
                )
            })
    }

    async fn refresh_token(
        &self,
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> ApiResult<TokenGrant> {
        let response = self
            .client
            .post(self.url("/oauth2/token"))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await
            .map_err(|e| network_error(e, "refresh token"))?;

        if !response.status().is_success() {
            return Err(error_from_response(response, "refresh token").await);
        }

        let status = response.status().as_u16();
        let payload: TokenPayload = response
            .json()
            .await
            .map_err(|e| parse_error(e, "refresh token"))?;

        let access_token = payload.access_token.ok_or_else(|| {
            ApiError::new(
                ApiErrorKind::Invalid,
                Some(status),
                "refresh token: response carried no access token",
            )
        })?;

        Ok(TokenGrant {
            access_token,
            refresh_token: payload.refresh_token,
            expires_in: payload.expires_in,
        })
    }
}
