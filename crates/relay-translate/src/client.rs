use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::cache::TranslationQuery;
use crate::error::TranslateError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Anything that can answer a [`TranslationQuery`].
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    async fn translate(&self, query: &TranslationQuery) -> Result<Value, TranslateError>;
}

/// HTTP client for a LibreTranslate `/translate` endpoint.
pub struct LibreTranslateClient {
    client: Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

impl LibreTranslateClient {
    pub fn new(
        base_url: &str,
        api_key: Option<SecretString>,
        request_timeout: Duration,
    ) -> Result<Self, TranslateError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| TranslateError::Client(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/translate", base_url.trim_end_matches('/')),
            api_key: api_key.filter(|key| !key.expose_secret().is_empty()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn form(&self, query: &TranslationQuery) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("q", query.text.clone()),
            ("source", query.source.clone()),
            ("target", query.target.clone()),
            ("format", query.format.clone()),
            ("alternatives", query.alternatives.to_string()),
        ];
        if let Some(key) = &self.api_key {
            form.push(("api_key", key.expose_secret().to_owned()));
        }
        form
    }
}

#[async_trait]
impl TranslationBackend for LibreTranslateClient {
    #[instrument(skip_all, fields(source = %query.source, target = %query.target))]
    async fn translate(&self, query: &TranslationQuery) -> Result<Value, TranslateError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .form(&self.form(query))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            debug!(status, %body, "translation upstream rejected request");
            return Err(TranslateError::Upstream { status, body });
        }

        Ok(resp.json::<Value>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Form, Json, Router};
    use serde_json::json;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn query() -> TranslationQuery {
        TranslationQuery {
            text: "good morning".into(),
            source: "en".into(),
            target: "es".into(),
            format: "text".into(),
            alternatives: 3,
        }
    }

    #[tokio::test]
    async fn posts_form_encoded_fields() {
        let router = Router::new().route(
            "/translate",
            post(|Form(form): Form<HashMap<String, String>>| async move {
                Json(json!({
                    "translatedText": "buenos días",
                    "alternatives": [],
                    "echo": form,
                }))
            }),
        );
        let base = serve(router).await;
        let client = LibreTranslateClient::new(
            &format!("{base}/"),
            Some(SecretString::from("k3y".to_string())),
            Duration::from_secs(5),
        )
        .unwrap();

        let value = client.translate(&query()).await.unwrap();
        assert_eq!(value["translatedText"], "buenos días");
        assert_eq!(value["echo"]["q"], "good morning");
        assert_eq!(value["echo"]["alternatives"], "3");
        assert_eq!(value["echo"]["api_key"], "k3y");
    }

    #[tokio::test]
    async fn empty_api_key_is_not_sent() {
        let router = Router::new().route(
            "/translate",
            post(|Form(form): Form<HashMap<String, String>>| async move {
                Json(json!({ "hasKey": form.contains_key("api_key") }))
            }),
        );
        let base = serve(router).await;
        let client = LibreTranslateClient::new(
            &base,
            Some(SecretString::from(String::new())),
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(!client.has_api_key());
        let value = client.translate(&query()).await.unwrap();
        assert_eq!(value["hasKey"], false);
    }

    #[tokio::test]
    async fn upstream_status_becomes_error() {
        let router = Router::new().route(
            "/translate",
            post(|| async { (StatusCode::BAD_REQUEST, "target not supported") }),
        );
        let base = serve(router).await;
        let client = LibreTranslateClient::new(&base, None, Duration::from_secs(5)).unwrap();
        match client.translate(&query()).await {
            Err(TranslateError::Upstream { status, body }) => {
                assert_eq!(status, 400);
                assert_eq!(body, "target not supported");
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_upstream_is_network_error() {
        let client =
            LibreTranslateClient::new("http://127.0.0.1:9", None, Duration::from_secs(2)).unwrap();
        assert!(matches!(
            client.translate(&query()).await,
            Err(TranslateError::Network(_))
        ));
    }

    #[test]
    fn endpoint_joins_path_once() {
        let client =
            LibreTranslateClient::new("http://lt.local:5000/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(client.endpoint(), "http://lt.local:5000/translate");
    }
}
