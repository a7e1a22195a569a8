// HTTP backend client implementation
use crate::application::backend_api::{BackendApi, BackendError, EntityAction, ResolvedExpression};
use crate::domain::time_series::TimeSeriesEntry;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: String, token: Option<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn entity_path(&self, entity_id: &str) -> String {
        self.url(&format!("/entities/{}", urlencoding::encode(entity_id)))
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T, BackendError> {
        let request = match &self.token {
            Some(token) => request.header("Authorization", format!("Token {}", token)),
            None => request,
        };
        let response = request
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                message: extract_error_message(&body)
                    .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string()),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }
}

/// Pulls a readable message out of an error body: `detail` as a string or as
/// a list of `{msg}` objects, else `message`.
fn extract_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("detail") {
        Some(Value::String(detail)) => return Some(detail.clone()),
        Some(Value::Array(items)) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(Value::as_str))
                .collect();
            if !messages.is_empty() {
                return Some(messages.join("; "));
            }
        }
        _ => {}
    }
    value
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn list_entities(
        &self,
        entity_type: &str,
        category: Option<&str>,
    ) -> Result<Vec<Value>, BackendError> {
        let mut url = format!(
            "{}?entity_type={}",
            self.url("/entities"),
            urlencoding::encode(entity_type)
        );
        if let Some(category) = category {
            url.push_str(&format!("&category={}", urlencoding::encode(category)));
        }
        self.send(self.client.get(url)).await
    }

    async fn get_entity(&self, entity_id: &str) -> Result<Value, BackendError> {
        self.send(self.client.get(self.entity_path(entity_id))).await
    }

    async fn create_entity(
        &self,
        entity_type: &str,
        name: &str,
        category: Option<&str>,
    ) -> Result<Value, BackendError> {
        let body = json!({
            "entity_type": entity_type,
            "name": name,
            "category": category,
        });
        self.send(self.client.post(self.url("/entities")).json(&body)).await
    }

    async fn update_attribute(
        &self,
        entity_id: &str,
        attribute: &str,
        value: Value,
    ) -> Result<Value, BackendError> {
        let url = format!("{}/attributes", self.entity_path(entity_id));
        let body = json!({ "attribute": attribute, "value": value });
        self.send(self.client.patch(url).json(&body)).await
    }

    async fn entity_action(&self, entity_id: &str, action: EntityAction) -> Result<Value, BackendError> {
        let url = format!("{}/{}", self.entity_path(entity_id), action.path_segment());
        self.send(self.client.post(url)).await
    }

    async fn list_entries(&self, entity_id: &str) -> Result<Vec<TimeSeriesEntry>, BackendError> {
        let url = format!("{}/entries", self.entity_path(entity_id));
        self.send(self.client.get(url)).await
    }

    async fn resolve(
        &self,
        expression: &str,
        anchor_labels: &[String],
    ) -> Result<ResolvedExpression, BackendError> {
        let body = json!({ "expression": expression, "anchors": anchor_labels });
        self.send(self.client.post(self.url("/resolve")).json(&body)).await
    }

    async fn fetch_feed(&self, url: &str) -> Result<Value, BackendError> {
        self.send(self.client.get(url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_from_detail_string() {
        let body = r#"{"detail": "Timer already running"}"#;
        assert_eq!(extract_error_message(body).as_deref(), Some("Timer already running"));
    }

    #[test]
    fn test_error_message_from_validation_list() {
        let body = r#"{"detail": [{"loc": ["body", "name"], "msg": "field required"}, {"msg": "too short"}]}"#;
        assert_eq!(
            extract_error_message(body).as_deref(),
            Some("field required; too short")
        );
    }

    #[test]
    fn test_error_message_fallbacks() {
        assert_eq!(
            extract_error_message(r#"{"message": "nope"}"#).as_deref(),
            Some("nope")
        );
        assert_eq!(extract_error_message(r#"{"detail": []}"#), None);
        assert_eq!(extract_error_message("<html>502</html>"), None);
    }

    #[test]
    fn test_urls_are_encoded_and_trimmed() {
        let backend = HttpBackend::new(
            "http://localhost:8000/api/".to_string(),
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            backend.entity_path("a b/c"),
            "http://localhost:8000/api/entities/a%20b%2Fc"
        );
    }
}
