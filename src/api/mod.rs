use crate::auth::AuthGuard;
use crate::config::{ServiceType, ServicesConfig};
use crate::error::ApiError;
use crate::models::api::{AiEnvelope, ApiResponse};
use log::{debug, error};
use reqwest::{Client as HttpClient, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// HTTP client shared by every REST call against the main and AI services.
///
/// Attaches the stored bearer token, unwraps either service's JSON envelope
/// and maps failures onto [`ApiError`]. A 401 goes through the [`AuthGuard`]
/// before the error is returned.
pub struct ApiClient {
    main: HttpClient,
    ai: HttpClient,
    config: ServicesConfig,
    guard: AuthGuard,
}

impl ApiClient {
    pub fn new(config: ServicesConfig, guard: AuthGuard) -> Result<Self, ApiError> {
        let main = HttpClient::builder()
            .timeout(config.main.timeout)
            .build()?;
        let ai = HttpClient::builder()
            .timeout(config.ai.timeout)
            .build()?;
        Ok(Self { main, ai, config, guard })
    }

    pub fn config(&self) -> &ServicesConfig {
        &self.config
    }

    pub fn guard(&self) -> &AuthGuard {
        &self.guard
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        service: ServiceType,
        route: &str,
        query: &[(&str, String)]
    ) -> Result<T, ApiError> {
        let value = self.send(service, Method::GET, route, query, None).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        service: ServiceType,
        route: &str,
        query: &[(&str, String)],
        body: Option<&B>
    ) -> Result<T, ApiError> {
        let body = body.map(serde_json::to_value).transpose()?;
        let value = self.send(service, Method::POST, route, query, body).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        service: ServiceType,
        route: &str,
        query: &[(&str, String)],
        body: Option<&B>
    ) -> Result<T, ApiError> {
        let body = body.map(serde_json::to_value).transpose()?;
        let value = self.send(service, Method::PUT, route, query, body).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        service: ServiceType,
        route: &str
    ) -> Result<T, ApiError> {
        let value = self.send(service, Method::DELETE, route, &[], None).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn send(
        &self,
        service: ServiceType,
        method: Method,
        route: &str,
        query: &[(&str, String)],
        body: Option<Value>
    ) -> Result<Value, ApiError> {
        let config = self.config.get(service);
        let url = config.url(route);
        debug!("{} request: {} {}", config.name, method, url);

        let mut req = self.request(service, method.clone(), &url).query(query);
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req.send().await.map_err(|e| {
            error!("{} {} failed: {}", method, url, e);
            ApiError::Network(e)
        })?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            let err = self.status_error(status, &text);
            error!("{} {} failed: {}", method, url, err);
            return Err(err);
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        let value: Value = serde_json::from_str(&text)?;
        unwrap_envelope(value)
    }

    fn request(&self, service: ServiceType, method: Method, url: &str) -> RequestBuilder {
        let http = match service {
            ServiceType::Main => &self.main,
            ServiceType::Ai => &self.ai,
        };
        let req = http.request(method, url);
        match self.guard.credentials().token() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    fn status_error(&self, status: StatusCode, body: &str) -> ApiError {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let message = parsed
            .as_ref()
            .and_then(|v| v.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());

        match status {
            StatusCode::UNAUTHORIZED => {
                self.guard.on_unauthorized();
                ApiError::Unauthorized
            }
            StatusCode::FORBIDDEN => ApiError::Forbidden,
            StatusCode::UNPROCESSABLE_ENTITY => ApiError::Validation {
                message,
                fields: parsed
                    .as_ref()
                    .and_then(|v| v.get("errors"))
                    .map(field_errors)
                    .unwrap_or_default(),
            },
            s if s.is_server_error() => ApiError::Server { status: s.as_u16(), message },
            s => ApiError::Status { status: s.as_u16(), message },
        }
    }
}

/// Detects which service produced `value` and strips its envelope.
///
/// `{code, message, data}` yields `data` when `code` is 200. `{success, ...}`
/// yields the whole object when `success` is true. Anything else is returned
/// untouched.
pub fn unwrap_envelope(value: Value) -> Result<Value, ApiError> {
    let Some(obj) = value.as_object() else {
        return Ok(value);
    };

    if obj.get("code").is_some_and(Value::is_i64) {
        let envelope: ApiResponse<Value> = serde_json::from_value(value)?;
        if envelope.code != 200 {
            return Err(ApiError::Business {
                code: Some(envelope.code),
                message: non_empty(envelope.message, "request failed"),
            });
        }
        return Ok(envelope.data.unwrap_or(Value::Null));
    }

    if obj.get("success").is_some_and(Value::is_boolean) {
        let envelope: AiEnvelope = serde_json::from_value(value.clone())?;
        if !envelope.success {
            return Err(ApiError::Business {
                code: None,
                message: non_empty(envelope.message, "AI service request failed"),
            });
        }
    }

    Ok(value)
}

fn non_empty(message: String, fallback: &str) -> String {
    if message.trim().is_empty() {
        fallback.to_string()
    } else {
        message
    }
}

fn field_errors(errors: &Value) -> BTreeMap<String, Vec<String>> {
    let mut fields = BTreeMap::new();
    if let Some(map) = errors.as_object() {
        for (field, msgs) in map {
            let msgs = match msgs {
                Value::Array(items) => items.iter().filter_map(Value::as_str).map(str::to_string).collect(),
                Value::String(s) => vec![s.clone()],
                _ => continue,
            };
            fields.insert(field.clone(), msgs);
        }
    }
    fields
}
