//! HTTP client step.

use serde_json::{json, Value as JsonValue};
use stagecraft_core::step::{step_channels, StepChannels};
use stagecraft_core::{
    default_output, Error, Result, Step, StepConfig, StepInput, StepOutput, ValueSpec,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Default per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Issues one HTTP request per event.
///
/// URL, method, headers, and body are [`ValueSpec`]s resolved against each
/// envelope; the body is serialized according to the content type, responses
/// outside `[200, 300)` surface as per-event errors, and successful
/// responses emit `{statusCode, headers, body}` under the `default` label
/// with the body decoded per `response` (`json`, `text`, or raw).
///
/// # Configuration
///
/// ```yaml
/// step_type: http_client
/// step_config:
///   url: "$js: 'https://api.example.com/items/' + ctx.src.id"
///   method: POST
///   headers:
///     X-Request-Source: stagecraft
///   body: { "value": "$js: ctx.src.value" }
///   content_type: application/json
///   response: json
/// ```
#[derive(Clone)]
pub struct HttpClientStep {
    url: ValueSpec,
    method: ValueSpec,
    headers: BTreeMap<String, ValueSpec>,
    body: Option<ValueSpec>,
    content_type: String,
    response_type: String,
    client: reqwest::Client,
}

/// Create an `http_client` step from raw configuration.
pub fn factory(config: &StepConfig) -> Result<Arc<dyn Step>> {
    let url = config.require_spec("url")?;
    let method = config
        .value_spec("method")
        .unwrap_or_else(|| ValueSpec::literal("GET"));

    let mut headers = BTreeMap::new();
    if let Some(raw) = config.get("headers") {
        let JsonValue::Object(map) = raw else {
            return Err(Error::InvalidConfig {
                key: "headers".to_string(),
                cause: "expected a mapping of header names to values".to_string(),
            });
        };
        for (name, value) in map {
            headers.insert(name.clone(), ValueSpec::parse(value.clone()));
        }
    }

    let body = config.value_spec("body");
    let content_type = config
        .get_str("content_type")
        .unwrap_or("application/json")
        .to_string();
    let response_type = config.get_str("response").unwrap_or("json").to_string();

    Ok(Arc::new(HttpClientStep::from_parts(
        url,
        method,
        headers,
        body,
        content_type,
        response_type,
    )))
}

impl HttpClientStep {
    /// Assemble a step from already-compiled specs (used by the service
    /// compiler).
    pub fn from_parts(
        url: ValueSpec,
        method: ValueSpec,
        headers: BTreeMap<String, ValueSpec>,
        body: Option<ValueSpec>,
        content_type: String,
        response_type: String,
    ) -> Self {
        Self {
            url,
            method,
            headers,
            body,
            content_type,
            response_type,
            client: reqwest::Client::new(),
        }
    }

    async fn perform(&self, input: &StepInput, cancel: &CancellationToken) -> Result<JsonValue> {
        let url = as_plain_string(self.url.resolve(input)?);
        let method_str = as_plain_string(self.method.resolve(input)?).to_uppercase();
        let method =
            reqwest::Method::from_bytes(method_str.as_bytes()).map_err(|_| Error::InvalidConfig {
                key: "method".to_string(),
                cause: format!("invalid HTTP method '{}'", method_str),
            })?;

        let mut request = self
            .client
            .request(method, &url)
            .timeout(REQUEST_TIMEOUT);

        for (name, spec) in &self.headers {
            let value = as_plain_string(spec.resolve(input).map_err(|e| {
                Error::step(format!("failed to resolve header '{}': {}", name, e))
            })?);
            request = request.header(name, value);
        }

        if let Some(body_spec) = &self.body {
            let body = body_spec
                .resolve(input)
                .map_err(|e| Error::step(format!("failed to resolve body: {}", e)))?;
            let bytes = serialize_body(&body, &self.content_type)?;
            request = request
                .header(reqwest::header::CONTENT_TYPE, self.content_type.clone())
                .body(bytes);
        }

        let response = tokio::select! {
            sent = request.send() => sent.map_err(|e| Error::Http {
                cause: e.to_string(),
            })?,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        let status = response.status().as_u16();
        let mut headers = serde_json::Map::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers
                    .entry(name.as_str().to_string())
                    .or_insert_with(|| JsonValue::String(value.to_string()));
            }
        }

        let bytes = tokio::select! {
            read = response.bytes() => read.map_err(|e| Error::Http { cause: e.to_string() })?,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        if !(200..300).contains(&status) {
            return Err(Error::HttpStatus {
                status,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        let body = match self.response_type.as_str() {
            "json" => serde_json::from_slice(&bytes)
                .map_err(|e| Error::step(format!("failed to decode JSON response: {}", e)))?,
            "text" => JsonValue::String(String::from_utf8_lossy(&bytes).into_owned()),
            _ => JsonValue::String(String::from_utf8_lossy(&bytes).into_owned()),
        };

        Ok(json!({
            "statusCode": status,
            "headers": headers,
            "body": body,
        }))
    }
}

impl Step for HttpClientStep {
    fn kind(&self) -> &str {
        "http_client"
    }

    fn run(&self, cancel: CancellationToken, mut inputs: mpsc::Receiver<StepInput>) -> StepChannels {
        let step = self.clone();
        let (out_tx, err_tx, channels) = step_channels();

        tokio::spawn(async move {
            while let Some(input) = inputs.recv().await {
                match step.perform(&input, &cancel).await {
                    Ok(payload) => {
                        let output = StepOutput::new(default_output(payload), input.event_id);
                        tokio::select! {
                            _ = out_tx.send(output) => {}
                            _ = cancel.cancelled() => {
                                let _ = err_tx.send(Error::Cancelled).await;
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let stop = e.is_cancelled();
                        let _ = err_tx.send(e).await;
                        if stop {
                            return;
                        }
                    }
                }
            }
        });

        channels
    }
}

/// Strings render unquoted; everything else uses its JSON form.
fn as_plain_string(value: JsonValue) -> String {
    match value {
        JsonValue::String(s) => s,
        other => other.to_string(),
    }
}

/// Serialize a request body according to the content type.
///
/// `application/x-www-form-urlencoded` is reserved and currently falls back
/// to JSON.
fn serialize_body(body: &JsonValue, content_type: &str) -> Result<Vec<u8>> {
    match content_type {
        "text/plain" => Ok(as_plain_string(body.clone()).into_bytes()),
        _ => Ok(serde_json::to_vec(body)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagecraft_core::EventId;

    #[test]
    fn factory_requires_url() {
        let err = match factory(&StepConfig::new()) {
            Err(err) => err,
            Ok(_) => panic!("expected an error"),
        };
        assert_eq!(err.to_string(), "missing required configuration key: url");
    }

    #[test]
    fn factory_defaults() {
        let config = StepConfig::from_map(
            [("url".to_string(), json!("https://example.com"))].into(),
        );
        let step = factory(&config).unwrap();
        assert_eq!(step.kind(), "http_client");
        assert!(!step.is_continuous());
    }

    #[test]
    fn body_serialization() {
        let body = json!({"a": 1});
        assert_eq!(
            serialize_body(&body, "application/json").unwrap(),
            serde_json::to_vec(&body).unwrap()
        );
        assert_eq!(
            serialize_body(&json!("plain text"), "text/plain").unwrap(),
            b"plain text".to_vec()
        );
        // Reserved type falls back to JSON.
        assert_eq!(
            serialize_body(&body, "application/x-www-form-urlencoded").unwrap(),
            serde_json::to_vec(&body).unwrap()
        );
    }

    #[test]
    fn plain_string_rendering() {
        assert_eq!(as_plain_string(json!("s")), "s");
        assert_eq!(as_plain_string(json!(5)), "5");
        assert_eq!(as_plain_string(json!({"a": 1})), r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn unreachable_host_is_a_per_event_error() {
        let config = StepConfig::from_map(
            [(
                "url".to_string(),
                // Reserved TEST-NET-1 address; nothing listens there.
                json!("http://192.0.2.1:9/unreachable"),
            )]
            .into(),
        );
        let step = factory(&config).unwrap();

        let (input_tx, input_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let (_out_rx, mut err_rx) = step.run(cancel.clone(), input_rx);

        input_tx.send(StepInput::new(EventId::new())).await.unwrap();
        // Don't wait for the full connect timeout.
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let error = err_rx.recv().await.unwrap();
        assert!(matches!(error, Error::Http { .. } | Error::Cancelled));
    }
}
