//! 各 HTTP 后端共用的请求发送与错误映射

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::llm::LlmError;

/// 错误响应体最多保留的字符数
const ERROR_BODY_CHARS: usize = 500;

pub(crate) fn build_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "falling back to default HTTP client");
            reqwest::Client::new()
        })
}

/// POST JSON 请求体并把响应解码为 T；429 映射为 RateLimited，其他非 2xx 映射为 Api
pub(crate) async fn post_json<B, T>(request: RequestBuilder, body: &B) -> Result<T, LlmError>
where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
{
    let response = request
        .json(body)
        .send()
        .await
        .map_err(|e| LlmError::Http(e.to_string()))?;

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok());
        return Err(LlmError::RateLimited { retry_after_secs });
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LlmError::Api {
            status: status.as_u16(),
            body: body.chars().take(ERROR_BODY_CHARS).collect(),
        });
    }

    response
        .json::<T>()
        .await
        .map_err(|e| LlmError::Decode(e.to_string()))
}

/// 解码字符串形式的 JSON 参数；空串视为空对象，非对象视为解码失败
pub(crate) fn decode_arguments(raw: &str) -> Result<Map<String, Value>, LlmError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| LlmError::Decode(format!("tool arguments are not valid JSON ({e}): {raw}")))?;
    object_arguments(value)
}

pub(crate) fn object_arguments(value: Value) -> Result<Map<String, Value>, LlmError> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(LlmError::Decode(format!(
            "tool arguments must be a JSON object, got: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_arguments() {
        let args = decode_arguments(r#"{"city":"Granada"}"#).unwrap();
        assert_eq!(args["city"], "Granada");
        assert!(decode_arguments("").unwrap().is_empty());
        assert!(matches!(decode_arguments("[1,2]"), Err(LlmError::Decode(_))));
        assert!(matches!(decode_arguments("{oops"), Err(LlmError::Decode(_))));
    }
}
