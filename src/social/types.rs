use crate::social::error::{SyncError, SyncResult};
use serde::Deserialize;
use tracing::{debug, error, info};

/// 读操作的降级结果：失败时 `value` 为安全默认值，错误通过 `error` 旁路返回
#[derive(Debug, Clone)]
pub struct ReadOutcome<T> {
    pub value: T,
    pub error: Option<SyncError>,
}

impl<T> ReadOutcome<T> {
    pub fn ok(value: T) -> Self {
        Self { value, error: None }
    }

    pub fn degraded(value: T, error: SyncError) -> Self {
        Self {
            value,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// 服务端错误响应体，兼容 `{"error": ...}` 与 `{"message": ...}` 两种写法
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

fn extract_error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            error: Some(msg), ..
        })
        | Ok(ErrorBody {
            message: Some(msg),
            ..
        }) => msg,
        _ if body.trim().is_empty() => "空响应".to_string(),
        _ => body.trim().to_string(),
    }
}

/// 已读取的响应体（原始字节 + 文本形式，便于日志输出）
pub struct HttpBody {
    pub bytes: Vec<u8>,
    pub text: String,
}

/// 读取响应 body，非 2xx 时转换为 `SyncError::Server`
pub async fn read_http_body(
    response: reqwest::Response,
    operation_name: &str,
) -> SyncResult<HttpBody> {
    let status = response.status();
    let body_bytes = response.bytes().await.map_err(SyncError::from)?;
    let body_str = String::from_utf8_lossy(&body_bytes).to_string();
    debug!("[HTTP] {}响应 Body: {}", operation_name, body_str);

    if !status.is_success() {
        error!(
            "[HTTP] {}请求失败，HTTP状态: {}, 响应: {}",
            operation_name, status, body_str
        );
        return Err(SyncError::server(
            status.as_u16(),
            extract_error_message(&body_str),
        ));
    }
    debug!("[HTTP] {}请求成功，HTTP状态: {}", operation_name, status);

    Ok(HttpBody {
        bytes: body_bytes.to_vec(),
        text: body_str,
    })
}

/// 通用 HTTP 响应处理：检查状态码后直接反序列化为固定结构
///
/// 结构不匹配的响应在这里就被拒绝，不会流入上层逻辑
pub async fn handle_http_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation_name: &str,
) -> SyncResult<T> {
    let body = read_http_body(response, operation_name).await?;
    serde_json::from_slice::<T>(&body.bytes).map_err(|e| {
        error!(
            "[HTTP] {}反序列化失败: {:?}\n原始响应: {}",
            operation_name, e, body.text
        );
        SyncError::server(200, format!("反序列化响应失败: {}", e))
    })
}

/// 只关心状态码的响应（如标记已读）
pub async fn handle_empty_response(
    response: reqwest::Response,
    operation_name: &str,
) -> SyncResult<()> {
    read_http_body(response, operation_name).await?;
    info!("[HTTP] ✅ {}完成", operation_name);
    Ok(())
}

/// 创建带认证头的 HTTP 客户端（token 通过 default_headers 自动添加）
pub fn build_http_client(token: &str) -> SyncResult<reqwest::Client> {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        reqwest::header::CONTENT_TYPE,
        reqwest::header::HeaderValue::from_static("application/json"),
    );
    if !token.is_empty() {
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| SyncError::validation("无效的 token"))?,
        );
    }
    reqwest::ClientBuilder::new()
        .default_headers(headers)
        .build()
        .map_err(SyncError::from)
}
