use serde::{Deserialize, Deserializer};
use tracing::{debug, error};

/// 统一的 API 响应包装结构体（包含 errCode、errMsg、data）
/// data 字段可能为 null 或缺失，因此使用 Option<T>
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(rename = "errCode")]
    pub err_code: i32,
    #[serde(rename = "errMsg")]
    pub err_msg: String,
    pub data: Option<T>,
}

/// 通用 HTTP 响应处理函数：直接反序列化为统一的响应结构体
pub async fn handle_http_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation_name: &str,
) -> anyhow::Result<ApiResponse<T>> {
    use anyhow::Context;

    let status = response.status();

    // body 只能读取一次
    let body_bytes = response.bytes().await.context("读取响应 body 失败")?;
    let body_str = String::from_utf8_lossy(&body_bytes);
    debug!("[HTTP] {}响应 Body: {}", operation_name, body_str);

    if !status.is_success() {
        error!(
            "[HTTP] {}请求失败，HTTP状态: {}, 响应: {}",
            operation_name, status, body_str
        );
        return Err(anyhow::anyhow!("HTTP 错误 {}: {}", status, body_str));
    }

    let api_resp: ApiResponse<T> = serde_json::from_slice(&body_bytes).map_err(|e| {
        error!(
            "[HTTP] {}反序列化失败: {:?}\n原始响应: {}",
            operation_name, e, body_str
        );
        anyhow::anyhow!("反序列化响应失败: {:?}", e)
    })?;

    if api_resp.err_code != 0 {
        error!(
            "[HTTP] {}服务器错误，错误码: {}, 错误信息: {}",
            operation_name, api_resp.err_code, api_resp.err_msg
        );
        return Err(anyhow::anyhow!(
            "服务器错误 {}: {}",
            api_resp.err_code,
            api_resp.err_msg
        ));
    }

    Ok(api_resp)
}

/// 反序列化数组字段，处理 null 值
pub(crate) fn deserialize_vec_or_null<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let opt = Option::<Vec<T>>::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

/// 当前时间（毫秒）
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 无序用户对的规范化键，`pair_key(a, b) == pair_key(b, a)`
pub fn pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}:{}", a, b)
    } else {
        format!("{}:{}", b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_key_is_symmetric() {
        assert_eq!(pair_key("alice", "bob"), pair_key("bob", "alice"));
        assert_ne!(pair_key("alice", "bob"), pair_key("alice", "carol"));
    }

    #[test]
    fn null_arrays_become_empty() {
        #[derive(Deserialize)]
        struct Wrapper {
            #[serde(deserialize_with = "deserialize_vec_or_null")]
            items: Vec<String>,
        }
        let w: Wrapper = serde_json::from_str(r#"{"items": null}"#).unwrap();
        assert!(w.items.is_empty());
    }
}
