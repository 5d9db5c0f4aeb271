//! 网关内部错误类型
//!
//! 只在 `try_*` 接口中出现；统一接口会把它们归约为失败信号。

use thiserror::Error;

/// 网关错误
#[derive(Error, Debug)]
pub enum GatewayError {
    /// 网络层失败（连接、超时、读取响应体）
    #[error("网络错误: {0}")]
    Transport(#[from] reqwest::Error),

    /// 远端返回非成功状态码
    #[error("远端拒绝请求 (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    /// 响应体无法解析
    #[error("响应解析失败: {0}")]
    Decode(#[from] serde_json::Error),

    /// 创建成功但响应中没有记录
    #[error("响应中没有记录")]
    EmptyResponse,

    /// 集合地址无法构造
    #[error("无效的远端地址: {0}")]
    InvalidEndpoint(String),

    /// 凭据不能放入请求头
    #[error("无效的访问凭据")]
    InvalidCredential,
}

impl GatewayError {
    /// 远端返回的状态码（如果有）
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Rejected { status, .. } => Some(*status),
            GatewayError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// 是否为网络层失败
    pub fn is_transport(&self) -> bool {
        matches!(self, GatewayError::Transport(_))
    }
}

/// 网关结果类型
pub type GatewayResult<T> = Result<T, GatewayError>;
