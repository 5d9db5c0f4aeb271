//! 诊断信息收集
//!
//! 网关对调用方只返回统一的失败信号（`None`、空列表或 `false`），
//! 失败原因记录在这里，供展示层区分"没有记录"和"请求失败"。

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 诊断级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// 单条诊断
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub operation: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.severity {
            Severity::Warning => "警告",
            Severity::Error => "错误",
        };
        write!(f, "[{}] {}: {}", label, self.operation, self.message)
    }
}

/// 诊断收集器
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Mutex<Vec<Diagnostic>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, severity: Severity, operation: &str, message: impl Into<String>) {
        self.entries.lock().push(Diagnostic {
            severity,
            operation: operation.to_string(),
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn error(&self, operation: &str, message: impl Into<String>) {
        self.record(Severity::Error, operation, message);
    }

    pub fn warn(&self, operation: &str, message: impl Into<String>) {
        self.record(Severity::Warning, operation, message);
    }

    /// 当前所有诊断的副本
    pub fn entries(&self) -> Vec<Diagnostic> {
        self.entries.lock().clone()
    }

    /// 取出并清空
    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.entries.lock())
    }

    /// 最近一条错误
    pub fn last_error(&self) -> Option<Diagnostic> {
        self.entries
            .lock()
            .iter()
            .rev()
            .find(|d| d.severity == Severity::Error)
            .cloned()
    }

    pub fn has_errors(&self) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
