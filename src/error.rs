use std::fmt;

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraylogMcpError>;

/// 时间范围校验失败的具体规则。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeRangeRule {
    Negative,
    Zero,
    TooLong,
    Malformed,
    UnknownUnit,
    InvertedBounds,
    MissingFrom,
}

impl fmt::Display for TimeRangeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TimeRangeRule::Negative => "time range cannot be negative",
            TimeRangeRule::Zero => "time value must be greater than 0",
            TimeRangeRule::TooLong => "time range cannot exceed 1 year (31536000 seconds)",
            TimeRangeRule::Malformed => "use formats like \"1h\", \"30m\", \"2d\" or an ISO-8601 instant",
            TimeRangeRule::UnknownUnit => "valid units: s, m, h, d, w, M, y",
            TimeRangeRule::InvertedBounds => "from time must be before to time",
            TimeRangeRule::MissingFrom => "from time is required for absolute time range",
        };
        f.write_str(text)
    }
}

/// 单个回退变体的失败记录。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantFailure {
    pub label: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum GraylogMcpError {
    #[error("时间范围无效: {input} - {rule}")]
    InvalidTimeRange { input: String, rule: TimeRangeRule },

    #[error("缺少数值字段: metric '{metric}' requires valueField")]
    MissingValueField { metric: String },

    #[error("缺少必要参数: {0}")]
    MissingRequiredParameter(String),

    #[error("消息不存在: {0}")]
    MessageNotFound(String),

    #[error("后端错误: {}", format_backend(.status, .body))]
    Backend { status: Option<u16>, body: String },

    #[error("所有聚合变体均失败: {}", format_attempts(.attempts))]
    AllVariantsFailed { attempts: Vec<VariantFailure> },

    #[error("未选择连接: call use_connection first")]
    NoActiveConnection,

    #[error("未知连接: {0}")]
    UnknownConnection(String),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("无效请求: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl GraylogMcpError {
    pub fn invalid_time(input: impl Into<String>, rule: TimeRangeRule) -> Self {
        GraylogMcpError::InvalidTimeRange {
            input: input.into(),
            rule,
        }
    }
}

impl From<reqwest::Error> for GraylogMcpError {
    fn from(e: reqwest::Error) -> Self {
        GraylogMcpError::Backend {
            status: e.status().map(|s| s.as_u16()),
            body: e.to_string(),
        }
    }
}

fn format_backend(status: &Option<u16>, body: &str) -> String {
    match status {
        Some(code) => format!("HTTP {code}: {body}"),
        None => body.to_string(),
    }
}

fn format_attempts(attempts: &[VariantFailure]) -> String {
    if attempts.is_empty() {
        return "no variants attempted".to_string();
    }
    attempts
        .iter()
        .map(|a| format!("[{}] {}", a.label, a.message))
        .collect::<Vec<_>>()
        .join("; ")
}
