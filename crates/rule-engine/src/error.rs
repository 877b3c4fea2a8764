//! 规则引擎错误类型
//!
//! 事实解析和操作符执行产生的错误会在规则评估边界被包装为
//! [`RuleError::Evaluation`]，附带所属规则的名称，原始错误保留在 `source` 链中。

use thiserror::Error;

/// 外部提供的事实解析器或操作符返回的错误
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("未定义的事实: {fact}")]
    UndefinedFact { fact: String },

    #[error("未知的操作符: {operator}")]
    UnknownOperator { operator: String },

    #[error("未定义的共享条件: {condition}")]
    UndefinedCondition { condition: String },

    #[error("事实 '{fact}' 解析失败: {source}")]
    FactResolution {
        fact: String,
        #[source]
        source: BoxError,
    },

    #[error("操作符 '{operator}' 执行失败: {source}")]
    OperatorExecution {
        operator: String,
        #[source]
        source: BoxError,
    },

    #[error("规则 '{}' 评估失败: {source}", .rule.as_deref().unwrap_or("<unnamed>"))]
    Evaluation {
        rule: Option<String>,
        #[source]
        source: Box<RuleError>,
    },

    #[error("规则解析失败: {0}")]
    ParseError(String),

    #[error("类型不匹配: 期望 {expected}, 实际 {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RuleError>;

impl RuleError {
    /// 用所属规则的名称包装错误
    pub(crate) fn in_rule(self, rule: Option<&str>) -> Self {
        Self::Evaluation {
            rule: rule.map(str::to_string),
            source: Box::new(self),
        }
    }

    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::UndefinedFact { .. } => "UNDEFINED_FACT",
            Self::UnknownOperator { .. } => "UNKNOWN_OPERATOR",
            Self::UndefinedCondition { .. } => "UNDEFINED_CONDITION",
            Self::FactResolution { .. } => "FACT_RESOLUTION_ERROR",
            Self::OperatorExecution { .. } => "OPERATOR_EXECUTION_ERROR",
            Self::Evaluation { source, .. } => source.code(),
            Self::ParseError(_) => "PARSE_ERROR",
            Self::TypeMismatch { .. } => "TYPE_MISMATCH",
            Self::JsonError(_) => "JSON_ERROR",
        }
    }

    /// 出错规则的名称（仅评估错误携带）
    pub fn rule_name(&self) -> Option<&str> {
        match self {
            Self::Evaluation { rule, .. } => rule.as_deref(),
            _ => None,
        }
    }

    /// 出错事实的名称
    pub fn fact_name(&self) -> Option<&str> {
        match self {
            Self::UndefinedFact { fact } | Self::FactResolution { fact, .. } => Some(fact),
            Self::Evaluation { source, .. } => source.fact_name(),
            _ => None,
        }
    }

    /// 出错操作符的名称
    pub fn operator_name(&self) -> Option<&str> {
        match self {
            Self::UnknownOperator { operator } | Self::OperatorExecution { operator, .. } => {
                Some(operator)
            }
            Self::Evaluation { source, .. } => source.operator_name(),
            _ => None,
        }
    }
}
