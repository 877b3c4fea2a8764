//! 规则评估结果
//!
//! [`RuleResult`] 持有规则的深拷贝，评估时直接在拷贝上写注解，原规则始终不变。

use crate::error::Result;
use crate::models::{Combinator, Rule};
use serde::Serialize;
use serde_json::Value;

/// 一次规则评估的快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleResult {
    #[serde(skip)]
    name: Option<String>,
    conditions: Combinator,
    event: Value,
    priority: u32,
    result: Option<bool>,
}

impl RuleResult {
    pub(crate) fn new(rule: &Rule) -> Self {
        Self {
            name: rule.name.clone(),
            conditions: rule.conditions.clone(),
            event: rule.event.clone(),
            priority: rule.priority,
            result: None,
        }
    }

    /// 写入最终结果，同时写到根节点上
    pub(crate) fn set_result(&mut self, result: bool) {
        self.result = Some(result);
        self.conditions.result = Some(result);
    }

    pub(crate) fn conditions_mut(&mut self) -> &mut Combinator {
        &mut self.conditions
    }

    /// 规则是否命中
    pub fn result(&self) -> Option<bool> {
        self.result
    }

    /// 带注解的条件树
    pub fn conditions(&self) -> &Combinator {
        &self.conditions
    }

    pub fn event(&self) -> &Value {
        &self.event
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// 输出 `{ conditions, event, priority, result }`
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "conditions": self.conditions,
            "event": self.event,
            "priority": self.priority,
            "result": self.result,
        })
    }

    pub fn to_json_string(&self, pretty: bool) -> Result<String> {
        let json = if pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        };
        Ok(json)
    }
}
