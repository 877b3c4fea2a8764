//! 规则引擎领域模型
//!
//! 条件树的 JSON 形态：
//!
//! ```json
//! {
//!   "any": [
//!     { "fact": "age", "operator": "greaterThanInclusive", "value": 21 },
//!     { "all": [ { "condition": "isVip" } ], "not": true }
//!   ]
//! }
//! ```
//!
//! 评估后的条件树会在同一结构上附加 `result`、`factResult` 等注解字段。

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// 规则定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub conditions: Combinator,
    #[serde(default = "default_event")]
    pub event: Value,
    #[serde(default = "default_priority", deserialize_with = "positive_priority")]
    pub priority: u32,
}

fn default_event() -> Value {
    serde_json::json!({ "type": "unknown" })
}

fn default_priority() -> u32 {
    1
}

fn positive_priority<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let priority = u32::deserialize(deserializer)?;
    if priority == 0 {
        return Err(D::Error::custom("规则优先级必须大于 0"));
    }
    Ok(priority)
}

impl Rule {
    pub fn new(conditions: Combinator) -> Self {
        Self {
            name: None,
            conditions,
            event: default_event(),
            priority: default_priority(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_event(mut self, event: Value) -> Self {
        self.event = event;
        self
    }

    /// 设置优先级，0 会被提升为 1
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority.max(1);
        self
    }

    /// 从 JSON 字符串解析规则
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// 条件树节点
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Combinator(Combinator),
    Leaf(LeafCondition),
    Reference(ConditionReference),
}

impl Condition {
    /// 节点上声明的优先级
    pub fn priority(&self) -> Option<u32> {
        match self {
            Self::Combinator(c) => c.priority,
            Self::Leaf(l) => l.priority,
            Self::Reference(_) => None,
        }
    }

    /// 本次评估写入的结果，未评估（被短路跳过）时为 None
    pub fn result(&self) -> Option<bool> {
        match self {
            Self::Combinator(c) => c.result,
            Self::Leaf(l) => l.result,
            Self::Reference(r) => r.result,
        }
    }
}

impl From<Combinator> for Condition {
    fn from(c: Combinator) -> Self {
        Self::Combinator(c)
    }
}

impl From<LeafCondition> for Condition {
    fn from(l: LeafCondition) -> Self {
        Self::Leaf(l)
    }
}

impl From<ConditionReference> for Condition {
    fn from(r: ConditionReference) -> Self {
        Self::Reference(r)
    }
}

/// 布尔组合方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BooleanOperator {
    All,
    Any,
}

impl BooleanOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Any => "any",
        }
    }
}

impl fmt::Display for BooleanOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 组合节点（all / any，可选 not 取反）
#[derive(Debug, Clone, PartialEq)]
pub struct Combinator {
    pub operator: BooleanOperator,
    pub operands: Vec<Condition>,
    pub negated: bool,
    pub priority: Option<u32>,
    pub name: Option<String>,
    pub result: Option<bool>,
}

impl Combinator {
    pub fn new(operator: BooleanOperator, operands: Vec<Condition>) -> Self {
        Self {
            operator,
            operands,
            negated: false,
            priority: None,
            name: None,
            result: None,
        }
    }

    pub fn all(operands: Vec<Condition>) -> Self {
        Self::new(BooleanOperator::All, operands)
    }

    pub fn any(operands: Vec<Condition>) -> Self {
        Self::new(BooleanOperator::Any, operands)
    }

    /// 对组合结果取反
    pub fn not(mut self) -> Self {
        self.negated = true;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority.max(1));
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// 叶子条件：`fact <operator> value`
#[derive(Debug, Clone, PartialEq)]
pub struct LeafCondition {
    pub fact: String,
    pub operator: String,
    pub value: Value,
    pub params: Option<Map<String, Value>>,
    pub path: Option<String>,
    pub priority: Option<u32>,
    pub name: Option<String>,
    /// 评估时观察到的事实值（已应用 path）
    pub fact_result: Option<Value>,
    /// value 为事实引用时解析出的比较值
    pub value_result: Option<Value>,
    pub result: Option<bool>,
}

impl LeafCondition {
    pub fn new(fact: impl Into<String>, operator: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            fact: fact.into(),
            operator: operator.into(),
            value: value.into(),
            params: None,
            path: None,
            priority: None,
            name: None,
            fact_result: None,
            value_result: None,
            result: None,
        }
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority.max(1));
        self
    }

    /// value 是否为事实引用（`{"fact": "..."}`）
    pub fn value_reference(&self) -> Option<FactReference> {
        FactReference::from_value(&self.value)
    }
}

/// 比较值中的事实引用
#[derive(Debug, Clone, PartialEq)]
pub struct FactReference {
    pub fact: String,
    pub params: Map<String, Value>,
    pub path: Option<String>,
}

impl FactReference {
    fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let fact = obj.get("fact")?.as_str()?;
        Some(Self {
            fact: fact.to_string(),
            params: obj
                .get("params")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            path: obj.get("path").and_then(Value::as_str).map(str::to_string),
        })
    }
}

/// 共享条件引用：`{"condition": "name"}`
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionReference {
    pub condition: String,
    pub result: Option<bool>,
}

impl ConditionReference {
    pub fn new(condition: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            result: None,
        }
    }
}

// ==================== 序列化 ====================

/// 反序列化中间形态，所有字段可选，由 `TryFrom` 判定节点类型
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCondition {
    all: Option<Vec<Condition>>,
    any: Option<Vec<Condition>>,
    not: Option<bool>,
    condition: Option<String>,
    fact: Option<String>,
    operator: Option<String>,
    #[serde(default, deserialize_with = "present")]
    value: Option<Value>,
    params: Option<Map<String, Value>>,
    path: Option<String>,
    priority: Option<u32>,
    name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    fact_result: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    value_result: Option<Value>,
    result: Option<bool>,
}

/// 区分字段缺失与显式的 `null`
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl TryFrom<RawCondition> for Condition {
    type Error = String;

    fn try_from(raw: RawCondition) -> Result<Self, Self::Error> {
        if raw.priority == Some(0) {
            return Err("条件优先级必须大于 0".to_string());
        }

        let (operator, operands) = match (raw.all, raw.any) {
            (Some(_), Some(_)) => return Err("条件不能同时包含 all 和 any".to_string()),
            (Some(all), None) => (Some(BooleanOperator::All), all),
            (None, Some(any)) => (Some(BooleanOperator::Any), any),
            (None, None) => (None, Vec::new()),
        };

        if let Some(operator) = operator {
            return Ok(Self::Combinator(Combinator {
                operator,
                operands,
                negated: raw.not.unwrap_or(false),
                priority: raw.priority,
                name: raw.name,
                result: raw.result,
            }));
        }

        if let Some(condition) = raw.condition {
            return Ok(Self::Reference(ConditionReference {
                condition,
                result: raw.result,
            }));
        }

        let fact = raw.fact.filter(|f| !f.is_empty()).ok_or("条件缺少 fact 字段")?;
        let operator = raw
            .operator
            .filter(|o| !o.is_empty())
            .ok_or_else(|| format!("条件 '{}' 缺少 operator 字段", fact))?;
        let value = raw
            .value
            .ok_or_else(|| format!("条件 '{}' 缺少 value 字段", fact))?;

        Ok(Self::Leaf(LeafCondition {
            fact,
            operator,
            value,
            params: raw.params,
            path: raw.path,
            priority: raw.priority,
            name: raw.name,
            fact_result: raw.fact_result,
            value_result: raw.value_result,
            result: raw.result,
        }))
    }
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawCondition::deserialize(deserializer)?;
        Condition::try_from(raw).map_err(D::Error::custom)
    }
}

impl<'de> Deserialize<'de> for Combinator {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Condition::deserialize(deserializer)? {
            Condition::Combinator(c) => Ok(c),
            _ => Err(D::Error::custom("规则条件的根节点必须是 all 或 any")),
        }
    }
}

impl Serialize for Condition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Combinator(c) => c.serialize(serializer),
            Self::Leaf(l) => l.serialize(serializer),
            Self::Reference(r) => r.serialize(serializer),
        }
    }
}

impl Serialize for Combinator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("operator", self.operator.as_str())?;
        if let Some(priority) = self.priority {
            map.serialize_entry("priority", &priority)?;
        }
        if let Some(name) = &self.name {
            map.serialize_entry("name", name)?;
        }
        if self.negated {
            map.serialize_entry("not", &true)?;
        }
        map.serialize_entry(self.operator.as_str(), &self.operands)?;
        if let Some(result) = self.result {
            map.serialize_entry("result", &result)?;
        }
        map.end()
    }
}

impl Serialize for LeafCondition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("operator", &self.operator)?;
        map.serialize_entry("value", &self.value)?;
        map.serialize_entry("fact", &self.fact)?;
        if let Some(params) = &self.params {
            map.serialize_entry("params", params)?;
        }
        if let Some(path) = &self.path {
            map.serialize_entry("path", path)?;
        }
        if let Some(priority) = self.priority {
            map.serialize_entry("priority", &priority)?;
        }
        if let Some(name) = &self.name {
            map.serialize_entry("name", name)?;
        }
        if let Some(fact_result) = &self.fact_result {
            map.serialize_entry("factResult", fact_result)?;
        }
        if let Some(value_result) = &self.value_result {
            map.serialize_entry("valueResult", value_result)?;
        }
        if let Some(result) = self.result {
            map.serialize_entry("result", &result)?;
        }
        map.end()
    }
}

impl Serialize for ConditionReference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("condition", &self.condition)?;
        if let Some(result) = self.result {
            map.serialize_entry("result", &result)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rule_deserialization() {
        let json = r#"
        {
            "name": "drinking-age",
            "conditions": {
                "all": [
                    { "fact": "age", "operator": "greaterThanInclusive", "value": 21 },
                    {
                        "any": [
                            { "fact": "country", "operator": "equal", "value": "US" },
                            { "condition": "isTourist" }
                        ],
                        "not": true,
                        "priority": 5
                    }
                ]
            },
            "event": { "type": "adult" },
            "priority": 10
        }
        "#;

        let rule = Rule::from_json(json).unwrap();
        assert_eq!(rule.name.as_deref(), Some("drinking-age"));
        assert_eq!(rule.priority, 10);
        assert_eq!(rule.conditions.operator, BooleanOperator::All);
        assert_eq!(rule.conditions.operands.len(), 2);

        match &rule.conditions.operands[1] {
            Condition::Combinator(c) => {
                assert_eq!(c.operator, BooleanOperator::Any);
                assert!(c.negated);
                assert_eq!(c.priority, Some(5));
                assert!(matches!(&c.operands[1], Condition::Reference(r) if r.condition == "isTourist"));
            }
            other => panic!("unexpected node: {:?}", other),
        }
    }

    #[test]
    fn test_rule_defaults() {
        let rule = Rule::from_json(r#"{ "conditions": { "any": [] } }"#).unwrap();
        assert_eq!(rule.name, None);
        assert_eq!(rule.priority, 1);
        assert_eq!(rule.event, json!({ "type": "unknown" }));
    }

    #[test]
    fn test_root_must_be_combinator() {
        let result = Rule::from_json(
            r#"{ "conditions": { "fact": "age", "operator": "equal", "value": 1 } }"#,
        );
        assert!(result.unwrap_err().to_string().contains("根节点必须是 all 或 any"));
    }

    #[test]
    fn test_zero_priority_rejected() {
        let result = Rule::from_json(r#"{ "conditions": { "all": [] }, "priority": 0 }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_leaf_requires_value() {
        let result: Result<Condition, _> =
            serde_json::from_value(json!({ "fact": "age", "operator": "equal" }));
        assert!(result.unwrap_err().to_string().contains("缺少 value"));

        // 显式 null 是合法的比较值
        let leaf: Condition =
            serde_json::from_value(json!({ "fact": "age", "operator": "equal", "value": null }))
                .unwrap();
        assert!(matches!(leaf, Condition::Leaf(l) if l.value.is_null()));
    }

    #[test]
    fn test_both_all_and_any_rejected() {
        let result: Result<Condition, _> = serde_json::from_value(json!({ "all": [], "any": [] }));
        assert!(result.is_err());
    }

    #[test]
    fn test_fact_reference_value() {
        let leaf = LeafCondition::new(
            "income",
            "greaterThan",
            json!({ "fact": "expenses", "path": "$.monthly" }),
        );
        let reference = leaf.value_reference().unwrap();
        assert_eq!(reference.fact, "expenses");
        assert_eq!(reference.path.as_deref(), Some("$.monthly"));
        assert!(reference.params.is_empty());

        let literal = LeafCondition::new("income", "greaterThan", json!({ "amount": 1 }));
        assert!(literal.value_reference().is_none());
    }

    #[test]
    fn test_combinator_serialization() {
        let mut leaf = LeafCondition::new("age", "greaterThanInclusive", 21);
        leaf.fact_result = Some(json!(30));
        leaf.result = Some(true);

        let mut group = Combinator::any(vec![leaf.into()]).not();
        group.result = Some(false);

        let value = serde_json::to_value(&group).unwrap();
        assert_eq!(
            value,
            json!({
                "operator": "any",
                "not": true,
                "any": [{
                    "operator": "greaterThanInclusive",
                    "value": 21,
                    "fact": "age",
                    "factResult": 30,
                    "result": true
                }],
                "result": false
            })
        );

        // 注解后的树可以被重新解析
        let parsed: Combinator = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, group);
    }
}
