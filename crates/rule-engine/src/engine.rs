//! 规则引擎
//!
//! [`Engine`] 持有引擎级事实、操作符表和共享条件。注册接口需要 `&mut self`，
//! 评估只借用 `&self`，因此评估进行中引擎级状态不会被修改。

use crate::almanac::Almanac;
use crate::error::Result;
use crate::executor::RuleExecutor;
use crate::facts::{Fact, RuntimeFacts};
use crate::models::{Combinator, Rule};
use crate::operators::{Operator, OperatorRegistry};
use crate::result::RuleResult;
use rules_shared::config::EngineConfig;
use rules_shared::observability::metrics::record_rule_evaluation;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// 引擎选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineOptions {
    /// 未定义的事实按缺失值处理，而不是报错
    pub allow_undefined_facts: bool,
    /// 未定义的共享条件按 false 处理，而不是报错
    pub allow_undefined_conditions: bool,
    /// 同一优先级的兄弟条件并发评估
    pub concurrent_siblings: bool,
}

impl From<&EngineConfig> for EngineOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            allow_undefined_facts: config.allow_undefined_facts,
            allow_undefined_conditions: config.allow_undefined_conditions,
            concurrent_siblings: config.concurrent_siblings,
        }
    }
}

/// 规则引擎
#[derive(Debug, Clone, Default)]
pub struct Engine {
    facts: Arc<HashMap<String, Fact>>,
    operators: OperatorRegistry,
    conditions: HashMap<String, Combinator>,
    options: EngineOptions,
}

impl Engine {
    /// 使用默认选项和内置操作符创建引擎
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: EngineOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    /// 注册引擎级事实，同名事实会被替换
    pub fn add_fact(&mut self, fact: Fact) -> &mut Self {
        info!(fact = fact.id(), constant = fact.is_constant(), "注册事实");
        Arc::make_mut(&mut self.facts).insert(fact.id().to_string(), fact);
        self
    }

    /// 注册常量事实
    pub fn add_fact_value(&mut self, id: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.add_fact(Fact::constant(id, value))
    }

    /// 移除引擎级事实，返回是否存在
    pub fn remove_fact(&mut self, id: &str) -> bool {
        let removed = Arc::make_mut(&mut self.facts).remove(id).is_some();
        if removed {
            info!(fact = id, "移除事实");
        }
        removed
    }

    pub fn fact(&self, id: &str) -> Option<&Fact> {
        self.facts.get(id)
    }

    /// 注册自定义操作符，同名的内置操作符会被替换
    pub fn add_operator(&mut self, operator: Operator) -> &mut Self {
        info!(operator = operator.name(), "注册操作符");
        self.operators.add(operator);
        self
    }

    pub fn remove_operator(&mut self, name: &str) -> bool {
        let removed = self.operators.remove(name);
        if removed {
            info!(operator = name, "移除操作符");
        }
        removed
    }

    pub fn operators(&self) -> &OperatorRegistry {
        &self.operators
    }

    /// 注册共享条件，规则中以 `{ "condition": name }` 引用
    pub fn set_condition(&mut self, name: impl Into<String>, conditions: Combinator) -> &mut Self {
        let name = name.into();
        info!(condition = %name, "注册共享条件");
        self.conditions.insert(name, conditions);
        self
    }

    pub fn remove_condition(&mut self, name: &str) -> bool {
        let removed = self.conditions.remove(name).is_some();
        if removed {
            info!(condition = name, "移除共享条件");
        }
        removed
    }

    /// 评估一条规则
    ///
    /// `facts` 中的运行时事实只在本次评估内生效，并遮蔽同名的引擎级事实。
    /// 返回的 [`RuleResult`] 是规则的独立拷贝，条件树上带有本次评估的注解；
    /// 评估失败时不返回部分结果，错误被包装为携带规则名的
    /// [`RuleError::Evaluation`](crate::RuleError::Evaluation)。
    #[instrument(skip_all, fields(rule = rule.name.as_deref().unwrap_or("<unnamed>")))]
    pub async fn evaluate(&self, rule: &Rule, facts: RuntimeFacts) -> Result<RuleResult> {
        let start = Instant::now();

        let almanac = Almanac::new(
            Arc::clone(&self.facts),
            facts,
            self.options.allow_undefined_facts,
        );
        let executor = RuleExecutor::new(&self.operators, &self.conditions)
            .with_concurrent_siblings(self.options.concurrent_siblings)
            .with_undefined_conditions(self.options.allow_undefined_conditions);

        let mut result = RuleResult::new(rule);
        let outcome = executor.execute(result.conditions_mut(), &almanac).await;
        let elapsed = start.elapsed().as_secs_f64();

        match outcome {
            Ok(matched) => {
                result.set_result(matched);
                record_rule_evaluation(if matched { "matched" } else { "unmatched" }, elapsed);
                Ok(result)
            }
            Err(e) => {
                let e = e.in_rule(rule.name.as_deref());
                warn!(code = e.code(), error = %e, "规则评估失败");
                record_rule_evaluation("error", elapsed);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BoxError, RuleError};
    use crate::models::ConditionReference;
    use serde_json::json;

    fn adult_rule() -> Rule {
        Rule::from_json(
            r#"{
                "name": "adult",
                "conditions": { "any": [{ "fact": "age", "operator": "greaterThanInclusive", "value": 21 }] },
                "event": { "type": "adult" }
            }"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_evaluate_with_engine_fact() {
        let mut engine = Engine::new();
        engine.add_fact_value("age", 30);

        let result = engine.evaluate(&adult_rule(), RuntimeFacts::new()).await.unwrap();
        assert_eq!(result.result(), Some(true));
        assert_eq!(result.conditions().result, Some(true));
        assert_eq!(result.name(), Some("adult"));
    }

    #[tokio::test]
    async fn test_runtime_fact_shadows_engine_fact() {
        let mut engine = Engine::new();
        engine.add_fact_value("age", 30);
        let rule = adult_rule();

        let young = RuntimeFacts::new().with_value("age", 12);
        assert_eq!(engine.evaluate(&rule, young).await.unwrap().result(), Some(false));

        // 覆盖只对单次评估生效
        let result = engine.evaluate(&rule, RuntimeFacts::new()).await.unwrap();
        assert_eq!(result.result(), Some(true));
    }

    #[tokio::test]
    async fn test_undefined_fact_is_enriched() {
        let engine = Engine::new();
        let err = engine
            .evaluate(&adult_rule(), RuntimeFacts::new())
            .await
            .unwrap_err();

        assert_eq!(err.rule_name(), Some("adult"));
        assert_eq!(err.fact_name(), Some("age"));
        assert_eq!(err.code(), "UNDEFINED_FACT");
        assert!(err.to_string().contains("adult"));
    }

    #[tokio::test]
    async fn test_allow_undefined_facts() {
        let engine = Engine::with_options(EngineOptions {
            allow_undefined_facts: true,
            ..Default::default()
        });

        let result = engine.evaluate(&adult_rule(), RuntimeFacts::new()).await.unwrap();
        assert_eq!(result.result(), Some(false));
    }

    #[tokio::test]
    async fn test_custom_operator_error_is_enriched() {
        let mut engine = Engine::new();
        engine.add_fact_value("age", 30).add_operator(Operator::new(
            "explode",
            |_, _| -> std::result::Result<bool, BoxError> { Err("boom".into()) },
        ));

        let rule = Rule::new(Combinator::all(vec![
            crate::models::LeafCondition::new("age", "explode", 1).into(),
        ]));
        let err = engine.evaluate(&rule, RuntimeFacts::new()).await.unwrap_err();

        assert_eq!(err.rule_name(), None);
        assert_eq!(err.operator_name(), Some("explode"));
        assert!(err.to_string().contains("<unnamed>"));
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_remove_registrations() {
        let mut engine = Engine::new();
        engine.add_fact_value("age", 30);
        assert!(engine.fact("age").is_some());
        assert!(engine.remove_fact("age"));
        assert!(!engine.remove_fact("age"));

        assert!(engine.remove_operator("equal"));
        assert!(!engine.operators().contains("equal"));

        engine.set_condition("adult", adult_rule().conditions);
        assert!(engine.remove_condition("adult"));
        assert!(!engine.remove_condition("adult"));
    }

    #[tokio::test]
    async fn test_shared_condition() {
        let mut engine = Engine::new();
        engine
            .add_fact_value("age", 30)
            .set_condition("isAdult", adult_rule().conditions);

        let rule = Rule::new(Combinator::all(vec![
            ConditionReference::new("isAdult").into(),
        ]));
        let result = engine.evaluate(&rule, RuntimeFacts::new()).await.unwrap();
        assert_eq!(result.result(), Some(true));

        let json = result.to_json();
        assert_eq!(json["conditions"]["all"][0]["name"], json!("isAdult"));
        assert_eq!(json["conditions"]["all"][0]["any"][0]["factResult"], json!(30));

        // 原规则中仍是引用
        assert!(matches!(
            rule.conditions.operands[0],
            crate::models::Condition::Reference(_)
        ));
    }

    #[tokio::test]
    async fn test_undefined_condition_error() {
        let engine = Engine::new();
        let rule = Rule::new(Combinator::all(vec![
            ConditionReference::new("missing").into(),
        ]))
        .with_name("refers");

        let err = engine.evaluate(&rule, RuntimeFacts::new()).await.unwrap_err();
        assert_eq!(err.code(), "UNDEFINED_CONDITION");
        let RuleError::Evaluation { source, .. } = &err else {
            panic!("expected evaluation error, got {:?}", err);
        };
        assert!(matches!(**source, RuleError::UndefinedCondition { .. }));
    }

    #[test]
    fn test_options_from_config() {
        let config = EngineConfig {
            allow_undefined_facts: true,
            allow_undefined_conditions: false,
            concurrent_siblings: true,
        };
        let options = EngineOptions::from(&config);
        assert!(options.allow_undefined_facts);
        assert!(!options.allow_undefined_conditions);
        assert!(options.concurrent_siblings);
    }
}
