//! 规则操作符定义
//!
//! 操作符按名称注册在 [`OperatorRegistry`] 中，评估时按叶子条件的 `operator`
//! 字段查找，找不到时报 [`RuleError::UnknownOperator`]。

use crate::comparators::Comparators;
use crate::error::{BoxError, Result, RuleError};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type OperatorFn =
    dyn Fn(Option<&Value>, Option<&Value>) -> std::result::Result<bool, BoxError> + Send + Sync;
type FactValueValidator = dyn Fn(&Value) -> bool + Send + Sync;

/// 条件操作符
///
/// 回调的两个参数分别是事实值和比较值。引用了未定义事实（宽松模式）的一侧为 `None`，
/// 与值为 `null` 的事实不同。
#[derive(Clone)]
pub struct Operator {
    name: String,
    callback: Arc<OperatorFn>,
    fact_value_validator: Option<Arc<FactValueValidator>>,
}

impl Operator {
    pub fn new<F>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(Option<&Value>, Option<&Value>) -> std::result::Result<bool, BoxError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            callback: Arc::new(callback),
            fact_value_validator: None,
        }
    }

    /// 设置事实值校验：事实缺失或校验不通过时直接返回 false，不调用回调
    pub fn with_fact_validator<V>(mut self, validator: V) -> Self
    where
        V: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.fact_value_validator = Some(Arc::new(validator));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 对 `(事实值, 比较值)` 应用操作符
    pub fn evaluate(&self, fact_value: Option<&Value>, value: Option<&Value>) -> Result<bool> {
        if let Some(validator) = &self.fact_value_validator {
            match fact_value {
                Some(v) if validator(v) => {}
                _ => return Ok(false),
            }
        }

        (self.callback)(fact_value, value).map_err(|source| RuleError::OperatorExecution {
            operator: self.name.clone(),
            source,
        })
    }
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operator")
            .field("name", &self.name)
            .field("validated", &self.fact_value_validator.is_some())
            .finish()
    }
}

/// 操作符注册表
#[derive(Debug, Clone)]
pub struct OperatorRegistry {
    operators: HashMap<String, Operator>,
}

impl OperatorRegistry {
    /// 创建空注册表
    pub fn empty() -> Self {
        Self {
            operators: HashMap::new(),
        }
    }

    /// 注册操作符，同名操作符会被替换
    pub fn add(&mut self, operator: Operator) {
        self.operators.insert(operator.name.clone(), operator);
    }

    /// 移除操作符，返回是否存在
    pub fn remove(&mut self, name: &str) -> bool {
        self.operators.remove(name).is_some()
    }

    /// 按名称查找操作符
    pub fn get(&self, name: &str) -> Result<&Operator> {
        self.operators
            .get(name)
            .ok_or_else(|| RuleError::UnknownOperator {
                operator: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// 已注册的操作符名称
    pub fn names(&self) -> Vec<&str> {
        self.operators.keys().map(String::as_str).collect()
    }

    /// 注册一个不会失败的操作符
    fn add_infallible<F>(&mut self, name: &str, f: F) -> &mut Operator
    where
        F: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    {
        self.add_fallible(name, move |fact, value| Ok(f(fact, value)))
    }

    /// 注册可能因比较值类型错误而失败的操作符，事实或比较值缺失时返回 false
    fn add_fallible<F>(&mut self, name: &str, f: F) -> &mut Operator
    where
        F: Fn(&Value, &Value) -> Result<bool> + Send + Sync + 'static,
    {
        let operator = Operator::new(name, move |fact, value| match (fact, value) {
            (Some(fact), Some(value)) => f(fact, value).map_err(BoxError::from),
            _ => Ok(false),
        });
        self.operators
            .entry(name.to_string())
            .insert_entry(operator)
            .into_mut()
    }
}

impl Default for OperatorRegistry {
    /// 内置操作符表
    fn default() -> Self {
        let mut registry = Self::empty();

        // 通用比较
        registry.add_infallible("equal", Comparators::eq);
        registry.add_infallible("notEqual", |a, b| !Comparators::eq(a, b));

        // 列表包含
        registry.add_fallible("in", Comparators::in_list);
        registry.add_fallible("notIn", |a, b| Comparators::in_list(a, b).map(|r| !r));

        // 数组包含
        registry.add_infallible("contains", Comparators::contains);
        registry.add_infallible("doesNotContain", |a, b| !Comparators::contains(a, b));
        registry.add_fallible("containsAny", Comparators::contains_any);
        registry.add_fallible("containsAll", Comparators::contains_all);

        // 数值比较：事实值必须为数值，否则不匹配
        let numeric: [(&str, fn(f64, f64) -> bool); 4] = [
            ("lessThan", |a, b| a < b),
            ("lessThanInclusive", |a, b| a <= b),
            ("greaterThan", |a, b| a > b),
            ("greaterThanInclusive", |a, b| a >= b),
        ];
        for (name, cmp) in numeric {
            let operator = registry.add_fallible(name, move |a, b| Comparators::compare(a, b, cmp));
            operator.fact_value_validator = Some(Arc::new(Comparators::is_number));
        }
        registry
            .add_fallible("between", Comparators::between)
            .fact_value_validator = Some(Arc::new(Comparators::is_number));

        // 字符串操作
        registry.add_fallible("startsWith", Comparators::starts_with);
        registry.add_fallible("endsWith", Comparators::ends_with);
        registry.add_fallible("matches", Comparators::regex_match);

        // 时间操作
        registry.add_fallible("before", |a, b| Comparators::time_compare(a, b, |x, y| x < y));
        registry.add_fallible("after", |a, b| Comparators::time_compare(a, b, |x, y| x > y));

        // 空值检查：语义上需要看到缺失的事实
        registry.add(Operator::new("isEmpty", |fact, _| Ok(Comparators::is_empty(fact))));
        registry.add(Operator::new("isNotEmpty", |fact, _| {
            Ok(!Comparators::is_empty(fact))
        }));

        registry
    }
}
