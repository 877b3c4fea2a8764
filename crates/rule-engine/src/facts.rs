//! 事实定义
//!
//! 事实可以是常量，也可以是带参数的解析器（同步或异步）。引擎级事实通过
//! [`Engine::add_fact`](crate::Engine::add_fact) 注册；单次评估的运行时事实通过
//! [`RuntimeFacts`] 传入，并在该次评估内遮蔽同名的引擎级事实。

use crate::almanac::Almanac;
use crate::error::BoxError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// 事实解析器
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FactResolver: Send + Sync {
    /// 根据参数计算事实值，可通过 `almanac` 获取其他事实
    async fn resolve(
        &self,
        params: &Map<String, Value>,
        almanac: &Almanac,
    ) -> Result<Value, BoxError>;
}

/// 同步闭包解析器
struct SyncFn<F>(F);

#[async_trait]
impl<F> FactResolver for SyncFn<F>
where
    F: Fn(&Map<String, Value>, &Almanac) -> Result<Value, BoxError> + Send + Sync + 'static,
{
    async fn resolve(
        &self,
        params: &Map<String, Value>,
        almanac: &Almanac,
    ) -> Result<Value, BoxError> {
        (self.0)(params, almanac)
    }
}

/// 异步闭包解析器，闭包拿到参数和 almanac 的拷贝
struct AsyncFn<F>(F);

#[async_trait]
impl<F, Fut> FactResolver for AsyncFn<F>
where
    F: Fn(Map<String, Value>, Almanac) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
{
    async fn resolve(
        &self,
        params: &Map<String, Value>,
        almanac: &Almanac,
    ) -> Result<Value, BoxError> {
        (self.0)(params.clone(), almanac.clone()).await
    }
}

/// 事实值来源
#[derive(Clone)]
pub enum FactSource {
    Constant(Value),
    Dynamic(Arc<dyn FactResolver>),
}

/// 事实选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactOptions {
    /// 同一次评估内是否缓存解析结果
    pub cache: bool,
    /// 引用该事实的条件默认继承此优先级
    pub priority: u32,
}

impl Default for FactOptions {
    fn default() -> Self {
        Self {
            cache: true,
            priority: 1,
        }
    }
}

/// 事实
#[derive(Clone)]
pub struct Fact {
    id: String,
    source: FactSource,
    options: FactOptions,
}

impl Fact {
    /// 常量事实
    pub fn constant(id: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            source: FactSource::Constant(value.into()),
            options: FactOptions::default(),
        }
    }

    /// 基于解析器的事实
    pub fn dynamic(id: impl Into<String>, resolver: Arc<dyn FactResolver>) -> Self {
        Self {
            id: id.into(),
            source: FactSource::Dynamic(resolver),
            options: FactOptions::default(),
        }
    }

    /// 由同步闭包计算的事实
    pub fn from_fn<F>(id: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Map<String, Value>, &Almanac) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        Self::dynamic(id, Arc::new(SyncFn(f)))
    }

    /// 由异步闭包计算的事实
    pub fn from_async<F, Fut>(id: impl Into<String>, f: F) -> Self
    where
        F: Fn(Map<String, Value>, Almanac) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        Self::dynamic(id, Arc::new(AsyncFn(f)))
    }

    pub fn with_options(mut self, options: FactOptions) -> Self {
        self.options = FactOptions {
            priority: options.priority.max(1),
            ..options
        };
        self
    }

    /// 关闭缓存，每次请求都会调用解析器
    pub fn uncached(mut self) -> Self {
        self.options.cache = false;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.options.priority = priority.max(1);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &FactSource {
        &self.source
    }

    pub fn options(&self) -> FactOptions {
        self.options
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.source, FactSource::Constant(_))
    }
}

impl fmt::Debug for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Fact");
        s.field("id", &self.id);
        match &self.source {
            FactSource::Constant(v) => s.field("value", v),
            FactSource::Dynamic(_) => s.field("value", &"<resolver>"),
        };
        s.field("options", &self.options).finish()
    }
}

/// 单次评估的运行时事实
#[derive(Debug, Clone, Default)]
pub struct RuntimeFacts {
    facts: HashMap<String, Fact>,
}

impl RuntimeFacts {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 JSON 对象构造常量事实，非对象值视为没有事实
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => Self::default(),
        }
    }

    pub fn insert(&mut self, fact: Fact) {
        self.facts.insert(fact.id.clone(), fact);
    }

    /// 链式添加事实
    pub fn with(mut self, fact: Fact) -> Self {
        self.insert(fact);
        self
    }

    /// 链式添加常量事实
    pub fn with_value(self, id: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(Fact::constant(id, value))
    }

    pub fn get(&self, id: &str) -> Option<&Fact> {
        self.facts.get(id)
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for RuntimeFacts
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut facts = Self::default();
        for (id, value) in iter {
            facts.insert(Fact::constant(id, value));
        }
        facts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fact_options() {
        let fact = Fact::constant("age", 30);
        assert!(fact.is_constant());
        assert_eq!(fact.options(), FactOptions::default());

        let fact = Fact::from_fn("age", |_, _| Ok(json!(30)))
            .uncached()
            .with_priority(0);
        assert!(!fact.is_constant());
        assert!(!fact.options().cache);
        assert_eq!(fact.options().priority, 1);
    }

    #[test]
    fn test_runtime_facts_from_json() {
        let facts = RuntimeFacts::from_json(json!({ "age": 85, "name": "alice" }));
        assert_eq!(facts.len(), 2);
        assert!(facts.get("age").unwrap().is_constant());

        assert!(RuntimeFacts::from_json(json!([1, 2])).is_empty());
    }

    #[test]
    fn test_runtime_facts_builder() {
        let facts = RuntimeFacts::new()
            .with_value("age", 85)
            .with(Fact::from_fn("age", |_, _| Ok(json!(2))));

        // 同名事实后加入的生效
        assert_eq!(facts.len(), 1);
        assert!(!facts.get("age").unwrap().is_constant());
    }

    #[test]
    fn test_runtime_facts_from_iter() {
        let facts: RuntimeFacts = [("age", 50), ("height", 180)].into_iter().collect();
        assert_eq!(facts.len(), 2);
    }

    #[test]
    fn test_fact_debug_hides_resolver() {
        let fact = Fact::from_async("remote", |_, _| async { Ok::<_, BoxError>(json!(1)) });
        assert!(format!("{:?}", fact).contains("<resolver>"));
    }
}
