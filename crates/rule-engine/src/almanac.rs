//! 事实解析上下文
//!
//! 每次规则评估都会创建一个新的 [`Almanac`]：运行时事实优先于引擎级事实，
//! 解析结果按 `(事实名, 规范化参数)` 缓存，同一个键的并发请求只会触发一次解析器调用。
//! 解析失败同样会被缓存，等待同一个键的请求拿到的是同一个错误。
//! 评估结束后 Almanac 随之丢弃，缓存不会在评估之间共享。

use crate::error::{BoxError, Result, RuleError};
use crate::facts::{Fact, FactResolver, FactSource, RuntimeFacts};
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, trace};

/// 缓存键：事实名 + 规范化后的参数
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    fact: String,
    params: String,
}

impl CacheKey {
    fn new(fact: &str, params: &Map<String, Value>) -> Self {
        let mut normalized = String::new();
        write_normalized(&mut normalized, params);
        Self {
            fact: fact.to_string(),
            params: normalized,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.params == "{}" {
            write!(f, "{}", self.fact)
        } else {
            write!(f, "{}{}", self.fact, self.params)
        }
    }
}

/// 缓存中的解析错误，所有等待者共享同一份
#[derive(Debug, Clone)]
struct SharedError(Arc<BoxError>);

impl fmt::Display for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Error for SharedError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.0.source()
    }
}

type Resolution = std::result::Result<Value, SharedError>;

/// 按键排序输出对象，保证参数顺序不同的请求命中同一缓存
fn write_normalized(out: &mut String, params: &Map<String, Value>) {
    let mut keys: Vec<&String> = params.keys().collect();
    keys.sort();

    out.push('{');
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        match &params[key] {
            Value::Object(nested) => write_normalized(out, nested),
            other => out.push_str(&other.to_string()),
        }
    }
    out.push('}');
}

/// 按路径选取值
///
/// 支持点号分隔的路径（如 `profile.age` 或 `items.0.name`），可带 `$.` 前缀。
pub fn select_path(value: &Value, path: &str) -> Option<Value> {
    let path = path.strip_prefix('$').unwrap_or(path);
    let path = path.strip_prefix('.').unwrap_or(path);
    if path.is_empty() {
        return Some(value.clone());
    }

    let mut current = value;
    for part in path.split('.') {
        match current {
            Value::Object(map) => {
                current = map.get(part)?;
            }
            Value::Array(arr) => {
                let index: usize = part.parse().ok()?;
                current = arr.get(index)?;
            }
            _ => return None,
        }
    }

    Some(current.clone())
}

struct AlmanacInner {
    engine_facts: Arc<HashMap<String, Fact>>,
    runtime_facts: RuntimeFacts,
    cache: DashMap<CacheKey, Arc<OnceCell<Resolution>>>,
    allow_undefined_facts: bool,
}

/// 单次评估的事实解析上下文
///
/// 克隆开销很小（共享同一份内部状态），解析器可以持有它去获取其他事实。
#[derive(Clone)]
pub struct Almanac {
    inner: Arc<AlmanacInner>,
    /// 当前解析链上正在解析的键，用于发现循环依赖
    resolving: Vec<CacheKey>,
}

impl Almanac {
    pub(crate) fn new(
        engine_facts: Arc<HashMap<String, Fact>>,
        runtime_facts: RuntimeFacts,
        allow_undefined_facts: bool,
    ) -> Self {
        Self {
            inner: Arc::new(AlmanacInner {
                engine_facts,
                runtime_facts,
                cache: DashMap::new(),
                allow_undefined_facts,
            }),
            resolving: Vec::new(),
        }
    }

    /// 查找事实定义，运行时事实优先
    pub fn fact(&self, fact_id: &str) -> Option<&Fact> {
        self.inner
            .runtime_facts
            .get(fact_id)
            .or_else(|| self.inner.engine_facts.get(fact_id))
    }

    /// 解析事实值
    ///
    /// 事实未定义时报 [`RuleError::UndefinedFact`]；宽松模式下返回 `Ok(None)`。
    /// 解析器直接或间接请求自身时报 [`RuleError::ParseError`]。
    pub async fn fact_value(
        &self,
        fact_id: &str,
        params: &Map<String, Value>,
    ) -> Result<Option<Value>> {
        let Some(fact) = self.fact(fact_id) else {
            if self.inner.allow_undefined_facts {
                debug!(fact = fact_id, "事实未定义，按缺失值处理");
                return Ok(None);
            }
            return Err(RuleError::UndefinedFact {
                fact: fact_id.to_string(),
            });
        };

        let resolver = match fact.source() {
            FactSource::Constant(value) => return Ok(Some(value.clone())),
            FactSource::Dynamic(resolver) => resolver.as_ref(),
        };

        let key = CacheKey::new(fact_id, params);
        if self.resolving.contains(&key) {
            let chain: Vec<String> = self
                .resolving
                .iter()
                .chain(std::iter::once(&key))
                .map(CacheKey::to_string)
                .collect();
            return Err(RuleError::ParseError(format!(
                "事实存在循环依赖: {}",
                chain.join(" -> ")
            )));
        }

        if !fact.options().cache {
            return self
                .invoke(&key, resolver, params)
                .await
                .map(Some)
                .map_err(|source| Self::resolution_error(fact_id, source));
        }

        let slot = self.inner.cache.entry(key.clone()).or_default().clone();

        if slot.initialized() {
            trace!(fact = fact_id, "命中事实缓存");
        }

        match slot.get_or_init(|| self.invoke(&key, resolver, params)).await {
            Ok(value) => Ok(Some(value.clone())),
            Err(source) => Err(Self::resolution_error(fact_id, source.clone())),
        }
    }

    /// 解析事实值并按路径选取
    pub async fn fact_value_at(
        &self,
        fact_id: &str,
        params: &Map<String, Value>,
        path: Option<&str>,
    ) -> Result<Option<Value>> {
        let value = self.fact_value(fact_id, params).await?;
        Ok(match (value, path) {
            (Some(value), Some(path)) => select_path(&value, path),
            (value, _) => value,
        })
    }

    /// 调用解析器，传给解析器的 almanac 记录了当前解析链
    async fn invoke(
        &self,
        key: &CacheKey,
        resolver: &dyn FactResolver,
        params: &Map<String, Value>,
    ) -> Resolution {
        debug!(fact = %key.fact, "调用事实解析器");
        let mut nested = self.clone();
        nested.resolving.push(key.clone());
        resolver
            .resolve(params, &nested)
            .await
            .map_err(|e| SharedError(Arc::new(e)))
    }

    fn resolution_error(fact_id: &str, source: SharedError) -> RuleError {
        RuleError::FactResolution {
            fact: fact_id.to_string(),
            source: Box::new(source),
        }
    }
}
