//! 内置比较函数
//!
//! 默认操作符表（见 [`OperatorRegistry::default`](crate::OperatorRegistry)）的实现，
//! 支持数值、字符串、数组和时间的比较。

use crate::error::{Result, RuleError};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// 已编译正则的上限，超出后整体清空
const REGEX_CACHE_CAPACITY: usize = 256;

static REGEX_CACHE: OnceLock<DashMap<String, Regex>> = OnceLock::new();

/// 按 pattern 缓存编译结果，无效的 pattern 不入缓存
fn compiled_regex(pattern: &str) -> Result<Regex> {
    let cache = REGEX_CACHE.get_or_init(DashMap::new);
    if let Some(regex) = cache.get(pattern) {
        return Ok(regex.clone());
    }

    let regex = Regex::new(pattern)
        .map_err(|e| RuleError::ParseError(format!("无效的正则表达式 '{}': {}", pattern, e)))?;

    // 简单的容量控制，生产环境可换成 LRU
    if cache.len() >= REGEX_CACHE_CAPACITY {
        cache.clear();
    }
    cache.insert(pattern.to_string(), regex.clone());
    Ok(regex)
}

pub(crate) struct Comparators;

impl Comparators {
    /// 判断值是否为空
    pub fn is_empty(value: Option<&Value>) -> bool {
        match value {
            None => true,
            Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(Value::Array(arr)) => arr.is_empty(),
            Some(Value::Object(obj)) => obj.is_empty(),
            _ => false,
        }
    }

    /// 相等比较
    pub fn eq(field: &Value, expected: &Value) -> bool {
        // 数值统一转为浮点数比较，避免 100 == 100.0 比较失败
        if let (Value::Number(a), Value::Number(b)) = (field, expected) {
            if let (Some(f1), Some(f2)) = (a.as_f64(), b.as_f64()) {
                return (f1 - f2).abs() < f64::EPSILON;
            }
        }

        field == expected
    }

    /// 数值比较，调用方保证 field 为数值
    pub fn compare<F>(field: &Value, expected: &Value, cmp: F) -> Result<bool>
    where
        F: Fn(f64, f64) -> bool,
    {
        let field_num = Self::number(field)?;
        let expected_num = Self::number(expected)?;

        Ok(cmp(field_num, expected_num))
    }

    /// 范围比较，expected 应为 [min, max] 数组
    pub fn between(field: &Value, expected: &Value) -> Result<bool> {
        let arr = expected.as_array().ok_or_else(|| RuleError::TypeMismatch {
            expected: "array [min, max]".to_string(),
            actual: Self::type_name(expected).to_string(),
        })?;

        if arr.len() != 2 {
            return Err(RuleError::TypeMismatch {
                expected: "array [min, max]".to_string(),
                actual: format!("array of {}", arr.len()),
            });
        }

        let field_num = Self::number(field)?;
        let min = Self::number(&arr[0])?;
        let max = Self::number(&arr[1])?;

        Ok(field_num >= min && field_num <= max)
    }

    /// 列表包含检查 (in)
    pub fn in_list(field: &Value, expected: &Value) -> Result<bool> {
        let arr = Self::array(expected)?;
        Ok(arr.iter().any(|item| Self::eq(field, item)))
    }

    /// 数组包含元素，调用方保证 field 为数组
    pub fn contains(field: &Value, expected: &Value) -> bool {
        match field {
            Value::Array(arr) => arr.iter().any(|item| Self::eq(item, expected)),
            Value::String(s) => expected.as_str().is_some_and(|sub| s.contains(sub)),
            _ => false,
        }
    }

    /// 数组包含任意一个 (containsAny)
    pub fn contains_any(field: &Value, expected: &Value) -> Result<bool> {
        let field_arr = Self::array(field)?;
        let expected_arr = Self::array(expected)?;

        Ok(expected_arr
            .iter()
            .any(|e| field_arr.iter().any(|f| Self::eq(f, e))))
    }

    /// 数组包含全部 (containsAll)
    pub fn contains_all(field: &Value, expected: &Value) -> Result<bool> {
        let field_arr = Self::array(field)?;
        let expected_arr = Self::array(expected)?;

        Ok(expected_arr
            .iter()
            .all(|e| field_arr.iter().any(|f| Self::eq(f, e))))
    }

    /// 字符串前缀检查
    pub fn starts_with(field: &Value, expected: &Value) -> Result<bool> {
        Ok(Self::string(field)?.starts_with(Self::string(expected)?))
    }

    /// 字符串后缀检查
    pub fn ends_with(field: &Value, expected: &Value) -> Result<bool> {
        Ok(Self::string(field)?.ends_with(Self::string(expected)?))
    }

    /// 正则表达式匹配
    pub fn regex_match(field: &Value, expected: &Value) -> Result<bool> {
        let s = Self::string(field)?;
        let pattern = expected.as_str().ok_or_else(|| RuleError::TypeMismatch {
            expected: "string (regex pattern)".to_string(),
            actual: Self::type_name(expected).to_string(),
        })?;

        Ok(compiled_regex(pattern)?.is_match(s))
    }

    /// 时间比较
    pub fn time_compare<F>(field: &Value, expected: &Value, cmp: F) -> Result<bool>
    where
        F: Fn(DateTime<Utc>, DateTime<Utc>) -> bool,
    {
        let field_time = Self::parse_datetime(field)?;
        let expected_time = Self::parse_datetime(expected)?;

        Ok(cmp(field_time, expected_time))
    }

    /// 解析日期时间，支持 RFC 3339 和纯日期
    fn parse_datetime(value: &Value) -> Result<DateTime<Utc>> {
        let s = Self::string(value)?;

        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(dt.with_timezone(&Utc));
        }

        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Ok(date.and_time(NaiveTime::default()).and_utc());
        }

        Err(RuleError::ParseError(format!("无法解析日期时间: '{}'", s)))
    }

    pub fn is_number(value: &Value) -> bool {
        value.is_number()
    }

    fn number(value: &Value) -> Result<f64> {
        value.as_f64().ok_or_else(|| RuleError::TypeMismatch {
            expected: "number".to_string(),
            actual: Self::type_name(value).to_string(),
        })
    }

    fn string(value: &Value) -> Result<&str> {
        value.as_str().ok_or_else(|| RuleError::TypeMismatch {
            expected: "string".to_string(),
            actual: Self::type_name(value).to_string(),
        })
    }

    fn array(value: &Value) -> Result<&Vec<Value>> {
        value.as_array().ok_or_else(|| RuleError::TypeMismatch {
            expected: "array".to_string(),
            actual: Self::type_name(value).to_string(),
        })
    }

    /// 获取值的类型名称
    pub fn type_name(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}
