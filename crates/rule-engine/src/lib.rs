//! 规则引擎
//!
//! 基于事实的 JSON 规则评估：
//! - 条件树（`all` / `any` / `not`、共享条件引用）的解析与短路求值
//! - 事实解析与单次评估内的缓存，运行时事实遮蔽引擎级事实
//! - 评估结果快照，条件树上带有每个节点的评估注解
//! - 评估错误附带规则、事实或操作符名称

mod almanac;
mod comparators;
mod engine;
pub mod error;
mod executor;
pub mod facts;
pub mod models;
pub mod operators;
mod result;

pub use almanac::{Almanac, select_path};
pub use engine::{Engine, EngineOptions};
pub use error::{BoxError, Result, RuleError};
pub use facts::{Fact, FactOptions, FactResolver, FactSource, RuntimeFacts};
pub use models::{
    BooleanOperator, Combinator, Condition, ConditionReference, FactReference, LeafCondition, Rule,
};
pub use operators::{Operator, OperatorRegistry};
pub use result::RuleResult;
