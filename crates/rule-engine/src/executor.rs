//! 规则执行器
//!
//! 递归评估条件树，在原树上写入注解（`result`、`factResult`），并实现短路求值：
//! - `all` 遇到 false 立即结束，`any` 遇到 true 立即结束，未开始的操作数保持未注解状态
//! - 操作数按优先级分层（高优先级先评估），短路判断发生在层与层之间
//! - 开启并发后，同一层的操作数同时开始评估，事实解析交错进行

use crate::almanac::Almanac;
use crate::error::{Result, RuleError};
use crate::models::{BooleanOperator, Combinator, Condition, LeafCondition};
use crate::operators::OperatorRegistry;
use futures::future::{try_join_all, BoxFuture, FutureExt};
use serde_json::Map;
use std::collections::HashMap;
use tracing::debug;

const DEFAULT_PRIORITY: u32 = 1;

/// 规则执行器
pub(crate) struct RuleExecutor<'e> {
    operators: &'e OperatorRegistry,
    shared_conditions: &'e HashMap<String, Combinator>,
    /// 同一优先级层内的操作数是否并发评估
    concurrent_siblings: bool,
    /// 引用未注册的共享条件时按 false 处理而不是报错
    allow_undefined_conditions: bool,
}

impl<'e> RuleExecutor<'e> {
    pub fn new(
        operators: &'e OperatorRegistry,
        shared_conditions: &'e HashMap<String, Combinator>,
    ) -> Self {
        Self {
            operators,
            shared_conditions,
            concurrent_siblings: false,
            allow_undefined_conditions: false,
        }
    }

    pub fn with_concurrent_siblings(mut self, enabled: bool) -> Self {
        self.concurrent_siblings = enabled;
        self
    }

    pub fn with_undefined_conditions(mut self, allowed: bool) -> Self {
        self.allow_undefined_conditions = allowed;
        self
    }

    /// 评估根节点，结果同时写入 `conditions`
    pub async fn execute(&self, conditions: &mut Combinator, almanac: &Almanac) -> Result<bool> {
        self.evaluate_combinator(conditions, almanac, "root", &[]).await
    }

    /// 递归评估条件节点
    fn evaluate_node<'a>(
        &'a self,
        node: &'a mut Condition,
        almanac: &'a Almanac,
        path: String,
        references: &'a [String],
    ) -> BoxFuture<'a, Result<bool>> {
        async move {
            match node {
                Condition::Leaf(leaf) => self.evaluate_leaf(leaf, almanac, &path).await,
                Condition::Combinator(group) => {
                    self.evaluate_combinator(group, almanac, &path, references)
                        .await
                }
                Condition::Reference(reference) => {
                    let name = reference.condition.clone();

                    let Some(shared) = self.shared_conditions.get(&name) else {
                        if self.allow_undefined_conditions {
                            debug!(path = %path, condition = %name, "共享条件未定义，按 false 处理");
                            reference.result = Some(false);
                            return Ok(false);
                        }
                        return Err(RuleError::UndefinedCondition { condition: name });
                    };

                    if references.contains(&name) {
                        let mut chain = references.to_vec();
                        chain.push(name);
                        return Err(RuleError::ParseError(format!(
                            "共享条件存在循环引用: {}",
                            chain.join(" -> ")
                        )));
                    }

                    let mut chain = references.to_vec();
                    chain.push(name.clone());

                    let mut realized = shared.clone();
                    if realized.name.is_none() {
                        realized.name = Some(name);
                    }
                    let matched = self
                        .evaluate_combinator(&mut realized, almanac, &path, &chain)
                        .await?;

                    // 注解树中用展开后的条件替换引用
                    *node = Condition::Combinator(realized);
                    Ok(matched)
                }
            }
        }
        .boxed()
    }

    /// 评估叶子条件
    async fn evaluate_leaf(
        &self,
        leaf: &mut LeafCondition,
        almanac: &Almanac,
        path: &str,
    ) -> Result<bool> {
        let no_params = Map::new();
        let params = leaf.params.as_ref().unwrap_or(&no_params);
        let fact_value = almanac
            .fact_value_at(&leaf.fact, params, leaf.path.as_deref())
            .await?;

        let operator = self.operators.get(&leaf.operator)?;

        let value_result = match leaf.value_reference() {
            Some(reference) => Some(
                almanac
                    .fact_value_at(&reference.fact, &reference.params, reference.path.as_deref())
                    .await?,
            ),
            None => None,
        };
        // 引用了未定义事实时比较值缺失，不等同于 null
        let compare_to = match &value_result {
            Some(resolved) => resolved.as_ref(),
            None => Some(&leaf.value),
        };

        let matched = operator.evaluate(fact_value.as_ref(), compare_to)?;

        debug!(
            path = path,
            fact = %leaf.fact,
            operator = %leaf.operator,
            fact_value = ?fact_value,
            value = ?compare_to,
            matched,
            "条件评估完成"
        );

        leaf.fact_result = fact_value;
        leaf.value_result = value_result.flatten();
        leaf.result = Some(matched);
        Ok(matched)
    }

    /// 评估组合节点（短路求值）
    async fn evaluate_combinator(
        &self,
        group: &mut Combinator,
        almanac: &Almanac,
        path: &str,
        references: &[String],
    ) -> Result<bool> {
        let operator = group.operator;
        // all 遇到 false、any 遇到 true 即可确定结果
        let decisive = operator == BooleanOperator::Any;
        let mut outcome = !decisive;

        debug!(
            path = path,
            operator = %operator,
            operands = group.operands.len(),
            "开始评估组合条件"
        );

        for tier in self.priority_tiers(&group.operands, almanac) {
            let decided = if self.concurrent_siblings && tier.len() > 1 {
                let pending = group
                    .operands
                    .iter_mut()
                    .enumerate()
                    .filter(|(i, _)| tier.contains(i))
                    .map(|(i, child)| {
                        let child_path = format!("{}.{}[{}]", path, operator, i);
                        self.evaluate_node(child, almanac, child_path, references)
                    });
                try_join_all(pending).await?.contains(&decisive)
            } else {
                let mut decided = false;
                for i in tier {
                    let child_path = format!("{}.{}[{}]", path, operator, i);
                    let child = &mut group.operands[i];
                    if self.evaluate_node(child, almanac, child_path, references).await? == decisive {
                        decided = true;
                        break;
                    }
                }
                decided
            };

            if decided {
                debug!(path = path, operator = %operator, "短路：剩余操作数不再评估");
                outcome = decisive;
                break;
            }
        }

        let result = outcome != group.negated;
        group.result = Some(result);
        Ok(result)
    }

    /// 按优先级从高到低分层，同层内保持原有顺序
    fn priority_tiers(&self, operands: &[Condition], almanac: &Almanac) -> Vec<Vec<usize>> {
        let mut ranked: Vec<(usize, u32)> = operands
            .iter()
            .enumerate()
            .map(|(i, c)| (i, Self::effective_priority(c, almanac)))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        let mut tiers: Vec<Vec<usize>> = Vec::new();
        let mut current: Option<u32> = None;
        for (i, priority) in ranked {
            if self.concurrent_siblings && current == Some(priority) {
                if let Some(last) = tiers.last_mut() {
                    last.push(i);
                    continue;
                }
            }
            tiers.push(vec![i]);
            current = Some(priority);
        }
        tiers
    }

    /// 节点声明的优先级，叶子条件未声明时继承事实的优先级
    fn effective_priority(condition: &Condition, almanac: &Almanac) -> u32 {
        if let Some(priority) = condition.priority() {
            return priority;
        }
        match condition {
            Condition::Leaf(leaf) => almanac
                .fact(&leaf.fact)
                .map(|f| f.options().priority)
                .unwrap_or(DEFAULT_PRIORITY),
            _ => DEFAULT_PRIORITY,
        }
    }
}
