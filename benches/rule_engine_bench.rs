//! 规则引擎性能基准测试
//!
//! 测试覆盖：
//! - 简单条件评估性能
//! - all 组合与嵌套规则在不同规模下的性能
//! - 短路求值效果
//! - 事实缓存与路径选取

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rule_engine::{
    Combinator, Condition, Engine, Fact, LeafCondition, Rule, RuntimeFacts,
};
use serde_json::{Value, json};
use std::hint::black_box;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

/// 创建简单条件规则
fn create_simple_rule() -> Rule {
    Rule::from_json(
        r#"{
            "name": "simple_rule",
            "conditions": { "all": [{ "fact": "eventType", "operator": "equal", "value": "PURCHASE" }] }
        }"#,
    )
    .unwrap()
}

/// 创建 all 组合规则
fn create_all_rule(conditions_count: usize) -> Rule {
    let conditions: Vec<Condition> = (0..conditions_count)
        .map(|i| LeafCondition::new(format!("field_{}", i), "equal", format!("value_{}", i)).into())
        .collect();

    Rule::new(Combinator::all(conditions)).with_name("all_rule")
}

/// 创建嵌套规则（all 包含多个 any 组）
fn create_nested_rule(depth: usize, breadth: usize) -> Rule {
    fn build_nested(depth: usize, breadth: usize, level: usize) -> Combinator {
        if depth == 0 {
            let leaves = (0..breadth)
                .map(|i| {
                    LeafCondition::new(format!("field_{}", (level + i) % 100), "equal", "value_0")
                        .into()
                })
                .collect();
            return Combinator::any(leaves);
        }
        let children = (0..breadth)
            .map(|i| build_nested(depth - 1, breadth, level * breadth + i).into())
            .collect();
        if depth % 2 == 0 {
            Combinator::all(children)
        } else {
            Combinator::any(children)
        }
    }

    Rule::new(build_nested(depth, breadth, 0)).with_name("nested_rule")
}

/// 创建包含字段数量的事实
fn create_large_facts(field_count: usize) -> RuntimeFacts {
    (0..field_count)
        .map(|i| (format!("field_{}", i), Value::from(format!("value_{}", i))))
        .collect()
}

/// 简单条件评估基准
fn bench_simple_condition(c: &mut Criterion) {
    let rt = runtime();
    let engine = Engine::new();
    let rule = create_simple_rule();

    c.bench_function("simple_condition_evaluation", |b| {
        b.iter(|| {
            let facts = RuntimeFacts::new().with_value("eventType", "PURCHASE");
            let result = rt.block_on(engine.evaluate(black_box(&rule), facts));
            black_box(result)
        })
    });
}

/// all 组合条件评估基准（不同条件数量）
fn bench_all_conditions(c: &mut Criterion) {
    let rt = runtime();
    let engine = Engine::new();
    let mut group = c.benchmark_group("all_conditions");

    for conditions_count in [2, 5, 10, 20, 50].iter() {
        let rule = create_all_rule(*conditions_count);

        group.throughput(Throughput::Elements(*conditions_count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(conditions_count),
            conditions_count,
            |b, count| {
                b.iter(|| {
                    let facts = create_large_facts(*count);
                    let result = rt.block_on(engine.evaluate(black_box(&rule), facts));
                    black_box(result)
                })
            },
        );
    }

    group.finish();
}

/// 嵌套规则评估基准（不同嵌套深度）
fn bench_nested_rules(c: &mut Criterion) {
    let rt = runtime();
    let mut engine = Engine::new();
    for i in 0..100 {
        engine.add_fact_value(format!("field_{}", i), format!("value_{}", i));
    }
    let mut group = c.benchmark_group("nested_rules");

    // (depth, breadth) 组合
    let configs = [(1, 2), (2, 2), (3, 2), (2, 4), (3, 3)];

    for (depth, breadth) in configs.iter() {
        let rule = create_nested_rule(*depth, *breadth);

        group.bench_with_input(
            BenchmarkId::new("depth_breadth", format!("{}x{}", depth, breadth)),
            &(depth, breadth),
            |b, _| {
                b.iter(|| {
                    let result = rt.block_on(engine.evaluate(black_box(&rule), RuntimeFacts::new()));
                    black_box(result)
                })
            },
        );
    }

    group.finish();
}

/// 短路求值效果：第一个条件失败时不再解析后续事实
fn bench_short_circuit(c: &mut Criterion) {
    let rt = runtime();
    let mut engine = Engine::new();
    engine.add_fact(Fact::from_fn("expensive", |_, _| {
        let total: u64 = (0..10_000u64).sum();
        Ok(json!(total))
    }));
    let rule = Rule::from_json(
        r#"{
            "conditions": { "all": [
                { "fact": "gate", "operator": "equal", "value": true },
                { "fact": "expensive", "operator": "greaterThan", "value": 0 }
            ] }
        }"#,
    )
    .unwrap();

    let mut group = c.benchmark_group("short_circuit");
    for gate in [true, false] {
        group.bench_with_input(BenchmarkId::new("gate", gate), &gate, |b, gate| {
            b.iter(|| {
                let facts = RuntimeFacts::new().with_value("gate", *gate);
                let result = rt.block_on(engine.evaluate(black_box(&rule), facts));
                black_box(result)
            })
        });
    }
    group.finish();
}

/// 同一事实在多个条件中复用时的缓存效果
fn bench_fact_cache(c: &mut Criterion) {
    let rt = runtime();
    let profile = || {
        Fact::from_fn("profile", |_, _| {
            Ok(json!({ "age": 30, "address": { "city": "shanghai" }, "tags": ["vip"] }))
        })
    };
    let rule = Rule::from_json(
        r#"{
            "conditions": { "all": [
                { "fact": "profile", "path": "$.age", "operator": "greaterThan", "value": 18 },
                { "fact": "profile", "path": "$.address.city", "operator": "equal", "value": "shanghai" },
                { "fact": "profile", "path": "$.tags", "operator": "contains", "value": "vip" }
            ] }
        }"#,
    )
    .unwrap();

    let mut group = c.benchmark_group("fact_cache");
    for cached in [true, false] {
        let mut engine = Engine::new();
        let fact = if cached { profile() } else { profile().uncached() };
        engine.add_fact(fact);

        group.bench_with_input(BenchmarkId::new("cached", cached), &cached, |b, _| {
            b.iter(|| {
                let result = rt.block_on(engine.evaluate(black_box(&rule), RuntimeFacts::new()));
                black_box(result)
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_simple_condition,
    bench_all_conditions,
    bench_nested_rules,
    bench_short_circuit,
    bench_fact_cache,
);

criterion_main!(benches);
