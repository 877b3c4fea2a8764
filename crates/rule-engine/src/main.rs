//! 规则评估命令行工具
//!
//! 读取一条 JSON 规则和一个 JSON 对象形式的事实，评估后把带注解的结果输出到 stdout。

use anyhow::{Context, Result};
use clap::Parser;
use rule_engine::{Engine, EngineOptions, Rule, RuntimeFacts};
use rules_shared::config::AppConfig;
use rules_shared::observability;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;

/// 对事实评估一条 JSON 规则
#[derive(Parser, Debug)]
#[command(name = "rule-engine")]
#[command(version, about, long_about = None)]
struct Cli {
    /// 规则文件路径
    #[arg(long)]
    rule: PathBuf,

    /// 事实文件路径，内容为 JSON 对象，每个键是一个常量事实
    #[arg(long)]
    facts: Option<PathBuf>,

    /// 格式化输出
    #[arg(long)]
    pretty: bool,
}

fn read_json(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("无法读取文件 {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} 不是合法的 JSON", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load("rule-engine").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    observability::init(&obs_config)?;

    let rule: Rule = serde_json::from_value(read_json(&cli.rule)?)
        .with_context(|| format!("无法解析规则 {}", cli.rule.display()))?;
    let facts = match &cli.facts {
        Some(path) => RuntimeFacts::from_json(read_json(path)?),
        None => RuntimeFacts::new(),
    };

    info!(
        rule = rule.name.as_deref().unwrap_or("<unnamed>"),
        facts = facts.len(),
        "开始评估规则"
    );

    let engine = Engine::with_options(EngineOptions::from(&config.engine));
    let result = engine.evaluate(&rule, facts).await?;

    println!("{}", result.to_json_string(cli.pretty)?);
    Ok(())
}
