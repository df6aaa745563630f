//! Hive - 命令行入口
//!
//! 用法：
//!   hive "read notes.txt then write summary.txt"     以文本目标运行
//!   hive --graph plan.json                              运行外部预制任务图
//!   hive --schema                                       打印工具参数 JSON Schema 与能力目录
//! 可选 --config <file> 追加配置文件，--cycles <n> 覆盖周期预算。结束时打印 export_state 的 JSON。

use std::path::PathBuf;

use anyhow::{bail, Context};
use hive::config::load_config;
use hive::tools::tool_schema_json;
use hive::{Goal, HaltKind, HiveBuilder, RunBudget, TaskGraph};

struct Args {
    goal: Option<String>,
    graph: Option<PathBuf>,
    config: Option<PathBuf>,
    cycles: Option<u32>,
    schema: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        goal: None,
        graph: None,
        config: None,
        cycles: None,
        schema: false,
    };
    let mut words = Vec::new();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--graph" => args.graph = Some(it.next().context("--graph needs a file")?.into()),
            "--config" => args.config = Some(it.next().context("--config needs a file")?.into()),
            "--cycles" => {
                let n = it.next().context("--cycles needs a number")?;
                args.cycles = Some(n.parse().with_context(|| format!("invalid --cycles '{n}'"))?);
            }
            "--schema" => args.schema = true,
            other => words.push(other.to_string()),
        }
    }
    if !words.is_empty() {
        args.goal = Some(words.join(" "));
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();
    let args = parse_args()?;
    let config = load_config(args.config.clone()).context("Failed to load config")?;
    let hive = HiveBuilder::new(config).build().context("Failed to assemble hive")?;

    if args.schema {
        println!("{}", tool_schema_json());
        println!("{}", hive.registry().to_catalog_json());
        return Ok(());
    }

    let goal: Goal = match (args.graph, args.goal) {
        (Some(path), _) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read graph {}", path.display()))?;
            let graph: TaskGraph = serde_json::from_str(&raw).context("Invalid task graph JSON")?;
            graph.into()
        }
        (None, Some(text)) => text.into(),
        (None, None) => bail!("usage: hive <goal text> | --graph <file.json> | --schema"),
    };

    let budget = RunBudget {
        max_cycles: args.cycles,
        max_time: None,
    };
    let report = hive.run_with(goal, budget).await;
    println!("{}", serde_json::to_string_pretty(&hive.export_state())?);

    if report.halt.kind != HaltKind::Success {
        eprintln!("halted: {} ({})", report.halt.code, report.halt.summary);
        std::process::exit(1);
    }
    Ok(())
}
