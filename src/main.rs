// ==========================================
// 外卖结算数据仓库 - 命令行入口
// ==========================================
// 子命令:
//   init                       建表（幂等）
//   run [--layer] [--source-dir] 执行加载流水线
//   check                      仓库完整性巡检
//   settings list|get|reset    查看/重置工作流游标
// ==========================================

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use settlements_dwh::config::PipelineConfig;
use settlements_dwh::db;
use settlements_dwh::domain::types::Layer;
use settlements_dwh::engine::{Orchestrator, TaskId};
use settlements_dwh::logging::{self, LogFormat};
use settlements_dwh::repository::{Warehouse, WorkflowSettingsRepository};
use settlements_dwh::schema::SchemaManager;
use settlements_dwh::source::FileSource;
use settlements_dwh::validation::IntegrityChecker;

#[derive(Parser, Debug)]
#[command(name = "dwh", version, about = "外卖结算数据仓库加载工具")]
struct Cli {
    /// 配置文件路径（JSON）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 以 JSON 行格式输出日志
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 创建三层表结构
    Init,
    /// 执行加载流水线
    Run {
        /// 仅运行指定层（可重复）
        #[arg(long, value_parser = parse_layer)]
        layer: Vec<Layer>,
        /// 源系统导出目录（覆盖配置）
        #[arg(long)]
        source_dir: Option<PathBuf>,
        /// 以 JSON 输出运行报告
        #[arg(long)]
        json: bool,
    },
    /// 仓库完整性巡检
    Check {
        #[arg(long)]
        json: bool,
    },
    /// 工作流游标
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    /// 列出某层全部游标
    List {
        #[arg(long, value_parser = parse_layer, default_value = "stg")]
        layer: Layer,
    },
    /// 查看单个游标
    Get {
        key: String,
        #[arg(long, value_parser = parse_layer)]
        layer: Option<Layer>,
    },
    /// 删除游标（下次运行从头加载）
    Reset {
        key: String,
        #[arg(long, value_parser = parse_layer)]
        layer: Option<Layer>,
    },
}

fn parse_layer(value: &str) -> Result<Layer, String> {
    value.parse()
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_with(if cli.log_json { LogFormat::Json } else { LogFormat::Pretty });

    match dispatch(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            tracing::error!(error = ?e, "命令执行失败");
            eprintln!("错误: {:#}", e);
            std::process::exit(2);
        }
    }
}

/// 执行子命令，返回是否成功
async fn dispatch(cli: Cli) -> Result<bool> {
    let config = PipelineConfig::load(cli.config.as_deref())?;
    let warehouse = Warehouse::open(config.db_path_str()?)
        .with_context(|| format!("无法打开仓库: {}", config.db_path.display()))?;

    match cli.command {
        Command::Init => {
            let applied = SchemaManager::new(warehouse).init_all()?;
            println!("已执行 {} 个建表脚本", applied);
            Ok(true)
        }
        Command::Run {
            layer,
            source_dir,
            json,
        } => {
            warn_schema(&warehouse)?;
            let dir = source_dir
                .or_else(|| config.source_dir.clone())
                .ok_or_else(|| anyhow!("未指定源系统导出目录（--source-dir 或配置 source_dir）"))?;
            let reader = Arc::new(FileSource::new(dir));
            let orchestrator = Orchestrator::from_config(warehouse, reader, &config)?;
            let layers = if layer.is_empty() { Layer::ALL.to_vec() } else { layer };
            let report = orchestrator.run_layers(&layers).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for t in &report.tasks {
                    println!(
                        "{:<28} {:<10} batches={:<4} rows={:<6} {}",
                        t.task.name(),
                        format!("{:?}", t.status),
                        t.batches,
                        t.rows,
                        t.error.as_deref().unwrap_or("")
                    );
                }
                println!("run_id={} rows={}", report.run_id, report.total_rows());
            }
            Ok(report.succeeded())
        }
        Command::Check { json } => {
            warn_schema(&warehouse)?;
            let report = IntegrityChecker::new(warehouse).run()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if report.is_clean() {
                println!("仓库完整性检查通过");
            } else {
                println!("发现 {} 处问题", report.violation_count());
                for v in &report.scd_violations {
                    println!("  scd {} {} {:?} {:?}", v.table, v.natural_key, v.problem, v.version_ids);
                }
                for o in &report.fk_orphans {
                    println!("  fk  {} rowid={:?} -> {}", o.table, o.rowid, o.parent);
                }
                for d in &report.checkpoint_divergences {
                    println!("  checkpoint {}", d);
                }
            }
            Ok(report.is_clean())
        }
        Command::Settings { action } => settings(&warehouse, action),
    }
}

fn warn_schema(warehouse: &Warehouse) -> Result<()> {
    warehouse.read(|c| db::warn_on_schema_mismatch(c).map_err(anyhow::Error::from))
}

/// 未指定层时按工作流键反查
fn layer_of(key: &str, layer: Option<Layer>) -> Result<Layer> {
    if let Some(l) = layer {
        return Ok(l);
    }
    match TaskId::ALL.iter().find(|t| t.workflow_key() == key) {
        Some(t) => Ok(t.layer()),
        None => bail!("未知工作流键 {}，请用 --layer 指定所在层", key),
    }
}

fn settings(warehouse: &Warehouse, action: SettingsAction) -> Result<bool> {
    warehouse.read(|conn| match action {
        SettingsAction::List { layer } => {
            let repo = WorkflowSettingsRepository::new(conn, layer);
            for s in repo.list_settings()? {
                println!("{:<56} {}", s.workflow_key, s.workflow_settings.describe());
            }
            Ok(true)
        }
        SettingsAction::Get { key, layer } => {
            let repo = WorkflowSettingsRepository::new(conn, layer_of(&key, layer)?);
            let setting = repo.get_setting(&key)?;
            println!("{}", serde_json::to_string_pretty(&setting)?);
            Ok(true)
        }
        SettingsAction::Reset { key, layer } => {
            let repo = WorkflowSettingsRepository::new(conn, layer_of(&key, layer)?);
            if repo.reset_setting(&key)? {
                println!("已重置 {}", key);
                Ok(true)
            } else {
                println!("游标不存在: {}", key);
                Ok(false)
            }
        }
    })
}
