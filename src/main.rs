// ==========================================
// 卡支付结算对账 - 命令行入口
// ==========================================
// 子命令: preview / import / batches / delete-batch / mapping / brands / terms / config
// 多文件导入: 每个文件一个阻塞任务（各自独立连接），并发执行
// ==========================================

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use settlement_recon::api::{ImportApi, ImportFileRequest, ImportFileResponse};
use settlement_recon::db::default_db_path;
use settlement_recon::domain::{BatchMode, CanonicalField, MappingQuery, NewColumnMapping, OriginType};
use settlement_recon::{logging, APP_NAME, VERSION};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "settlement-recon")]
#[command(about = "卡支付结算文件导入与对账")]
#[command(version)]
struct Cli {
    /// SQLite 数据库路径（默认取 SETTLEMENT_RECON_DB_PATH 或用户数据目录）
    #[arg(long, global = true)]
    db: Option<String>,

    /// 以 JSON 输出结果
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 预览: 表头位置与列映射（不写入）
    Preview {
        file: String,
        #[arg(long, default_value = "")]
        context: String,
        #[arg(long, default_value = "V", value_parser = parse_origin)]
        origin: OriginType,
        #[arg(long)]
        sheet: Option<String>,
    },
    /// 导入一个或多个结算文件
    Import {
        #[arg(required = true)]
        files: Vec<String>,
        #[arg(long)]
        merchant: i64,
        #[arg(long)]
        client: Option<i64>,
        #[arg(long, default_value = "")]
        context: String,
        #[arg(long, default_value = "V", value_parser = parse_origin)]
        origin: OriginType,
        #[arg(long, default_value = "")]
        operator: String,
        #[arg(long)]
        sheet: Option<String>,
        /// 追加到已有批次
        #[arg(long, conflicts_with = "description")]
        batch: Option<String>,
        /// 新批次说明
        #[arg(long)]
        description: Option<String>,
        /// 跳过批次内去重
        #[arg(long)]
        no_dedupe: bool,
    },
    /// 列出批次
    Batches {
        #[arg(long)]
        merchant: Option<i64>,
    },
    /// 级联删除批次
    DeleteBatch { batch_id: String },
    /// 列映射维护
    Mapping {
        #[command(subcommand)]
        action: MappingAction,
    },
    /// 卡组织白名单
    Brands {
        #[command(subcommand)]
        action: BrandAction,
    },
    /// 屏蔽词
    Terms {
        #[command(subcommand)]
        action: TermAction,
    },
    /// 全局配置
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum MappingAction {
    Add {
        source: String,
        canonical: CanonicalField,
        #[arg(long, default_value = "")]
        context: String,
        #[arg(long, default_value = "V", value_parser = parse_origin)]
        origin: OriginType,
        #[arg(long)]
        inactive: bool,
        /// 三元组已存在时报错而不是更新
        #[arg(long)]
        strict: bool,
    },
    List {
        #[arg(long)]
        context: Option<String>,
        #[arg(long, value_parser = parse_origin)]
        origin: Option<OriginType>,
        #[arg(long)]
        active_only: bool,
    },
    Remove { id: i64 },
    Contexts,
    Fields,
}

#[derive(Subcommand)]
enum BrandAction {
    /// 写入或更新白名单条目; 形如 VISA 或 DINERS=off
    Set {
        #[arg(long)]
        merchant: i64,
        entries: Vec<String>,
    },
    List {
        #[arg(long)]
        merchant: i64,
    },
}

#[derive(Subcommand)]
enum TermAction {
    Add {
        #[arg(long)]
        merchant: i64,
        term: String,
    },
    Remove {
        #[arg(long)]
        merchant: i64,
        term: String,
    },
    List {
        #[arg(long)]
        merchant: i64,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Get { key: String },
    Set { key: String, value: String },
    Show,
}

fn parse_origin(value: &str) -> Result<OriginType, String> {
    OriginType::from_code(value).ok_or_else(|| format!("来源类型须为 V 或 L: {}", value))
}

fn parse_brand_entry(entry: &str) -> Result<(String, bool)> {
    match entry.split_once('=') {
        None => Ok((entry.trim().to_string(), true)),
        Some((brand, flag)) => {
            let active = match flag.trim().to_lowercase().as_str() {
                "on" | "1" | "true" => true,
                "off" | "0" | "false" => false,
                other => bail!("无效的启用标记 {}（应为 on/off）", other),
            };
            Ok((brand.trim().to_string(), active))
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_import(file: &str, response: &ImportFileResponse) {
    let s = &response.summary;
    println!("{} → 批次 {}", file, s.batch_id);
    println!(
        "  接受 {} / 过滤 {} / 合计 {} / 去重删除 {} / 值修正 {}",
        s.accepted_count, s.filtered_count, s.total, s.duplicates_removed, s.coercion_count
    );
    for (source, canonical) in &response.substitutions {
        println!("  列替换: {} → {}", source, canonical);
    }
}

async fn import_files(db_path: String, template: ImportFileRequest, files: Vec<String>, json: bool) -> Result<()> {
    let tasks = files.into_iter().map(|file| {
        let db_path = db_path.clone();
        let request = ImportFileRequest {
            file_path: file.clone(),
            ..template.clone()
        };
        async move {
            let result = tokio::task::spawn_blocking(move || {
                ImportApi::new(&db_path).and_then(|api| api.import_file(&request))
            })
            .await;
            (file, result)
        }
    });

    let mut failures = 0usize;
    for (file, result) in join_all(tasks).await {
        match result {
            Ok(Ok(response)) => {
                if json {
                    print_json(&response)?;
                } else {
                    print_import(&file, &response);
                }
            }
            Ok(Err(e)) => {
                failures += 1;
                error!(file = %file, error = %e, "导入失败");
                eprintln!("{}: {}", file, e);
            }
            Err(e) => {
                failures += 1;
                error!(file = %file, error = %e, "导入任务异常终止");
            }
        }
    }

    if failures > 0 {
        bail!("{} 个文件导入失败", failures);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();

    let db_path = cli.db.clone().unwrap_or_else(default_db_path);
    info!(app = APP_NAME, version = VERSION, db = %db_path, "启动");

    let api = || ImportApi::new(&db_path).with_context(|| format!("无法打开数据库 {}", db_path));

    match cli.command {
        Commands::Preview { file, context, origin, sheet } => {
            let preview = api()?.preview_file(&file, sheet.as_deref(), &context, origin)?;
            if cli.json {
                print_json(&preview)?;
            } else {
                println!("表头行: {}  数据行: {}", preview.header_index, preview.data_rows);
                println!("列: {}", preview.columns.join(" | "));
                for collision in &preview.collisions {
                    println!(
                        "冲突: {} ← {}",
                        collision.canonical_name,
                        collision.source_names.join(", ")
                    );
                }
            }
        }
        Commands::Import {
            files,
            merchant,
            client,
            context,
            origin,
            operator,
            sheet,
            batch,
            description,
            no_dedupe,
        } => {
            let batch_mode = match batch {
                Some(id) => BatchMode::Existing(id),
                None => BatchMode::New { description },
            };
            let template = ImportFileRequest {
                file_path: String::new(),
                sheet,
                merchant_id: merchant,
                client_id: client,
                context,
                origin_type: origin,
                operator,
                batch_mode,
                dedupe: if no_dedupe { Some(false) } else { None },
            };
            import_files(db_path.clone(), template, files, cli.json).await?;
        }
        Commands::Batches { merchant } => {
            let batches = api()?.list_batches(merchant)?;
            if cli.json {
                print_json(&batches)?;
            } else {
                for o in &batches {
                    println!(
                        "{}  接受 {}  过滤 {}  {}",
                        o.batch.batch_id,
                        o.accepted_rows,
                        o.filtered_rows,
                        o.batch.description.as_deref().unwrap_or("")
                    );
                }
            }
        }
        Commands::DeleteBatch { batch_id } => {
            let report = api()?.delete_batch(&batch_id)?;
            if cli.json {
                print_json(&report)?;
            } else {
                println!(
                    "已删除 {}: 计算 {} / 接受 {} / 过滤 {}",
                    report.batch_id,
                    report.calculations_deleted,
                    report.accepted_deleted,
                    report.filtered_deleted
                );
            }
        }
        Commands::Mapping { action } => match action {
            MappingAction::Add { source, canonical, context, origin, inactive, strict } => {
                let mut mapping = NewColumnMapping::new(source, canonical, context).with_origin(origin);
                if inactive {
                    mapping = mapping.inactive();
                }
                let id = api()?.save_mapping(&mapping, strict)?;
                println!("映射 id={}", id);
            }
            MappingAction::List { context, origin, active_only } => {
                let mappings = api()?.list_mappings(&MappingQuery {
                    context,
                    origin_type: origin,
                    active_only,
                })?;
                if cli.json {
                    print_json(&mappings)?;
                } else {
                    for m in &mappings {
                        println!(
                            "{:>5}  {} → {}  [{} {}]{}",
                            m.id,
                            m.source_name,
                            m.canonical_name,
                            m.context,
                            m.origin_type,
                            if m.active { "" } else { " (停用)" }
                        );
                    }
                }
            }
            MappingAction::Remove { id } => api()?.delete_mapping(id)?,
            MappingAction::Contexts => {
                for context in api()?.list_contexts()? {
                    println!("{}", context);
                }
            }
            MappingAction::Fields => {
                for field in api()?.list_mappable_fields() {
                    println!("{}", field);
                }
            }
        },
        Commands::Brands { action } => match action {
            BrandAction::Set { merchant, entries } => {
                let entries = entries
                    .iter()
                    .map(|e| parse_brand_entry(e))
                    .collect::<Result<Vec<_>>>()?;
                let saved = api()?.save_brands(merchant, &entries)?;
                println!("已保存 {} 个卡组织", saved);
            }
            BrandAction::List { merchant } => {
                for (brand, active) in api()?.brands(merchant)? {
                    println!("{}{}", brand, if active { "" } else { " (停用)" });
                }
            }
        },
        Commands::Terms { action } => match action {
            TermAction::Add { merchant, term } => {
                if !api()?.add_term(merchant, &term)? {
                    println!("屏蔽词已存在");
                }
            }
            TermAction::Remove { merchant, term } => {
                if !api()?.remove_term(merchant, &term)? {
                    println!("屏蔽词不存在");
                }
            }
            TermAction::List { merchant } => {
                for term in api()?.list_terms(merchant)? {
                    println!("{}", term);
                }
            }
        },
        Commands::Config { action } => {
            let api = api()?;
            match action {
                ConfigAction::Get { key } => match api.config_value(&key)? {
                    Some(value) => println!("{}", value),
                    None => println!("(未设置)"),
                },
                ConfigAction::Set { key, value } => {
                    api.config().set_global_config_value(&key, &value)?;
                    // 写入后重新加载配置，值无法解析时报错
                    api.current_settings()?;
                }
                ConfigAction::Show => {
                    let settings = api.current_settings()?;
                    println!("{:#?}", settings);
                }
            }
        }
    }

    Ok(())
}
