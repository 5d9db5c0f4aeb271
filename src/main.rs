use amr_records::config::{Cli, Commands, Config};
use amr_records::record::{PatientRecord, RecordId, FIELD_NAMES};
use amr_records::report::{self, Summary};
use amr_records::RecordGateway;
use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use std::io::Write;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // 解析命令行参数
    let cli = Cli::parse();

    // 加载配置
    let config = Config::load_with_cli(cli.clone())?;

    // 初始化日志系统，guard 需要持有到退出
    let _log_guard = config.init_logging()?;
    config.warn_placeholders();

    tracing::debug!("AMR Records 启动, 配置: {:?}", config.store);

    let command = cli.command.unwrap_or(Commands::Check);
    let gateway = RecordGateway::new(&config.store)?;
    handle_command(command, &config, &gateway).await
}

async fn handle_command(command: Commands, config: &Config, gateway: &RecordGateway) -> Result<()> {
    match command {
        Commands::Check => match gateway.check_connection().await {
            Ok(count) => println!("✅ 连接成功，共 {count} 条记录"),
            Err(e) => bail!("❌ 连接失败，请检查凭据: {e}"),
        },
        Commands::Add(args) => {
            let record = args.to_record(chrono::Local::now().date_naive());
            match gateway.create(&record).await {
                Some(id) => println!("✅ 记录已保存，ID: {id}"),
                None => return Err(failure(gateway, "保存记录失败")),
            }
        }
        Commands::List { json } => {
            let records = fetch_records(gateway).await?;
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            if json {
                let flat = records
                    .iter()
                    .map(|r| r.to_flat())
                    .collect::<Result<Vec<_>, _>>()?;
                serde_json::to_writer_pretty(&mut out, &flat)?;
                writeln!(out)?;
            } else if records.is_empty() {
                println!("没有记录");
            } else {
                report::write_table(&records, &mut out)?;
            }
        }
        Commands::Update { id, set } => {
            let patch = parse_assignments(&set)?;
            let id = RecordId::from(id);
            if gateway.update(&id, &patch).await {
                println!("✅ 记录 {id} 已更新");
            } else {
                return Err(failure(gateway, &format!("更新记录 {id} 失败")));
            }
        }
        Commands::Delete { id } => {
            let id = RecordId::from(id);
            if gateway.delete(&id).await {
                println!("✅ 记录 {id} 已删除");
            } else {
                return Err(failure(gateway, &format!("删除记录 {id} 失败")));
            }
        }
        Commands::Stats => {
            let records = fetch_records(gateway).await?;
            print!("{}", Summary::from_records(&records));
        }
        Commands::Export { output } => {
            let records = fetch_records(gateway).await?;
            let path = output.unwrap_or_else(|| {
                report::default_export_name(chrono::Local::now().date_naive()).into()
            });
            let file = std::fs::File::create(&path)
                .with_context(|| format!("无法创建文件: {}", path.display()))?;
            report::write_csv(&records, file)?;
            println!("📥 已导出 {} 条记录到 {}", records.len(), path.display());
        }
        Commands::InitConfig => init_config(config)?,
    }

    Ok(())
}

/// 读取记录；空列表且有错误诊断时视为失败
async fn fetch_records(gateway: &RecordGateway) -> Result<Vec<amr_records::StoredRecord>> {
    let records = gateway.list().await;
    if records.is_empty() && gateway.diagnostics().has_errors() {
        return Err(failure(gateway, "读取记录失败"));
    }
    for diagnostic in gateway.diagnostics().take() {
        eprintln!("{diagnostic}");
    }
    Ok(records)
}

/// 打印诊断信息并构造错误
fn failure(gateway: &RecordGateway, message: &str) -> anyhow::Error {
    for diagnostic in gateway.diagnostics().take() {
        eprintln!("{diagnostic}");
    }
    anyhow!("❌ {message}")
}

fn parse_assignments(assignments: &[String]) -> Result<PatientRecord> {
    let mut patch = PatientRecord::default();
    for assignment in assignments {
        let (field, value) = assignment
            .split_once('=')
            .ok_or_else(|| anyhow!("无效的赋值 '{assignment}'，应为 Field=Value"))?;
        let field = field.trim();
        if !FIELD_NAMES.contains(&field) {
            bail!("未知字段 '{field}'，可用字段: {}", FIELD_NAMES.join(", "));
        }
        patch.assign(field, value)?;
    }
    Ok(patch)
}

fn init_config(config: &Config) -> Result<()> {
    let Some(config_path) = Config::get_user_config_path() else {
        bail!("无法确定配置文件路径");
    };
    if config_path.exists() {
        bail!("配置文件已存在: {}", config_path.display());
    }
    // 凭据不写入文件
    let mut template = Config::default();
    template.store.base_id = config.store.base_id.clone();
    template.store.table_name = config.store.table_name.clone();
    template.save_to_file(&config_path)?;
    println!("配置已写入: {}", config_path.display());
    Ok(())
}
