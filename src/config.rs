//! 配置系统模块
//!
//! 统一处理 TOML 配置文件、环境变量、命令行参数。
//! 配置在启动时加载一次，之后只读。

use crate::record::{Acquisition, BsiSource, Flag, Gender, PatientRecord, Setting, Species};
use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use config::{Config as ConfigBuilder, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt as tracing_fmt, prelude::*, EnvFilter, Layer, Registry};

/// 应用名，用于配置目录和日志文件名
pub const APP_NAME: &str = "amr-records";

/// 未配置时使用的占位值
pub const PLACEHOLDER_BASE_ID: &str = "your_base_id";
pub const PLACEHOLDER_API_KEY: &str = "your_api_key";

/// 命令行参数
#[derive(Parser, Debug, Clone)]
#[command(name = "amr-records")]
#[command(about = "耐药菌患者记录 - Airtable 数据录入与查看")]
#[command(version)]
pub struct Cli {
    /// 配置文件路径
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// 日志级别
    #[arg(short, long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Airtable base ID
    #[arg(short, long, global = true)]
    pub base_id: Option<String>,

    /// 表名
    #[arg(short, long, global = true)]
    pub table: Option<String>,

    /// 子命令
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// 支持的命令
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// 测试与远端表的连接
    Check,
    /// 新增一条患者记录
    Add(AddArgs),
    /// 列出全部记录
    List {
        /// 以 JSON 输出扁平记录
        #[arg(long)]
        json: bool,
    },
    /// 部分更新记录
    Update {
        /// 记录 ID
        id: String,
        /// 要修改的字段，形如 Field=Value，可重复
        #[arg(short, long = "set", value_name = "FIELD=VALUE", required = true)]
        set: Vec<String>,
    },
    /// 删除记录
    Delete {
        /// 记录 ID
        id: String,
    },
    /// 汇总统计
    Stats,
    /// 导出 CSV
    Export {
        /// 输出文件，默认 patient_data_<日期>.csv
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// 写入默认配置文件
    InitConfig,
}

/// 新增记录的表单字段
#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    /// 年龄
    #[arg(long, default_value_t = 65, value_parser = clap::value_parser!(u32).range(18..=90))]
    pub age: u32,
    /// 性别
    #[arg(long, value_enum, default_value_t = Gender::Male)]
    pub gender: Gender,
    /// 菌种
    #[arg(long, value_enum, default_value_t = Species::EColi)]
    pub species: Species,
    /// 直肠 CPE 阳性
    #[arg(long, value_enum, default_value_t = Flag::No)]
    pub rectal_cpe: Flag,
    /// 科室
    #[arg(long, value_enum, default_value_t = Setting::Icu)]
    pub setting: Setting,
    /// 获得途径
    #[arg(long, value_enum, default_value_t = Acquisition::Community)]
    pub acquisition: Acquisition,
    /// 血流感染来源
    #[arg(long, value_enum, default_value_t = BsiSource::Primary)]
    pub bsi_source: BsiSource,
    /// 心力衰竭
    #[arg(long, value_enum, default_value_t = Flag::No)]
    pub chf: Flag,
    /// 慢性肾病
    #[arg(long, value_enum, default_value_t = Flag::No)]
    pub ckd: Flag,
    /// 肿瘤
    #[arg(long, value_enum, default_value_t = Flag::No)]
    pub tumor: Flag,
    /// 糖尿病
    #[arg(long, value_enum, default_value_t = Flag::No)]
    pub diabetes: Flag,
    /// 免疫抑制
    #[arg(long, value_enum, default_value_t = Flag::No)]
    pub immunosuppressed: Flag,
    /// 碳青霉烯耐药
    #[arg(long, value_enum, default_value_t = Flag::No)]
    pub cr: Flag,
    /// β-内酰胺/酶抑制剂耐药
    #[arg(long, value_enum, default_value_t = Flag::No)]
    pub blbli_r: Flag,
    /// 氟喹诺酮耐药
    #[arg(long, value_enum, default_value_t = Flag::No)]
    pub fqr: Flag,
    /// 三代头孢耐药
    #[arg(long, value_enum, default_value_t = Flag::No)]
    pub gc3_r: Flag,
    /// 备注
    #[arg(long, default_value = "")]
    pub notes: String,
}

impl AddArgs {
    /// 转换为完整记录，`Created_At` 使用给定日期
    pub fn to_record(&self, created_at: NaiveDate) -> PatientRecord {
        PatientRecord {
            age: Some(self.age),
            gender: Some(self.gender.into()),
            species: Some(self.species.into()),
            rectal_cpe_pos: Some(self.rectal_cpe.into()),
            setting: Some(self.setting.into()),
            acquisition: Some(self.acquisition.into()),
            bsi_source: Some(self.bsi_source.into()),
            chf: Some(self.chf.into()),
            ckd: Some(self.ckd.into()),
            tumor: Some(self.tumor.into()),
            diabetes: Some(self.diabetes.into()),
            immunosuppressed: Some(self.immunosuppressed.into()),
            cr: Some(self.cr.into()),
            blbli_r: Some(self.blbli_r.into()),
            fqr: Some(self.fqr.into()),
            gc3_r: Some(self.gc3_r.into()),
            notes: Some(self.notes.clone()),
            created_at: Some(created_at),
            extra: Default::default(),
        }
    }
}

/// 日志级别
#[derive(clap::ValueEnum, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// 主配置结构
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// 远端表配置
    pub store: StoreConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// 远端表配置
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// API 根地址
    pub root: String,
    /// base ID
    pub base_id: String,
    /// 表名
    pub table_name: String,
    /// Bearer 凭据
    pub api_key: String,
    /// 单次请求超时（秒）
    pub timeout_secs: u64,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: LogLevel,
    /// 日志格式
    pub format: LogFormat,
    /// 日志输出目录
    pub directory: Option<PathBuf>,
}

/// 日志格式
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// 简洁格式
    Compact,
    /// 详细格式
    Full,
    /// JSON 格式
    Json,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: "https://api.airtable.com/v0".to_string(),
            base_id: PLACEHOLDER_BASE_ID.to_string(),
            table_name: "Patient_Records".to_string(),
            api_key: PLACEHOLDER_API_KEY.to_string(),
            timeout_secs: 30,
        }
    }
}

// 凭据不能出现在日志里
impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("root", &self.root)
            .field("base_id", &self.base_id)
            .field("table_name", &self.table_name)
            .field("api_key", &"***")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl StoreConfig {
    /// base ID 或凭据仍是占位值
    pub fn uses_placeholders(&self) -> bool {
        self.base_id == PLACEHOLDER_BASE_ID || self.api_key == PLACEHOLDER_API_KEY
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            directory: None,
        }
    }
}

impl Config {
    /// 从多种配置源加载配置，CLI 参数优先级最高
    pub fn load_with_cli(cli: Cli) -> Result<Self> {
        let host_files: Vec<PathBuf> = [
            Self::get_system_config_path(),
            Self::get_user_config_path(),
        ]
        .into_iter()
        .flatten()
        .collect();

        // 环境变量前缀 AMR_RECORDS_，如 AMR_RECORDS_STORE__API_KEY
        let environment = Environment::with_prefix("AMR_RECORDS")
            .prefix_separator("_")
            .separator("__");

        Self::load_from(cli, &host_files, environment)
    }

    /// 按顺序叠加：默认值、主机上的配置文件、`--config`、环境变量、命令行参数
    fn load_from(cli: Cli, host_files: &[PathBuf], environment: Environment) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        // 1. 首先加载默认配置
        builder = builder.add_source(config::Config::try_from(&Config::default())?);

        // 2. 加载系统和用户配置文件，不存在则跳过
        for path in host_files {
            if path.exists() {
                builder = builder.add_source(File::from(path.clone()));
            }
        }

        // 3. 加载指定的配置文件
        if let Some(config_path) = cli.config {
            if config_path.exists() {
                builder = builder.add_source(File::from(config_path));
            } else {
                return Err(anyhow!("配置文件不存在: {}", config_path.display()));
            }
        }

        // 4. 加载环境变量
        builder = builder.add_source(environment);

        // 5. 构建配置
        let mut config: Config = builder.build()?.try_deserialize()?;

        // 6. 应用命令行参数覆盖
        if let Some(log_level) = cli.log_level {
            config.logging.level = log_level;
        }

        if let Some(base_id) = cli.base_id {
            config.store.base_id = base_id;
        }

        if let Some(table) = cli.table {
            config.store.table_name = table;
        }

        // 7. 验证配置
        config.validate()?;

        Ok(config)
    }

    /// 获取系统配置文件路径
    pub fn get_system_config_path() -> Option<PathBuf> {
        Some(PathBuf::from("/etc/amr-records/config.toml"))
    }

    /// 获取用户配置文件路径
    pub fn get_user_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// 保存配置到文件
    pub fn save_to_file(&self, path: &PathBuf) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| anyhow!("序列化配置失败: {}", e))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        let store = &self.store;

        // 验证 API 根地址
        let root = reqwest::Url::parse(&store.root)
            .map_err(|e| anyhow!("无效的 API 根地址 {}: {}", store.root, e))?;
        if !matches!(root.scheme(), "http" | "https") {
            return Err(anyhow!("API 根地址必须是 http(s): {}", store.root));
        }

        if store.base_id.trim().is_empty() {
            return Err(anyhow!("base ID 不能为空"));
        }

        if store.table_name.trim().is_empty() {
            return Err(anyhow!("表名不能为空"));
        }

        if store.api_key.trim().is_empty() {
            return Err(anyhow!("API 凭据不能为空"));
        }

        if store.timeout_secs == 0 {
            return Err(anyhow!("请求超时不能为 0"));
        }

        // 验证日志目录
        if let Some(log_dir) = &self.logging.directory {
            if !log_dir.exists() {
                std::fs::create_dir_all(log_dir)?;
            }
        }

        Ok(())
    }

    /// 凭据仍为占位值时给出警告；占位值不阻止启动
    ///
    /// 需在 [`Config::init_logging`] 之后调用，否则警告没有输出目标。
    pub fn warn_placeholders(&self) -> bool {
        let placeholders = self.store.uses_placeholders();
        if placeholders {
            tracing::warn!("base ID 或 API 凭据仍为占位值，请求将被远端拒绝");
        }
        placeholders
    }

    /// 初始化日志系统
    ///
    /// 控制台输出写到 stderr，stdout 留给命令结果。
    /// 配置了日志目录时返回文件写入器的 guard，调用方需持有到退出。
    pub fn init_logging(&self) -> Result<Option<WorkerGuard>> {
        let level_filter = EnvFilter::builder()
            .with_default_directive(Level::from(self.logging.level.clone()).into())
            .from_env_lossy();

        let mut layers = vec![format_layer(&self.logging.format, std::io::stderr, true)];

        let guard = match &self.logging.directory {
            Some(log_dir) => {
                std::fs::create_dir_all(log_dir)?;
                let file_appender =
                    tracing_appender::rolling::daily(log_dir, format!("{APP_NAME}.log"));
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                layers.push(format_layer(&self.logging.format, non_blocking, false));
                Some(guard)
            }
            None => None,
        };

        tracing_subscriber::registry()
            .with(layers)
            .with(level_filter)
            .try_init()
            .map_err(|e| anyhow!("日志系统初始化失败: {}", e))?;

        tracing::debug!("日志系统已初始化，级别: {:?}", self.logging.level);
        Ok(guard)
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn format_layer<W>(format: &LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_fmt::layer().with_writer(writer).with_ansi(ansi);
    match format {
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Full => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    /// 不读取进程环境的环境变量源
    fn isolated_env(vars: &[(&str, &str)]) -> Environment {
        let source: config::Map<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Environment::with_prefix("AMR_RECORDS")
            .prefix_separator("_")
            .separator("__")
            .source(Some(source))
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.store.root, "https://api.airtable.com/v0");
        assert_eq!(config.store.base_id, "your_base_id");
        assert_eq!(config.store.table_name, "Patient_Records");
        assert_eq!(config.store.api_key, "your_api_key");
        assert_eq!(config.store.timeout_secs, 30);
        assert!(config.store.uses_placeholders());
        assert!(matches!(config.logging.level, LogLevel::Info));
    }

    #[test]
    fn test_config_serialization() {
        let toml_str = toml::to_string_pretty(&Config::default()).unwrap();
        assert!(toml_str.contains("[store]"));
        assert!(toml_str.contains("[logging]"));
        assert!(toml_str.contains("Patient_Records"));
    }

    #[test]
    fn test_debug_hides_api_key() {
        let mut config = Config::default();
        config.store.api_key = "keySECRET".to_string();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("keySECRET"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn test_config_file_loading() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let test_config = r#"
[store]
base_id = "appXXXXXXXXXXXXXX"
table_name = "AMR Study"
api_key = "patXXXX"
timeout_secs = 10

[logging]
level = "debug"
format = "json"
        "#;

        std::fs::write(&config_path, test_config).unwrap();

        let builder = ConfigBuilder::builder()
            .add_source(File::from(config_path))
            .build()
            .unwrap();

        let config: Config = builder.try_deserialize().unwrap();
        assert_eq!(config.store.base_id, "appXXXXXXXXXXXXXX");
        assert_eq!(config.store.table_name, "AMR Study");
        assert_eq!(config.store.timeout_secs, 10);
        // 未出现在文件中的键使用默认值
        assert_eq!(config.store.root, "https://api.airtable.com/v0");
        assert!(!config.store.uses_placeholders());
        assert!(matches!(config.logging.level, LogLevel::Debug));
        assert!(matches!(config.logging.format, LogFormat::Json));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cli_overrides() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(&config_path, "[store]\napi_key = \"patFILE\"\n").unwrap();

        let cli = Cli::parse_from([
            "amr-records",
            "--config",
            config_path.to_str().unwrap(),
            "--base-id",
            "appCLI",
            "--table",
            "Other",
            "--log-level",
            "warn",
            "list",
        ]);

        let config = Config::load_from(cli, &[], isolated_env(&[])).unwrap();
        assert_eq!(config.store.base_id, "appCLI");
        assert_eq!(config.store.table_name, "Other");
        assert_eq!(config.store.api_key, "patFILE");
        assert!(matches!(config.logging.level, LogLevel::Warn));
    }

    #[test]
    fn test_layer_precedence() {
        let temp_dir = TempDir::new().unwrap();
        let system_path = temp_dir.path().join("system.toml");
        let user_path = temp_dir.path().join("user.toml");
        std::fs::write(
            &system_path,
            "[store]\nbase_id = \"appSYSTEM\"\ntable_name = \"System\"\napi_key = \"patSYSTEM\"\n",
        )
        .unwrap();
        std::fs::write(&user_path, "[store]\ntable_name = \"User\"\n").unwrap();

        let cli = Cli::parse_from(["amr-records", "check"]);
        let config = Config::load_from(
            cli,
            &[system_path, user_path, temp_dir.path().join("absent.toml")],
            isolated_env(&[("AMR_RECORDS_STORE__API_KEY", "patENV")]),
        )
        .unwrap();

        assert_eq!(config.store.base_id, "appSYSTEM");
        assert_eq!(config.store.table_name, "User");
        assert_eq!(config.store.api_key, "patENV");
        assert_eq!(config.store.timeout_secs, 30);
    }

    #[test]
    #[traced_test]
    fn test_placeholder_warning_after_logging() {
        assert!(Config::default().warn_placeholders());
        assert!(logs_contain("占位值"));
    }

    #[test]
    #[traced_test]
    fn test_configured_credentials_do_not_warn() {
        let mut config = Config::default();
        config.store.base_id = "appREAL".to_string();
        config.store.api_key = "patREAL".to_string();

        assert!(!config.warn_placeholders());
        assert!(!logs_contain("占位值"));
    }

    #[test]
    fn test_missing_config_file() {
        let cli = Cli::parse_from(["amr-records", "--config", "/nonexistent/amr.toml", "check"]);
        assert!(Config::load_from(cli, &[], isolated_env(&[])).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.store.root = "ftp://example.com".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.store.table_name = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.store.timeout_secs = 0;
        assert!(config.validate().is_err());

        // 占位值不是错误
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_add_args_defaults() {
        let cli = Cli::parse_from(["amr-records", "add"]);
        let Some(Commands::Add(args)) = cli.command else {
            panic!("应解析为 add 子命令");
        };

        let date = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        let record = args.to_record(date);
        assert_eq!(record.age, Some(65));
        assert_eq!(record.gender.as_deref(), Some("Male"));
        assert_eq!(record.species.as_deref(), Some("E. coli"));
        assert_eq!(record.setting.as_deref(), Some("ICU"));
        assert_eq!(record.cr.as_deref(), Some("0"));
        assert_eq!(record.notes.as_deref(), Some(""));
        assert_eq!(record.created_at, Some(date));
    }

    #[test]
    fn test_add_args_age_range() {
        assert!(Cli::try_parse_from(["amr-records", "add", "--age", "17"]).is_err());
        assert!(Cli::try_parse_from(["amr-records", "add", "--age", "91"]).is_err());

        let cli = Cli::try_parse_from([
            "amr-records",
            "add",
            "--age",
            "90",
            "--species",
            "klebsiella",
            "--cr",
            "1",
            "--bsi-source",
            "uti",
        ])
        .unwrap();
        let Some(Commands::Add(args)) = cli.command else {
            panic!("应解析为 add 子命令");
        };
        assert_eq!(args.age, 90);
        assert_eq!(args.species, Species::Klebsiella);
        assert_eq!(args.cr, Flag::Yes);
        assert_eq!(args.bsi_source, BsiSource::Uti);
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
        assert_eq!(Level::from(LogLevel::Warn), Level::WARN);
        assert_eq!(Level::from(LogLevel::Info), Level::INFO);
        assert_eq!(Level::from(LogLevel::Debug), Level::DEBUG);
        assert_eq!(Level::from(LogLevel::Trace), Level::TRACE);
    }
}
