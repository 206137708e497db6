//! 预测实验命令行入口

use clap::Parser;
use forecast::{ExperimentConfig, ExperimentRunner, ForecastResult, SeriesStore, SkippedSeries};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// 退出时等待仍在运行的超时工作线程的上限
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// 对 CSV 中的序列运行滚动窗口预测实验
#[derive(Parser, Debug)]
#[command(name = "forecast", version, about)]
struct Args {
    /// 输入 CSV（列: symbol,timestamp,value）
    #[arg(long)]
    data: PathBuf,

    /// 实验配置 JSON，缺省使用默认配置
    #[arg(long)]
    config: Option<PathBuf>,

    /// 结果表 CSV 输出路径
    #[arg(long, default_value = "forecast_results.csv")]
    output: PathBuf,

    /// 完整报告 JSON 输出路径
    #[arg(long)]
    json: Option<PathBuf>,

    /// 覆盖配置中的 horizon
    #[arg(long)]
    horizon: Option<usize>,

    /// 覆盖配置中的窗口大小（可重复）
    #[arg(long = "window")]
    windows: Vec<usize>,

    /// 只处理指定标的（可重复）
    #[arg(long = "symbol")]
    symbols: Vec<String>,
}

impl Args {
    fn experiment_config(&self) -> ForecastResult<ExperimentConfig> {
        let mut config = match &self.config {
            Some(path) => ExperimentConfig::from_json_file(path)?,
            None => ExperimentConfig::default(),
        };

        if let Some(horizon) = self.horizon {
            config.horizon = horizon;
        }
        if !self.windows.is_empty() {
            config.window_sizes = self.windows.clone();
        }
        if !self.symbols.is_empty() {
            config.symbols = self.symbols.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let outcome = runtime.block_on(run(args));
    // 忽略取消信号的工作线程不会阻止进程退出
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    outcome
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.experiment_config()?;

    let store = SeriesStore::from_csv_path(&args.data)?;
    let symbols = if config.symbols.is_empty() {
        store.symbols().to_vec()
    } else {
        config.symbols.clone()
    };

    let mut series = Vec::with_capacity(symbols.len());
    let mut unloadable = Vec::new();
    for (symbol, loaded) in store.load_all(&symbols) {
        match loaded {
            Ok(s) => series.push(s),
            Err(e) => {
                tracing::warn!("Skipping series {}: {}", symbol, e);
                unloadable.push(SkippedSeries::new(&symbol, &e));
            }
        }
    }

    let runner = ExperimentRunner::new(config)?;
    let mut report = runner.run(series).await?;
    report.skipped.extend(unloadable);

    report.print_report();
    report.write_csv(&args.output)?;
    if let Some(path) = &args.json {
        report.write_json(path)?;
    }

    Ok(())
}
