//! 实验编排
//!
//! 枚举 标的 × 窗口大小 × 模型 的全部组合，每个组合独立完成
//! 切分 → 建窗 → 训练 → 递归预测 → 评估，并恰好记录一条结果。
//! 单个组合的失败（训练、预测、超时）只影响它自己。

use crate::config::ExperimentConfig;
use crate::evaluation::Evaluator;
use crate::forecaster::{FittedModel, ForecastMode, ForecastPath, RecursiveForecaster};
use crate::models::ModelFactory;
use crate::preprocessing::ScalingMode;
use crate::series::Series;
use crate::timeseries::{Split, SplitPlanner, WindowSequencer, WindowSet};
use crate::types::{
    CancelToken, ExperimentResult, ForecastError, ForecastResult, Metrics, RunStatus,
    SkippedSeries,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

/// 单个组合运行时需要的设置
#[derive(Debug, Clone, Copy)]
struct CombinationSettings {
    horizon: usize,
    forecast_mode: ForecastMode,
    scaling: ScalingMode,
    max_gap: Option<chrono::Duration>,
    timeout: Option<Duration>,
    seed: u64,
}

/// 实验运行器
pub struct ExperimentRunner {
    config: ExperimentConfig,
}

impl ExperimentRunner {
    pub fn new(config: ExperimentConfig) -> ForecastResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// 用配置中的模型运行全部组合
    pub async fn run(&self, series: Vec<Series>) -> ForecastResult<ExperimentReport> {
        let factories: Vec<Arc<dyn ModelFactory>> = self
            .config
            .models
            .iter()
            .cloned()
            .map(|spec| Arc::new(spec) as Arc<dyn ModelFactory>)
            .collect();

        self.run_with_factories(series, factories).await
    }

    /// 用给定的模型工厂运行全部组合
    ///
    /// 每个序列的 horizon 与窗口大小在任何组合开始前检查。不相容的序列记入
    /// `skipped`，不产生任何组合，其余序列照常运行；所有序列都不相容时返回
    /// `Err`，不产生任何结果。
    pub async fn run_with_factories(
        &self,
        series: Vec<Series>,
        factories: Vec<Arc<dyn ModelFactory>>,
    ) -> ForecastResult<ExperimentReport> {
        let config = &self.config;
        Self::validate_factories(&factories)?;
        let (series, skipped) = Self::partition_series(config, series)?;

        let settings = CombinationSettings {
            horizon: config.horizon,
            forecast_mode: config.forecast_mode,
            scaling: config.scaling,
            max_gap: config.max_gap(),
            timeout: config.combination_timeout(),
            seed: config.seed,
        };

        let total = series.len() * config.window_sizes.len() * factories.len();
        tracing::info!(
            "Running {} combinations: {} series, {} window sizes, {} models (horizon {}, mode {})",
            total,
            series.len(),
            config.window_sizes.len(),
            factories.len(),
            config.horizon,
            config.forecast_mode
        );

        let started_at = Utc::now();
        let semaphore = Arc::new(Semaphore::new(config.max_workers));
        let results: Arc<Mutex<Vec<(usize, ExperimentResult)>>> =
            Arc::new(Mutex::new(Vec::with_capacity(total)));

        let mut handles = Vec::with_capacity(total);
        let mut ordinal = 0;

        for series in series.into_iter().map(Arc::new) {
            for &window_size in &config.window_sizes {
                for factory in &factories {
                    let series = series.clone();
                    let factory = factory.clone();
                    let semaphore = semaphore.clone();
                    let results = results.clone();
                    let position = ordinal;
                    ordinal += 1;

                    handles.push(tokio::spawn(async move {
                        let result = match semaphore.acquire_owned().await {
                            Ok(permit) => {
                                run_guarded(
                                    series.clone(),
                                    window_size,
                                    factory.clone(),
                                    settings,
                                    permit,
                                )
                                .await
                            }
                            Err(_) => ExperimentResult::failed(
                                series.symbol(),
                                window_size,
                                &factory.name(),
                                0,
                                &ForecastError::Cancelled,
                                0.0,
                            ),
                        };
                        results.lock().await.push((position, result));
                    }));
                }
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Combination task aborted: {}", e);
            }
        }

        let mut collected = std::mem::take(&mut *results.lock().await);
        collected.sort_by_key(|(position, _)| *position);
        let results: Vec<ExperimentResult> =
            collected.into_iter().map(|(_, result)| result).collect();

        let report = ExperimentReport {
            horizon: config.horizon,
            forecast_mode: config.forecast_mode,
            started_at,
            finished_at: Utc::now(),
            results,
            skipped,
        };

        tracing::info!(
            "Experiment finished: {} succeeded, {} failed",
            report.succeeded().len(),
            report.failed().len()
        );

        Ok(report)
    }

    fn validate_factories(factories: &[Arc<dyn ModelFactory>]) -> ForecastResult<()> {
        if factories.is_empty() {
            return Err(ForecastError::Config("没有可运行的模型".to_string()));
        }

        let mut names = HashSet::new();
        for factory in factories {
            let name = factory.name();
            if !names.insert(name.clone()) {
                return Err(ForecastError::Config(format!("重复的模型名称: {}", name)));
            }
        }

        Ok(())
    }

    /// 按切分计划把序列分为可运行与跳过两组
    fn partition_series(
        config: &ExperimentConfig,
        series: Vec<Series>,
    ) -> ForecastResult<(Vec<Series>, Vec<SkippedSeries>)> {
        if series.is_empty() {
            return Err(ForecastError::Config("没有可运行的序列".to_string()));
        }

        let mut runnable = Vec::with_capacity(series.len());
        let mut skipped = Vec::new();

        for s in series {
            match SplitPlanner::plan_for_windows(s.len(), config.horizon, &config.window_sizes) {
                Ok(_) => runnable.push(s),
                Err(e) => {
                    tracing::warn!("Skipping series {}: {}", s.symbol(), e);
                    skipped.push(SkippedSeries::new(s.symbol(), &e));
                }
            }
        }

        if runnable.is_empty() {
            let reasons: Vec<String> = skipped
                .iter()
                .map(|s| format!("{}: {}", s.symbol, s.reason))
                .collect();
            return Err(ForecastError::Config(format!(
                "没有可运行的序列 ({})",
                reasons.join("; ")
            )));
        }

        Ok((runnable, skipped))
    }
}

/// 在阻塞线程池上运行一个组合，处理超时与 panic
///
/// 并发许可随工作线程一起释放。超时后工作线程可能仍在运行，直到它观察到
/// 取消信号，在此之前它继续占用一个并发名额。
async fn run_guarded(
    series: Arc<Series>,
    window_size: usize,
    factory: Arc<dyn ModelFactory>,
    settings: CombinationSettings,
    permit: OwnedSemaphorePermit,
) -> ExperimentResult {
    let cancel = CancelToken::new();
    let symbol = series.symbol().to_string();
    let model_name = factory.name();

    let worker_cancel = cancel.clone();
    let handle = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        execute_combination(&series, window_size, factory.as_ref(), settings, worker_cancel)
    });

    let joined = match settings.timeout {
        Some(limit) => match tokio::time::timeout(limit, handle).await {
            Ok(joined) => joined,
            Err(_) => {
                // 通知仍在运行的迭代循环退出
                cancel.cancel();
                let error = ForecastError::Timeout(limit);
                tracing::warn!(
                    "Combination {}/w={}/{} timed out after {:?}",
                    symbol,
                    window_size,
                    model_name,
                    limit
                );
                return ExperimentResult::failed(
                    &symbol,
                    window_size,
                    &model_name,
                    0,
                    &error,
                    limit.as_secs_f64(),
                );
            }
        },
        None => handle.await,
    };

    joined.unwrap_or_else(|e| {
        let error = ForecastError::ModelFit(format!("组合异常退出: {}", e));
        tracing::warn!(
            "Combination {}/w={}/{} panicked: {}",
            symbol,
            window_size,
            model_name,
            e
        );
        ExperimentResult::failed(&symbol, window_size, &model_name, 0, &error, 0.0)
    })
}

/// 同步执行一个组合
fn execute_combination(
    series: &Series,
    window_size: usize,
    factory: &dyn ModelFactory,
    settings: CombinationSettings,
    cancel: CancelToken,
) -> ExperimentResult {
    let started = Instant::now();
    let model_name = factory.name();

    let split = match SplitPlanner::split(series, settings.horizon) {
        Ok(split) => split,
        Err(e) => {
            return ExperimentResult::failed(
                series.symbol(),
                window_size,
                &model_name,
                0,
                &e,
                started.elapsed().as_secs_f64(),
            )
        }
    };

    // 只把训练区间交给建窗器
    let windows = WindowSequencer::new(window_size)
        .with_max_gap(settings.max_gap)
        .make_windows(split.train);

    match fit_and_forecast(&split, &windows, factory, settings, cancel) {
        Ok((metrics, path)) => {
            tracing::debug!(
                "Combination {}/w={}/{} done, rmse {:.6}",
                series.symbol(),
                window_size,
                model_name,
                metrics.rmse
            );
            ExperimentResult {
                symbol: series.symbol().to_string(),
                window_size,
                model_name,
                train_sample_count: windows.len(),
                dropped_windows: windows.dropped,
                metrics: Some(metrics),
                status: RunStatus::Ok,
                failure_reason: None,
                forecast: path.values,
                elapsed_secs: started.elapsed().as_secs_f64(),
            }
        }
        Err(e) => {
            tracing::warn!(
                "Combination {}/w={}/{} failed: {}",
                series.symbol(),
                window_size,
                model_name,
                e
            );
            let mut result = ExperimentResult::failed(
                series.symbol(),
                window_size,
                &model_name,
                windows.len(),
                &e,
                started.elapsed().as_secs_f64(),
            );
            result.dropped_windows = windows.dropped;
            result
        }
    }
}

fn fit_and_forecast(
    split: &Split<'_>,
    windows: &WindowSet,
    factory: &dyn ModelFactory,
    settings: CombinationSettings,
    cancel: CancelToken,
) -> ForecastResult<(Metrics, ForecastPath)> {
    let model = factory.build(settings.seed, cancel.clone());
    let fitted = FittedModel::fit(model, windows, settings.scaling)?;

    let seed_window = split.seed_window(windows.window_size)?;
    let actual = split.test_values();
    let forecaster = RecursiveForecaster::new().with_cancel(cancel);

    let path = match settings.forecast_mode {
        ForecastMode::Recursive => forecaster.forecast(&fitted, &seed_window, settings.horizon)?,
        ForecastMode::Reseeded => forecaster.forecast_reseeded(&fitted, &seed_window, &actual)?,
    };

    let metrics = Evaluator::evaluate(&actual, &path.values, split.last_train_value())?;
    Ok((metrics, path))
}

/// 实验报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentReport {
    pub horizon: usize,
    pub forecast_mode: ForecastMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// 按 标的、窗口大小、模型 的枚举顺序排列
    pub results: Vec<ExperimentResult>,
    /// 因配置或数据错误整体跳过的序列
    #[serde(default)]
    pub skipped: Vec<SkippedSeries>,
}

/// 结果表的一行，未计算的指标写为空单元格
#[derive(Debug, Serialize)]
struct ResultRow<'a> {
    symbol: &'a str,
    window_size: usize,
    model_name: &'a str,
    train_sample_count: usize,
    mae: Option<f64>,
    rmse: Option<f64>,
    r2: Option<f64>,
    directional_accuracy: Option<f64>,
    status: RunStatus,
    failure_reason: Option<&'a str>,
}

impl<'a> From<&'a ExperimentResult> for ResultRow<'a> {
    fn from(result: &'a ExperimentResult) -> Self {
        let metrics = result.metrics.as_ref();
        Self {
            symbol: &result.symbol,
            window_size: result.window_size,
            model_name: &result.model_name,
            train_sample_count: result.train_sample_count,
            mae: metrics.map(|m| m.mae),
            rmse: metrics.map(|m| m.rmse),
            r2: metrics.and_then(|m| m.r2),
            directional_accuracy: metrics.and_then(|m| m.directional_accuracy),
            status: result.status,
            failure_reason: result.failure_reason.as_deref(),
        }
    }
}

impl ExperimentReport {
    pub fn succeeded(&self) -> Vec<&ExperimentResult> {
        self.results.iter().filter(|r| r.is_ok()).collect()
    }

    pub fn failed(&self) -> Vec<&ExperimentResult> {
        self.results.iter().filter(|r| !r.is_ok()).collect()
    }

    /// 每个标的 RMSE 最低的成功组合，按标的首次出现顺序
    pub fn best_by_symbol(&self) -> Vec<&ExperimentResult> {
        let mut order: Vec<&str> = Vec::new();
        let mut best: HashMap<&str, &ExperimentResult> = HashMap::new();

        for result in &self.results {
            let Some(metrics) = &result.metrics else {
                continue;
            };
            let symbol = result.symbol.as_str();

            match best.get(symbol) {
                Some(current) => {
                    let current_rmse = current.metrics.as_ref().map_or(f64::INFINITY, |m| m.rmse);
                    if metrics.rmse < current_rmse {
                        best.insert(symbol, result);
                    }
                }
                None => {
                    order.push(symbol);
                    best.insert(symbol, result);
                }
            }
        }

        order.into_iter().filter_map(|s| best.get(s).copied()).collect()
    }

    pub fn print_report(&self) {
        let fmt_opt = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{:.4}", v));

        println!("========== 预测实验报告 ==========");
        println!("预测步数: {}", self.horizon);
        println!("预测模式: {}", self.forecast_mode);
        println!(
            "组合数: {} (成功 {}, 失败 {})",
            self.results.len(),
            self.succeeded().len(),
            self.failed().len()
        );
        println!(
            "耗时: {:.2}s",
            (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
        );
        println!("----------------------------------");
        println!(
            "{:<10} {:>6} {:<16} {:>8} {:>10} {:>10} {:>8} {:>8}",
            "symbol", "window", "model", "samples", "mae", "rmse", "r2", "dir_acc"
        );

        for result in &self.results {
            match &result.metrics {
                Some(m) => println!(
                    "{:<10} {:>6} {:<16} {:>8} {:>10.4} {:>10.4} {:>8} {:>8}",
                    result.symbol,
                    result.window_size,
                    result.model_name,
                    result.train_sample_count,
                    m.mae,
                    m.rmse,
                    fmt_opt(m.r2),
                    fmt_opt(m.directional_accuracy)
                ),
                None => println!(
                    "{:<10} {:>6} {:<16} {:>8} 失败: {}",
                    result.symbol,
                    result.window_size,
                    result.model_name,
                    result.train_sample_count,
                    result.failure_reason.as_deref().unwrap_or("-")
                ),
            }
        }

        let best = self.best_by_symbol();
        if !best.is_empty() {
            println!("----------------------------------");
            for result in best {
                if let Some(m) = &result.metrics {
                    println!(
                        "最佳 {}: {} (w={}), RMSE {:.4}",
                        result.symbol, result.model_name, result.window_size, m.rmse
                    );
                }
            }
        }
        if !self.skipped.is_empty() {
            println!("----------------------------------");
            for skipped in &self.skipped {
                println!("跳过 {}: {}", skipped.symbol, skipped.reason);
            }
        }
        println!("==================================");
    }

    /// 写出结果表 CSV
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> ForecastResult<()> {
        let mut writer = csv::Writer::from_path(path.as_ref())?;
        for result in &self.results {
            writer.serialize(ResultRow::from(result))?;
        }
        writer.flush()?;

        tracing::info!(
            "Wrote {} result rows to {}",
            self.results.len(),
            path.as_ref().display()
        );
        Ok(())
    }

    /// 写出完整报告 JSON（含预测路径）
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> ForecastResult<()> {
        let file = std::fs::File::create(path.as_ref())?;
        let mut writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;

        tracing::info!("Wrote JSON report to {}", path.as_ref().display());
        Ok(())
    }
}
