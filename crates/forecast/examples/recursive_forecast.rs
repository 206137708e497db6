//! 递归预测示例
//!
//! 这个示例展示了如何:
//! 1. 构造一条模拟价格序列
//! 2. 按 horizon 切分并只用训练区间建窗
//! 3. 训练模型并做纯递归预测
//! 4. 用实验运行器比较多个模型和窗口大小

use chrono::{Duration, TimeZone, Utc};
use forecast::evaluation::Evaluator;
use forecast::forecaster::{FittedModel, RecursiveForecaster};
use forecast::models::{
    ForestConfig, KernelConfig, LinearConfig, MlpConfig, ModelFactory, ModelKind, ModelSpec,
};
use forecast::preprocessing::ScalingMode;
use forecast::timeseries::{SplitPlanner, WindowSequencer};
use forecast::types::CancelToken;
use forecast::{ExperimentConfig, ExperimentRunner, Observation, Series};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("=== 递归预测示例 ===\n");

    // 1. 生成模拟数据
    println!("1. 生成模拟价格序列...");
    let series = generate_mock_series("MOCK", 300, 7);
    println!("   生成了 {} 条数据", series.len());

    // 2. 切分与建窗
    println!("\n2. 切分训练/测试区间...");
    let horizon = 20;
    let window_size = 10;
    let split = SplitPlanner::split(&series, horizon)?;
    let windows = WindowSequencer::new(window_size).make_windows(split.train);
    println!("   训练区间: {} 条", split.train.len());
    println!("   测试区间: {} 条", split.test.len());
    println!("   训练样本: {}", windows.len());

    // 3. 训练并递归预测
    println!("\n3. 训练线性模型并递归预测 {} 步...", horizon);
    let spec = ModelSpec::new(ModelKind::Linear(LinearConfig::default()));
    let fitted = FittedModel::fit(spec.build(42, CancelToken::new()), &windows, ScalingMode::Standard)?;
    let seed_window = split.seed_window(window_size)?;
    let path = RecursiveForecaster::new().forecast(&fitted, &seed_window, horizon)?;

    let actual = split.test_values();
    let metrics = Evaluator::evaluate(&actual, &path.values, split.last_train_value())?;
    println!("   MAE:  {:.4}", metrics.mae);
    println!("   RMSE: {:.4}", metrics.rmse);
    if let Some(acc) = metrics.directional_accuracy {
        println!("   方向准确率: {:.2}%", acc * 100.0);
    }

    // 4. 批量实验
    println!("\n4. 运行模型对比实验...");
    let config = ExperimentConfig {
        horizon,
        window_sizes: vec![5, 10, 20],
        models: vec![
            ModelSpec::new(ModelKind::Persistence),
            ModelSpec::new(ModelKind::Linear(LinearConfig::default())),
            ModelSpec::new(ModelKind::RandomForest(ForestConfig {
                n_trees: 20,
                ..ForestConfig::default()
            })),
            ModelSpec::new(ModelKind::Kernel(KernelConfig::default())),
            ModelSpec::new(ModelKind::Mlp(MlpConfig::default())),
        ],
        ..ExperimentConfig::default()
    };

    let runner = ExperimentRunner::new(config)?;
    let report = runner
        .run(vec![series, generate_mock_series("WAVE", 300, 11)])
        .await?;
    report.print_report();

    println!("\n=== 示例完成 ===");
    Ok(())
}

/// 带趋势和周期的随机游走
fn generate_mock_series(symbol: &str, n: usize, seed: u64) -> Series {
    let mut rng = StdRng::seed_from_u64(seed);
    let start = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();

    let mut price = 100.0;
    let observations = (0..n)
        .map(|i| {
            let cycle = (i as f64 * 0.15).sin() * 0.8;
            price += 0.05 + cycle * 0.2 + rng.gen_range(-1.0..1.0);
            Observation {
                timestamp: start + Duration::days(i as i64),
                value: price,
            }
        })
        .collect();

    Series::from_observations(symbol, observations).unwrap()
}
