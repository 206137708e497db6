//! 实验配置

use crate::forecaster::ForecastMode;
use crate::models::{ForestConfig, LinearConfig, ModelFactory, ModelKind, ModelSpec};
use crate::preprocessing::ScalingMode;
use crate::types::{ForecastError, ForecastResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// 日频数据的缺口阈值，容忍周末和单日假期
pub const DEFAULT_MAX_GAP_DAYS: i64 = 4;

/// 实验配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// 测试区间长度（预测步数）
    pub horizon: usize,
    /// 要评估的窗口大小
    pub window_sizes: Vec<usize>,
    /// 要评估的模型
    pub models: Vec<ModelSpec>,
    /// 要处理的标的，为空时处理数据中的全部标的
    pub symbols: Vec<String>,
    /// 并发组合数上限
    pub max_workers: usize,
    /// 单个组合的超时（秒）
    pub combination_timeout_secs: Option<u64>,
    pub forecast_mode: ForecastMode,
    pub scaling: ScalingMode,
    /// 相邻观测间隔超过该天数视为缺口，跨越缺口的窗口被拒绝。
    /// 显式设为 `null` 时关闭缺口检测。
    pub max_gap_days: Option<i64>,
    /// 随机种子
    pub seed: u64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            horizon: 30,
            window_sizes: vec![14, 30],
            models: vec![
                ModelSpec::new(ModelKind::Linear(LinearConfig::default())),
                ModelSpec::new(ModelKind::RandomForest(ForestConfig::default())),
            ],
            symbols: Vec::new(),
            max_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            combination_timeout_secs: None,
            forecast_mode: ForecastMode::Recursive,
            scaling: ScalingMode::Standard,
            max_gap_days: Some(DEFAULT_MAX_GAP_DAYS),
            seed: 42,
        }
    }
}

impl ExperimentConfig {
    /// 从 JSON 文件读取配置，不做校验。
    /// 调用方在合并命令行覆盖项之后自行调用 [`ExperimentConfig::validate`]。
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ForecastResult<Self> {
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// 校验配置，任何问题都是致命错误，不做静默修正
    pub fn validate(&self) -> ForecastResult<()> {
        if self.horizon == 0 {
            return Err(ForecastError::Config("horizon 必须大于 0".to_string()));
        }
        if self.window_sizes.is_empty() {
            return Err(ForecastError::Config("window_sizes 不能为空".to_string()));
        }
        if self.window_sizes.contains(&0) {
            return Err(ForecastError::Config("窗口大小必须大于 0".to_string()));
        }
        if self.models.is_empty() {
            return Err(ForecastError::Config("models 不能为空".to_string()));
        }
        if self.max_workers == 0 {
            return Err(ForecastError::Config("max_workers 必须大于 0".to_string()));
        }
        if self.combination_timeout_secs == Some(0) {
            return Err(ForecastError::Config(
                "combination_timeout_secs 必须大于 0".to_string(),
            ));
        }
        if let Some(days) = self.max_gap_days {
            if days <= 0 {
                return Err(ForecastError::Config("max_gap_days 必须大于 0".to_string()));
            }
        }

        let mut names = HashSet::new();
        for spec in &self.models {
            let name = spec.name();
            if !names.insert(name.clone()) {
                return Err(ForecastError::Config(format!("重复的模型名称: {}", name)));
            }
        }

        Ok(())
    }

    pub fn combination_timeout(&self) -> Option<Duration> {
        self.combination_timeout_secs.map(Duration::from_secs)
    }

    pub fn max_gap(&self) -> Option<chrono::Duration> {
        self.max_gap_days.map(chrono::Duration::days)
    }
}
