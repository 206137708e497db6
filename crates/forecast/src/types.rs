//! 核心类型定义

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub type ForecastResult<T> = Result<T, ForecastError>;

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("无效的配置: {0}")]
    Config(String),

    #[error("数据错误: {0}")]
    Data(String),

    #[error("模型训练错误: {0}")]
    ModelFit(String),

    #[error("模型预测错误: {0}")]
    ModelPredict(String),

    #[error("指标计算错误: {0}")]
    MetricComputation(String),

    #[error("数据维度不匹配: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("超时: 超过 {0:?}")]
    Timeout(Duration),

    #[error("任务已取消")]
    Cancelled,

    #[error("张量运算错误: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV 错误: {0}")]
    Csv(#[from] csv::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ForecastError {
    /// 只影响单个组合的错误（其余组合照常运行）
    pub fn is_combination_scoped(&self) -> bool {
        matches!(
            self,
            ForecastError::ModelFit(_)
                | ForecastError::ModelPredict(_)
                | ForecastError::MetricComputation(_)
                | ForecastError::DimensionMismatch { .. }
                | ForecastError::Tensor(_)
                | ForecastError::Timeout(_)
                | ForecastError::Cancelled
        )
    }
}

/// 单个组合的取消标志
///
/// 超时后由调度方置位，迭代式的训练和预测循环在每一轮检查它。
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> ForecastResult<()> {
        if self.is_cancelled() {
            Err(ForecastError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// 评估指标
///
/// 不可用的指标为 `None`（例如测试区间方差为零时的 R²）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// 平均绝对误差
    pub mae: f64,
    /// 均方误差
    pub mse: f64,
    /// 均方根误差
    pub rmse: f64,
    /// R² 分数
    pub r2: Option<f64>,
    /// 方向准确率（预测路径的涨跌方向与真实涨跌方向一致的比例）
    pub directional_accuracy: Option<f64>,
    /// 平均绝对百分比误差（%）
    ///
    /// 序列接近零时分母趋近于零，数值会发散。仅作参考，不参与模型排序。
    pub mape: Option<f64>,
}

/// 单个组合的运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Ok => write!(f, "ok"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// 单个 (symbol, window_size, model) 组合的实验结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub symbol: String,
    pub window_size: usize,
    pub model_name: String,
    pub train_sample_count: usize,
    /// 因缺口或非有限值被拒绝的窗口数
    pub dropped_windows: usize,
    pub metrics: Option<Metrics>,
    pub status: RunStatus,
    pub failure_reason: Option<String>,
    /// 预测路径（长度等于 horizon）
    pub forecast: Vec<f64>,
    pub elapsed_secs: f64,
}

impl ExperimentResult {
    pub fn failed(
        symbol: &str,
        window_size: usize,
        model_name: &str,
        train_sample_count: usize,
        error: &ForecastError,
        elapsed_secs: f64,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            window_size,
            model_name: model_name.to_string(),
            train_sample_count,
            dropped_windows: 0,
            metrics: None,
            status: RunStatus::Failed,
            failure_reason: Some(error.to_string()),
            forecast: Vec::new(),
            elapsed_secs,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == RunStatus::Ok
    }
}

/// 因配置或数据错误整体跳过的序列，不产生任何组合
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedSeries {
    pub symbol: String,
    pub reason: String,
}

impl SkippedSeries {
    pub fn new(symbol: &str, error: &ForecastError) -> Self {
        Self {
            symbol: symbol.to_string(),
            reason: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_scope() {
        assert!(ForecastError::ModelPredict("nan".to_string()).is_combination_scoped());
        assert!(ForecastError::Timeout(Duration::from_secs(1)).is_combination_scoped());
        assert!(!ForecastError::Config("horizon".to_string()).is_combination_scoped());
        assert!(!ForecastError::Data("dup".to_string()).is_combination_scoped());
    }

    #[test]
    fn test_cancel_token_shared_between_clones() {
        let token = CancelToken::new();
        let worker = token.clone();
        assert!(worker.check().is_ok());

        token.cancel();
        assert!(matches!(worker.check(), Err(ForecastError::Cancelled)));
    }

    #[test]
    fn test_failed_result_has_no_metrics() {
        let err = ForecastError::ModelFit("奇异矩阵".to_string());
        let result = ExperimentResult::failed("VNM", 14, "linear", 10, &err, 0.1);

        assert!(!result.is_ok());
        assert!(result.metrics.is_none());
        assert!(result.failure_reason.unwrap().contains("奇异矩阵"));
    }
}
