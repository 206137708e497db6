//! 递归多步预测
//!
//! 初始窗口取自训练区间末尾，每一步的预测值被推入窗口作为下一步的输入。

use crate::models::Regressor;
use crate::preprocessing::{ScalingMode, WindowScaler};
use crate::timeseries::WindowSet;
use crate::types::{CancelToken, ForecastError, ForecastResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// 多步预测模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMode {
    /// 纯递归：窗口只用预测值滑动
    #[default]
    Recursive,
    /// 单步重置：窗口用真实值滑动，相当于 horizon 次一步预测，不是诚实的多步预测
    Reseeded,
}

impl std::fmt::Display for ForecastMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForecastMode::Recursive => write!(f, "recursive"),
            ForecastMode::Reseeded => write!(f, "reseeded"),
        }
    }
}

/// 预测路径
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPath {
    pub values: Vec<f64>,
}

impl ForecastPath {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// 训练好的模型及其缩放器
///
/// 缩放器在 [`FittedModel::fit`] 中从训练窗口拟合一次，之后只做变换。
pub struct FittedModel {
    model: Box<dyn Regressor>,
    scaler: Option<WindowScaler>,
    window_size: usize,
}

impl FittedModel {
    pub fn fit(
        mut model: Box<dyn Regressor>,
        windows: &WindowSet,
        scaling: ScalingMode,
    ) -> ForecastResult<Self> {
        if windows.is_empty() {
            return Err(ForecastError::Config(format!(
                "窗口大小 {} 没有可训练的样本",
                windows.window_size
            )));
        }

        let scaler = match scaling {
            ScalingMode::Standard => Some(WindowScaler::fit(windows)?),
            ScalingMode::None => None,
        };

        let (x, y) = windows.to_arrays();
        let (x, y) = match &scaler {
            Some(scaler) => (scaler.transform_matrix(&x), scaler.transform_targets(&y)),
            None => (x, y),
        };

        model.fit(&x, &y).map_err(|e| match e {
            ForecastError::ModelFit(_) | ForecastError::Cancelled => e,
            other => ForecastError::ModelFit(other.to_string()),
        })?;

        Ok(Self {
            model,
            scaler,
            window_size: windows.window_size,
        })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn scaler(&self) -> Option<&WindowScaler> {
        self.scaler.as_ref()
    }

    /// 对一个原始尺度的窗口做一步预测，返回原始尺度的值
    pub fn predict_next(&self, window: &[f64]) -> ForecastResult<f64> {
        let row: Vec<f64> = match &self.scaler {
            Some(scaler) => window.iter().map(|&v| scaler.transform_value(v)).collect(),
            None => window.to_vec(),
        };
        let x = Array2::from_shape_vec((1, row.len()), row)
            .map_err(|e| ForecastError::ModelPredict(format!("形状转换失败: {}", e)))?;

        let output = self.model.predict(&x).map_err(|e| match e {
            ForecastError::ModelPredict(_) => e,
            other => ForecastError::ModelPredict(other.to_string()),
        })?;

        let raw = output
            .first()
            .copied()
            .ok_or_else(|| ForecastError::ModelPredict("模型没有输出".to_string()))?;

        let value = match &self.scaler {
            Some(scaler) => scaler.inverse_value(raw),
            None => raw,
        };

        if !value.is_finite() {
            return Err(ForecastError::ModelPredict(format!("预测值不是有限值: {}", value)));
        }

        Ok(value)
    }
}

/// 递归预测器
#[derive(Debug, Clone, Default)]
pub struct RecursiveForecaster {
    cancel: CancelToken,
}

impl RecursiveForecaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn check_seed(model: &FittedModel, seed_window: &[f64]) -> ForecastResult<()> {
        if seed_window.len() != model.window_size() {
            return Err(ForecastError::DimensionMismatch {
                expected: model.window_size(),
                actual: seed_window.len(),
            });
        }
        Ok(())
    }

    /// 纯递归预测：恰好 `horizon` 步，窗口只用预测值滑动
    pub fn forecast(
        &self,
        model: &FittedModel,
        seed_window: &[f64],
        horizon: usize,
    ) -> ForecastResult<ForecastPath> {
        Self::check_seed(model, seed_window)?;

        let mut window: VecDeque<f64> = seed_window.iter().copied().collect();
        let mut values = Vec::with_capacity(horizon);

        for step in 0..horizon {
            self.cancel.check()?;

            let pred = model
                .predict_next(window.make_contiguous())
                .map_err(|e| ForecastError::ModelPredict(format!("第 {} 步: {}", step + 1, e)))?;
            values.push(pred);

            window.pop_front();
            window.push_back(pred);
        }

        Ok(ForecastPath { values })
    }

    /// 单步重置预测：第 k 步的窗口由种子窗口和 `actuals[..k]` 组成
    ///
    /// 只用于对照，结果会显式标注为 reseeded。
    pub fn forecast_reseeded(
        &self,
        model: &FittedModel,
        seed_window: &[f64],
        actuals: &[f64],
    ) -> ForecastResult<ForecastPath> {
        Self::check_seed(model, seed_window)?;

        let mut window: VecDeque<f64> = seed_window.iter().copied().collect();
        let mut values = Vec::with_capacity(actuals.len());

        for (step, &actual) in actuals.iter().enumerate() {
            self.cancel.check()?;

            let pred = model
                .predict_next(window.make_contiguous())
                .map_err(|e| ForecastError::ModelPredict(format!("第 {} 步: {}", step + 1, e)))?;
            values.push(pred);

            window.pop_front();
            window.push_back(actual);
        }

        Ok(ForecastPath { values })
    }
}
