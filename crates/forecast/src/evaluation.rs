//! 预测路径评估

use crate::types::{ForecastError, ForecastResult, Metrics};

/// MAPE 分母的下限，低于它的真实值不参与计算
const MAPE_EPSILON: f64 = 1e-8;

/// 模型评估器
pub struct Evaluator;

impl Evaluator {
    /// 逐点对齐计算评估指标
    ///
    /// `anchor` 为训练区间最后一个真实值（预测时已知），提供时第一步的方向
    /// 也参与方向准确率计算。
    pub fn evaluate(actual: &[f64], forecast: &[f64], anchor: Option<f64>) -> ForecastResult<Metrics> {
        if actual.len() != forecast.len() {
            return Err(ForecastError::MetricComputation(format!(
                "长度不一致: 真实值 {}, 预测值 {}",
                actual.len(),
                forecast.len()
            )));
        }
        if actual.is_empty() {
            return Err(ForecastError::MetricComputation("没有可评估的点".to_string()));
        }

        let mse = Self::mean_squared_error(actual, forecast);
        let mae = Self::mean_absolute_error(actual, forecast);
        if !(mse.is_finite() && mae.is_finite()) {
            return Err(ForecastError::MetricComputation(
                "误差包含非有限值".to_string(),
            ));
        }

        let r2 = match Self::r2_score(actual, forecast) {
            Ok(r2) => Some(r2),
            Err(e) => {
                tracing::warn!("R² unavailable: {}", e);
                None
            }
        };
        let directional_accuracy = Self::direction_accuracy(actual, forecast, anchor);
        let mape = Self::mean_absolute_percentage_error(actual, forecast);

        Ok(Metrics {
            mae,
            mse,
            rmse: mse.sqrt(),
            r2,
            directional_accuracy,
            mape,
        })
    }

    /// 均方误差 (MSE)
    pub fn mean_squared_error(actual: &[f64], forecast: &[f64]) -> f64 {
        actual
            .iter()
            .zip(forecast)
            .map(|(a, f)| (a - f).powi(2))
            .sum::<f64>()
            / actual.len() as f64
    }

    /// 平均绝对误差 (MAE)
    pub fn mean_absolute_error(actual: &[f64], forecast: &[f64]) -> f64 {
        actual
            .iter()
            .zip(forecast)
            .map(|(a, f)| (a - f).abs())
            .sum::<f64>()
            / actual.len() as f64
    }

    /// R² 分数
    ///
    /// 真实值方差为零时分母为零，返回错误。
    pub fn r2_score(actual: &[f64], forecast: &[f64]) -> ForecastResult<f64> {
        let mean = actual.iter().sum::<f64>() / actual.len() as f64;

        let ss_res: f64 = actual.iter().zip(forecast).map(|(a, f)| (a - f).powi(2)).sum();
        let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();

        if ss_tot <= f64::EPSILON {
            return Err(ForecastError::MetricComputation(
                "真实值方差为零，R² 无定义".to_string(),
            ));
        }

        Ok(1.0 - ss_res / ss_tot)
    }

    /// 方向准确率
    ///
    /// 比较 `sign(forecast[k] - forecast[k-1])` 与 `sign(actual[k] - actual[k-1])`，
    /// 没有可比较的步时返回 `None`。
    pub fn direction_accuracy(actual: &[f64], forecast: &[f64], anchor: Option<f64>) -> Option<f64> {
        let prepend = |values: &[f64]| -> Vec<f64> {
            anchor.into_iter().chain(values.iter().copied()).collect()
        };
        let actual = prepend(actual);
        let forecast = prepend(forecast);

        let steps = actual.len().saturating_sub(1);
        if steps == 0 {
            return None;
        }

        let correct = (1..actual.len())
            .filter(|&k| {
                sign(actual[k] - actual[k - 1]) == sign(forecast[k] - forecast[k - 1])
            })
            .count();

        Some(correct as f64 / steps as f64)
    }

    /// 平均绝对百分比误差 (MAPE, %)
    ///
    /// 只统计 `|actual| > 1e-8` 的点。收益率这类接近零的序列会让 MAPE 发散，
    /// 因此它只作参考，不能作为主要指标。
    pub fn mean_absolute_percentage_error(actual: &[f64], forecast: &[f64]) -> Option<f64> {
        let terms: Vec<f64> = actual
            .iter()
            .zip(forecast)
            .filter(|(a, _)| a.abs() > MAPE_EPSILON)
            .map(|(a, f)| ((a - f) / a).abs())
            .collect();

        if terms.is_empty() {
            return None;
        }

        let mape = terms.iter().sum::<f64>() / terms.len() as f64 * 100.0;
        mape.is_finite().then_some(mape)
    }
}

fn sign(v: f64) -> i8 {
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}
