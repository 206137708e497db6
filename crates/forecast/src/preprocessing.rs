//! 特征缩放

use crate::timeseries::WindowSet;
use crate::types::{ForecastError, ForecastResult};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// 缩放方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMode {
    /// 不缩放，模型直接使用原始值
    None,
    /// 标准化（减均值、除标准差）
    #[default]
    Standard,
}

/// 标准差低于该值时视为常数序列，不做除法
const MIN_STD: f64 = 1e-10;

/// 单变量序列的窗口缩放器
///
/// 只能从训练 [`WindowSet`] 拟合一次，之后只做变换。窗口值和目标值共用同一组
/// 均值/标准差，因此模型输出可以直接反变换回原始尺度。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowScaler {
    mean: f64,
    std: f64,
}

impl WindowScaler {
    pub fn fit(windows: &WindowSet) -> ForecastResult<Self> {
        let values: Array1<f64> = windows.values().collect();
        let mean = values
            .mean()
            .ok_or_else(|| ForecastError::ModelFit("缩放器拟合数据为空".to_string()))?;
        let std = values.std(0.0);

        Ok(Self {
            mean,
            std: if std < MIN_STD { 1.0 } else { std },
        })
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn std(&self) -> f64 {
        self.std
    }

    pub fn transform_value(&self, value: f64) -> f64 {
        (value - self.mean) / self.std
    }

    pub fn inverse_value(&self, value: f64) -> f64 {
        value * self.std + self.mean
    }

    /// 缩放设计矩阵（每个元素使用同一组统计量）
    pub fn transform_matrix(&self, x: &Array2<f64>) -> Array2<f64> {
        x.mapv(|v| self.transform_value(v))
    }

    pub fn transform_targets(&self, y: &Array1<f64>) -> Array1<f64> {
        y.mapv(|v| self.transform_value(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::Observation;
    use crate::timeseries::WindowSequencer;
    use chrono::{Duration, TimeZone, Utc};

    fn training_windows(values: impl IntoIterator<Item = f64>, window_size: usize) -> WindowSet {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let train: Vec<Observation> = values
            .into_iter()
            .enumerate()
            .map(|(i, value)| Observation {
                timestamp: start + Duration::days(i as i64),
                value,
            })
            .collect();
        WindowSequencer::new(window_size).make_windows(&train)
    }

    #[test]
    fn test_scaled_training_data_is_standardized() {
        let windows = training_windows((0..12).map(|v| v as f64 * 2.0 + 7.0), 3);
        let scaler = WindowScaler::fit(&windows).unwrap();
        let (x, y) = windows.to_arrays();

        let scaled_x = scaler.transform_matrix(&x);
        let scaled_y = scaler.transform_targets(&y);
        assert_eq!(scaled_x.dim(), x.dim());
        assert_eq!(scaled_y.len(), y.len());

        // 窗口值与目标值合并后均值为 0，标准差为 1
        let pooled: Array1<f64> = scaled_x.iter().chain(scaled_y.iter()).copied().collect();
        assert!(pooled.mean().unwrap().abs() < 1e-12);
        assert!((pooled.std(0.0) - 1.0).abs() < 1e-12);

        for (s, r) in scaled_y.iter().zip(y.iter()) {
            assert!((scaler.inverse_value(*s) - r).abs() < 1e-9);
        }
    }

    #[test]
    fn test_window_scaler_uses_training_statistics_only() {
        let windows = training_windows((0..10).map(|v| v as f64), 3);
        let scaler = WindowScaler::fit(&windows).unwrap();
        let mean = scaler.mean();
        let std = scaler.std();

        // 测试区间的值只做变换，统计量不变
        let far_future = 1000.0;
        let scaled = scaler.transform_value(far_future);
        assert!((scaled - (far_future - mean) / std).abs() < 1e-12);
        assert_eq!(scaler.mean(), mean);
        assert!((scaler.inverse_value(scaled) - far_future).abs() < 1e-9);
        assert!(mean < 9.0);
    }

    #[test]
    fn test_constant_series_does_not_divide_by_zero() {
        let windows = training_windows(std::iter::repeat(5.0).take(6), 2);
        let scaler = WindowScaler::fit(&windows).unwrap();
        assert_eq!(scaler.std(), 1.0);
        assert_eq!(scaler.transform_value(5.0), 0.0);
    }

    #[test]
    fn test_empty_window_set_cannot_be_fitted() {
        let windows = training_windows([1.0, 2.0], 3);
        assert!(windows.is_empty());
        assert!(matches!(
            WindowScaler::fit(&windows),
            Err(ForecastError::ModelFit(_))
        ));
    }
}
