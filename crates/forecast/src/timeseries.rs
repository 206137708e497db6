//! 时间序列切分与滑动窗口构建

use crate::series::{Observation, Series};
use crate::types::{ForecastError, ForecastResult};
use chrono::{DateTime, Duration, Utc};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// 训练/测试的时间边界
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPlan {
    /// 测试区间的起始下标，等于 `len - horizon`
    pub split_index: usize,
    pub horizon: usize,
}

/// 切分结果，借用原序列
#[derive(Debug, Clone, Copy)]
pub struct Split<'a> {
    pub plan: SplitPlan,
    pub train: &'a [Observation],
    pub test: &'a [Observation],
}

impl<'a> Split<'a> {
    /// 训练区间最后 `window_size` 个原始值，作为递归预测的初始窗口
    pub fn seed_window(&self, window_size: usize) -> ForecastResult<Vec<f64>> {
        if window_size == 0 || window_size > self.train.len() {
            return Err(ForecastError::Config(format!(
                "窗口大小 {} 超出训练区间长度 {}",
                window_size,
                self.train.len()
            )));
        }
        Ok(self.train[self.train.len() - window_size..]
            .iter()
            .map(|o| o.value)
            .collect())
    }

    pub fn test_values(&self) -> Vec<f64> {
        self.test.iter().map(|o| o.value).collect()
    }

    /// 训练区间最后一个真实值
    pub fn last_train_value(&self) -> Option<f64> {
        self.train.last().map(|o| o.value)
    }
}

/// 按 horizon 计算唯一的训练/测试边界
pub struct SplitPlanner;

impl SplitPlanner {
    /// 计算切分计划
    ///
    /// 要求 `0 < horizon < len`，否则返回配置错误。
    pub fn plan(len: usize, horizon: usize) -> ForecastResult<SplitPlan> {
        if horizon == 0 {
            return Err(ForecastError::Config("horizon 必须大于 0".to_string()));
        }
        if horizon >= len {
            return Err(ForecastError::Config(format!(
                "horizon ({}) 必须小于序列长度 ({})",
                horizon, len
            )));
        }

        Ok(SplitPlan {
            split_index: len - horizon,
            horizon,
        })
    }

    /// 计算切分计划，并要求训练区间长于所有窗口大小
    pub fn plan_for_windows(
        len: usize,
        horizon: usize,
        window_sizes: &[usize],
    ) -> ForecastResult<SplitPlan> {
        let plan = Self::plan(len, horizon)?;

        if let Some(&max_window) = window_sizes.iter().max() {
            if plan.split_index <= max_window {
                return Err(ForecastError::Config(format!(
                    "训练区间长度 ({}) 必须大于最大窗口大小 ({})",
                    plan.split_index, max_window
                )));
            }
        }

        Ok(plan)
    }

    /// 切分序列：`train = series[..split_index]`，`test = series[split_index..]`
    pub fn split(series: &Series, horizon: usize) -> ForecastResult<Split<'_>> {
        let plan = Self::plan(series.len(), horizon)?;
        let (train, test) = series.observations().split_at(plan.split_index);

        Ok(Split { plan, train, test })
    }
}

/// 一个训练样本：连续 `window_size` 个原始值 → 下一个值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSample {
    pub window: Vec<f64>,
    pub target: f64,
    /// 目标值在输入切片中的下标
    pub target_index: usize,
    pub target_timestamp: DateTime<Utc>,
}

/// 同一窗口大小下的全部样本
#[derive(Debug, Clone)]
pub struct WindowSet {
    pub window_size: usize,
    pub samples: Vec<WindowSample>,
    /// 被拒绝的窗口数（跨越缺口或含非有限值）
    pub dropped: usize,
}

impl WindowSet {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// 转换为设计矩阵
    ///
    /// # 返回
    /// - X: (样本数, 窗口大小)
    /// - y: (样本数,)
    pub fn to_arrays(&self) -> (Array2<f64>, Array1<f64>) {
        let n = self.samples.len();
        let x = Array2::from_shape_fn((n, self.window_size), |(i, j)| self.samples[i].window[j]);
        let y = Array1::from_iter(self.samples.iter().map(|s| s.target));
        (x, y)
    }

    /// 窗口与目标中出现的全部值（用于拟合缩放器）
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples
            .iter()
            .flat_map(|s| s.window.iter().copied().chain(std::iter::once(s.target)))
    }
}

/// 滑动窗口构建器
///
/// 只接受调用者传入的切片；调用者只传训练区间，因此目标下标不可能落入测试区间。
#[derive(Debug, Clone, Copy)]
pub struct WindowSequencer {
    window_size: usize,
    max_gap: Option<Duration>,
}

impl WindowSequencer {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            max_gap: None,
        }
    }

    /// 相邻时间戳间隔超过 `max_gap` 视为缺失交易日，跨越缺口的窗口被拒绝
    pub fn with_max_gap(mut self, max_gap: Option<Duration>) -> Self {
        self.max_gap = max_gap;
        self
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// 构建样本：对每个 `i in [0, len - w)`，`window = s[i..i+w]`，`target = s[i+w]`
    ///
    /// `len <= w` 时返回空集合。
    pub fn make_windows(&self, observations: &[Observation]) -> WindowSet {
        let w = self.window_size;
        let mut set = WindowSet {
            window_size: w,
            samples: Vec::new(),
            dropped: 0,
        };

        if w == 0 || observations.len() <= w {
            return set;
        }

        // gap_after[k] 表示 k 与 k+1 之间存在缺口
        let gap_after: Vec<bool> = observations
            .windows(2)
            .map(|pair| match self.max_gap {
                Some(max_gap) => pair[1].timestamp - pair[0].timestamp > max_gap,
                None => false,
            })
            .collect();

        for i in 0..observations.len() - w {
            let span = &observations[i..=i + w];

            let touches_gap = gap_after[i..i + w].iter().any(|&g| g);
            let non_finite = span.iter().any(|o| !o.value.is_finite());
            if touches_gap || non_finite {
                set.dropped += 1;
                continue;
            }

            set.samples.push(WindowSample {
                window: span[..w].iter().map(|o| o.value).collect(),
                target: span[w].value,
                target_index: i + w,
                target_timestamp: span[w].timestamp,
            });
        }

        if set.dropped > 0 {
            tracing::debug!(
                "Dropped {} of {} windows (window_size = {})",
                set.dropped,
                observations.len() - w,
                w
            );
        }

        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn daily_series(values: &[f64]) -> Series {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let observations = values
            .iter()
            .enumerate()
            .map(|(i, &value)| Observation {
                timestamp: start + Duration::days(i as i64),
                value,
            })
            .collect();
        Series::from_observations("TEST", observations).unwrap()
    }

    fn integer_series() -> Series {
        let values: Vec<f64> = (100..130).map(|v| v as f64).collect();
        daily_series(&values)
    }

    #[test]
    fn test_concrete_split_scenario() {
        let series = integer_series();
        let split = SplitPlanner::split(&series, 5).unwrap();

        assert_eq!(split.plan.split_index, 25);
        assert_eq!(split.train.len(), 25);
        assert_eq!(split.train.first().unwrap().value, 100.0);
        assert_eq!(split.train.last().unwrap().value, 124.0);
        assert_eq!(split.test_values(), vec![125.0, 126.0, 127.0, 128.0, 129.0]);

        let windows = WindowSequencer::new(3).make_windows(split.train);
        assert_eq!(windows.len(), 22);
        assert_eq!(windows.samples[0].window, vec![100.0, 101.0, 102.0]);
        assert_eq!(windows.samples[0].target, 103.0);

        // 22 个窗口时最后一个样本的目标是训练区间最后一个值
        let last = windows.samples.last().unwrap();
        assert_eq!(last.window, vec![121.0, 122.0, 123.0]);
        assert_eq!(last.target, 124.0);
        assert_eq!(last.target_index, split.train.len() - 1);

        assert_eq!(split.seed_window(3).unwrap(), vec![122.0, 123.0, 124.0]);
    }

    #[test]
    fn test_split_lengths_and_ordering_for_all_horizons() {
        for n in 2..40 {
            let values: Vec<f64> = (0..n).map(|v| v as f64 * 0.5).collect();
            let series = daily_series(&values);

            for h in 1..n {
                let split = SplitPlanner::split(&series, h).unwrap();
                assert_eq!(split.train.len(), n - h);
                assert_eq!(split.test.len(), h);

                let max_train = split.train.iter().map(|o| o.timestamp).max().unwrap();
                let min_test = split.test.iter().map(|o| o.timestamp).min().unwrap();
                assert!(max_train < min_test);
            }
        }
    }

    #[test]
    fn test_window_targets_precede_test_range() {
        let series = integer_series();
        for h in 1..20 {
            let split = SplitPlanner::split(&series, h).unwrap();
            let first_test = split.test[0].timestamp;

            for w in 1..split.train.len() {
                let windows = WindowSequencer::new(w).make_windows(split.train);
                assert_eq!(windows.len(), split.train.len() - w);

                for sample in &windows.samples {
                    assert!(sample.target_index < split.plan.split_index);
                }
                let last_target = windows.samples.last().unwrap().target_timestamp;
                assert!(last_target < first_test);
            }
        }
    }

    #[test]
    fn test_horizon_out_of_range() {
        let series = integer_series();
        assert!(matches!(SplitPlanner::split(&series, 30), Err(ForecastError::Config(_))));
        assert!(matches!(SplitPlanner::split(&series, 45), Err(ForecastError::Config(_))));
        assert!(matches!(SplitPlanner::split(&series, 0), Err(ForecastError::Config(_))));
    }

    #[test]
    fn test_plan_requires_train_longer_than_windows() {
        assert!(SplitPlanner::plan_for_windows(30, 5, &[3, 24]).is_ok());
        assert!(matches!(
            SplitPlanner::plan_for_windows(30, 5, &[3, 25]),
            Err(ForecastError::Config(_))
        ));
    }

    #[test]
    fn test_short_series_yields_no_windows() {
        let series = daily_series(&[1.0, 2.0, 3.0]);
        assert!(WindowSequencer::new(3).make_windows(series.observations()).is_empty());
        assert!(WindowSequencer::new(5).make_windows(series.observations()).is_empty());
        assert_eq!(WindowSequencer::new(2).make_windows(series.observations()).len(), 1);
    }

    #[test]
    fn test_windows_spanning_gap_are_rejected() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        // 第 4 天与第 5 个观测之间缺了 10 天
        let days = [0, 1, 2, 3, 14, 15, 16, 17];
        let observations: Vec<Observation> = days
            .iter()
            .enumerate()
            .map(|(i, &d)| Observation {
                timestamp: start + Duration::days(d),
                value: i as f64,
            })
            .collect();

        let sequencer = WindowSequencer::new(2).with_max_gap(Some(Duration::days(4)));
        let windows = sequencer.make_windows(&observations);

        // 共 6 个窗口，跨越下标 3→4 的有 i=2 和 i=3
        assert_eq!(windows.len(), 4);
        assert_eq!(windows.dropped, 2);
        for sample in &windows.samples {
            assert!(sample.target_index != 4 && sample.target_index != 5);
        }

        let unchecked = WindowSequencer::new(2).make_windows(&observations);
        assert_eq!(unchecked.len(), 6);
        assert_eq!(unchecked.dropped, 0);
    }

    #[test]
    fn test_non_finite_window_dropped() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let observations: Vec<Observation> = [1.0, 2.0, f64::NAN, 4.0, 5.0, 6.0]
            .iter()
            .enumerate()
            .map(|(i, &value)| Observation {
                timestamp: start + Duration::days(i as i64),
                value,
            })
            .collect();

        let windows = WindowSequencer::new(2).make_windows(&observations);
        // i=0 (目标为 NaN)、i=1、i=2 均触及 NaN
        assert_eq!(windows.dropped, 3);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows.samples[0].window, vec![4.0, 5.0]);
    }

    #[test]
    fn test_to_arrays_shape() {
        let series = integer_series();
        let windows = WindowSequencer::new(4).make_windows(series.observations());
        let (x, y) = windows.to_arrays();

        assert_eq!(x.shape(), &[26, 4]);
        assert_eq!(y.len(), 26);
        assert_eq!(x[[0, 3]], 103.0);
        assert_eq!(y[0], 104.0);
    }
}
