//! # Rolling-Window Forecasting
//!
//! 这个 crate 实现无信息泄漏的滚动窗口预测实验：按时间切分训练/测试区间，
//! 只从训练区间构建滑动窗口样本，对测试区间做纯递归的多步预测并评估。
//!
//! ## 主要模块
//!
//! - `series`: 序列加载与校验
//! - `timeseries`: 训练/测试切分与滑动窗口构建
//! - `preprocessing`: 只在训练窗口上拟合的缩放器
//! - `models`: 可互换的回归模型
//! - `forecaster`: 递归多步预测
//! - `evaluation`: 评估指标
//! - `runner`: 实验编排与报告
//! - `config`: 实验配置

pub mod config;
pub mod evaluation;
pub mod forecaster;
pub mod models;
pub mod preprocessing;
pub mod runner;
pub mod series;
pub mod timeseries;
pub mod types;

pub use config::ExperimentConfig;
pub use runner::{ExperimentReport, ExperimentRunner};
pub use series::{Observation, Series, SeriesStore};
pub use types::{
    ExperimentResult, ForecastError, ForecastResult, Metrics, RunStatus, SkippedSeries,
};
