//! 可互换的回归模型
//!
//! 所有模型都实现 [`Regressor`]；可用的模型种类是一个封闭集合 [`ModelKind`]，
//! 由配置选择。

pub mod neural;
pub mod traditional;

use crate::types::{CancelToken, ForecastError, ForecastResult};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

pub use neural::{MlpConfig, MlpRegressor};
pub use traditional::{
    ForestConfig, KernelConfig, KernelRegressor, LinearConfig, LinearRegression,
    PersistenceModel, RandomForestRegressor,
};

/// 回归模型接口
///
/// 取消是协作式的：运行器超时后只会置位 [`CancelToken`]，无法强行终止
/// 工作线程。迭代训练的实现应在每轮（每棵树、每个 epoch）调用
/// `cancel.check()?`，否则超时的组合会一直占用并发名额直到 `fit` 自行返回。
pub trait Regressor: Send {
    /// 训练模型，`x` 为 (样本数, 特征数)，`y` 为 (样本数,)
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> ForecastResult<()>;

    /// 预测，每行输出一个标量
    fn predict(&self, x: &Array2<f64>) -> ForecastResult<Array1<f64>>;
}

/// 检查训练数据形状
pub(crate) fn check_training_shape(x: &Array2<f64>, y: &Array1<f64>) -> ForecastResult<()> {
    if x.nrows() != y.len() {
        return Err(ForecastError::DimensionMismatch {
            expected: x.nrows(),
            actual: y.len(),
        });
    }
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(ForecastError::ModelFit("训练数据为空".to_string()));
    }
    Ok(())
}

/// 检查预测输入宽度是否与训练时一致
pub(crate) fn check_predict_width(fitted: Option<usize>, x: &Array2<f64>) -> ForecastResult<()> {
    let expected = fitted.ok_or_else(|| ForecastError::ModelPredict("模型未训练".to_string()))?;
    if x.ncols() != expected {
        return Err(ForecastError::DimensionMismatch {
            expected,
            actual: x.ncols(),
        });
    }
    Ok(())
}

/// 模型种类及其超参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelKind {
    /// 以窗口最后一个值作为预测（基线）
    Persistence,
    Linear(LinearConfig),
    RandomForest(ForestConfig),
    Kernel(KernelConfig),
    Mlp(MlpConfig),
}

impl ModelKind {
    pub fn default_name(&self) -> &'static str {
        match self {
            ModelKind::Persistence => "persistence",
            ModelKind::Linear(_) => "linear",
            ModelKind::RandomForest(_) => "random_forest",
            ModelKind::Kernel(_) => "kernel",
            ModelKind::Mlp(_) => "mlp",
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.default_name())
    }
}

/// 配置中的一个模型条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// 报告中使用的名称，缺省为模型种类名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub kind: ModelKind,
}

impl ModelSpec {
    pub fn new(kind: ModelKind) -> Self {
        Self { name: None, kind }
    }

    pub fn named(name: &str, kind: ModelKind) -> Self {
        Self {
            name: Some(name.to_string()),
            kind,
        }
    }
}

impl From<ModelKind> for ModelSpec {
    fn from(kind: ModelKind) -> Self {
        Self::new(kind)
    }
}

/// 为每个组合创建全新模型实例
pub trait ModelFactory: Send + Sync {
    fn name(&self) -> String;

    fn build(&self, seed: u64, cancel: CancelToken) -> Box<dyn Regressor>;
}

impl ModelFactory for ModelSpec {
    fn name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.kind.default_name().to_string())
    }

    fn build(&self, seed: u64, cancel: CancelToken) -> Box<dyn Regressor> {
        match &self.kind {
            ModelKind::Persistence => Box::new(PersistenceModel::new()),
            ModelKind::Linear(config) => Box::new(LinearRegression::new(config.clone())),
            ModelKind::RandomForest(config) => {
                Box::new(RandomForestRegressor::new(config.clone(), seed).with_cancel(cancel))
            }
            ModelKind::Kernel(config) => Box::new(KernelRegressor::new(config.clone())),
            ModelKind::Mlp(config) => {
                Box::new(MlpRegressor::new(config.clone(), seed).with_cancel(cancel))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_model_spec_from_json() {
        let specs: Vec<ModelSpec> = serde_json::from_str(
            r#"[
                {"type": "persistence"},
                {"type": "linear", "ridge": 0.5},
                {"type": "random_forest", "name": "rf_small", "n_trees": 5},
                {"type": "mlp"}
            ]"#,
        )
        .unwrap();

        assert_eq!(specs.len(), 4);
        assert_eq!(specs[0].name(), "persistence");
        assert_eq!(
            specs[1].kind,
            ModelKind::Linear(LinearConfig { ridge: 0.5 })
        );
        assert_eq!(specs[2].name(), "rf_small");
        match &specs[2].kind {
            ModelKind::RandomForest(config) => {
                assert_eq!(config.n_trees, 5);
                assert_eq!(config.max_depth, ForestConfig::default().max_depth);
            }
            other => panic!("unexpected kind: {}", other),
        }
        assert_eq!(specs[3].name(), "mlp");
    }

    #[test]
    fn test_every_kind_fits_and_predicts() {
        let x = array![[1.0, 2.0], [2.0, 3.0], [3.0, 4.0], [4.0, 5.0], [5.0, 6.0], [6.0, 7.0]];
        let y = array![3.0, 4.0, 5.0, 6.0, 7.0, 8.0];

        let kinds = vec![
            ModelKind::Persistence,
            ModelKind::Linear(LinearConfig::default()),
            ModelKind::RandomForest(ForestConfig {
                n_trees: 4,
                ..ForestConfig::default()
            }),
            ModelKind::Kernel(KernelConfig::default()),
            ModelKind::Mlp(MlpConfig {
                epochs: 50,
                ..MlpConfig::default()
            }),
        ];

        for kind in kinds {
            let spec = ModelSpec::new(kind);
            let mut model = spec.build(7, CancelToken::new());
            model.fit(&x, &y).unwrap();

            let pred = model.predict(&array![[3.0, 4.0]]).unwrap();
            assert_eq!(pred.len(), 1);
            assert!(pred[0].is_finite(), "{} produced {}", spec.name(), pred[0]);

            let err = model.predict(&array![[1.0, 2.0, 3.0]]).unwrap_err();
            assert!(
                matches!(err, ForecastError::DimensionMismatch { expected: 2, actual: 3 }),
                "{}: {}",
                spec.name(),
                err
            );
        }
    }

    #[test]
    fn test_predict_before_fit() {
        let model = ModelSpec::new(ModelKind::Linear(LinearConfig::default()))
            .build(0, CancelToken::new());
        assert!(matches!(
            model.predict(&array![[1.0]]),
            Err(ForecastError::ModelPredict(_))
        ));
    }
}
