//! 传统机器学习模型

use crate::models::{check_predict_width, check_training_shape, Regressor};
use crate::types::{CancelToken, ForecastError, ForecastResult};
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// 持续性基线：预测值等于窗口最后一个值
#[derive(Debug, Clone, Default)]
pub struct PersistenceModel {
    n_features: Option<usize>,
}

impl PersistenceModel {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Regressor for PersistenceModel {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> ForecastResult<()> {
        check_training_shape(x, y)?;
        self.n_features = Some(x.ncols());
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> ForecastResult<Array1<f64>> {
        check_predict_width(self.n_features, x)?;
        Ok(x.column(x.ncols() - 1).to_owned())
    }
}

/// 线性回归配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearConfig {
    /// L2 正则系数（不作用于截距）
    pub ridge: f64,
}

impl Default for LinearConfig {
    fn default() -> Self {
        Self { ridge: 1e-3 }
    }
}

/// 线性回归模型（带截距的岭回归，SVD 最小二乘求解）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearRegression {
    config: LinearConfig,
    weights: Option<Array1<f64>>,
    bias: Option<f64>,
}

impl LinearRegression {
    pub fn new(config: LinearConfig) -> Self {
        Self {
            config,
            weights: None,
            bias: None,
        }
    }

    pub fn weights(&self) -> Option<&Array1<f64>> {
        self.weights.as_ref()
    }
}

impl Default for LinearRegression {
    fn default() -> Self {
        Self::new(LinearConfig::default())
    }
}

impl Regressor for LinearRegression {
    fn fit(&mut self, x_train: &Array2<f64>, y_train: &Array1<f64>) -> ForecastResult<()> {
        check_training_shape(x_train, y_train)?;
        if self.config.ridge < 0.0 || !self.config.ridge.is_finite() {
            return Err(ForecastError::ModelFit(format!(
                "无效的正则系数: {}",
                self.config.ridge
            )));
        }

        // 添加截距项；岭惩罚以增广行的形式加入，不作用于截距
        let n_samples = x_train.nrows();
        let n_features = x_train.ncols();
        let penalty = self.config.ridge.sqrt();
        let design = DMatrix::from_fn(n_samples + n_features, n_features + 1, |i, j| {
            if i < n_samples {
                if j == 0 {
                    1.0
                } else {
                    x_train[[i, j - 1]]
                }
            } else if j == i - n_samples + 1 {
                penalty
            } else {
                0.0
            }
        });
        let target = DVector::from_fn(n_samples + n_features, |i, _| {
            if i < n_samples {
                y_train[i]
            } else {
                0.0
            }
        });

        // 使用 SVD 求解最小二乘
        let params = least_squares_svd(design, &target)?;

        self.bias = Some(params[0]);
        self.weights = Some(params.iter().skip(1).copied().collect());

        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> ForecastResult<Array1<f64>> {
        let weights = self
            .weights
            .as_ref()
            .ok_or_else(|| ForecastError::ModelPredict("模型未训练".to_string()))?;
        let bias = self
            .bias
            .ok_or_else(|| ForecastError::ModelPredict("模型未训练".to_string()))?;
        check_predict_width(Some(weights.len()), x)?;

        Ok(x.dot(weights) + bias)
    }
}

/// SVD 最小二乘，设计矩阵秩亏时返回训练错误
fn least_squares_svd(design: DMatrix<f64>, target: &DVector<f64>) -> ForecastResult<DVector<f64>> {
    let n_params = design.ncols();
    let svd = design.svd(true, true);

    let tolerance = svd.singular_values.max() * 1e-10;
    if svd.rank(tolerance) < n_params {
        return Err(ForecastError::ModelFit("设计矩阵秩亏，无法求解".to_string()));
    }

    let solution = svd
        .solve(target, tolerance)
        .map_err(|e| ForecastError::ModelFit(format!("最小二乘求解失败: {}", e)))?;

    if solution.iter().any(|v| !v.is_finite()) {
        return Err(ForecastError::ModelFit("求解结果包含非有限值".to_string()));
    }

    Ok(solution)
}

/// 随机森林配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    /// 每次分裂随机考虑的特征数，缺省使用全部特征
    pub max_features: Option<usize>,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 50,
            max_depth: 6,
            min_samples_split: 4,
            max_features: None,
        }
    }
}

/// 随机森林回归模型
#[derive(Debug, Clone)]
pub struct RandomForestRegressor {
    config: ForestConfig,
    seed: u64,
    trees: Vec<DecisionTree>,
    n_features: Option<usize>,
    cancel: CancelToken,
}

impl RandomForestRegressor {
    pub fn new(config: ForestConfig, seed: u64) -> Self {
        Self {
            config,
            seed,
            trees: Vec::new(),
            n_features: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn bootstrap_indices(n_samples: usize, rng: &mut impl Rng) -> Vec<usize> {
        (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect()
    }
}

impl Regressor for RandomForestRegressor {
    fn fit(&mut self, x_train: &Array2<f64>, y_train: &Array1<f64>) -> ForecastResult<()> {
        check_training_shape(x_train, y_train)?;
        if self.config.n_trees == 0 {
            return Err(ForecastError::ModelFit("n_trees 必须大于 0".to_string()));
        }

        self.trees.clear();
        let mut rng = StdRng::seed_from_u64(self.seed);

        for _ in 0..self.config.n_trees {
            self.cancel.check()?;

            let indices = Self::bootstrap_indices(x_train.nrows(), &mut rng);
            let mut tree = DecisionTree::new(
                self.config.max_depth,
                self.config.min_samples_split,
                self.config.max_features,
            );
            tree.fit_indices(x_train, y_train, indices, &mut rng);
            self.trees.push(tree);
        }

        self.n_features = Some(x_train.ncols());
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> ForecastResult<Array1<f64>> {
        check_predict_width(self.n_features, x)?;

        // 对每棵树的预测求平均
        let mut predictions = Array1::<f64>::zeros(x.nrows());
        for tree in &self.trees {
            for (i, row) in x.axis_iter(Axis(0)).enumerate() {
                predictions[i] += tree.predict_row(&row)?;
            }
        }

        Ok(predictions / self.trees.len() as f64)
    }
}

/// 决策树节点
#[derive(Debug, Clone, Serialize, Deserialize)]
enum TreeNode {
    Leaf {
        value: f64,
    },
    Internal {
        feature_idx: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

/// 决策树回归模型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    max_depth: usize,
    min_samples_split: usize,
    max_features: Option<usize>,
    root: Option<TreeNode>,
}

impl DecisionTree {
    pub fn new(max_depth: usize, min_samples_split: usize, max_features: Option<usize>) -> Self {
        Self {
            max_depth,
            min_samples_split,
            max_features,
            root: None,
        }
    }

    fn fit_indices(
        &mut self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        mut indices: Vec<usize>,
        rng: &mut impl Rng,
    ) {
        self.root = Some(self.build_tree(x, y, &mut indices, 0, rng));
    }

    fn leaf(y: &Array1<f64>, indices: &[usize]) -> TreeNode {
        let mean = indices.iter().map(|&i| y[i]).sum::<f64>() / indices.len() as f64;
        TreeNode::Leaf { value: mean }
    }

    fn build_tree(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &mut [usize],
        depth: usize,
        rng: &mut impl Rng,
    ) -> TreeNode {
        // 停止条件
        if depth >= self.max_depth || indices.len() < self.min_samples_split.max(2) {
            return Self::leaf(y, indices);
        }

        let features: Vec<usize> = match self.max_features {
            Some(k) if k > 0 && k < x.ncols() => sample(rng, x.ncols(), k).into_vec(),
            _ => (0..x.ncols()).collect(),
        };

        // 寻找最佳分割，找不到时创建叶子节点
        let Some((feature_idx, threshold)) = self.find_best_split(x, y, indices, &features) else {
            return Self::leaf(y, indices);
        };

        indices.sort_by(|&a, &b| {
            (x[[a, feature_idx]] > threshold).cmp(&(x[[b, feature_idx]] > threshold))
        });
        let n_left = indices
            .iter()
            .take_while(|&&i| x[[i, feature_idx]] <= threshold)
            .count();

        if n_left == 0 || n_left == indices.len() {
            return Self::leaf(y, indices);
        }

        let (left_indices, right_indices) = indices.split_at_mut(n_left);
        let left = Box::new(self.build_tree(x, y, left_indices, depth + 1, rng));
        let right = Box::new(self.build_tree(x, y, right_indices, depth + 1, rng));

        TreeNode::Internal {
            feature_idx,
            threshold,
            left,
            right,
        }
    }

    /// 按特征排序后用前缀和扫描，返回平方误差和最小的 (特征, 阈值)
    fn find_best_split(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
        features: &[usize],
    ) -> Option<(usize, f64)> {
        let n = indices.len();
        let total_sum: f64 = indices.iter().map(|&i| y[i]).sum();
        let total_sq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();
        let parent_sse = total_sq - total_sum * total_sum / n as f64;

        let mut best_sse = parent_sse;
        let mut best = None;
        let mut order = indices.to_vec();

        for &feature_idx in features {
            order.sort_by(|&a, &b| x[[a, feature_idx]].total_cmp(&x[[b, feature_idx]]));

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for k in 1..n {
                let prev = order[k - 1];
                left_sum += y[prev];
                left_sq += y[prev] * y[prev];

                let (lo, hi) = (x[[prev, feature_idx]], x[[order[k], feature_idx]]);
                if lo >= hi {
                    continue;
                }

                let right_sum = total_sum - left_sum;
                let right_sq = total_sq - left_sq;
                let sse = (left_sq - left_sum * left_sum / k as f64)
                    + (right_sq - right_sum * right_sum / (n - k) as f64);

                if sse < best_sse - 1e-12 {
                    best_sse = sse;
                    best = Some((feature_idx, lo + (hi - lo) / 2.0));
                }
            }
        }

        best
    }

    fn predict_row(&self, row: &ArrayView1<f64>) -> ForecastResult<f64> {
        let mut node = self
            .root
            .as_ref()
            .ok_or_else(|| ForecastError::ModelPredict("模型未训练".to_string()))?;

        loop {
            match node {
                TreeNode::Leaf { value } => return Ok(*value),
                TreeNode::Internal {
                    feature_idx,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature_idx] <= *threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }
}

/// 核回归配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// 高斯核带宽
    pub bandwidth: f64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self { bandwidth: 1.0 }
    }
}

/// Nadaraya–Watson 高斯核回归
#[derive(Debug, Clone)]
pub struct KernelRegressor {
    config: KernelConfig,
    x_train: Option<Array2<f64>>,
    y_train: Option<Array1<f64>>,
}

impl KernelRegressor {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            x_train: None,
            y_train: None,
        }
    }
}

impl Regressor for KernelRegressor {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> ForecastResult<()> {
        check_training_shape(x, y)?;
        if !(self.config.bandwidth > 0.0 && self.config.bandwidth.is_finite()) {
            return Err(ForecastError::ModelFit(format!(
                "无效的核带宽: {}",
                self.config.bandwidth
            )));
        }

        self.x_train = Some(x.clone());
        self.y_train = Some(y.clone());
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> ForecastResult<Array1<f64>> {
        check_predict_width(self.x_train.as_ref().map(|t| t.ncols()), x)?;
        let (x_train, y_train) = match (&self.x_train, &self.y_train) {
            (Some(x_train), Some(y_train)) => (x_train, y_train),
            _ => return Err(ForecastError::ModelPredict("模型未训练".to_string())),
        };

        let two_h2 = 2.0 * self.config.bandwidth * self.config.bandwidth;
        let mut predictions = Array1::<f64>::zeros(x.nrows());

        for (i, row) in x.axis_iter(Axis(0)).enumerate() {
            let distances: Vec<f64> = x_train
                .axis_iter(Axis(0))
                .map(|train_row| {
                    train_row
                        .iter()
                        .zip(row.iter())
                        .map(|(a, b)| (a - b) * (a - b))
                        .sum()
                })
                .collect();

            // 减去最小距离，保证最近样本的权重为 1，不会全部下溢
            let min_dist = distances.iter().copied().fold(f64::INFINITY, f64::min);
            let mut weight_sum = 0.0;
            let mut weighted = 0.0;
            for (d, &target) in distances.iter().zip(y_train.iter()) {
                let w = (-(d - min_dist) / two_h2).exp();
                weight_sum += w;
                weighted += w * target;
            }

            predictions[i] = weighted / weight_sum;
        }

        Ok(predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_linear_regression_recovers_coefficients() {
        // y = 2 * x0 - x1 + 3
        let x = array![[1.0, 0.0], [0.0, 1.0], [2.0, 1.0], [3.0, 5.0], [4.0, 2.0], [1.0, 3.0]];
        let y = x.map_axis(Axis(1), |row| 2.0 * row[0] - row[1] + 3.0);

        let mut model = LinearRegression::new(LinearConfig { ridge: 0.0 });
        model.fit(&x, &y).unwrap();

        let weights = model.weights().unwrap();
        assert!((weights[0] - 2.0).abs() < 1e-8);
        assert!((weights[1] + 1.0).abs() < 1e-8);

        let pred = model.predict(&array![[10.0, 4.0]]).unwrap();
        assert!((pred[0] - 19.0).abs() < 1e-8);
    }

    #[test]
    fn test_linear_regression_singular_without_ridge() {
        // 两列完全相同
        let x = array![[1.0, 1.0], [2.0, 2.0], [3.0, 3.0]];
        let y = array![1.0, 2.0, 3.0];

        let mut model = LinearRegression::new(LinearConfig { ridge: 0.0 });
        assert!(matches!(model.fit(&x, &y), Err(ForecastError::ModelFit(_))));

        let mut ridge = LinearRegression::new(LinearConfig { ridge: 1e-3 });
        ridge.fit(&x, &y).unwrap();
        let pred = ridge.predict(&array![[2.0, 2.0]]).unwrap();
        assert!((pred[0] - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_persistence_returns_last_column() {
        let mut model = PersistenceModel::new();
        model.fit(&array![[1.0, 2.0, 3.0]], &array![4.0]).unwrap();
        let pred = model.predict(&array![[7.0, 8.0, 9.0], [1.0, 1.0, 0.5]]).unwrap();
        assert_eq!(pred, array![9.0, 0.5]);
    }

    #[test]
    fn test_decision_tree_step_function() {
        let x = array![[0.0], [1.0], [2.0], [3.0], [10.0], [11.0], [12.0], [13.0]];
        let y = array![1.0, 1.0, 1.0, 1.0, 5.0, 5.0, 5.0, 5.0];

        let mut tree = DecisionTree::new(3, 2, None);
        let mut rng = StdRng::seed_from_u64(0);
        tree.fit_indices(&x, &y, (0..8).collect(), &mut rng);

        assert_eq!(tree.predict_row(&array![2.5].view()).unwrap(), 1.0);
        assert_eq!(tree.predict_row(&array![12.5].view()).unwrap(), 5.0);
    }

    #[test]
    fn test_random_forest_is_deterministic_for_seed() {
        let x = Array2::from_shape_fn((40, 3), |(i, j)| ((i * 7 + j * 3) % 11) as f64);
        let y = x.map_axis(Axis(1), |row| row.sum());
        let config = ForestConfig {
            n_trees: 10,
            max_features: Some(2),
            ..ForestConfig::default()
        };

        let mut a = RandomForestRegressor::new(config.clone(), 42);
        let mut b = RandomForestRegressor::new(config, 42);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();

        let query = array![[1.0, 5.0, 9.0], [10.0, 0.0, 3.0]];
        assert_eq!(a.predict(&query).unwrap(), b.predict(&query).unwrap());
    }

    #[test]
    fn test_random_forest_respects_cancel() {
        let token = CancelToken::new();
        token.cancel();

        let mut model = RandomForestRegressor::new(ForestConfig::default(), 1).with_cancel(token);
        let err = model.fit(&array![[1.0], [2.0]], &array![1.0, 2.0]).unwrap_err();
        assert!(matches!(err, ForecastError::Cancelled));
    }

    #[test]
    fn test_kernel_regression_interpolates_neighbours() {
        let x = array![[0.0], [1.0], [2.0], [100.0]];
        let y = array![0.0, 1.0, 2.0, 50.0];

        let mut model = KernelRegressor::new(KernelConfig { bandwidth: 0.5 });
        model.fit(&x, &y).unwrap();

        let pred = model.predict(&array![[1.0], [1000.0]]).unwrap();
        assert!((pred[0] - 1.0).abs() < 1e-6);
        // 远离所有训练点时退化为最近样本
        assert!((pred[1] - 50.0).abs() < 1e-6);
    }

    #[test]
    fn test_kernel_rejects_bad_bandwidth() {
        let mut model = KernelRegressor::new(KernelConfig { bandwidth: 0.0 });
        assert!(matches!(
            model.fit(&array![[1.0]], &array![1.0]),
            Err(ForecastError::ModelFit(_))
        ));
    }
}
