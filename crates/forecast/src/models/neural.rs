//! 神经网络模型
//!
//! 单隐层 tanh 前馈网络，在 CPU 上用 candle 以 AdamW 全批量训练。权重初始化
//! 使用固定种子，同样的数据和种子得到同样的模型。

use crate::models::{check_predict_width, check_training_shape, Regressor};
use crate::types::{CancelToken, ForecastError, ForecastResult};
use candle_core::{DType, Device, Module, Tensor, Var};
use candle_nn::{AdamW, Linear, Optimizer, ParamsAdamW};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// MLP 模型配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MlpConfig {
    pub hidden_size: usize,
    pub learning_rate: f64,
    pub epochs: usize,
    /// AdamW 权重衰减
    pub weight_decay: f64,
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            hidden_size: 16,
            learning_rate: 0.01,
            epochs: 500,
            weight_decay: 1e-4,
        }
    }
}

/// 网络结构
struct MlpNet {
    hidden: Linear,
    output: Linear,
    input_size: usize,
}

impl MlpNet {
    /// Xavier 均匀初始化，返回网络和待训练的变量
    fn new(
        input_size: usize,
        hidden_size: usize,
        rng: &mut impl Rng,
        device: &Device,
    ) -> candle_core::Result<(Self, Vec<Var>)> {
        let limit1 = (6.0 / (input_size + hidden_size) as f64).sqrt();
        let limit2 = (6.0 / (hidden_size + 1) as f64).sqrt();

        let w1: Vec<f64> = (0..hidden_size * input_size)
            .map(|_| rng.gen_range(-limit1..limit1))
            .collect();
        let w2: Vec<f64> = (0..hidden_size).map(|_| rng.gen_range(-limit2..limit2)).collect();

        let w1 = Var::from_tensor(&Tensor::from_vec(w1, (hidden_size, input_size), device)?)?;
        let b1 = Var::zeros(hidden_size, DType::F64, device)?;
        let w2 = Var::from_tensor(&Tensor::from_vec(w2, (1, hidden_size), device)?)?;
        let b2 = Var::zeros(1, DType::F64, device)?;

        let net = Self {
            hidden: Linear::new(w1.as_tensor().clone(), Some(b1.as_tensor().clone())),
            output: Linear::new(w2.as_tensor().clone(), Some(b2.as_tensor().clone())),
            input_size,
        };
        Ok((net, vec![w1, b1, w2, b2]))
    }

    /// 输入 (样本数, 特征数)，输出 (样本数,)
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let hidden = self.hidden.forward(x)?.tanh()?;
        self.output.forward(&hidden)?.squeeze(1)
    }
}

fn to_tensor(x: &Array2<f64>, device: &Device) -> candle_core::Result<Tensor> {
    let data: Vec<f64> = x.iter().copied().collect();
    Tensor::from_vec(data, (x.nrows(), x.ncols()), device)
}

/// MLP 回归模型
pub struct MlpRegressor {
    config: MlpConfig,
    seed: u64,
    net: Option<MlpNet>,
    device: Device,
    cancel: CancelToken,
}

impl MlpRegressor {
    pub fn new(config: MlpConfig, seed: u64) -> Self {
        Self {
            config,
            seed,
            net: None,
            device: Device::Cpu,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl Regressor for MlpRegressor {
    fn fit(&mut self, x_train: &Array2<f64>, y_train: &Array1<f64>) -> ForecastResult<()> {
        check_training_shape(x_train, y_train)?;
        if self.config.hidden_size == 0 || self.config.epochs == 0 {
            return Err(ForecastError::ModelFit(
                "hidden_size 和 epochs 必须大于 0".to_string(),
            ));
        }

        let x = to_tensor(x_train, &self.device)?;
        let y = Tensor::from_vec(y_train.to_vec(), y_train.len(), &self.device)?;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let (net, vars) =
            MlpNet::new(x_train.ncols(), self.config.hidden_size, &mut rng, &self.device)?;

        let params = ParamsAdamW {
            lr: self.config.learning_rate,
            weight_decay: self.config.weight_decay,
            ..Default::default()
        };
        let mut optimizer = AdamW::new(vars, params)?;

        // 训练循环
        for epoch in 0..self.config.epochs {
            self.cancel.check()?;

            let output = net.forward(&x)?;
            let loss = candle_nn::loss::mse(&output, &y)?;
            let loss_value = loss.to_scalar::<f64>()?;

            if !loss_value.is_finite() {
                return Err(ForecastError::ModelFit(format!(
                    "第 {} 轮损失发散: {}",
                    epoch + 1,
                    loss_value
                )));
            }

            optimizer.backward_step(&loss)?;

            if (epoch + 1) % 100 == 0 {
                tracing::debug!(
                    "Epoch {}/{}, Loss: {:.6}",
                    epoch + 1,
                    self.config.epochs,
                    loss_value
                );
            }
        }

        self.net = Some(net);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> ForecastResult<Array1<f64>> {
        check_predict_width(self.net.as_ref().map(|net| net.input_size), x)?;
        let net = self
            .net
            .as_ref()
            .ok_or_else(|| ForecastError::ModelPredict("模型未训练".to_string()))?;

        let output = net.forward(&to_tensor(x, &self.device)?)?;
        Ok(Array1::from_vec(output.to_vec1::<f64>()?))
    }
}
