//! 单一标的时间序列的加载与校验

use crate::types::{ForecastError, ForecastResult};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

/// 一个观测点
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// 单一标的的有序序列，加载后不可变
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    symbol: String,
    observations: Vec<Observation>,
}

impl Series {
    /// 校验并构建序列
    ///
    /// 时间戳必须严格递增（不允许重复），数值必须是有限值。
    pub fn from_observations(symbol: &str, observations: Vec<Observation>) -> ForecastResult<Self> {
        if observations.is_empty() {
            return Err(ForecastError::Data(format!("{}: 序列为空", symbol)));
        }

        for (i, obs) in observations.iter().enumerate() {
            if !obs.value.is_finite() {
                return Err(ForecastError::Data(format!(
                    "{}: 第 {} 行的数值不是有限值 ({})",
                    symbol, i, obs.value
                )));
            }
        }

        for (i, pair) in observations.windows(2).enumerate() {
            let (prev, curr) = (pair[0].timestamp, pair[1].timestamp);
            if curr == prev {
                return Err(ForecastError::Data(format!(
                    "{}: 重复的时间戳 {} (第 {} 行)",
                    symbol,
                    curr,
                    i + 1
                )));
            }
            if curr < prev {
                return Err(ForecastError::Data(format!(
                    "{}: 时间戳非单调递增 {} -> {} (第 {} 行)",
                    symbol,
                    prev,
                    curr,
                    i + 1
                )));
            }
        }

        Ok(Self {
            symbol: symbol.to_string(),
            observations,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn values(&self) -> Vec<f64> {
        self.observations.iter().map(|o| o.value).collect()
    }
}

/// 输入表中的一行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesRow {
    pub symbol: String,
    pub timestamp: String,
    pub value: f64,
}

/// 多标的原始数据表，按标的加载成 [`Series`]
#[derive(Debug, Default)]
pub struct SeriesStore {
    order: Vec<String>,
    rows: HashMap<String, Vec<SeriesRow>>,
}

impl SeriesStore {
    /// 从内存中的行构建（保留每个标的的行顺序）
    pub fn from_rows(rows: impl IntoIterator<Item = SeriesRow>) -> Self {
        let mut store = Self::default();
        for row in rows {
            if !store.rows.contains_key(&row.symbol) {
                store.order.push(row.symbol.clone());
            }
            store.rows.entry(row.symbol.clone()).or_default().push(row);
        }
        store
    }

    /// 读取 `symbol,timestamp,value` 格式的 CSV 文件
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> ForecastResult<Self> {
        let file = File::open(&path)?;
        let mut reader = csv::Reader::from_reader(file);

        let mut rows = Vec::new();
        for record in reader.deserialize() {
            let row: SeriesRow = record?;
            rows.push(row);
        }

        tracing::info!("Read {} rows from {:?}", rows.len(), path.as_ref());
        Ok(Self::from_rows(rows))
    }

    /// 所有标的（按首次出现的顺序）
    pub fn symbols(&self) -> &[String] {
        &self.order
    }

    /// 加载并校验单个标的
    pub fn load(&self, symbol: &str) -> ForecastResult<Series> {
        let rows = self
            .rows
            .get(symbol)
            .ok_or_else(|| ForecastError::Data(format!("未知标的: {}", symbol)))?;

        let observations = rows
            .iter()
            .map(|row| {
                Ok(Observation {
                    timestamp: parse_timestamp(&row.timestamp).map_err(|e| {
                        ForecastError::Data(format!("{}: {}", symbol, e))
                    })?,
                    value: row.value,
                })
            })
            .collect::<ForecastResult<Vec<_>>>()?;

        let series = Series::from_observations(symbol, observations)?;
        tracing::debug!("Loaded {} observations for {}", series.len(), symbol);
        Ok(series)
    }

    /// 逐个加载标的，每个标的的结果互不影响
    pub fn load_all(&self, symbols: &[String]) -> Vec<(String, ForecastResult<Series>)> {
        symbols
            .iter()
            .map(|symbol| (symbol.clone(), self.load(symbol)))
            .collect()
    }
}

/// 解析 RFC 3339 或 `YYYY-MM-DD`（按 UTC 零点）格式的时间戳
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("无法解析时间戳: {}", raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn row(symbol: &str, timestamp: &str, value: f64) -> SeriesRow {
        SeriesRow {
            symbol: symbol.to_string(),
            timestamp: timestamp.to_string(),
            value,
        }
    }

    #[test]
    fn test_load_valid_series() {
        let store = SeriesStore::from_rows(vec![
            row("VNM", "2024-01-02", 70.0),
            row("FPT", "2024-01-02", 95.0),
            row("VNM", "2024-01-03", 71.5),
        ]);

        assert_eq!(store.symbols(), &["VNM".to_string(), "FPT".to_string()]);

        let series = store.load("VNM").unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.values(), vec![70.0, 71.5]);
    }

    #[test]
    fn test_duplicate_timestamp_rejected() {
        let store = SeriesStore::from_rows(vec![
            row("VNM", "2024-01-02", 70.0),
            row("VNM", "2024-01-02", 71.0),
        ]);

        let err = store.load("VNM").unwrap_err();
        assert!(matches!(err, ForecastError::Data(_)));
    }

    #[test]
    fn test_non_monotonic_rejected() {
        let store = SeriesStore::from_rows(vec![
            row("VNM", "2024-01-03", 70.0),
            row("VNM", "2024-01-02", 71.0),
        ]);

        assert!(matches!(store.load("VNM"), Err(ForecastError::Data(_))));
    }

    #[test]
    fn test_non_finite_rejected() {
        let store = SeriesStore::from_rows(vec![
            row("VNM", "2024-01-02", 70.0),
            row("VNM", "2024-01-03", f64::NAN),
        ]);
        assert!(matches!(store.load("VNM"), Err(ForecastError::Data(_))));

        let store = SeriesStore::from_rows(vec![row("VNM", "2024-01-02", f64::INFINITY)]);
        assert!(matches!(store.load("VNM"), Err(ForecastError::Data(_))));
    }

    #[test]
    fn test_unknown_symbol() {
        let store = SeriesStore::from_rows(vec![row("VNM", "2024-01-02", 70.0)]);
        assert!(matches!(store.load("HPG"), Err(ForecastError::Data(_))));
    }

    #[test]
    fn test_load_all_keeps_per_symbol_results() {
        let store = SeriesStore::from_rows(vec![
            row("VNM", "2024-01-02", 70.0),
            row("VNM", "2024-01-03", 71.0),
            row("FPT", "2024-01-03", 95.0),
            row("FPT", "2024-01-02", 94.0),
        ]);

        let loaded = store.load_all(&["VNM".to_string(), "FPT".to_string(), "HPG".to_string()]);
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].0, "VNM");
        assert_eq!(loaded[0].1.as_ref().unwrap().len(), 2);
        assert_eq!(loaded[1].0, "FPT");
        assert!(matches!(loaded[1].1, Err(ForecastError::Data(_))));
        assert_eq!(loaded[2].0, "HPG");
        assert!(matches!(loaded[2].1, Err(ForecastError::Data(_))));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let a = parse_timestamp("2024-03-01").unwrap();
        let b = parse_timestamp("2024-03-01T00:00:00Z").unwrap();
        assert_eq!(a, b);
        assert!(parse_timestamp("01/03/2024").is_err());
    }

    #[test]
    fn test_load_from_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prices.csv");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "symbol,timestamp,value").unwrap();
        writeln!(file, "HPG,2024-01-02,27.1").unwrap();
        writeln!(file, "HPG,2024-01-03,27.4").unwrap();
        writeln!(file, "HPG,2024-01-04,27.0").unwrap();
        drop(file);

        let store = SeriesStore::from_csv_path(&path).unwrap();
        let series = store.load("HPG").unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series.symbol(), "HPG");
    }
}
