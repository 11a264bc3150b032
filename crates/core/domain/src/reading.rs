use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 读数质量。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Good,
    Bad,
    Uncertain,
}

impl Quality {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Bad => "bad",
            Self::Uncertain => "uncertain",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "good" => Ok(Self::Good),
            "bad" => Ok(Self::Bad),
            "uncertain" => Ok(Self::Uncertain),
            other => Err(format!("unknown quality: {}", other)),
        }
    }
}

/// 点位在某一时刻的一次观测。创建后不可变。
///
/// `quality == Good` 时 `scaled_value` 必然有值。
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub reading_id: String,
    pub point_id: String,
    pub gateway_id: String,
    pub raw_words: Option<Vec<u16>>,
    pub scaled_value: Option<f64>,
    pub quality: Quality,
    pub ts_ms: i64,
}

impl Reading {
    pub fn good(
        reading_id: String,
        point_id: &str,
        gateway_id: &str,
        raw_words: Vec<u16>,
        scaled_value: f64,
        ts_ms: i64,
    ) -> Self {
        Self {
            reading_id,
            point_id: point_id.to_string(),
            gateway_id: gateway_id.to_string(),
            raw_words: Some(raw_words),
            scaled_value: Some(scaled_value),
            quality: Quality::Good,
            ts_ms,
        }
    }

    /// 读失败或解码失败时的读数，值为空。
    pub fn without_value(
        reading_id: String,
        point_id: &str,
        gateway_id: &str,
        raw_words: Option<Vec<u16>>,
        quality: Quality,
        ts_ms: i64,
    ) -> Self {
        Self {
            reading_id,
            point_id: point_id.to_string(),
            gateway_id: gateway_id.to_string(),
            raw_words,
            scaled_value: None,
            quality,
            ts_ms,
        }
    }
}
