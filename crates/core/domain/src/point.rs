//! 点位配置：寄存器位置 + 解码规则。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Modbus 寄存器数据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// 16位有符号整数
    #[default]
    Int16,
    /// 16位无符号整数
    Uint16,
    /// 32位有符号整数（2个寄存器）
    Int32,
    /// 32位无符号整数（2个寄存器）
    Uint32,
    /// 32位浮点数（2个寄存器）
    Float32,
    /// 64位浮点数（4个寄存器）
    Float64,
}

impl DataType {
    /// 该类型需要的寄存器数量。
    pub fn register_count(self) -> u16 {
        match self {
            Self::Int16 | Self::Uint16 => 1,
            Self::Int32 | Self::Uint32 | Self::Float32 => 2,
            Self::Float64 => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int16 => "int16",
            Self::Uint16 => "uint16",
            Self::Int32 => "int32",
            Self::Uint32 => "uint32",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = DataPointError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "int16" => Ok(Self::Int16),
            "uint16" => Ok(Self::Uint16),
            "int32" => Ok(Self::Int32),
            "uint32" => Ok(Self::Uint32),
            "float32" => Ok(Self::Float32),
            "float64" => Ok(Self::Float64),
            other => Err(DataPointError::UnknownDataType(other.to_string())),
        }
    }
}

/// 多寄存器拼接时的字节序。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    /// word[0] 为高位字，字内大端。
    #[default]
    BigEndian,
    /// 整体字节反转：word[0] 为低位字且字内字节反序。
    LittleEndian,
    /// 字序反转，字内保持大端（目标设备族的常见约定）。
    WordSwapped,
}

impl ByteOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BigEndian => "big_endian",
            Self::LittleEndian => "little_endian",
            Self::WordSwapped => "word_swapped",
        }
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ByteOrder {
    type Err = DataPointError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "big_endian" => Ok(Self::BigEndian),
            "little_endian" => Ok(Self::LittleEndian),
            "word_swapped" => Ok(Self::WordSwapped),
            other => Err(DataPointError::UnknownByteOrder(other.to_string())),
        }
    }
}

/// Modbus 功能码（仅支持读寄存器）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum FunctionCode {
    /// 读保持寄存器 (0x03)
    ReadHoldingRegisters = 3,
    /// 读输入寄存器 (0x04)
    ReadInputRegisters = 4,
}

impl FunctionCode {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for FunctionCode {
    type Error = DataPointError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            3 => Ok(Self::ReadHoldingRegisters),
            4 => Ok(Self::ReadInputRegisters),
            other => Err(DataPointError::UnsupportedFunctionCode(other)),
        }
    }
}

impl From<FunctionCode> for u8 {
    fn from(value: FunctionCode) -> Self {
        value.code()
    }
}

/// 点位配置校验错误。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataPointError {
    #[error("unsupported function code: {0}")]
    UnsupportedFunctionCode(u8),
    #[error("unknown data type: {0}")]
    UnknownDataType(String),
    #[error("unknown byte order: {0}")]
    UnknownByteOrder(String),
    #[error("register count must be at least {required} for {data_type}, got {actual}")]
    RegisterCountTooSmall {
        data_type: DataType,
        required: u16,
        actual: u16,
    },
    #[error("register range {start}..={end} exceeds 65535")]
    AddressOutOfRange { start: u16, end: u32 },
    #[error("scale factor must be positive, got {0}")]
    InvalidScale(f64),
}

/// 网关上的一个采集点位。
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    pub point_id: String,
    pub gateway_id: String,
    pub function_code: FunctionCode,
    pub register_address: u16,
    pub register_count: u16,
    pub data_type: DataType,
    pub byte_order: ByteOrder,
    pub scale_factor: f64,
    pub enabled: bool,
    pub label: String,
    pub group: Option<String>,
}

impl DataPoint {
    /// 最后一个寄存器地址（可能越过 65535，用 u32 表示）。
    pub fn end_address(&self) -> u32 {
        u32::from(self.register_address) + u32::from(self.register_count.max(1)) - 1
    }

    /// 校验点位配置的不变量。
    pub fn validate(&self) -> Result<(), DataPointError> {
        let required = self.data_type.register_count();
        if self.register_count < required {
            return Err(DataPointError::RegisterCountTooSmall {
                data_type: self.data_type,
                required,
                actual: self.register_count,
            });
        }
        let end = self.end_address();
        if end > u32::from(u16::MAX) {
            return Err(DataPointError::AddressOutOfRange {
                start: self.register_address,
                end,
            });
        }
        if !(self.scale_factor.is_finite() && self.scale_factor > 0.0) {
            return Err(DataPointError::InvalidScale(self.scale_factor));
        }
        Ok(())
    }
}
