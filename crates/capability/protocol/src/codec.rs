//! 寄存器解码
//!
//! 将 16 位寄存器字按数据类型与字节序还原为标量值，再乘以缩放系数。
//!
//! 32 位类型的字节拼接规则（以寄存器 `[w0, w1]` 为例，`hi/lo` 为字内高低字节）：
//!
//! | 字节序          | 拼接结果（高 → 低）          |
//! |-----------------|------------------------------|
//! | `big_endian`    | w0.hi w0.lo w1.hi w1.lo      |
//! | `little_endian` | w1.lo w1.hi w0.lo w0.hi      |
//! | `word_swapped`  | w1.hi w1.lo w0.hi w0.lo      |
//!
//! float64 固定按输入顺序大端拼接 4 个字。

use domain::{ByteOrder, DataType};

/// 解码后的寄存器值
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegisterValue {
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Float32(f32),
    Float64(f64),
}

impl RegisterValue {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int16(v) => f64::from(v),
            Self::Uint16(v) => f64::from(v),
            Self::Int32(v) => f64::from(v),
            Self::Uint32(v) => f64::from(v),
            Self::Float32(v) => f64::from(v),
            Self::Float64(v) => v,
        }
    }
}

/// 解码错误（点位配置与数据类型不一致）
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("{data_type} requires {expected} registers, got {actual}")]
    WordCount {
        data_type: DataType,
        expected: usize,
        actual: usize,
    },
}

/// 按数据类型和字节序解码寄存器字
pub fn decode(
    words: &[u16],
    data_type: DataType,
    byte_order: ByteOrder,
) -> Result<RegisterValue, DecodeError> {
    let expected = usize::from(data_type.register_count());
    if words.len() != expected {
        return Err(DecodeError::WordCount {
            data_type,
            expected,
            actual: words.len(),
        });
    }

    let value = match data_type {
        DataType::Int16 => RegisterValue::Int16(words[0] as i16),
        DataType::Uint16 => RegisterValue::Uint16(words[0]),
        DataType::Int32 => {
            RegisterValue::Int32(i32::from_be_bytes(assemble_32(words[0], words[1], byte_order)))
        }
        DataType::Uint32 => {
            RegisterValue::Uint32(u32::from_be_bytes(assemble_32(words[0], words[1], byte_order)))
        }
        DataType::Float32 => {
            RegisterValue::Float32(f32::from_be_bytes(assemble_32(words[0], words[1], byte_order)))
        }
        DataType::Float64 => RegisterValue::Float64(f64::from_be_bytes(assemble_64(words))),
    };
    Ok(value)
}

/// 应用缩放系数（系数已在配置阶段校验为正数）
pub fn scale(value: RegisterValue, factor: f64) -> f64 {
    value.as_f64() * factor
}

/// 按字节序拼出大端 4 字节
fn assemble_32(w0: u16, w1: u16, byte_order: ByteOrder) -> [u8; 4] {
    let [a, b] = w0.to_be_bytes();
    let [c, d] = w1.to_be_bytes();
    match byte_order {
        ByteOrder::BigEndian => [a, b, c, d],
        ByteOrder::LittleEndian => [d, c, b, a],
        ByteOrder::WordSwapped => [c, d, a, b],
    }
}

fn assemble_64(words: &[u16]) -> [u8; 8] {
    let mut bytes = [0u8; 8];
    for (chunk, word) in bytes.chunks_exact_mut(2).zip(words) {
        chunk.copy_from_slice(&word.to_be_bytes());
    }
    bytes
}
