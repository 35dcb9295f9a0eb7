use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::validation_error;

pub const DATA_FEED_ID_BS: usize = 32;
pub const DEFAULT_NUM_VALUE_BS: usize = 32;
pub const DEFAULT_NUM_VALUE_DECIMALS: usize = 8;

/// A numeric observation, either a JSON number or a decimal string
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataPointValue {
    Number(f64),
    Text(String),
}

impl DataPointValue {
    /// Numeric view of the value; `None` when a string does not parse as a number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DataPointValue::Number(value) => Some(*value),
            DataPointValue::Text(text) => text.trim().parse::<f64>().ok(),
        }
    }

    fn as_decimal_string(&self) -> String {
        match self {
            DataPointValue::Number(value) => format!("{:.*}", DEFAULT_NUM_VALUE_DECIMALS, value),
            DataPointValue::Text(text) => text.trim().to_string(),
        }
    }
}

impl From<f64> for DataPointValue {
    fn from(value: f64) -> Self {
        DataPointValue::Number(value)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPoint {
    pub data_feed_id: String,
    pub value: DataPointValue,
}

impl DataPoint {
    pub fn new(data_feed_id: impl Into<String>, value: impl Into<DataPointValue>) -> Self {
        Self {
            data_feed_id: data_feed_id.into(),
            value: value.into(),
        }
    }

    pub fn numeric_value(&self) -> Option<f64> {
        self.value.as_f64()
    }

    /// Feed id as UTF-8, right zero-padded to 32 bytes
    pub fn serialize_data_feed_id(&self) -> Result<[u8; DATA_FEED_ID_BS]> {
        let raw = self.data_feed_id.as_bytes();
        if raw.is_empty() || raw.len() > DATA_FEED_ID_BS {
            return Err(validation_error!(
                "dataFeedId must be between 1 and {} bytes, got {}",
                DATA_FEED_ID_BS,
                raw.len()
            ));
        }
        let mut out = [0u8; DATA_FEED_ID_BS];
        out[..raw.len()].copy_from_slice(raw);
        Ok(out)
    }

    /// Value scaled by 10^8, as a 32-byte big-endian unsigned integer
    pub fn serialize_value(&self) -> Result<[u8; DEFAULT_NUM_VALUE_BS]> {
        let scaled = scale_decimal(&self.value.as_decimal_string(), DEFAULT_NUM_VALUE_DECIMALS)?;
        let mut out = [0u8; DEFAULT_NUM_VALUE_BS];
        out[DEFAULT_NUM_VALUE_BS - 16..].copy_from_slice(&scaled.to_be_bytes());
        Ok(out)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(DATA_FEED_ID_BS + DEFAULT_NUM_VALUE_BS);
        bytes.extend_from_slice(&self.serialize_data_feed_id()?);
        bytes.extend_from_slice(&self.serialize_value()?);
        Ok(bytes)
    }
}

/// Parse a non-negative decimal string into an integer scaled by `10^decimals`.
/// Extra fractional digits are truncated.
fn scale_decimal(text: &str, decimals: usize) -> Result<u128> {
    let (int_part, frac_part) = match text.split_once('.') {
        Some((int_part, frac_part)) => (int_part, frac_part),
        None => (text, ""),
    };
    let int_part = if int_part.is_empty() { "0" } else { int_part };
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || !all_digits(frac_part) {
        return Err(validation_error!("value '{}' is not a non-negative decimal", text));
    }

    let mut frac: String = frac_part.chars().take(decimals).collect();
    while frac.len() < decimals {
        frac.push('0');
    }

    let overflow = || validation_error!("value '{}' does not fit in 32 bytes", text);
    let int_value: u128 = int_part.parse().map_err(|_| overflow())?;
    let frac_value: u128 = frac.parse().map_err(|_| overflow())?;
    int_value
        .checked_mul(10u128.pow(decimals as u32))
        .and_then(|v| v.checked_add(frac_value))
        .ok_or_else(overflow)
}
