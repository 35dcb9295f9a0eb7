use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use super::data_point::{DataPoint, DEFAULT_NUM_VALUE_BS};
use super::signer::{self, Wallet, SIGNATURE_BS};
use crate::error::{QuorumError, Result};
use crate::validation_error;

const TIMESTAMP_BS: usize = 6;
const DATA_POINT_VALUE_BYTE_SIZE_BS: usize = 4;
const DATA_POINTS_COUNT_BS: usize = 3;

/// Unsigned data package content
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPackage {
    pub data_points: Vec<DataPoint>,
    pub timestamp_milliseconds: i64,
    pub data_package_id: String,
}

impl DataPackage {
    pub fn new(
        data_package_id: impl Into<String>,
        timestamp_milliseconds: i64,
        data_points: Vec<DataPoint>,
    ) -> Self {
        Self {
            data_points,
            timestamp_milliseconds,
            data_package_id: data_package_id.into(),
        }
    }

    /// Canonical signable encoding; data points are ordered by their bytes32 feed id
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut encoded_points = self
            .data_points
            .iter()
            .map(|dp| Ok((dp.serialize_data_feed_id()?, dp.to_bytes()?)))
            .collect::<Result<Vec<_>>>()?;
        encoded_points.sort_by(|a, b| a.0.cmp(&b.0));

        let mut bytes = Vec::new();
        for (_, point) in encoded_points {
            bytes.extend_from_slice(&point);
        }
        let timestamp = u64::try_from(self.timestamp_milliseconds)
            .map_err(|_| validation_error!("timestampMilliseconds must be positive"))?;
        bytes.extend_from_slice(&timestamp.to_be_bytes()[8 - TIMESTAMP_BS..]);
        bytes.extend_from_slice(
            &(DEFAULT_NUM_VALUE_BS as u32).to_be_bytes()[4 - DATA_POINT_VALUE_BYTE_SIZE_BS..],
        );
        bytes.extend_from_slice(
            &(self.data_points.len() as u32).to_be_bytes()[4 - DATA_POINTS_COUNT_BS..],
        );
        Ok(bytes)
    }

    pub fn signable_hash(&self) -> Result<[u8; 32]> {
        Ok(signer::keccak256(&self.to_bytes()?))
    }

    pub fn sign(self, wallet: &Wallet) -> Result<SignedDataPackage> {
        let signature = wallet.sign_digest(&self.signable_hash()?)?;
        Ok(SignedDataPackage {
            data_points: self.data_points,
            timestamp_milliseconds: self.timestamp_milliseconds,
            data_package_id: self.data_package_id,
            signature: BASE64.encode(signature),
        })
    }
}

/// Data package as received over the wire
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedDataPackage {
    pub data_points: Vec<DataPoint>,
    pub timestamp_milliseconds: i64,
    pub data_package_id: String,
    /// base64 of `r‖s‖v`
    pub signature: String,
}

impl SignedDataPackage {
    /// Parse and schema-validate a raw payload
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let package: SignedDataPackage = serde_json::from_value(value)
            .map_err(|e| validation_error!("malformed data package: {}", e))?;
        package.validate()?;
        Ok(package)
    }

    pub fn validate(&self) -> Result<()> {
        if self.data_points.len() != 1 {
            return Err(validation_error!(
                "expected exactly one data point, got {}",
                self.data_points.len()
            ));
        }
        let data_point = &self.data_points[0];
        if data_point.data_feed_id != self.data_package_id {
            return Err(validation_error!(
                "dataFeedId {} does not match dataPackageId {}",
                data_point.data_feed_id,
                self.data_package_id
            ));
        }
        data_point.serialize_data_feed_id()?;
        match data_point.numeric_value() {
            Some(value) if value.is_finite() && value >= 0.0 => {}
            _ => {
                return Err(validation_error!(
                    "value of {} is not a finite non-negative number",
                    data_point.data_feed_id
                ))
            }
        }
        data_point.serialize_value()?;
        if self.timestamp_milliseconds <= 0 {
            return Err(validation_error!("timestampMilliseconds must be positive"));
        }
        self.signature_bytes()?;
        Ok(())
    }

    pub fn signature_bytes(&self) -> Result<Vec<u8>> {
        let raw = BASE64
            .decode(self.signature.as_bytes())
            .map_err(|e| validation_error!("signature is not base64: {}", e))?;
        if raw.len() != SIGNATURE_BS {
            return Err(validation_error!(
                "signature must be {} bytes, got {}",
                SIGNATURE_BS,
                raw.len()
            ));
        }
        Ok(raw)
    }

    pub fn data_package(&self) -> DataPackage {
        DataPackage {
            data_points: self.data_points.clone(),
            timestamp_milliseconds: self.timestamp_milliseconds,
            data_package_id: self.data_package_id.clone(),
        }
    }

    /// Value of the single data point
    pub fn value(&self) -> f64 {
        self.data_points
            .first()
            .and_then(|dp| dp.numeric_value())
            .unwrap_or(f64::NAN)
    }

    pub fn recover_signer_address(&self) -> Result<String> {
        let digest = self.data_package().signable_hash()?;
        let signature = self.signature_bytes()?;
        signer::recover_address(&digest, &signature)
    }

    /// Recover the signer and attach it
    pub fn verify(self) -> Result<VerifiedDataPackage> {
        let signer = self.recover_signer_address()?;
        Ok(VerifiedDataPackage {
            package: self,
            signer,
        })
    }
}

/// A package with a successfully recovered signer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerifiedDataPackage {
    #[serde(flatten)]
    pub package: SignedDataPackage,
    pub signer: String,
}

impl VerifiedDataPackage {
    pub fn value(&self) -> f64 {
        self.package.value()
    }

    pub fn timestamp(&self) -> i64 {
        self.package.timestamp_milliseconds
    }

    pub fn feed_id(&self) -> &str {
        &self.package.data_package_id
    }
}

impl TryFrom<SignedDataPackage> for VerifiedDataPackage {
    type Error = QuorumError;

    fn try_from(package: SignedDataPackage) -> Result<Self> {
        package.verify()
    }
}
