//! Signed data packages: wire model, canonical encoding, signer recovery
use std::collections::BTreeMap;

pub mod data_package;
pub mod data_point;
pub mod numeric;
pub mod signer;

pub use data_package::{DataPackage, SignedDataPackage, VerifiedDataPackage};
pub use data_point::{DataPoint, DataPointValue};
pub use signer::Wallet;

/// A finalized batch: feed id -> selected packages
pub type DataPackagesResponse = BTreeMap<String, Vec<VerifiedDataPackage>>;

/// Pick `count` packages whose values are closest to their median.
/// Packages at equal distance keep their arrival order.
pub fn pick_packages_closest_to_median(
    packages: &[VerifiedDataPackage],
    count: usize,
) -> Vec<VerifiedDataPackage> {
    numeric::pick_closest_to_median(packages, count, |p| p.value())
}
