//! Topic naming for per-feed, per-signer data package streams
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::Result;
use crate::validation_error;

pub const DATA_PACKAGE_TOPIC_PREFIX: &str = "data-package";

/// Characters escaped the same way a browser's `encodeURIComponent` does
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataPackageTopic {
    pub data_service_id: String,
    pub data_package_id: String,
    pub node_address: String,
}

impl DataPackageTopic {
    pub fn new(
        data_service_id: impl Into<String>,
        data_package_id: impl Into<String>,
        node_address: impl Into<String>,
    ) -> Self {
        Self {
            data_service_id: data_service_id.into(),
            data_package_id: data_package_id.into(),
            node_address: node_address.into(),
        }
    }

    pub fn encode(&self) -> String {
        encode_topic(&[
            DATA_PACKAGE_TOPIC_PREFIX,
            &self.data_service_id,
            &self.data_package_id,
            &self.node_address,
        ])
    }

    pub fn decode(topic: &str) -> Result<Self> {
        let parts = decode_topic(topic)?;
        match parts.as_slice() {
            [prefix, service, package, node] if prefix == DATA_PACKAGE_TOPIC_PREFIX => {
                Ok(Self::new(service.clone(), package.clone(), node.clone()))
            }
            [prefix, ..] if prefix != DATA_PACKAGE_TOPIC_PREFIX => Err(validation_error!(
                "Expected packageType == {} received {}",
                DATA_PACKAGE_TOPIC_PREFIX,
                prefix
            )),
            _ => Err(validation_error!("malformed data package topic: {}", topic)),
        }
    }
}

fn is_verbatim(part: &str, index: usize) -> bool {
    part == "+" || part == "#" || (index == 0 && part.starts_with('$'))
}

/// Join parts with `/`, escaping each part. Wildcards and a leading `$` part are kept.
pub fn encode_topic<S: AsRef<str>>(parts: &[S]) -> String {
    parts
        .iter()
        .enumerate()
        .map(|(index, part)| {
            let part = part.as_ref();
            if is_verbatim(part, index) {
                part.to_string()
            } else {
                utf8_percent_encode(part, COMPONENT).to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Split a topic on `/` and unescape each part
pub fn decode_topic(topic: &str) -> Result<Vec<String>> {
    topic
        .split('/')
        .enumerate()
        .map(|(index, part)| {
            if is_verbatim(part, index) {
                Ok(part.to_string())
            } else {
                percent_decode_str(part)
                    .decode_utf8()
                    .map(|decoded| decoded.into_owned())
                    .map_err(|e| validation_error!("topic part is not utf-8: {}", e))
            }
        })
        .collect()
}

/// All topics for a feed set and signer set, feed-major
pub fn data_package_topics(
    data_service_id: &str,
    data_package_ids: &[String],
    signers: &[String],
) -> Vec<String> {
    data_package_ids
        .iter()
        .flat_map(|package_id| {
            signers.iter().map(move |signer| {
                DataPackageTopic::new(data_service_id, package_id.as_str(), signer.as_str()).encode()
            })
        })
        .collect()
}
