//! Helpers shared by resource mappers

use std::collections::HashMap;

use regex::Regex;
use url::Url;
use ycloud_core::provider::{ProviderError, ProviderResult};
use ycloud_core::resource::{Attributes, AttributesExt, Value};

/// Prefix of generated bucket names
pub const UNIQUE_ID_PREFIX: &str = "terraform-";

/// Check a bucket name: 3-63 characters of letters, digits, dashes and dots
pub fn validate_bucket_name(name: &str) -> ProviderResult<()> {
    if name.len() < 3 || name.len() > 63 {
        return Err(ProviderError::validation(format!(
            "{:?} must contain from 3 to 63 characters",
            name
        )));
    }
    let re = Regex::new(r"^[0-9a-zA-Z\-.]+$").map_err(|e| ProviderError::new(e.to_string()))?;
    if !re.is_match(name) {
        return Err(ProviderError::validation(format!(
            "only alphanumeric characters, hyphens and periods allowed in {:?}",
            name
        )));
    }
    Ok(())
}

/// `prefix` followed by a random suffix unique enough for bucket names
pub fn prefixed_unique_id(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}", prefix, &suffix[..26])
}

/// Bucket name from configuration: explicit name, prefixed, or generated
pub fn bucket_name(attributes: &Attributes) -> String {
    if let Some(name) = attributes.get_str("bucket").filter(|s| !s.is_empty()) {
        return name.to_string();
    }
    match attributes.get_str("bucket_prefix") {
        Some(prefix) => prefixed_unique_id(prefix),
        None => prefixed_unique_id(UNIQUE_ID_PREFIX),
    }
}

/// Virtual-hosted domain of a bucket on the storage endpoint
pub fn bucket_domain_name(bucket: &str, endpoint_url: &str) -> ProviderResult<String> {
    let url = Url::parse(endpoint_url).map_err(|e| {
        ProviderError::validation(format!("invalid storage endpoint '{}': {}", endpoint_url, e))
    })?;
    let host = url.host_str().ok_or_else(|| {
        ProviderError::validation(format!("storage endpoint '{}' has no host", endpoint_url))
    })?;
    Ok(format!("{}.{}", bucket, host))
}

/// Label map as an attribute value; empty maps included
pub fn labels_value(labels: &HashMap<String, String>) -> Value {
    Value::string_map(labels)
}

pub fn optional_string(attributes: &Attributes, key: &str) -> Option<String> {
    attributes
        .get_str(key)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Names of objects the sweepers may remove
pub fn matches_prefix(name: &str, prefix: Option<&str>) -> bool {
    prefix.is_none_or(|p| name.starts_with(p))
}
