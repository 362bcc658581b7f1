use crate::error::{ProvisionError, Result};
use crate::types::{
    PARAM_OVER_PROVISION, PARAM_OWNER, PARAM_PARENT_DATASET, PARAM_SERVER_HOSTNAME,
    PARAM_SHARE_OPTIONS,
};
use std::collections::BTreeMap;

/// Validated storage class parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageClassParameters {
    pub server_hostname: String,
    pub parent_dataset: String,
    pub share_options: String,
    pub over_provision: bool,
    pub owner: Option<String>,
}

impl StorageClassParameters {
    /// Validate a raw storage class parameter map.
    ///
    /// Unknown keys are ignored.
    pub fn from_parameters(parameters: &BTreeMap<String, String>) -> Result<Self> {
        let server_hostname = required(parameters, PARAM_SERVER_HOSTNAME)?;
        let parent_dataset = required(parameters, PARAM_PARENT_DATASET)?;
        validate_parent_dataset(&parent_dataset)?;
        let share_options = required(parameters, PARAM_SHARE_OPTIONS)?;

        let over_provision = match parameters.get(PARAM_OVER_PROVISION).map(String::as_str) {
            None | Some("false") => false,
            Some("true") => true,
            Some(other) => {
                return Err(ProvisionError::invalid_parameter(
                    PARAM_OVER_PROVISION,
                    other,
                    "overProvision must be exactly \"true\" or \"false\"",
                ))
            }
        };

        Ok(Self {
            server_hostname,
            parent_dataset,
            share_options,
            over_provision,
            owner: parameters.get(PARAM_OWNER).cloned(),
        })
    }
}

fn required(parameters: &BTreeMap<String, String>, key: &str) -> Result<String> {
    parameters
        .get(key)
        .cloned()
        .ok_or_else(|| ProvisionError::missing_parameter(key))
}

/// Check the `seg(/seg)*` shape of a parent dataset name
pub fn validate_parent_dataset(parent_dataset: &str) -> Result<()> {
    let invalid = |reason: &str| -> Result<()> {
        Err(ProvisionError::invalid_parameter(
            PARAM_PARENT_DATASET,
            parent_dataset,
            reason,
        ))
    };

    if parent_dataset.len() <= 2 {
        return invalid("parentDataset must be longer than 2 characters");
    }
    if parent_dataset.starts_with('/') || parent_dataset.ends_with('/') {
        return invalid("parentDataset must not start or end with '/'");
    }
    if parent_dataset.split('/').any(str::is_empty) {
        return invalid("parentDataset must not contain empty path segments");
    }
    Ok(())
}
