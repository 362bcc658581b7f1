use crate::error::{ProvisionError, Result};
use crate::types::{ANN_OWNER, PARAM_OWNER};

/// Requested owner of a new volume's mountpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerDirective {
    pub uid: u32,
    /// `None` leaves the group unchanged
    pub gid: Option<u32>,
}

impl OwnerDirective {
    /// Parse `"<uid>"` or `"<uid>:<gid>"`. `field` names the source in errors.
    pub fn parse(field: &str, value: &str) -> Result<Self> {
        let mut parts = value.split(':');
        let uid = parse_id(field, value, parts.next())?;
        let gid = match parts.next() {
            Some(gid) => Some(parse_id(field, value, Some(gid))?),
            None => None,
        };
        if parts.next().is_some() {
            return Err(ProvisionError::invalid_parameter(
                field,
                value,
                "owner must be \"<uid>\" or \"<uid>:<gid>\"",
            ));
        }
        Ok(Self { uid, gid })
    }

    /// The claim annotation wins over the storage class parameter
    pub fn resolve(
        claim_override: Option<&str>,
        class_owner: Option<&str>,
    ) -> Result<Option<Self>> {
        match (claim_override, class_owner) {
            (Some(owner), _) => Self::parse(ANN_OWNER, owner).map(Some),
            (None, Some(owner)) => Self::parse(PARAM_OWNER, owner).map(Some),
            (None, None) => Ok(None),
        }
    }
}

impl std::fmt::Display for OwnerDirective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.gid {
            Some(gid) => write!(f, "{}:{}", self.uid, gid),
            None => write!(f, "{}", self.uid),
        }
    }
}

fn parse_id(field: &str, value: &str, id: Option<&str>) -> Result<u32> {
    let id = id.unwrap_or_default();
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProvisionError::invalid_parameter(
            field,
            value,
            "owner ids must be decimal numbers, as in \"1000\" or \"1000:1000\"",
        ));
    }
    id.parse().map_err(|_| {
        ProvisionError::invalid_parameter(field, value, "owner id does not fit in 32 bits")
    })
}
