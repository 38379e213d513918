//! Service descriptors: the short name peers advertise and browse under.
//!
//! Two instances of the same build must derive the same descriptor, and
//! different apps should derive different ones. A descriptor is 1-15
//! characters from `[a-z0-9-]` and must not start or end with `-`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Maximum descriptor length accepted by local-network service discovery.
pub const MAX_DESCRIPTOR_LEN: usize = 15;

/// Separators stripped from application identifiers before truncation.
const SEPARATORS: &[char] = &['.'];

/// A validated, protocol-legal service name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceDescriptor(String);

impl ServiceDescriptor {
    /// Derive a descriptor from an application identifier such as a
    /// reverse-DNS bundle id.
    ///
    /// Separators are removed first, then the LAST 15 characters are kept:
    /// apps from the same vendor share long prefixes, so trailing
    /// characters discriminate better. Nothing else is normalised; an
    /// identifier with upper case or other characters outside `[a-z0-9-]`
    /// is rejected.
    pub fn derive(raw: &str) -> Result<Self, ConfigError> {
        let stripped: String = raw
            .chars()
            .filter(|c| !SEPARATORS.contains(c))
            .collect();

        let count = stripped.chars().count();
        let tail: String = stripped
            .chars()
            .skip(count.saturating_sub(MAX_DESCRIPTOR_LEN))
            .collect();

        Self::declared(&tail)
    }

    /// Accept an explicitly declared service name unchanged, after
    /// validation.
    pub fn declared(name: &str) -> Result<Self, ConfigError> {
        validate(name)?;
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate(name: &str) -> Result<(), ConfigError> {
    let invalid = |reason| ConfigError::InvalidDescriptor {
        value: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("empty"));
    }
    if name.len() > MAX_DESCRIPTOR_LEN {
        return Err(invalid("longer than 15 characters"));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return Err(invalid("only lowercase letters, digits and '-' are allowed"));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(invalid("must not start or end with '-'"));
    }
    Ok(())
}

impl fmt::Display for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ServiceDescriptor {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate(&value)?;
        Ok(Self(value))
    }
}

impl From<ServiceDescriptor> for String {
    fn from(descriptor: ServiceDescriptor) -> Self {
        descriptor.0
    }
}

/// Build identity supplied by the host application.
///
/// `app_id` is the application identifier a descriptor is derived from;
/// `declared_service` is the service name the platform was told about at
/// build time. When both are present they must agree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub app_id: Option<String>,
    pub declared_service: Option<String>,
}

impl ServiceIdentity {
    pub fn from_app_id(app_id: impl Into<String>) -> Self {
        Self {
            app_id: Some(app_id.into()),
            declared_service: None,
        }
    }

    pub fn with_declared_service(mut self, name: impl Into<String>) -> Self {
        self.declared_service = Some(name.into());
        self
    }

    /// Resolve the descriptor this build advertises under.
    pub fn descriptor(&self) -> Result<ServiceDescriptor, ConfigError> {
        match (&self.app_id, &self.declared_service) {
            (Some(app_id), None) => ServiceDescriptor::derive(app_id),
            (None, Some(declared)) => ServiceDescriptor::declared(declared),
            (Some(app_id), Some(declared)) => {
                let derived = ServiceDescriptor::derive(app_id)?;
                let declared = ServiceDescriptor::declared(declared)?;
                if derived != declared {
                    return Err(ConfigError::DescriptorMismatch {
                        derived: derived.0,
                        declared: declared.0,
                    });
                }
                Ok(derived)
            }
            (None, None) => Err(ConfigError::MissingIdentity),
        }
    }
}
