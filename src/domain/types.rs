//! Core identifier and status types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

id_type!(
    /// Tenant identifier
    TenantId
);
id_type!(
    /// Template identifier
    TemplateId
);
id_type!(
    /// Batch identifier
    BatchId
);
id_type!(
    /// Job identifier
    JobId
);

/// Batch lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    PendingSigning,
    Generated,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::PendingSigning => "pending_signing",
            Self::Generated => "generated",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "pending_signing" => Some(Self::PendingSigning),
            "generated" => Some(Self::Generated),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Batch signing lifecycle, orthogonal to [`BatchStatus`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningStatus {
    PendingSigning,
    Signed,
    Finalized,
}

impl SigningStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingSigning => "pending_signing",
            Self::Signed => "signed",
            Self::Finalized => "finalized",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending_signing" => Some(Self::PendingSigning),
            "signed" => Some(Self::Signed),
            "finalized" => Some(Self::Finalized),
            _ => None,
        }
    }
}

/// Issuing tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    /// Verification fallback key when neither batch nor bundle carries one
    pub issuer_public_key: Option<String>,
}

impl Tenant {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: TenantId::new(),
            name: name.into(),
            issuer_public_key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::PendingSigning,
            JobStatus::Generated,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        for status in [
            BatchStatus::Pending,
            BatchStatus::Processing,
            BatchStatus::Completed,
            BatchStatus::Failed,
        ] {
            assert_eq!(BatchStatus::parse(status.as_str()), Some(status));
        }
        for status in [
            SigningStatus::PendingSigning,
            SigningStatus::Signed,
            SigningStatus::Finalized,
        ] {
            assert_eq!(SigningStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert_eq!(JobStatus::parse("done"), None);
        assert_eq!(BatchStatus::parse(""), None);
    }

    #[test]
    fn test_id_display_is_uuid() {
        let id = JobId::new();
        assert_eq!(id.to_string(), id.0.to_string());
    }
}
