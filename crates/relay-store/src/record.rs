use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use relay_core::{ConnectionId, SessionCode, SessionSnapshot, SessionStatus};

use crate::error::StoreError;

/// Mirrored copy of a session, stored as a flat string hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub code: SessionCode,
    pub control_connection_id: Option<ConnectionId>,
    pub status: SessionStatus,
    pub created_at: i64,
    pub updated_at: i64,
    pub ttl_ms: u64,
    pub expires_at: i64,
    /// Identifies the relay process that wrote the record.
    pub instance: String,
}

impl SessionRecord {
    pub fn from_snapshot(snapshot: &SessionSnapshot, instance: &str, updated_at: i64) -> Self {
        Self {
            code: snapshot.code.clone(),
            control_connection_id: snapshot.control_connection_id.clone(),
            status: snapshot.status,
            created_at: snapshot.created_at,
            updated_at,
            ttl_ms: snapshot.ttl_ms,
            expires_at: snapshot.expires_at,
            instance: instance.to_string(),
        }
    }

    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("code", self.code.to_string()),
            (
                "controlConnectionId",
                self.control_connection_id
                    .as_ref()
                    .map(|c| c.to_string())
                    .unwrap_or_default(),
            ),
            ("status", self.status.to_string()),
            ("createdAt", self.created_at.to_string()),
            ("updatedAt", self.updated_at.to_string()),
            ("ttlMs", self.ttl_ms.to_string()),
            ("expiresAt", self.expires_at.to_string()),
            ("instance", self.instance.clone()),
        ]
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, StoreError> {
        let get = |key: &str| {
            fields
                .get(key)
                .ok_or_else(|| StoreError::Malformed(format!("missing field {key}")))
        };
        let int = |key: &str| -> Result<i64, StoreError> {
            get(key)?
                .parse()
                .map_err(|_| StoreError::Malformed(format!("non-numeric {key}")))
        };

        let code = get("code")?
            .parse()
            .map_err(|e| StoreError::Malformed(format!("{e}")))?;
        let control_connection_id = fields
            .get("controlConnectionId")
            .filter(|c| !c.is_empty())
            .map(ConnectionId::from_raw);
        let status = get("status")?.parse().map_err(StoreError::Malformed)?;
        let ttl_ms = get("ttlMs")?
            .parse()
            .map_err(|_| StoreError::Malformed("non-numeric ttlMs".into()))?;

        Ok(Self {
            code,
            control_connection_id,
            status,
            created_at: int("createdAt")?,
            updated_at: int("updatedAt")?,
            ttl_ms,
            expires_at: int("expiresAt")?,
            instance: fields.get("instance").cloned().unwrap_or_default(),
        })
    }
}
