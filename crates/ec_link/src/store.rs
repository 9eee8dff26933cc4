//! Persistence collaborators used by the built-in handlers.
//!
//! The host app supplies a [`KeyValueStore`]; typed stores keep JSON
//! documents under fixed keys on top of it.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

const VEHICLES_KEY: &str = "eclaims.vehicles";
const STATEMENT_DRAFTS_KEY: &str = "eclaims.statement_drafts";
const IDENTITY_KEY: &str = "eclaims.identity";

/// Vehicle fields tried in order to decide whether two records are the same car.
const VEHICLE_ID_FIELDS: [&str; 3] = ["id", "vehicleId", "licensePlate"];

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

fn load_json<T: DeserializeOwned + Default>(store: &dyn KeyValueStore, key: &str) -> Result<T> {
    if let Some(bytes) = store.get(key)? {
        Ok(serde_json::from_slice(&bytes)?)
    } else {
        Ok(T::default())
    }
}

fn save_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let data = serde_json::to_vec(value)?;
    store.set(key, &data)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}

pub struct VehicleStore {
    store: Arc<dyn KeyValueStore>,
    write: Mutex<()>,
}

impl VehicleStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write: Mutex::new(()),
        }
    }

    pub fn list(&self) -> Result<Vec<Value>> {
        load_json(self.store.as_ref(), VEHICLES_KEY)
    }

    /// Insert, or replace the record sharing the first identifying field.
    pub fn upsert(&self, vehicle: Value) -> Result<Upsert> {
        if !vehicle.is_object() {
            bail!("vehicle record must be a JSON object");
        }
        let _guard = self.write.lock();
        let mut vehicles = self.list()?;

        let existing = vehicle_identity(&vehicle).and_then(|(field, id)| {
            vehicles
                .iter()
                .position(|v| v.get(field).and_then(Value::as_str) == Some(id))
        });
        let result = match existing {
            Some(index) => {
                vehicles[index] = vehicle;
                Upsert::Updated
            }
            None => {
                vehicles.push(vehicle);
                Upsert::Inserted
            }
        };
        save_json(self.store.as_ref(), VEHICLES_KEY, &vehicles)?;
        debug!(count = vehicles.len(), ?result, "vehicle stored");
        Ok(result)
    }

    /// Accepts one vehicle object or an array of them. Returns how many
    /// records were written.
    pub fn import(&self, data: Value) -> Result<usize> {
        let records = match data {
            Value::Array(items) => items,
            Value::Object(_) => vec![data],
            other => bail!("vehicle data is neither an object nor a list: {other}"),
        };
        let mut written = 0;
        for record in records {
            self.upsert(record)?;
            written += 1;
        }
        info!(written, "vehicle data imported");
        Ok(written)
    }
}

fn vehicle_identity(vehicle: &Value) -> Option<(&'static str, &str)> {
    VEHICLE_ID_FIELDS
        .iter()
        .find_map(|field| vehicle.get(*field).and_then(Value::as_str).map(|id| (*field, id)))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementDraft {
    pub id: String,
    pub vehicle_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub struct StatementStore {
    store: Arc<dyn KeyValueStore>,
    write: Mutex<()>,
}

impl StatementStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write: Mutex::new(()),
        }
    }

    pub fn drafts(&self) -> Result<Vec<StatementDraft>> {
        load_json(self.store.as_ref(), STATEMENT_DRAFTS_KEY)
    }

    pub fn create_draft(&self, vehicle_id: Option<&str>) -> Result<StatementDraft> {
        let draft = StatementDraft {
            id: Uuid::new_v4().to_string(),
            vehicle_id: vehicle_id.map(str::to_string),
            created_at: Utc::now(),
        };
        let _guard = self.write.lock();
        let mut drafts = self.drafts()?;
        drafts.push(draft.clone());
        save_json(self.store.as_ref(), STATEMENT_DRAFTS_KEY, &drafts)?;
        info!(id = %draft.id, "statement draft created");
        Ok(draft)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub token: String,
    pub scope: Vec<String>,
    pub expires_at: Option<i64>,
    pub signed_in_at: DateTime<Utc>,
}

pub struct IdentityStore {
    store: Arc<dyn KeyValueStore>,
}

impl IdentityStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn current(&self) -> Result<Option<Identity>> {
        load_json(self.store.as_ref(), IDENTITY_KEY)
    }

    pub fn sign_in(&self, identity: &Identity) -> Result<()> {
        save_json(self.store.as_ref(), IDENTITY_KEY, &Some(identity))?;
        info!(user = %identity.user_id, "identity stored");
        Ok(())
    }

    /// Swap the token of the signed-in user. `false` when nobody is signed in.
    pub fn refresh_token(&self, token: &str, expires_at: Option<i64>) -> Result<bool> {
        let Some(mut identity) = self.current()? else {
            return Ok(false);
        };
        identity.token = token.to_string();
        identity.expires_at = expires_at;
        save_json(self.store.as_ref(), IDENTITY_KEY, &Some(identity))?;
        Ok(true)
    }

    pub fn sign_out(&self) -> Result<()> {
        self.store.remove(IDENTITY_KEY)
    }
}
