//! Source control preferences.
//!
//! Preferences are a single JSON document in the `kv_state` table. The
//! licence flag is not a preference; it comes from configuration.

use std::sync::Arc;

use tracing::{debug, info};

use crate::db::Database;
use crate::errors::DatabaseError;
use crate::models::{Preferences, PreferencesUpdate};

/// `kv_state` key holding the serialized [`Preferences`].
const PREFERENCES_KEY: &str = "source_control.preferences";

/// Read and write access to the process-wide preferences.
pub trait PreferencesStore: Send + Sync {
    fn get_preferences(&self) -> Result<Preferences, DatabaseError>;

    /// Merge `update` into the stored preferences and return the result.
    fn set_preferences(&self, update: PreferencesUpdate) -> Result<Preferences, DatabaseError>;

    fn is_branch_read_only(&self) -> Result<bool, DatabaseError> {
        Ok(self.get_preferences()?.branch_read_only)
    }

    fn is_licensed(&self) -> bool;

    fn is_licensed_and_enabled(&self) -> Result<bool, DatabaseError> {
        Ok(self.is_licensed() && self.get_preferences()?.connected)
    }
}

/// [`PreferencesStore`] persisted in the entity database.
pub struct DbPreferencesStore {
    db: Arc<Database>,
    licensed: bool,
}

impl DbPreferencesStore {
    pub fn new(db: Arc<Database>, licensed: bool) -> Self {
        Self { db, licensed }
    }
}

impl PreferencesStore for DbPreferencesStore {
    fn get_preferences(&self) -> Result<Preferences, DatabaseError> {
        match self.db.get_state(PREFERENCES_KEY)? {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| DatabaseError::Corrupt {
                entity: "preferences".into(),
                id: PREFERENCES_KEY.into(),
                detail: e.to_string(),
            }),
            None => Ok(Preferences::default()),
        }
    }

    fn set_preferences(&self, update: PreferencesUpdate) -> Result<Preferences, DatabaseError> {
        let mut prefs = self.get_preferences()?;
        prefs.apply(update);
        let raw = serde_json::to_string(&prefs).map_err(|e| DatabaseError::Corrupt {
            entity: "preferences".into(),
            id: PREFERENCES_KEY.into(),
            detail: e.to_string(),
        })?;
        self.db.set_state(PREFERENCES_KEY, &raw)?;
        info!(
            branch = %prefs.branch_name,
            connected = prefs.connected,
            read_only = prefs.branch_read_only,
            "source control preferences saved"
        );
        debug!(repository = %prefs.repository_url, "preferences detail");
        Ok(prefs)
    }

    fn is_licensed(&self) -> bool {
        self.licensed
    }
}
