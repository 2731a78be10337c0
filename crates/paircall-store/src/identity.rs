//! Persisted participant identity.

use paircall_shared::constants::USER_ID_KEY;
use paircall_shared::identity::generate_participant_id;
use paircall_shared::types::ParticipantId;

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    /// Return the participant id stored under `user_id_key`, generating and
    /// persisting a new one on first access (or if the stored value is empty).
    pub fn load_or_create_participant_id(&self) -> Result<ParticipantId> {
        match self.get_value(USER_ID_KEY)? {
            Some(stored) if !stored.is_empty() => {
                ParticipantId::parse(&stored).map_err(|e| StoreError::Corrupt {
                    key: USER_ID_KEY.to_string(),
                    reason: e.to_string(),
                })
            }
            _ => {
                let id = generate_participant_id();
                self.put_value(USER_ID_KEY, id.as_str())?;
                tracing::info!(participant = %id, "generated new participant id");
                Ok(id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_stable_across_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let first = Database::open_in(dir.path())
            .unwrap()
            .load_or_create_participant_id()
            .unwrap();
        let second = Database::open_in(dir.path())
            .unwrap()
            .load_or_create_participant_id()
            .unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn empty_value_is_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in(dir.path()).unwrap();
        db.put_value(USER_ID_KEY, "").unwrap();

        let id = db.load_or_create_participant_id().unwrap();
        assert_eq!(db.get_value(USER_ID_KEY).unwrap().as_deref(), Some(id.as_str()));
    }

    #[test]
    fn corrupt_value_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in(dir.path()).unwrap();
        db.put_value(USER_ID_KEY, "bad/id").unwrap();

        assert!(matches!(
            db.load_or_create_participant_id(),
            Err(StoreError::Corrupt { .. })
        ));
    }
}
