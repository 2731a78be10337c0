use uuid::Uuid;

use crate::constants::PARTICIPANT_ID_LEN;
use crate::types::ParticipantId;

/// Generate a fresh short participant id: the leading hex digits of a
/// random UUID v4.
pub fn generate_participant_id() -> ParticipantId {
    let mut simple = Uuid::new_v4().simple().to_string();
    simple.truncate(PARTICIPANT_ID_LEN);
    ParticipantId::from_trusted(simple)
}
