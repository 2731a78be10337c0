/// Application name
pub const APP_NAME: &str = "PairCall";

/// Root collection holding one child per participant
pub const USERS_ROOT: &str = "users";

/// Child of a participant holding its Status Record
pub const STATUS_FIELD: &str = "status";

/// Child of a participant holding its single-slot inbox
pub const INBOX_FIELD: &str = "data";

/// Field (relative to a participant) the candidate query filters on
pub const STATUS_TYPE_FIELD: &str = "status/type";

/// Local storage key for the persisted participant id
pub const USER_ID_KEY: &str = "user_id_key";

/// Number of hex characters in a generated participant id
pub const PARTICIPANT_ID_LEN: usize = 6;

/// Default delay before re-running a search that found nobody (ms)
pub const DEFAULT_SEARCH_RETRY_MS: u64 = 2_000;

/// Upper bound for the search backoff (ms)
pub const DEFAULT_SEARCH_RETRY_MAX_MS: u64 = 30_000;

/// How long an offered/received match may stay unconnected (ms)
pub const DEFAULT_MATCH_TIMEOUT_MS: u64 = 15_000;
