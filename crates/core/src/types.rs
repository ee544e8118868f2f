/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Task identifiers are opaque strings, either server-issued or a local
/// placeholder minted before the creation call returns.
pub type TaskId = String;
