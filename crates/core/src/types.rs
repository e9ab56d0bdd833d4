/// Opaque principal identity supplied by the upstream auth gateway.
pub type UserId = String;

/// Monetary amounts are integer minor currency units (cents).
pub type Cents = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
