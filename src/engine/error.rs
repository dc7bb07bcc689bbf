use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    /// Unknown floor, slot or hold id — also the answer for a hold that is
    /// already terminal (release is idempotent).
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// A candidate lost its race or genuinely overlaps an active hold.
    /// Absorbed by the assignment loop, never surfaced from `assign`.
    Conflict(Ulid),
    /// Every candidate was taken. A legitimate business outcome, not a fault.
    NoSlotAvailable,
    /// Malformed window/duration or unknown vehicle — the caller's fault.
    InvalidInput(&'static str),
    LimitExceeded(&'static str),
    /// WAL append failed; the engine cannot know whether the hold committed.
    StorageUnavailable(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict(id) => write!(f, "conflicts with hold: {id}"),
            EngineError::NoSlotAvailable => write!(f, "no slot available"),
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::StorageUnavailable(e) => write!(f, "storage unavailable: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
