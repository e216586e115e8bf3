//! Canonical, bit-exact error strings. Every dispatch failure that reaches
//! the wire goes through one of these variants rather than an ad-hoc
//! `format!`, so the strings stay exactly what the command table promises.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("ERR unknown command '{name}' with '{argc}' args")]
    UnknownCommand { name: String, argc: usize },

    #[error("ERR wrong number of arguments for '{cmd}' command")]
    WrongArity { cmd: String },

    #[error("ERR the command length has exceeded '{limit}' bytes")]
    CommandTooLong { limit: usize },

    #[error("ERR The key length has exceeded the allowed size of '{limit}'")]
    KeyTooLong { limit: usize },

    #[error("ERR command '{cmd}' has '{argc}' arguments but only '{limit}' allowed")]
    TooManyArguments { cmd: String, argc: usize, limit: usize },

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR value is not a valid float")]
    NotAFloat,

    #[error("ERR increment or decrement would overflow")]
    IncrDecrOverflow,

    #[error("ERR increment would produce NaN or Infinity")]
    NotFiniteFloat,

    #[error("ERR invalid expire time in '{cmd}' command")]
    InvalidExpireTime { cmd: String },

    #[error("ERR syntax error")]
    SyntaxError,

    #[error("ERR no such key")]
    NoSuchKey,

    #[error("ERR parsing error '{offset}'")]
    ParsingError { offset: usize },

    #[error("ERR invalid DB index")]
    InvalidDbIndex,

    #[error("AUTH failed: WRONGPASS invalid username-password pair or user is disabled.")]
    AuthWrongPass,

    #[error("AUTH failed: already authenticated.")]
    AuthAlreadyAuthenticated,

    #[error("NOAUTH Authentication required.")]
    AuthRequired,

    #[error("ERR command '{cmd}' is disabled")]
    CommandDisabled { cmd: String },

    #[error("ERR max_keys exceeded ({limit})")]
    CapacityExceeded { limit: usize },

    #[error("ERR {0}")]
    Storage(String),
}

impl From<cachegrand_storage::StorageError> for DispatchError {
    fn from(err: cachegrand_storage::StorageError) -> Self {
        match err {
            cachegrand_storage::StorageError::MaxKeysExceeded { limit } => {
                DispatchError::CapacityExceeded { limit }
            }
            other => DispatchError::Storage(other.to_string()),
        }
    }
}
