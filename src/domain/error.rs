use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no user registered under the name {0}")]
    UnknownUser(String),
    #[error("no room named {0} exists")]
    UnknownRoom(String),
    #[error("user with the name {0} already exists")]
    DuplicateUser(String),
    #[error("room with the name {0} already exists")]
    DuplicateRoom(String),
}
