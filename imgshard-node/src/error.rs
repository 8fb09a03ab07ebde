use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("{0}")]
    /// An error has occurred within Chitchat.
    ChitChat(String),

    #[error("The cluster secret is invalid: {0}")]
    /// The shared secret could not be decoded or is empty.
    InvalidSecret(String),

    #[error("None of the seed nodes could be resolved: {0:?}")]
    /// Seeds were provided but none of them resolved, even after waiting
    /// for the backoff period once.
    SeedsUnresolvable(Vec<String>),

    #[error("The node has already left the cluster.")]
    AlreadyLeft,
}
