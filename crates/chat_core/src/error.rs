use thiserror::Error;

/// Why a send was refused before anything was submitted. A rejection never
/// mutates the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendRejection {
    #[error("channel is frozen")]
    Frozen,
    #[error("peer is blocked")]
    PeerBlocked,
    #[error("peer account is withdrawn")]
    PeerWithdrawn,
    #[error("message text is empty")]
    EmptyText,
    #[error("a send is already in flight")]
    InFlight,
    #[error("attachment exceeds the size limit")]
    AttachmentTooLarge,
    #[error("no failed attempt with that id")]
    NoSuchAttempt,
}
