pub mod post;
pub mod session;
pub mod subscription;

pub use post::{ArchiveEntry, EntryStatus, PostRecord, SkipReason, StoredDocument};
pub use session::{
    Session, SessionState, StoredCookie, TokenBlob, TokenIssuer, TokenPayload,
    TOKEN_FORMAT_VERSION,
};
pub use subscription::{normalize_source_url, publication_name, source_key, Subscription};
