pub mod codec;
pub mod matcher;
pub mod resolver;
pub mod versions;

pub use codec::{
    decode_embedding, encode_embedding, fingerprint, AssetFingerprint, FingerprintError,
    EMBEDDING_LEN,
};
pub use matcher::{find_matches, find_matches_limited, ClaimConflict};
pub use resolver::{ClaimGuard, ClaimResolver, Decision};
pub use versions::{FingerprintStore, VersionError};
