pub mod asset;
pub mod user;

pub use asset::{
    AssetTier, AssetVersionSpec, DisplayAsset, RegisteredFingerprint, UploadedAsset,
    UploadingAsset, ASSET_VERSIONS,
};
pub use user::{AuthenticatedUser, ServerEncryptionKeys, UserIdentity};
