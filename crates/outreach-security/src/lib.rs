//! Encrypted credential storage.
//!
//! SMTP passwords and authorization codes are persisted only as opaque
//! AES-256 blobs (base64), keyed by a machine-specific key derived from
//! hostname + username. A blob that fails to decrypt is a
//! configuration-class error — distinct from the provider rejecting an
//! otherwise-valid credential.

mod vault;

pub use vault::CredentialVault;
