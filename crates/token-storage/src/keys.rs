//! Storage key constants.

/// Storage keys used by the extension
pub struct StorageKeys;

impl StorageKeys {
    /// Canonical session token, `{access_token, refresh_token}` or absent.
    /// Written only by the relay.
    pub const SUPABASE_TOKEN: &'static str = "supabase_token";
}
