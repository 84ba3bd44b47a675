use bon::Builder;

const DEFAULT_DATABASE_NAME: &str = "chatSessionDB";
const DEFAULT_STORE_NAME: &str = "chatSessions";
const DEFAULT_KEY_PATH: &str = "sessionId";

/// Names the database, table and key field a [`SessionStore`](super::SessionStore) uses.
///
/// ```
/// use chat_client_sdk::session::Config;
///
/// let config = Config::builder().database_name("support").build();
/// assert_eq!(config.store_name, "chatSessions");
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct Config {
    /// Database holding the session table
    #[builder(into, default = DEFAULT_DATABASE_NAME.to_owned())]
    pub database_name: String,
    /// Table records are stored in
    #[builder(into, default = DEFAULT_STORE_NAME.to_owned())]
    pub store_name: String,
    /// Top-level record field holding the key
    #[builder(into, default = DEFAULT_KEY_PATH.to_owned())]
    pub key_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}
