use std::time::Duration;

use bon::Builder;

const DEFAULT_ACTION: &str = "emmerce_chat_message";

/// Relay request settings.
///
/// ```
/// use std::time::Duration;
///
/// use chat_client_sdk::relay::Config;
///
/// let config = Config::builder().timeout(Duration::from_secs(10)).build();
/// assert_eq!(config.action, "emmerce_chat_message");
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct Config {
    /// Value of the `action` form field the endpoint dispatches on
    #[builder(into, default = DEFAULT_ACTION.to_owned())]
    pub action: String,
    /// Whole-request timeout; none by default
    pub timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}
