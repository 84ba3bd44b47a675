use reqwest::{
    Client as ReqwestClient, Method, Request,
    header::{HeaderMap, HeaderValue},
    multipart::Form,
};
use secrecy::{ExposeSecret as _, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use super::config::Config;
use crate::Result;
use crate::error::Error;
use crate::serde_helpers::decode_with_warnings;

/// Body every relay response carries.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Value,
}

/// Forwards API calls through a relay endpoint.
///
/// Each call is a multipart form POST to the relay, which performs the
/// actual request against `target_url` and answers with a
/// `{ "success": bool, "data": ... }` envelope.
///
/// ```no_run
/// use chat_client_sdk::relay::{Client, Method};
/// use secrecy::SecretString;
/// use serde_json::json;
///
/// # async fn example() -> chat_client_sdk::Result<()> {
/// let client = Client::new("https://shop.example.com/wp-admin/admin-ajax.php")?;
/// let token = SecretString::from("nonce".to_owned());
///
/// let sessions = client
///     .send(
///         "https://chat.example.com/sessions",
///         &token,
///         Method::GET,
///         &json!({ "page": 1 }),
///     )
///     .await?;
/// println!("{sessions}");
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Client {
    endpoint: Url,
    config: Config,
    client: ReqwestClient,
}

impl Client {
    /// Creates a relay client posting to `endpoint` with the default [`Config`].
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be created.
    pub fn new(endpoint: &str) -> Result<Client> {
        Self::with_config(endpoint, Config::default())
    }

    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be created.
    pub fn with_config(endpoint: &str, config: Config) -> Result<Client> {
        let mut headers = HeaderMap::new();

        headers.insert("User-Agent", HeaderValue::from_static("chat_client_sdk"));
        headers.insert("Accept", HeaderValue::from_static("application/json"));

        let mut builder = ReqwestClient::builder().default_headers(headers);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            config,
            client: builder.build()?,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Relay one call to `target_url`.
    ///
    /// `payload` must serialize to a JSON object (or `null` for none). For
    /// `GET` its entries become query parameters of `target_url`; for `POST`
    /// it is sent as JSON text in the `data` field. Other methods forward no
    /// payload.
    ///
    /// # Errors
    ///
    /// - [`Kind::Status`](crate::error::Kind::Status) when the relay answers
    ///   with a non-success HTTP status
    /// - [`Kind::Relay`](crate::error::Kind::Relay) when the envelope reports
    ///   `success: false`; the message carries its `data`
    /// - [`Kind::Validation`](crate::error::Kind::Validation) when `payload`
    ///   is not an object
    pub async fn send<P: Serialize + ?Sized>(
        &self,
        target_url: &str,
        security: &SecretString,
        method: Method,
        payload: &P,
    ) -> Result<Value> {
        let payload = object(serde_json::to_value(payload)?)?;
        let destination = destination(target_url, &method, &payload)?;

        let mut form = Form::new()
            .text("action", self.config.action.clone())
            .text("url", destination.to_string())
            .text("method", method.as_str().to_owned())
            .text("security", security.expose_secret().to_owned());
        if method == Method::POST {
            form = form.text("data", serde_json::to_string(&payload)?);
        }

        let request = self
            .client
            .request(Method::POST, self.endpoint.clone())
            .multipart(form)
            .build()?;

        let envelope: Envelope = relay(&self.client, request).await?;
        if envelope.success {
            Ok(envelope.data)
        } else {
            let message = match envelope.data {
                Value::String(message) => message,
                Value::Null => String::new(),
                other => other.to_string(),
            };

            #[cfg(feature = "tracing")]
            tracing::warn!(target_url = %target_url, message = %message, "relay rejected request");

            Err(Error::rejected(message))
        }
    }

    /// Like [`send`](Self::send), decoding the resolved `data` into `T`.
    ///
    /// # Errors
    ///
    /// Everything [`send`](Self::send) returns, plus decoding failures.
    pub async fn send_typed<T: DeserializeOwned, P: Serialize + ?Sized>(
        &self,
        target_url: &str,
        security: &SecretString,
        method: Method,
        payload: &P,
    ) -> Result<T> {
        let data = self.send(target_url, security, method, payload).await?;
        decode_with_warnings(data)
    }
}

fn object(payload: Value) -> Result<Map<String, Value>> {
    match payload {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(Error::validation(format!(
            "relay payload must be a JSON object, got {other}"
        ))),
    }
}

/// The URL the relay should call: `target_url`, plus the payload as query
/// parameters for non-empty `GET`s.
fn destination(target_url: &str, method: &Method, payload: &Map<String, Value>) -> Result<Url> {
    let mut url = Url::parse(target_url)?;

    if *method == Method::GET && !payload.is_empty() {
        let mut query = url.query_pairs_mut();
        for (key, value) in payload {
            match value {
                Value::String(text) => query.append_pair(key, text),
                other => query.append_pair(key, &other.to_string()),
            };
        }
    }

    Ok(url)
}

#[cfg_attr(
    feature = "tracing",
    tracing::instrument(
        level = "debug",
        skip(client, request),
        fields(
            path = request.url().path(),
            status_code
        )
    )
)]
async fn relay(client: &ReqwestClient, request: Request) -> Result<Envelope> {
    let method = request.method().clone();
    let path = request.url().path().to_owned();

    let response = client.execute(request).await?;
    let status_code = response.status();

    #[cfg(feature = "tracing")]
    tracing::Span::current().record("status_code", status_code.as_u16());

    if !status_code.is_success() {
        let message = response.text().await.unwrap_or_default();

        #[cfg(feature = "tracing")]
        tracing::warn!(
            status = %status_code,
            path = %path,
            message = %message,
            "relay request failed"
        );

        return Err(Error::status(status_code, method, path, message));
    }

    let body = response.json::<Value>().await?;
    decode_with_warnings(body)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn payload(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("test payloads are objects"),
        }
    }

    #[test]
    fn get_appends_query_parameters() -> anyhow::Result<()> {
        let url = destination(
            "https://api.example.com/sessions",
            &Method::GET,
            &payload(json!({ "page": 2, "q": "a b" })),
        )?;

        assert_eq!(
            url.as_str(),
            "https://api.example.com/sessions?page=2&q=a+b"
        );
        Ok(())
    }

    #[test]
    fn get_without_payload_keeps_url() -> anyhow::Result<()> {
        let url = destination("https://api.example.com/sessions", &Method::GET, &Map::new())?;

        assert_eq!(url.as_str(), "https://api.example.com/sessions");
        assert_eq!(url.query(), None);
        Ok(())
    }

    #[test]
    fn post_leaves_url_untouched() -> anyhow::Result<()> {
        let url = destination(
            "https://api.example.com/messages?v=1",
            &Method::POST,
            &payload(json!({ "text": "hi" })),
        )?;

        assert_eq!(url.as_str(), "https://api.example.com/messages?v=1");
        Ok(())
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let err = object(json!([1, 2])).unwrap_err();

        assert_eq!(err.kind(), crate::error::Kind::Validation);
        assert!(object(Value::Null).is_ok_and(|map| map.is_empty()));
    }
}
