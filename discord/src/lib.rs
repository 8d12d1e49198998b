use futures::{future, Future as StdFuture, FutureExt, TryFutureExt};
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Method, RequestBuilder, StatusCode, Url,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{pin::Pin, time::Duration};

/// A type alias for `Future` that may return `crate::error::Error`
pub type Future<T> = Pin<Box<dyn StdFuture<Output = Result<T>> + Send>>;

mod error;

pub mod channels;
pub mod guilds;
pub mod members;
pub mod messages;

pub use error::{ApiErrorBody, Error, RateLimitBody, Result};

/// The default timeout for API requests
pub const DEFAULT_TIMEOUT: u64 = 20;
/// A utility constant to pass an empty query slice to the various client fetch
/// functions
pub const NO_QUERY: &[&str; 0] = &[""; 0];
/// Base url for the versioned REST API
pub const DEFAULT_ENDPOINT: &str = "https://discord.com/api/v10";
/// Largest page the platform serves when listing guild members
pub const MEMBERS_PAGE_LIMIT: u16 = 1000;

#[derive(Debug, Clone)]
pub struct BotAuth {
    auth_header: HeaderValue,
    endpoint: Url,
}

#[derive(Debug, Clone)]
pub enum AuthMode {
    Bot(BotAuth),
}

impl AuthMode {
    pub fn new_bot_token(token: &str) -> Result<Self> {
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::MalformedToken);
        }
        let auth_header =
            HeaderValue::from_str(&format!("Bot {token}")).map_err(|_| Error::MalformedToken)?;
        let endpoint = Url::parse(DEFAULT_ENDPOINT)?;

        Ok(Self::Bot(BotAuth {
            auth_header,
            endpoint,
        }))
    }

    pub fn to_endpoint_url(&self) -> Url {
        match self {
            Self::Bot(auth) => auth.endpoint.clone(),
        }
    }

    pub fn to_request_url(&self, path: &str) -> Result<Url> {
        let mut uri = path.to_string();

        // Make sure we have the leading "/".
        if !uri.starts_with('/') {
            uri = format!("/{uri}");
        }

        // The endpoint carries the API version as part of its path, which
        // `Url::join` would strip for absolute paths.
        Url::parse(&format!("{}{uri}", self.to_endpoint_url())).map_err(Error::from)
    }

    pub fn to_authorization_header(&self) -> HeaderValue {
        match self {
            Self::Bot(auth) => auth.auth_header.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Client {
    auth: AuthMode,
    client: reqwest::Client,
}

pub mod client {
    use super::*;

    pub fn from_bot_token(token: &str) -> Result<crate::Client> {
        let auth = crate::AuthMode::new_bot_token(token)?;
        Ok(crate::Client::new(auth))
    }
}

impl Client {
    /// Create a new client with the default request timeout. All request
    /// paths are resolved against the versioned API endpoint.
    pub fn new(auth: AuthMode) -> Self {
        Self::new_with_timeout(auth, DEFAULT_TIMEOUT)
    }

    /// Create a new client with the given request timeout in seconds.
    pub fn new_with_timeout(auth: AuthMode, timeout: u64) -> Self {
        let client = reqwest::Client::builder()
            .gzip(true)
            .timeout(Duration::from_secs(timeout))
            .build()
            .unwrap();
        Self { auth, client }
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self.auth.to_request_url(path)?;

        // Set the default headers.
        let mut headers = HeaderMap::new();
        headers.append(AUTHORIZATION, self.auth.to_authorization_header());
        headers.append(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(self.client.request(method, url).headers(headers))
    }

    pub fn fetch<T, Q>(&self, path: &str, query: &Q) -> Future<T>
    where
        T: 'static + DeserializeOwned + Send,
        Q: Serialize + ?Sized,
    {
        match self.request(Method::GET, path) {
            Ok(builder) => builder
                .query(query)
                .send()
                .map_err(Error::from)
                .and_then(decode_response::<T>)
                .boxed(),
            Err(e) => future::err(e).boxed(),
        }
    }

    pub fn submit<T, R>(&self, method: Method, path: &str, json: &T) -> Future<R>
    where
        T: Serialize + ?Sized,
        R: 'static + DeserializeOwned + Send,
    {
        match self.request(method, path) {
            Ok(builder) => builder
                .json(json)
                .send()
                .map_err(Error::from)
                .and_then(decode_response::<R>)
                .boxed(),
            Err(e) => future::err(e).boxed(),
        }
    }

    pub fn post<T, R>(&self, path: &str, json: &T) -> Future<R>
    where
        T: Serialize + ?Sized,
        R: 'static + DeserializeOwned + Send,
    {
        self.submit(Method::POST, path, json)
    }

    pub fn delete(&self, path: &str) -> Future<()> {
        match self.request(Method::DELETE, path) {
            Ok(builder) => builder
                .send()
                .map_err(Error::from)
                .and_then(|response| async move {
                    decode_response::<serde_json::Value>(response).await?;
                    Ok(())
                })
                .boxed(),
            Err(e) => future::err(e).boxed(),
        }
    }
}

/// Decode a platform response, lifting throttling replies and error bodies
/// into the error type. An empty success body decodes as json null.
async fn decode_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let body = response.json::<RateLimitBody>().await?;
        return Err(Error::rate_limited(body));
    }
    if status.is_client_error() || status.is_server_error() {
        let body = response
            .json::<ApiErrorBody>()
            .await
            .unwrap_or_else(|_| ApiErrorBody {
                code: 0,
                message: status.to_string(),
            });
        return Err(Error::api(status.as_u16(), body));
    }
    let bytes = response.bytes().await.map_err(Error::from)?;
    if bytes.is_empty() {
        serde_json::from_str("null").map_err(Error::from)
    } else {
        serde_json::from_slice(&bytes).map_err(Error::from)
    }
}

/// Snowflake ids are 64 bit integers that the wire format carries as decimal
/// strings.
pub mod snowflake {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }

    pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_auth_builds_request_urls() {
        let auth = AuthMode::new_bot_token("abc.def.ghi").expect("auth");
        let url = auth.to_request_url("/guilds/42").expect("url");
        assert_eq!("https://discord.com/api/v10/guilds/42", url.as_str());
        assert_eq!(auth.to_authorization_header(), "Bot abc.def.ghi");
    }

    #[test]
    fn empty_token_is_rejected() {
        assert!(matches!(
            AuthMode::new_bot_token("  "),
            Err(Error::MalformedToken)
        ));
    }
}
