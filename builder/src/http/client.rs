//! HTTP client implementation

use reqwest::{header, Client};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, error};
use url::Url;

use openapi_client::ApiResponse;

use crate::errors::BuildError;

/// RPC client for the control-plane API.
///
/// Every call is `POST {base}/{module}/{function}` with a JSON body and a
/// `{data, error}` response envelope.
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: SecretString,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str, token: SecretString) -> Result<Self, BuildError> {
        Url::parse(base_url)
            .map_err(|e| BuildError::ConfigError(format!("Invalid API url {}: {}", base_url, e)))?;

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Make an RPC call, returning the envelope's `data` if any
    pub async fn send<B: Serialize + ?Sized>(
        &self,
        module: &str,
        function: &str,
        body: &B,
    ) -> Result<Option<Value>, BuildError> {
        let url = format!("{}/{}/{}", self.base_url, module, function);
        debug!("POST {}", url);

        let mut request = self.client.post(&url).json(body);
        let token = self.token.expose_secret();
        if !token.is_empty() {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        let envelope = serde_json::from_str::<ApiResponse<Value>>(&text);
        if !status.is_success() {
            let message = match envelope {
                Ok(ApiResponse { error: Some(err), .. }) => err.to_string(),
                _ => text,
            };
            error!("RPC {}/{} failed: {} - {}", module, function, status, message);
            return Err(BuildError::ApiError(format!(
                "{}/{}: {} {}",
                module, function, status, message
            )));
        }

        let envelope = envelope.map_err(|e| {
            BuildError::ApiError(format!("{}/{}: malformed response: {}", module, function, e))
        })?;
        if let Some(err) = envelope.error {
            error!("RPC {}/{} returned error: {}", module, function, err);
            return Err(BuildError::ApiError(format!("{}/{}: {}", module, function, err)));
        }

        Ok(envelope.data)
    }

    /// Make an RPC call whose response must carry `data`
    pub async fn call<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        module: &str,
        function: &str,
        body: &B,
    ) -> Result<T, BuildError> {
        let data = self.send(module, function, body).await?.ok_or_else(|| {
            BuildError::ApiError(format!("{}/{}: response has no data", module, function))
        })?;
        Ok(serde_json::from_value(data)?)
    }
}
