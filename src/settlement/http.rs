//! HTTP client for the settings / ledger API.

use std::time::Duration;

use reqwest::{header::AUTHORIZATION, Client, Method};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::{
    Balance, CancelBetRequest, CashoutRequest, Ledger, LoseRequest, SettingsSource,
    SettlementError, StartGameRequest, StartGameResponse,
};
use crate::game::settings::Settings;

/// Client for the drives API (`/settings`, `/start-game`, `/cashout`, ...).
#[derive(Clone, Debug)]
pub struct HttpApi {
    inner: Client,
    base_url: String,
}

impl HttpApi {
    /// Create a client for `base_url` with a per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SettlementError> {
        let inner = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            inner,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Perform a JSON request, mapping non-2xx answers to
    /// [`SettlementError::Rejected`] with the API's `message` when present.
    async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<&B>,
    ) -> Result<T, SettlementError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut req = self.inner.request(method.clone(), self.url(path));

        if let Some(token) = token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let response = req.send().await?;
        let status = response.status();
        let text = response.text().await?;
        debug!("{} {} -> {}", method, path, status);

        if !status.is_success() {
            return Err(SettlementError::Rejected {
                status: status.as_u16(),
                message: rejection_message(&text),
            });
        }

        Ok(serde_json::from_str(&text)?)
    }
}

/// Pull `message` out of an error body, falling back to the raw text.
fn rejection_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| {
            if body.is_empty() {
                "Something went wrong".to_string()
            } else {
                body.to_string()
            }
        })
}

impl SettingsSource for HttpApi {
    async fn fetch(&self) -> Result<Settings, SettlementError> {
        self.request::<Settings, ()>(Method::GET, "settings", None, None).await
    }
}

impl Ledger for HttpApi {
    async fn start_game(
        &self,
        token: &str,
        request: StartGameRequest,
    ) -> Result<StartGameResponse, SettlementError> {
        self.request(Method::POST, "start-game", Some(token), Some(&request)).await
    }

    async fn cashout(
        &self,
        token: &str,
        request: CashoutRequest,
    ) -> Result<serde_json::Value, SettlementError> {
        self.request(Method::POST, "cashout", Some(token), Some(&request)).await
    }

    async fn lose(&self, token: &str, request: LoseRequest) -> Result<serde_json::Value, SettlementError> {
        self.request(Method::POST, "lose", Some(token), Some(&request)).await
    }

    async fn cancel_bet(
        &self,
        token: &str,
        request: CancelBetRequest,
    ) -> Result<serde_json::Value, SettlementError> {
        self.request(Method::POST, "cancel-bet", Some(token), Some(&request)).await
    }

    async fn balance(&self, token: &str) -> Result<Balance, SettlementError> {
        self.request::<Balance, ()>(Method::GET, "get-balance", Some(token), None).await
    }

    async fn games(&self, token: &str) -> Result<serde_json::Value, SettlementError> {
        self.request::<serde_json::Value, ()>(Method::GET, "get-games", Some(token), None).await
    }
}
