//! Signed REST client with the retry policy from §4.1.
use crate::api::API;
use crate::errors::{BybitError, GatewayError};
use crate::model::ApiResponse;
use crate::util::{build_request, epoch_millis};
use hex::encode as hex_encode;
use hmac::{Hmac, Mac};
use log::{trace, warn};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT},
    Client as ReqwestClient, StatusCode,
};
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::collections::BTreeMap;
use std::time::Duration;

/// Default retry budget (§4.1 `API_RETRY_COUNT`).
pub const API_RETRY_COUNT: u32 = 4;

#[derive(Clone)]
pub struct Client {
    api_key: String,
    secret_key: String,
    host: String,
    recv_window: u64,
    max_retries: u32,
    inner: ReqwestClient,
}

impl Client {
    pub fn new(api_key: String, secret_key: String, host: String, recv_window: u64) -> Self {
        Client {
            api_key,
            secret_key,
            host,
            recv_window,
            max_retries: API_RETRY_COUNT,
            inner: ReqwestClient::builder()
                .pool_idle_timeout(None)
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client builds"),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub async fn get_signed<T: DeserializeOwned>(
        &self,
        endpoint: API,
        params: BTreeMap<String, String>,
    ) -> Result<T, GatewayError> {
        self.retrying(|| self.get_signed_once(endpoint_path(&endpoint), params.clone()))
            .await
    }

    pub async fn post_signed<T: DeserializeOwned>(
        &self,
        endpoint: API,
        params: BTreeMap<String, String>,
    ) -> Result<T, GatewayError> {
        self.retrying(|| self.post_signed_once(endpoint_path(&endpoint), params.clone()))
            .await
    }

    pub async fn get_public<T: DeserializeOwned>(
        &self,
        endpoint: API,
        params: BTreeMap<String, String>,
    ) -> Result<T, GatewayError> {
        self.retrying(|| self.get_public_once(endpoint_path(&endpoint), params.clone()))
            .await
    }

    /// §4.1 retry policy: backoff `(max_retries - n)^2 + 1` seconds on
    /// transient transport/venue errors, up to `max_retries` attempts.
    async fn retrying<T, F, Fut>(&self, mut call: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, GatewayError>>,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_retries && is_retryable(&err) => {
                    let backoff = (self.max_retries - attempt).pow(2) + 1;
                    warn!("retryable error on attempt {attempt}: {err}; backing off {backoff}s");
                    tokio::time::sleep(Duration::from_secs(backoff as u64)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn get_public_once<T: DeserializeOwned>(
        &self,
        path: String,
        params: BTreeMap<String, String>,
    ) -> Result<T, GatewayError> {
        let query = build_request(&params);
        let mut url = format!("{}{}", self.host, path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }
        let response = self.inner.get(url).send().await.map_err(BybitError::from)?;
        self.handle(response).await
    }

    async fn get_signed_once<T: DeserializeOwned>(
        &self,
        path: String,
        params: BTreeMap<String, String>,
    ) -> Result<T, GatewayError> {
        let query = build_request(&params);
        let mut url = format!("{}{}", self.host, path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }
        let headers = self.signed_headers(&query)?;
        let response = self
            .inner
            .get(url)
            .headers(headers)
            .send()
            .await
            .map_err(BybitError::from)?;
        self.handle(response).await
    }

    async fn post_signed_once<T: DeserializeOwned>(
        &self,
        path: String,
        params: BTreeMap<String, String>,
    ) -> Result<T, GatewayError> {
        let body = serde_json::to_string(&params).map_err(BybitError::from)?;
        let url = format!("{}{}", self.host, path);
        let mut headers = self.signed_headers(&body)?;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let response = self
            .inner
            .post(url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(BybitError::from)?;
        self.handle(response).await
    }

    fn signed_headers(&self, payload: &str) -> Result<HeaderMap, GatewayError> {
        let timestamp = epoch_millis().to_string();
        let window = self.recv_window.to_string();
        let signature = self.sign(&timestamp, &window, payload);

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("perpbot"));
        headers.insert(
            HeaderName::from_static("x-bapi-sign"),
            HeaderValue::from_str(&signature).map_err(BybitError::from)?,
        );
        headers.insert(
            HeaderName::from_static("x-bapi-api-key"),
            HeaderValue::from_str(&self.api_key).map_err(BybitError::from)?,
        );
        headers.insert(
            HeaderName::from_static("x-bapi-timestamp"),
            HeaderValue::from_str(&timestamp).map_err(BybitError::from)?,
        );
        headers.insert(
            HeaderName::from_static("x-bapi-recv-window"),
            HeaderValue::from_str(&window).map_err(BybitError::from)?,
        );
        Ok(headers)
    }

    fn sign(&self, timestamp: &str, recv_window: &str, payload: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .expect("hmac accepts any key length");
        let message = format!("{timestamp}{}{recv_window}{payload}", self.api_key);
        mac.update(message.as_bytes());
        hex_encode(mac.finalize().into_bytes())
    }

    async fn handle<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        if !status.is_success() && status != StatusCode::BAD_REQUEST {
            return Err(GatewayError::Transport(BybitError::Status(status.as_u16())));
        }
        let envelope: ApiResponse<T> = response.json().await.map_err(BybitError::from)?;
        trace!("ret_code={} ret_msg={}", envelope.ret_code, envelope.ret_msg);
        if envelope.ret_code != 0 {
            return Err(GatewayError::venue(envelope.ret_code, envelope.ret_msg));
        }
        Ok(envelope.result)
    }
}

fn endpoint_path(endpoint: &API) -> String {
    endpoint.as_ref().to_string()
}

fn is_retryable(err: &GatewayError) -> bool {
    match err {
        GatewayError::Transport(_) => true,
        GatewayError::Venue(v) => v.is_transient(),
        GatewayError::Fatal(_) => false,
    }
}
