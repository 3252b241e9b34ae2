//! [LedgerClient] over the daemon's HTTP interface.
//!
//! Headers and blocks are read through the `/json_rpc` endpoint, the chain
//! height and transaction bodies through the plain `/get_height` and
//! `/get_transactions` endpoints.

use super::{BlockHeaderSummary, Error, LedgerClient, RawTransaction, TransactionsResponse};
use bth_key_image_db::TxHash;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

/// Status string of a successful daemon response.
const STATUS_OK: &str = "OK";

/// Status string of a daemon that is still syncing or overloaded.
const STATUS_BUSY: &str = "BUSY";

#[derive(Debug, Deserialize)]
struct HeightResponse {
    height: u64,
}

#[derive(Debug, Deserialize)]
struct HeadersRangeResult {
    #[serde(default)]
    headers: Vec<HeaderJson>,
}

#[derive(Debug, Deserialize)]
struct HeaderJson {
    height: u64,
    num_txes: u64,
}

#[derive(Debug, Deserialize)]
struct BlockResult {
    // Absent for blocks that only hold the coinbase transaction.
    #[serde(default)]
    tx_hashes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionsResult {
    #[serde(default)]
    txs: Vec<RawTransaction>,
    #[serde(default)]
    missed_tx: Vec<String>,
}

#[derive(Clone)]
pub struct HttpLedgerClient {
    /// Client used for HTTP(s) requests.
    client: reqwest::blocking::Client,

    /// Daemon base url, always ending with a '/'.
    base_url: Url,
}

impl HttpLedgerClient {
    pub fn new(daemon_url: &str, timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::ClientSetup(e.to_string()))?;
        Self::new_with_client(daemon_url, client)
    }

    pub fn new_with_client(
        daemon_url: &str,
        client: reqwest::blocking::Client,
    ) -> Result<Self, Error> {
        let mut url = daemon_url.to_string();
        if !url.ends_with('/') {
            url.push('/');
        }
        let base_url = Url::parse(&url).map_err(|err| Error::InvalidUrl(url, err))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Call a method on the `/json_rpc` endpoint and decode its `result`.
    fn json_rpc<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R, Error> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": "0",
            "method": method,
            "params": params,
        });
        let response = self.post(method, "json_rpc", &body)?;

        if let Some(error) = response.get("error") {
            return Err(Error::Protocol(
                method.to_string(),
                format!("daemon returned error {error}"),
            ));
        }

        let result = response
            .get("result")
            .cloned()
            .ok_or_else(|| Error::Protocol(method.to_string(), "no result in response".into()))?;

        decode(method, result)
    }

    /// Call one of the plain JSON endpoints.
    fn plain<R: DeserializeOwned>(&self, method: &str, body: Value) -> Result<R, Error> {
        let response = self.post(method, method, &body)?;
        decode(method, response)
    }

    fn post(&self, method: &str, path: &str, body: &Value) -> Result<Value, Error> {
        let url = self
            .base_url
            .join(path)
            .map_err(|err| Error::InvalidUrl(path.to_string(), err))?;

        tracing::debug!(%url, method, "Sending daemon request");

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .map_err(|err| classify(method, err))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(Error::Transient(
                method.to_string(),
                format!("HTTP status {status}"),
            ));
        }
        if !status.is_success() {
            return Err(Error::Protocol(
                method.to_string(),
                format!("HTTP status {status}"),
            ));
        }

        response.json().map_err(|err| classify(method, err))
    }
}

/// Split reqwest failures into retryable and non-retryable ones.
fn classify(method: &str, err: reqwest::Error) -> Error {
    if err.is_decode() || err.is_builder() {
        Error::Protocol(method.to_string(), err.to_string())
    } else {
        Error::Transient(method.to_string(), err.to_string())
    }
}

/// Check the daemon's `status` field and decode the payload.
fn decode<R: DeserializeOwned>(method: &str, payload: Value) -> Result<R, Error> {
    match payload.get("status").and_then(Value::as_str) {
        None | Some(STATUS_OK) => {}
        Some(STATUS_BUSY) => {
            return Err(Error::Transient(method.to_string(), "daemon is busy".into()));
        }
        Some(other) => {
            return Err(Error::Protocol(
                method.to_string(),
                format!("unexpected status {other:?}"),
            ));
        }
    }

    serde_json::from_value(payload).map_err(|err| Error::Protocol(method.to_string(), err.to_string()))
}

fn parse_hashes(method: &str, hashes: &[String]) -> Result<Vec<TxHash>, Error> {
    hashes
        .iter()
        .map(|hash| {
            TxHash::from_hex(hash).map_err(|err| {
                Error::Protocol(method.to_string(), format!("bad tx hash {hash:?}: {err}"))
            })
        })
        .collect()
}

impl LedgerClient for HttpLedgerClient {
    fn chain_height(&self) -> Result<u64, Error> {
        let response: HeightResponse = self.plain("get_height", json!({}))?;
        Ok(response.height)
    }

    fn header_range(&self, start: u64, end: u64) -> Result<Vec<BlockHeaderSummary>, Error> {
        let result: HeadersRangeResult = self.json_rpc(
            "get_block_headers_range",
            json!({ "start_height": start, "end_height": end }),
        )?;

        Ok(result
            .headers
            .into_iter()
            .map(|header| BlockHeaderSummary {
                height: header.height,
                tx_count: header.num_txes,
            })
            .collect())
    }

    fn block_tx_hashes(&self, height: u64) -> Result<Vec<TxHash>, Error> {
        let result: BlockResult = self.json_rpc("get_block", json!({ "height": height }))?;
        parse_hashes("get_block", &result.tx_hashes)
    }

    fn transactions(&self, tx_hashes: &[TxHash]) -> Result<TransactionsResponse, Error> {
        let hashes: Vec<String> = tx_hashes.iter().map(TxHash::to_hex).collect();
        let result: TransactionsResult = self.plain(
            "get_transactions",
            json!({ "txs_hashes": hashes, "decode_as_json": true }),
        )?;

        Ok(TransactionsResponse {
            txs: result.txs,
            missed: parse_hashes("get_transactions", &result.missed_tx)?,
        })
    }
}
