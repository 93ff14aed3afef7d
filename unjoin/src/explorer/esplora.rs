//! Esplora REST client.

use crate::explorer::{FetchError, RawTransaction, TxSource};

use std::{thread, time::Duration};

use bitcoin::Txid;
use serde::Deserialize;

/// How often we retry a failed fetch before surfacing the error.
const FETCH_ATTEMPTS: usize = 3;
/// Backoff before the first retry; doubles per attempt.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);
/// Limit on a single HTTP exchange.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

// The parts of Esplora's `GET /tx/:txid` answer we care about.
#[derive(Debug, Clone, Deserialize)]
struct EsploraTx {
    vin: Vec<EsploraVin>,
    vout: Vec<EsploraVout>,
}

#[derive(Debug, Clone, Deserialize)]
struct EsploraVin {
    prevout: Option<EsploraPrevout>,
    #[serde(default)]
    is_coinbase: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct EsploraPrevout {
    value: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct EsploraVout {
    value: u64,
}

/// Fetches transactions from an Esplora HTTP endpoint, such as
/// `https://blockstream.info/api` or a self-hosted instance.
pub struct EsploraClient {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl EsploraClient {
    pub fn new(base_url: &str) -> Result<EsploraClient, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(EsploraClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    // A single request. `Ok(Err(_))` is final, `Err(_)` is worth retrying.
    fn try_fetch(&self, txid: &Txid) -> Result<Result<EsploraTx, FetchError>, FetchError> {
        let url = format!("{}/tx/{}", self.base_url, txid);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Err(FetchError::NotFound));
        }
        if status.is_server_error() {
            return Err(FetchError::Network(format!("explorer answered {}", status)));
        }
        if !status.is_success() {
            return Ok(Err(FetchError::BadResponse(format!(
                "explorer answered {}",
                status
            ))));
        }
        response
            .json::<EsploraTx>()
            .map(Ok)
            .map_err(|e| FetchError::Network(format!("reading response: {}", e)))
    }
}

impl TxSource for EsploraClient {
    fn fetch(&self, txid: &Txid) -> Result<RawTransaction, FetchError> {
        let mut backoff = RETRY_BACKOFF;
        let mut last_err = None;
        for attempt in 0..FETCH_ATTEMPTS {
            if attempt > 0 {
                thread::sleep(backoff);
                backoff *= 2;
            }
            match self.try_fetch(txid) {
                Ok(Ok(tx)) => return decode(txid, tx),
                Ok(Err(e)) => return Err(e),
                Err(e) => {
                    log::warn!(
                        "Fetching {} (attempt {}/{}): {}",
                        txid,
                        attempt + 1,
                        FETCH_ATTEMPTS,
                        e
                    );
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| FetchError::Network("no attempt made".to_string())))
    }
}

fn decode(txid: &Txid, tx: EsploraTx) -> Result<RawTransaction, FetchError> {
    let mut inputs = Vec::with_capacity(tx.vin.len());
    for vin in tx.vin.iter() {
        if vin.is_coinbase {
            return Err(FetchError::BadResponse(
                "coinbase transactions cannot be CoinJoins".to_string(),
            ));
        }
        let prevout = vin.prevout.as_ref().ok_or_else(|| {
            FetchError::BadResponse("input without a previous output".to_string())
        })?;
        inputs.push(prevout.value);
    }
    Ok(RawTransaction {
        txid: *txid,
        inputs,
        outputs: tx.vout.iter().map(|vout| vout.value).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{
        io::{Read, Write},
        net,
        str::FromStr,
        thread,
    };

    const TXID: &str = "d3bd1d6e3b2e1f0b9c4fbb5b0f3a3fd2a13b1c06d5fe55eb0b422f04402e4f0e";

    // Serve canned HTTP responses, one connection each, on a localhost
    // listener. Returns the base URL to point the client at.
    fn dummy_explorer(responses: Vec<String>) -> (String, thread::JoinHandle<()>) {
        let server = net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = server.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            for response in responses {
                let (mut stream, _) = server.accept().unwrap();
                let mut buf = [0u8; 4096];
                let mut request = Vec::new();
                loop {
                    let n = stream.read(&mut buf).unwrap();
                    request.extend_from_slice(&buf[..n]);
                    if n == 0 || request.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                stream.write_all(response.as_bytes()).unwrap();
                stream.flush().unwrap();
            }
        });
        (format!("http://127.0.0.1:{}", port), handle)
    }

    fn http_ok(body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        )
    }

    fn http_status(status: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
            status
        )
    }

    #[test]
    fn fetches_value_flows() {
        let body = r#"{
            "txid": "ignored",
            "vin": [
                {"prevout": {"value": 150000, "scriptpubkey": "00"}},
                {"prevout": {"value": 250000}}
            ],
            "vout": [
                {"value": 100000, "scriptpubkey_type": "v0_p2wpkh"},
                {"value": 100000},
                {"value": 150080}
            ],
            "status": {"confirmed": true}
        }"#;
        let (url, server) = dummy_explorer(vec![http_ok(body)]);
        let client = EsploraClient::new(&url).unwrap();
        let txid = Txid::from_str(TXID).unwrap();

        let raw = client.fetch(&txid).unwrap();
        assert_eq!(raw.txid, txid);
        assert_eq!(raw.inputs, vec![150_000, 250_000]);
        assert_eq!(raw.outputs, vec![100_000, 100_000, 150_080]);
        server.join().unwrap();
    }

    #[test]
    fn not_found_is_final() {
        let (url, server) = dummy_explorer(vec![http_status("404 Not Found")]);
        let client = EsploraClient::new(&url).unwrap();
        let txid = Txid::from_str(TXID).unwrap();

        assert_eq!(client.fetch(&txid), Err(FetchError::NotFound));
        // A single connection was consumed: no retry happened.
        server.join().unwrap();
    }

    #[test]
    fn server_errors_are_retried() {
        let body = r#"{"vin": [{"prevout": {"value": 1000}}], "vout": [{"value": 900}]}"#;
        let (url, server) = dummy_explorer(vec![
            http_status("502 Bad Gateway"),
            http_ok(body),
        ]);
        let client = EsploraClient::new(&url).unwrap();
        let txid = Txid::from_str(TXID).unwrap();

        let raw = client.fetch(&txid).unwrap();
        assert_eq!(raw.inputs, vec![1_000]);
        server.join().unwrap();
    }

    #[test]
    fn rejects_coinbase_and_garbage() {
        let coinbase = r#"{"vin": [{"is_coinbase": true, "prevout": null}], "vout": [{"value": 1}]}"#;
        let (url, server) = dummy_explorer(vec![http_ok(coinbase)]);
        let client = EsploraClient::new(&url).unwrap();
        let txid = Txid::from_str(TXID).unwrap();
        match client.fetch(&txid) {
            Err(FetchError::BadResponse(_)) => {}
            other => panic!("expected BadResponse, got {:?}", other),
        }
        server.join().unwrap();

        // Not JSON at all. Decoding failures are transport-class and thus
        // retried; serve the garbage three times.
        let garbage = http_ok("certainly not json");
        let (url, server) = dummy_explorer(vec![garbage.clone(), garbage.clone(), garbage]);
        let client = EsploraClient::new(&url).unwrap();
        match client.fetch(&txid) {
            Err(FetchError::Network(_)) => {}
            other => panic!("expected Network, got {:?}", other),
        }
        server.join().unwrap();
    }
}
