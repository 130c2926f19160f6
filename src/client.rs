//! A simple client that fetches data from, or writes data to, a running
//! `minikv` node over HTTP. Supplements the distilled spec (it mirrors
//! `original_source/minikv/client/__init__.py`) and backs the
//! `minikv-client` load-generation binary.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, Result, ResultWrappedExt};

/// Maintains a connection to a `minikv` node over HTTP.
pub struct RequestSender {
    base_url: String,
    client: reqwest::blocking::Client,
}

#[derive(Serialize)]
struct PutBody<'a> {
    value: &'a str,
}

#[derive(Deserialize)]
struct GetResponse {
    value: Option<String>,
}

impl RequestSender {
    /// `address` is a `host:port` pair, e.g. `127.0.0.1:8080`.
    pub fn new(address: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .wrapped(ErrorKind::Communication)?;
        Ok(Self {
            base_url: format!("http://{}", address),
            client,
        })
    }

    /// Write a new entry to the database.
    pub fn write(&self, key: &str, value: &str) -> Result<()> {
        let url = format!("{}/put?key={}", self.base_url, key);
        let response = self
            .client
            .post(&url)
            .json(&PutBody { value })
            .send()
            .wrapped(ErrorKind::Communication)?;
        response
            .error_for_status()
            .wrapped(ErrorKind::Communication)?;
        Ok(())
    }

    /// Read an entry from the database.
    pub fn read(&self, key: &str) -> Result<Option<String>> {
        let url = format!("{}/get?key={}", self.base_url, key);
        let response = self
            .client
            .get(&url)
            .send()
            .wrapped(ErrorKind::Communication)?
            .error_for_status()
            .wrapped(ErrorKind::Communication)?;
        let body: GetResponse = response.json().wrapped(ErrorKind::Communication)?;
        Ok(body.value)
    }
}
