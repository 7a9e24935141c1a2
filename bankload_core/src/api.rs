//! Typed client for the banking API under test.
//!
//! Every call records `http_reqs`, `http_req_failed` and (when a response
//! arrived) `http_req_duration`. Response bodies decode into the schemas
//! below; a body that does not decode is a failed step, not a panic.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::StepError;
use crate::http::{HttpExecutor, HttpRequest};
use crate::identity::Credentials;
use crate::metrics::{names, MetricsSink, Sample};

const CREATED: &[u16] = &[201];
const OK: &[u16] = &[200];
/// A 400 on /transactions is a business-rule rejection, not a failure.
const TRANSACTION_ACCEPTED: &[u16] = &[201, 400];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterResponse {
    #[serde(default)]
    pub user_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateAccountResponse {
    #[serde(default)]
    pub account_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountSummary {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub balance: f64,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountsResponse {
    pub accounts: Vec<AccountSummary>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HealthResponse {
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Transfer,
    Payment,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Transfer => f.write_str("transfer"),
            TransactionKind::Payment => f.write_str("payment"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionRequest {
    pub from_account_id: String,
    pub to_account_id: String,
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// 201
    Accepted,
    /// 400, e.g. insufficient funds
    Rejected,
}

/// Status, latency and typed outcome of one HTTP call.
#[derive(Debug, Clone)]
pub struct Call<T> {
    /// `None` on transport failure
    pub status: Option<u16>,
    pub latency: Duration,
    pub outcome: Result<T, StepError>,
}

/// The six endpoints the load generator drives.
#[derive(Clone)]
pub struct BankApi {
    http: Arc<dyn HttpExecutor>,
    sink: Arc<dyn MetricsSink>,
}

impl BankApi {
    pub fn new(http: Arc<dyn HttpExecutor>, sink: Arc<dyn MetricsSink>) -> Self {
        Self { http, sink }
    }

    /// POST /register, yields the new `user_id`.
    pub async fn register(&self, credentials: &Credentials) -> Call<String> {
        let body = credentials_body(credentials);
        self.call(HttpRequest::post("/register", body), CREATED, |_, body| {
            let response: RegisterResponse = decode(body)?;
            non_empty(response.user_id, "user_id")
        })
        .await
    }

    /// POST /login, yields the bearer token.
    pub async fn login(&self, credentials: &Credentials) -> Call<String> {
        let body = credentials_body(credentials);
        self.call(HttpRequest::post("/login", body), OK, |_, body| {
            let response: LoginResponse = decode(body)?;
            non_empty(response.token, "token")
        })
        .await
    }

    /// POST /accounts, yields the new `account_id`.
    pub async fn create_account(&self, token: &str) -> Call<String> {
        let request = HttpRequest::post("/accounts", json!({})).with_bearer(token);
        self.call(request, CREATED, |_, body| {
            let response: CreateAccountResponse = decode(body)?;
            non_empty(response.account_id, "account_id")
        })
        .await
    }

    /// GET /accounts, yields the caller's accounts.
    pub async fn list_accounts(&self, token: &str) -> Call<Vec<AccountSummary>> {
        let request = HttpRequest::get("/accounts").with_bearer(token);
        self.call(request, OK, |_, body| {
            let response: AccountsResponse = decode(body)?;
            Ok(response.accounts)
        })
        .await
    }

    /// POST /transactions. Both 201 and 400 count as success.
    pub async fn transact(
        &self,
        token: &str,
        transaction: &TransactionRequest,
    ) -> Call<TransactionOutcome> {
        let request = HttpRequest::post("/transactions", json!(transaction)).with_bearer(token);
        self.call(request, TRANSACTION_ACCEPTED, |status, _| {
            Ok(if status == 201 {
                TransactionOutcome::Accepted
            } else {
                TransactionOutcome::Rejected
            })
        })
        .await
    }

    /// GET /health, requires `status == "OK"`.
    pub async fn health(&self) -> Call<()> {
        self.call(HttpRequest::get("/health"), OK, |_, body| {
            let response: HealthResponse = decode(body)?;
            if response.status == "OK" {
                Ok(())
            } else {
                Err(StepError::UnexpectedValue {
                    field: "status",
                    value: response.status,
                })
            }
        })
        .await
    }

    async fn call<T, F>(&self, request: HttpRequest, expected: &'static [u16], extract: F) -> Call<T>
    where
        F: FnOnce(u16, &[u8]) -> Result<T, StepError>,
    {
        let method = request.method;
        let path = request.path.clone();
        let start = Instant::now();

        self.sink.record(Sample::counter(names::HTTP_REQS, 1.0));

        match self.http.send(request).await {
            Err(error) => {
                let latency = start.elapsed();
                tracing::error!("{} {} failed: {}", method, path, error);
                self.sink.record(Sample::rate(names::HTTP_REQ_FAILED, true));
                Call {
                    status: None,
                    latency,
                    outcome: Err(error.into()),
                }
            }
            Ok(response) => {
                let accepted = expected.contains(&response.status);
                self.sink
                    .record(Sample::duration(names::HTTP_REQ_DURATION, response.latency));
                self.sink
                    .record(Sample::rate(names::HTTP_REQ_FAILED, !accepted));

                let outcome = if accepted {
                    extract(response.status, &response.body)
                } else {
                    Err(StepError::UnexpectedStatus {
                        expected,
                        actual: response.status,
                    })
                };

                match &outcome {
                    Err(StepError::Decode(reason)) => {
                        tracing::warn!("{} {} returned an undecodable body: {}", method, path, reason)
                    }
                    Err(error) => tracing::debug!("{} {}: {}", method, path, error),
                    Ok(_) => {}
                }

                Call {
                    status: Some(response.status),
                    latency: response.latency,
                    outcome,
                }
            }
        }
    }
}

fn credentials_body(credentials: &Credentials) -> serde_json::Value {
    json!({
        "name": credentials.username,
        "password": credentials.password,
    })
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, StepError> {
    serde_json::from_slice(body).map_err(|e| StepError::Decode(e.to_string()))
}

fn non_empty(value: String, field: &'static str) -> Result<String, StepError> {
    if value.is_empty() {
        Err(StepError::MissingField(field))
    } else {
        Ok(value)
    }
}
