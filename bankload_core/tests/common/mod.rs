//! In-memory banking API used by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bankload_core::{HttpExecutor, HttpRequest, HttpResponse, Method, TransportError};
use parking_lot::Mutex;
use serde_json::{json, Value};

// ============================================================================
// Fake bank state
// ============================================================================

const OPENING_BALANCE: f64 = 1_000.0;
const LATENCY: Duration = Duration::from_millis(5);

#[derive(Default)]
struct Bank {
    /// username -> (user id, password)
    users: HashMap<String, (String, String)>,
    /// token -> user id
    tokens: HashMap<String, String>,
    /// account id -> (owner user id, balance)
    accounts: HashMap<String, (String, f64)>,
    next_id: u64,
    register_calls: usize,
    log: Vec<(Method, String)>,
    transactions: Vec<Value>,
}

impl Bank {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }
}

/// Failure knobs.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Every Nth register call answers 500
    pub fail_register_every: Option<usize>,
    /// Login answers 200 with an empty token
    pub empty_tokens: bool,
    /// Every request fails at the transport layer
    pub unreachable: bool,
}

#[derive(Clone, Default)]
pub struct FakeBank {
    state: Arc<Mutex<Bank>>,
    faults: Arc<Mutex<Faults>>,
}

impl FakeBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faults(faults: Faults) -> Self {
        let bank = Self::new();
        *bank.faults.lock() = faults;
        bank
    }

    pub fn requests(&self) -> Vec<(Method, String)> {
        self.state.lock().log.clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests().into_iter().map(|(_, path)| path).collect()
    }

    pub fn transactions(&self) -> Vec<Value> {
        self.state.lock().transactions.clone()
    }

    pub fn balance(&self, account_id: &str) -> Option<f64> {
        self.state
            .lock()
            .accounts
            .get(account_id)
            .map(|(_, balance)| *balance)
    }

    fn handle(&self, request: &HttpRequest) -> (u16, Value) {
        let faults = self.faults.lock().clone();
        let mut bank = self.state.lock();
        bank.log.push((request.method, request.path.clone()));

        let body = request.body.clone().unwrap_or(Value::Null);
        let user = request
            .bearer
            .as_ref()
            .and_then(|token| bank.tokens.get(token).cloned());

        match (request.method, request.path.as_str()) {
            (Method::Get, "/health") => (200, json!({ "status": "OK" })),

            (Method::Post, "/register") => {
                bank.register_calls += 1;
                if let Some(every) = faults.fail_register_every {
                    if bank.register_calls % every == 0 {
                        return (500, json!({ "error": "internal" }));
                    }
                }
                let name = body["name"].as_str().unwrap_or_default().to_string();
                let password = body["password"].as_str().unwrap_or_default().to_string();
                if name.is_empty() || password.is_empty() {
                    return (400, json!({ "error": "name and password required" }));
                }
                if bank.users.contains_key(&name) {
                    return (409, json!({ "error": "user exists" }));
                }
                let user_id = bank.next("user");
                bank.users.insert(name, (user_id.clone(), password));
                (201, json!({ "user_id": user_id }))
            }

            (Method::Post, "/login") => {
                let name = body["name"].as_str().unwrap_or_default();
                let password = body["password"].as_str().unwrap_or_default();
                let user_id = match bank.users.get(name) {
                    Some((id, expected)) if expected == password => id.clone(),
                    _ => return (401, json!({ "error": "invalid credentials" })),
                };
                if faults.empty_tokens {
                    return (200, json!({ "token": "" }));
                }
                let token = bank.next("token");
                bank.tokens.insert(token.clone(), user_id);
                (200, json!({ "token": token }))
            }

            (Method::Post, "/accounts") => {
                let Some(user_id) = user else {
                    return (401, json!({ "error": "unauthorized" }));
                };
                let account_id = bank.next("acct");
                bank.accounts
                    .insert(account_id.clone(), (user_id, OPENING_BALANCE));
                (201, json!({ "account_id": account_id }))
            }

            (Method::Get, "/accounts") => {
                let Some(user_id) = user else {
                    return (401, json!({ "error": "unauthorized" }));
                };
                let accounts: Vec<Value> = bank
                    .accounts
                    .iter()
                    .filter(|(_, (owner, _))| *owner == user_id)
                    .map(|(id, (_, balance))| json!({ "id": id, "balance": balance }))
                    .collect();
                (200, json!({ "accounts": accounts }))
            }

            (Method::Post, "/transactions") => {
                let Some(user_id) = user else {
                    return (401, json!({ "error": "unauthorized" }));
                };
                let from = body["from_account_id"].as_str().unwrap_or_default().to_string();
                let to = body["to_account_id"].as_str().unwrap_or_default().to_string();
                let amount = body["amount"].as_f64().unwrap_or_default();

                let owns_source = matches!(bank.accounts.get(&from), Some((owner, _)) if *owner == user_id);
                if !owns_source || !bank.accounts.contains_key(&to) || from == to || amount <= 0.0 {
                    return (400, json!({ "error": "invalid transaction" }));
                }
                if bank.accounts[&from].1 < amount {
                    return (400, json!({ "error": "insufficient funds" }));
                }
                if let Some(source) = bank.accounts.get_mut(&from) {
                    source.1 -= amount;
                }
                if let Some(target) = bank.accounts.get_mut(&to) {
                    target.1 += amount;
                }
                bank.transactions.push(body);
                let id = bank.next("tx");
                (201, json!({ "id": id }))
            }

            _ => (404, json!({ "error": "not found" })),
        }
    }
}

#[async_trait]
impl HttpExecutor for FakeBank {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        if self.faults.lock().unreachable {
            self.state
                .lock()
                .log
                .push((request.method, request.path.clone()));
            return Err(TransportError::ConnectionFailed {
                endpoint: request.path,
                message: "connection refused".to_string(),
            });
        }

        let (status, body) = self.handle(&request);
        Ok(HttpResponse {
            status,
            body: serde_json::to_vec(&body).unwrap_or_default(),
            latency: LATENCY,
        })
    }
}
