use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::Error;
use crate::types::{EndpointInfo, EthCall, RpcReply, RpcRequest};

/// Raw outcome of posting one JSON-RPC request, kept separate from the
/// decoded reply so the pool can classify HTTP-level throttling.
#[derive(Debug)]
pub struct RpcResponse {
    pub status: u16,
    pub reply: RpcReply,
}

/// Transport seam for the pool. Production posts over HTTP; tests substitute
/// a scripted implementation.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn send(
        &self,
        url: &str,
        request: &RpcRequest,
    ) -> Result<RpcResponse, Error>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<HttpTransport, Error> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(HttpTransport { client })
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn send(
        &self,
        url: &str,
        request: &RpcRequest,
    ) -> Result<RpcResponse, Error> {
        let response = self.client.post(url).json(request).send().await?;
        let status = response.status().as_u16();

        let reply = if status == 429 {
            RpcReply { result: None, error: None }
        } else {
            response.json().await?
        };

        Ok(RpcResponse { status, reply })
    }
}

#[derive(Debug, Clone)]
pub struct Endpoint {
    pub name: String,
    pub url: String,
    pub priority: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub max_consecutive_errors: u32,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub endpoint_cooldown: Duration,
    pub rate_limit_cooldown: Duration,
}

struct EndpointState {
    endpoint: Endpoint,
    consecutive_errors: u32,
    disabled_until: Option<Instant>,
}

/// Prioritized set of JSON-RPC endpoints. Calls always go to the healthiest
/// endpoint with the lowest priority number; failures accumulate per
/// endpoint and trip a cooldown, after which the endpoint silently rejoins
/// rotation at its original priority.
pub struct EndpointPool {
    states: Mutex<Vec<EndpointState>>,
    settings: PoolSettings,
    transport: Arc<dyn RpcTransport>,
    next_id: AtomicU64,
}

impl EndpointPool {
    pub fn new(
        mut endpoints: Vec<Endpoint>,
        settings: PoolSettings,
        transport: Arc<dyn RpcTransport>,
    ) -> Result<EndpointPool, Error> {
        if endpoints.is_empty() {
            return Err(Error::ConfigurationError(String::from(
                "no RPC endpoints configured",
            )));
        }

        endpoints.sort_by_key(|endpoint| endpoint.priority);

        let states = endpoints
            .into_iter()
            .map(|endpoint| EndpointState {
                endpoint,
                consecutive_errors: 0,
                disabled_until: None,
            })
            .collect();

        Ok(EndpointPool {
            states: Mutex::new(states),
            settings,
            transport,
            next_id: AtomicU64::new(1),
        })
    }

    /// Executes one `eth_call`, rotating and retrying across the pool.
    /// Returns the raw `0x`-prefixed return data on success.
    pub async fn execute(&self, call: &EthCall) -> Result<String, Error> {
        let request =
            RpcRequest::eth_call(call, self.next_id.fetch_add(1, Ordering::Relaxed));

        let mut last_error = Error::EndpointExhausted;

        for attempt in 0..=self.settings.max_retries {
            if attempt > 0 {
                let delay = self.settings.retry_delay * 2u32.pow(attempt - 1);
                tokio::time::sleep(delay).await;
            }

            let (index, url) = self.pick_active(Instant::now())?;

            let response = match self.transport.send(&url, &request).await {
                Ok(response) => response,
                Err(error) => {
                    debug!("Endpoint {} transport failure: {}", url, error);
                    self.note_failure(index, Instant::now());
                    last_error = Error::TransientUpstream(error.to_string());
                    continue;
                },
            };

            if is_rate_limited(&response) {
                warn!("Endpoint {} is rate limited, cooling it down", url);
                self.note_rate_limited(index, Instant::now());
                last_error =
                    Error::TransientUpstream(format!("{} rate limited", url));
                continue;
            }

            if let Some(error) = response.reply.error {
                if error.message.to_lowercase().contains("execution reverted") {
                    self.note_success(index);
                    return Err(Error::FatalContract(error.message));
                }

                debug!(
                    "Endpoint {} RPC error {}: {}",
                    url, error.code, error.message
                );
                self.note_failure(index, Instant::now());
                last_error = Error::TransientUpstream(error.message);
                continue;
            }

            match response.reply.result {
                Some(result) => {
                    let data = result.as_str().ok_or_else(|| {
                        Error::Decode(format!(
                            "non-string eth_call result: {}",
                            result
                        ))
                    })?;
                    self.note_success(index);
                    return Ok(data.to_owned());
                },
                None => {
                    self.note_failure(index, Instant::now());
                    last_error = Error::TransientUpstream(format!(
                        "{} returned neither result nor error",
                        url
                    ));
                },
            }
        }

        Err(last_error)
    }

    /// Health snapshot for reporting.
    pub fn list_endpoints(&self) -> Vec<EndpointInfo> {
        let now = Instant::now();
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());

        states
            .iter()
            .map(|state| EndpointInfo {
                name: state.endpoint.name.clone(),
                url: state.endpoint.url.clone(),
                is_active: !is_disabled(state, now),
                priority: state.endpoint.priority,
            })
            .collect()
    }

    fn pick_active(&self, now: Instant) -> Result<(usize, String), Error> {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());

        for (index, state) in states.iter_mut().enumerate() {
            if let Some(until) = state.disabled_until {
                if now < until {
                    continue;
                }
                state.disabled_until = None;
                state.consecutive_errors = 0;
                debug!("Endpoint {} rejoins rotation", state.endpoint.url);
            }

            return Ok((index, state.endpoint.url.clone()));
        }

        Err(Error::EndpointExhausted)
    }

    fn note_success(&self, index: usize) {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states[index].consecutive_errors = 0;
    }

    fn note_failure(&self, index: usize, now: Instant) {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let state = &mut states[index];

        state.consecutive_errors += 1;
        if state.consecutive_errors >= self.settings.max_consecutive_errors {
            warn!(
                "Endpoint {} disabled after {} consecutive errors",
                state.endpoint.url, state.consecutive_errors
            );
            state.disabled_until = Some(now + self.settings.endpoint_cooldown);
        }
    }

    fn note_rate_limited(&self, index: usize, now: Instant) {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states[index].disabled_until =
            Some(now + self.settings.rate_limit_cooldown);
    }
}

fn is_disabled(state: &EndpointState, now: Instant) -> bool {
    matches!(state.disabled_until, Some(until) if now < until)
}

fn is_rate_limited(response: &RpcResponse) -> bool {
    if response.status == 429 {
        return true;
    }

    match &response.reply.error {
        Some(error) => {
            let message = error.message.to_lowercase();
            error.code == -32005
                || message.contains("rate limit")
                || message.contains("too many requests")
        },
        None => false,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::{RpcResponse, RpcTransport};
    use crate::error::Error;
    use crate::types::{RpcErrorBody, RpcReply, RpcRequest};

    pub fn ok_response(data: &str) -> RpcResponse {
        RpcResponse {
            status: 200,
            reply: RpcReply { result: Some(json!(data)), error: None },
        }
    }

    pub fn error_response(code: i64, message: &str) -> RpcResponse {
        RpcResponse {
            status: 200,
            reply: RpcReply {
                result: None,
                error: Some(RpcErrorBody { code, message: message.to_owned() }),
            },
        }
    }

    pub fn throttled_response() -> RpcResponse {
        RpcResponse {
            status: 429,
            reply: RpcReply { result: None, error: None },
        }
    }

    type Handler = Box<
        dyn Fn(&str, &RpcRequest) -> Result<RpcResponse, Error> + Send + Sync,
    >;

    /// Scripted transport. Records every (url, calldata) pair it sees and
    /// answers through the injected closure.
    pub struct MockTransport {
        handler: Handler,
        pub calls: Mutex<Vec<(String, String)>>,
    }

    impl MockTransport {
        pub fn new<F>(handler: F) -> MockTransport
        where
            F: Fn(&str, &RpcRequest) -> Result<RpcResponse, Error>
                + Send
                + Sync
                + 'static,
        {
            MockTransport { handler: Box::new(handler), calls: Mutex::new(Vec::new()) }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    pub fn request_data(request: &RpcRequest) -> String {
        request.params[0]["data"]
            .as_str()
            .unwrap_or_default()
            .to_owned()
    }

    pub fn request_target(request: &RpcRequest) -> String {
        request.params[0]["to"]
            .as_str()
            .unwrap_or_default()
            .to_owned()
    }

    #[async_trait]
    impl RpcTransport for MockTransport {
        async fn send(
            &self,
            url: &str,
            request: &RpcRequest,
        ) -> Result<RpcResponse, Error> {
            self.calls
                .lock()
                .unwrap()
                .push((url.to_owned(), request_data(request)));
            (self.handler)(url, request)
        }
    }
}
