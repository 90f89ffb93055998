//! The venue client and its dispatch routine.
//!
//! Every call follows the same lifecycle:
//!
//! 1. **Preflight**: encode and validate parameters, prime the order quota if
//!    the operation is quota-governed.
//! 2. **Admission**: wait on the [`AdmissionGate`] for a permit, then sign. A
//!    signing failure here still counts as preflight.
//! 3. **Transport**: send, read the reply, decode the envelope. The permit is
//!    released however this ends.
//!
//! Failed attempts of idempotent operations are repeated according to the
//! [`RetryPolicy`]; the final failure carries its stage and dispatch status.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::auth::{
    CredentialsProvider, HmacSigner, IncreasingTimestamp, RequestSigner, TimestampProvider,
};
use crate::context::RequestContext;
use crate::endpoints::{self, Operation, account, market, trade};
use crate::envelope;
use crate::error::VenueError;
use crate::observer::ErrorObserver;
use crate::rate_limit::{
    AdmissionGate, GateConfig, PrimerConfig, PrimingState, Protocol, QuotaSource, RateLimitPrimer,
    RouteKey,
};
use crate::retry::{RetryConfig, RetryPolicy};
use crate::stage::RequestStateError;
use crate::transport::{HttpTransport, Transport, TransportRequest, TransportResponse};
use crate::types::{CancelledOrders, OrderId, PlaceOrderRequest, Ticker};

/// Result of a dispatched call.
pub type CallResult<T> = Result<T, RequestStateError>;

/// Client for the venue API.
///
/// # Example
///
/// ```rust,no_run
/// use venue_api_client::VenueClient;
/// use venue_api_client::context::RequestContext;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = VenueClient::new();
///     let ctx = RequestContext::with_timeout(Duration::from_secs(5));
///     let time = client.server_time(&ctx).await?;
///     println!("Server time: {time}");
///     Ok(())
/// }
/// ```
///
/// For signed endpoints, provide credentials:
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use venue_api_client::VenueClient;
/// use venue_api_client::auth::StaticCredentials;
///
/// let client = VenueClient::builder()
///     .credentials(Arc::new(StaticCredentials::new("api_key", "api_secret")))
///     .build();
/// ```
pub struct VenueClient<T: Transport = HttpTransport> {
    transport: Arc<T>,
    gate: Arc<AdmissionGate>,
    primer: Arc<RateLimitPrimer>,
    retry: RetryPolicy,
    credentials: Option<Arc<dyn CredentialsProvider>>,
    signer: Arc<dyn RequestSigner>,
    timestamps: Arc<dyn TimestampProvider>,
    priming_operation: Operation,
}

impl VenueClient {
    /// Create a client with default settings, for unsigned endpoints only.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a new client builder.
    pub fn builder() -> VenueClientBuilder {
        VenueClientBuilder::new()
    }
}

impl Default for VenueClient {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> Clone for VenueClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            gate: Arc::clone(&self.gate),
            primer: Arc::clone(&self.primer),
            retry: self.retry.clone(),
            credentials: self.credentials.clone(),
            signer: Arc::clone(&self.signer),
            timestamps: Arc::clone(&self.timestamps),
            priming_operation: self.priming_operation.clone(),
        }
    }
}

impl<T: Transport> std::fmt::Debug for VenueClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VenueClient")
            .field("gate", &self.gate)
            .field("primer", &self.primer)
            .field("retry", &self.retry)
            .field("has_credentials", &self.credentials.is_some())
            .finish()
    }
}

impl<T: Transport> VenueClient<T> {
    /// The admission gate shared by every call of this client.
    pub fn gate(&self) -> &Arc<AdmissionGate> {
        &self.gate
    }

    /// The order quota primer.
    pub fn primer(&self) -> &Arc<RateLimitPrimer> {
        &self.primer
    }

    /// The retry policy.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Current priming state.
    pub async fn priming_state(&self) -> PrimingState {
        self.primer.state().await
    }

    /// Dispatch `operation` with `params` and decode the reply's `data`.
    ///
    /// # Errors
    ///
    /// A [`RequestStateError`] recording the stage of the final failed
    /// attempt and whether its request may have reached the venue.
    pub async fn call<R, P>(
        &self,
        ctx: &RequestContext,
        operation: &Operation,
        params: Option<&P>,
    ) -> CallResult<R>
    where
        R: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let route = operation.route();
        let preflight = |cause: VenueError| RequestStateError::preflight(route, cause);

        let params = params
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| preflight(e.into()))?;
        operation.validate(params.as_ref()).map_err(preflight)?;
        let (path, body) = encode(route, params.as_ref()).map_err(preflight)?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.attempt(ctx, operation, &path, body.as_deref()).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            if !self.retry.should_retry(attempt, err.cause(), operation) {
                return Err(err.with_attempts(attempt));
            }

            let delay = self.retry.delay(attempt);
            tracing::warn!(
                route = %route,
                attempt,
                ?delay,
                error = %err.cause(),
                "Retrying after transient failure"
            );
            if let Err(cause) = ctx.sleep(delay).await {
                return Err(err.replace_cause(cause.into()).with_attempts(attempt));
            }
        }
    }

    async fn attempt<R>(
        &self,
        ctx: &RequestContext,
        operation: &Operation,
        path: &str,
        body: Option<&str>,
    ) -> CallResult<R>
    where
        R: DeserializeOwned,
    {
        let route = operation.route();
        let preflight = |cause: VenueError| RequestStateError::preflight(route, cause);

        ctx.check().map_err(|cause| preflight(cause.into()))?;
        if operation.is_signed() && self.credentials.is_none() {
            return Err(preflight(VenueError::MissingCredentials));
        }
        if operation.is_quota_governed() {
            self.primer
                .ensure(ctx, &PrimingCall { client: self })
                .await
                .map_err(|e| preflight(e.into()))?;
        }

        let response = self
            .transmit(ctx, route, path, body, operation.is_signed())
            .await?;
        envelope::decode(&response).map_err(|e| RequestStateError::transport(route, e))
    }

    /// Build the wire request, signing it if needed.
    ///
    /// Runs only once admitted, so the timestamp is taken right before sending
    /// and callers that waited longer never carry an older timestamp.
    fn prepare(
        &self,
        route: &RouteKey,
        path: &str,
        body: Option<&str>,
        signed: bool,
    ) -> Result<TransportRequest, VenueError> {
        let auth = if signed {
            let credentials = self
                .credentials
                .as_ref()
                .ok_or(VenueError::MissingCredentials)?;
            let timestamp = self.timestamps.next_timestamp();
            Some(self.signer.sign(
                credentials.get_credentials(),
                timestamp,
                route.method_or_op(),
                path,
                body.unwrap_or_default(),
            )?)
        } else {
            None
        };

        Ok(TransportRequest {
            route: route.clone(),
            path: path.to_string(),
            body: body.map(str::to_string),
            headers: Vec::new(),
            auth,
        })
    }

    /// Admit, sign and send one request. The permit is released before
    /// returning.
    async fn transmit(
        &self,
        ctx: &RequestContext,
        route: &RouteKey,
        path: &str,
        body: Option<&str>,
        signed: bool,
    ) -> CallResult<TransportResponse> {
        let mut permit = self
            .gate
            .acquire(ctx, route)
            .await
            .map_err(|e| RequestStateError::admission(route, e.into()))?;
        if let Err(cause) = ctx.check() {
            return Err(RequestStateError::admission(route, cause.into()));
        }
        let request = self
            .prepare(route, path, body, signed)
            .map_err(|e| RequestStateError::preflight(route, e))?;

        let result = ctx.run(self.transport.send(request)).await;
        permit.release();

        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => Err(RequestStateError::transport(route, err.into())),
            Err(cause) => Err(RequestStateError::transport(route, cause.into())),
        }
    }

    /// Server time in unix milliseconds.
    pub async fn server_time(&self, ctx: &RequestContext) -> CallResult<u64> {
        self.call::<_, Value>(ctx, &market::SERVER_TIME, None).await
    }

    /// Best bid and ask for `symbol`.
    pub async fn ticker(&self, ctx: &RequestContext, symbol: &str) -> CallResult<Ticker> {
        #[derive(Serialize)]
        struct Params<'a> {
            symbol: &'a str,
        }
        self.call(ctx, &market::TICKER, Some(&Params { symbol })).await
    }

    /// Place an order. Never retried automatically.
    ///
    /// If this fails with `dispatched() == true`, look the order up by its
    /// `client_oid` before placing it again.
    pub async fn place_order(
        &self,
        ctx: &RequestContext,
        request: &PlaceOrderRequest,
    ) -> CallResult<OrderId> {
        self.call(ctx, &trade::PLACE_ORDER, Some(request)).await
    }

    /// Cancel an order by id. Never retried automatically.
    pub async fn cancel_order(&self, ctx: &RequestContext, order_id: &str) -> CallResult<CancelledOrders> {
        let params = OrderId {
            order_id: order_id.to_string(),
        };
        self.call(ctx, &trade::CANCEL_ORDER, Some(&params)).await
    }
}

/// Fetches the order quota through the client's own gate and transport.
struct PrimingCall<'a, T: Transport> {
    client: &'a VenueClient<T>,
}

impl<T: Transport> QuotaSource for PrimingCall<'_, T> {
    async fn fetch_quota(&self, ctx: &RequestContext) -> Result<String, VenueError> {
        let operation = &self.client.priming_operation;
        let route = operation.route();
        let (path, body) = encode(route, None)?;
        let response = self
            .client
            .transmit(ctx, route, &path, body.as_deref(), operation.is_signed())
            .await
            .map_err(RequestStateError::into_cause)?;
        envelope::decode_quota(&response)
    }
}

/// Split parameters into the request path and body for `route`.
///
/// Query-style REST methods carry parameters in the query string; all other
/// calls carry them as a JSON body.
fn encode(route: &RouteKey, params: Option<&Value>) -> Result<(String, Option<String>), VenueError> {
    let endpoint = route.endpoint().to_string();
    let Some(params) = params else {
        return Ok((endpoint, None));
    };

    if route.protocol() == Protocol::Rest && route.uses_query() {
        let Value::Object(map) = params else {
            return Err(VenueError::Validation(format!(
                "{route} expects named query parameters"
            )));
        };
        let pairs: Vec<(&str, String)> = map
            .iter()
            .filter_map(|(name, value)| match value {
                Value::Null => None,
                Value::String(value) => Some((name.as_str(), value.clone())),
                other => Some((name.as_str(), other.to_string())),
            })
            .collect();
        let query = serde_urlencoded::to_string(&pairs)
            .map_err(|e| VenueError::Validation(format!("Failed to encode query: {e}")))?;
        if query.is_empty() {
            Ok((endpoint, None))
        } else {
            Ok((format!("{endpoint}?{query}"), None))
        }
    } else {
        Ok((endpoint, Some(serde_json::to_string(params)?)))
    }
}

/// Builder for [`VenueClient`].
pub struct VenueClientBuilder {
    base_url: Option<String>,
    user_agent: Option<String>,
    timeout: Option<Duration>,
    credentials: Option<Arc<dyn CredentialsProvider>>,
    signer: Option<Arc<dyn RequestSigner>>,
    timestamps: Option<Arc<dyn TimestampProvider>>,
    gate: Option<Arc<AdmissionGate>>,
    gate_config: GateConfig,
    primer_config: PrimerConfig,
    retry_config: RetryConfig,
    observer: Option<ErrorObserver>,
    priming_operation: Operation,
}

impl VenueClientBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            base_url: None,
            user_agent: None,
            timeout: None,
            credentials: None,
            signer: None,
            timestamps: None,
            gate: None,
            gate_config: GateConfig::default(),
            primer_config: PrimerConfig {
                governed_routes: endpoints::governed_routes(),
                ..PrimerConfig::default()
            },
            retry_config: RetryConfig::default(),
            observer: None,
            priming_operation: account::ORDER_QUOTA,
        }
    }

    /// Set the base URL (useful for testing with a mock server).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set a custom user agent.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Set a per-request HTTP timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the credentials provider for signed requests.
    pub fn credentials(mut self, credentials: Arc<dyn CredentialsProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Replace the request signer.
    pub fn signer(mut self, signer: Arc<dyn RequestSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Replace the timestamp source.
    pub fn timestamp_provider(mut self, provider: Arc<dyn TimestampProvider>) -> Self {
        self.timestamps = Some(provider);
        self
    }

    /// Share an existing admission gate, e.g. between clients on one key.
    ///
    /// Takes precedence over [`VenueClientBuilder::gate_config`].
    pub fn gate(mut self, gate: Arc<AdmissionGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Configure the client's own admission gate.
    pub fn gate_config(mut self, config: GateConfig) -> Self {
        self.gate_config = config;
        self
    }

    /// Configure quota priming.
    pub fn primer_config(mut self, config: PrimerConfig) -> Self {
        self.primer_config = config;
        self
    }

    /// Configure automatic retries.
    pub fn retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// Report internal errors, such as failed priming attempts.
    pub fn observer(mut self, observer: ErrorObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Use a different operation to fetch the order quota.
    pub fn priming_operation(mut self, operation: Operation) -> Self {
        self.priming_operation = operation;
        self
    }

    /// Build a client over HTTP.
    pub fn build(mut self) -> VenueClient {
        let mut transport = HttpTransport::builder();
        if let Some(base_url) = self.base_url.take() {
            transport = transport.base_url(base_url);
        }
        if let Some(user_agent) = self.user_agent.take() {
            transport = transport.user_agent(user_agent);
        }
        if let Some(timeout) = self.timeout {
            transport = transport.timeout(timeout);
        }
        self.build_with(transport.build())
    }

    /// Build a client over a custom transport.
    ///
    /// `base_url`, `user_agent` and `timeout` only apply to [`VenueClientBuilder::build`].
    pub fn build_with<T: Transport>(self, transport: T) -> VenueClient<T> {
        let gate = self
            .gate
            .unwrap_or_else(|| Arc::new(AdmissionGate::new(self.gate_config)));

        let mut primer = RateLimitPrimer::new(Arc::clone(&gate), self.primer_config);
        if let Some(observer) = self.observer {
            primer = primer.with_observer(observer);
        }

        VenueClient {
            transport: Arc::new(transport),
            gate,
            primer: Arc::new(primer),
            retry: RetryPolicy::new(self.retry_config),
            credentials: self.credentials,
            signer: self.signer.unwrap_or_else(|| Arc::new(HmacSigner)),
            timestamps: self
                .timestamps
                .unwrap_or_else(|| Arc::new(IncreasingTimestamp::new())),
            priming_operation: self.priming_operation,
        }
    }
}

impl Default for VenueClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
