//! Remote call layer.
//!
//! One method per business operation. Each builds a GET URL (action plus
//! percent-encoded arguments plus a `timestamp` cache-buster) or a JSON POST
//! body, sends it through the [`Transport`], and folds the reply into an
//! [`ApiResponse`]. No operation returns an error: failures become
//! `success: false` with a readable message, and the loading indicator is
//! cleared on every exit path.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::EndpointConfig;
use crate::indicator::{Indicator, LoadingGuard, ShowOptions};
use crate::transport::{
    percent_encode, send_with_timeout, HttpMethod, RawResponse, RemoteRequest, Transport,
    TransportError,
};

pub const CONFIG_NOT_SET: &str = "Configuration not set";

/// Time limit for the user lookup.
const FIND_USER_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Result shape
// ---------------------------------------------------------------------------

/// Uniform result of every remote operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
    /// Any other fields the endpoint sent.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }

    /// The `user` record as name/email, when present and well formed.
    pub fn user_profile(&self) -> Option<UserProfile> {
        self.user
            .clone()
            .and_then(|user| serde_json::from_value(user).ok())
    }
}

/// Name and email of an account, as returned by login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    pub email: String,
}

// ---------------------------------------------------------------------------
// Call policies
// ---------------------------------------------------------------------------

/// How a reply body is turned into an [`ApiResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponsePolicy {
    /// JSON is passed through; an unparseable body counts as success with
    /// the given message.
    Optimistic(&'static str),
    /// Non-2xx, empty and unparseable bodies are failures.
    Strict,
    /// Success iff the body text mentions `success` or `updated`.
    Marker,
    /// The reply is never inspected; success with the given message.
    Assumed(&'static str),
}

/// Per-call choices made by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// The caller shows its own progress; leave the global indicator alone.
    pub caller_manages_indicator: bool,
}

impl CallOptions {
    pub fn caller_managed() -> Self {
        Self {
            caller_manages_indicator: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListField {
    Items,
    Users,
    Requests,
}

/// Internal failure of one call, before it is folded into a response.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CallError {
    #[error("Configuration not set")]
    NotConfigured,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Server error: {0}")]
    Status(u16),

    #[error("Empty response from server")]
    EmptyBody,

    #[error("Invalid response format from server")]
    InvalidFormat(#[source] serde_json::Error),
}

impl CallError {
    fn user_message(&self, policy: ResponsePolicy) -> String {
        match (self, policy) {
            (Self::Transport(err), ResponsePolicy::Strict) if err.is_timeout() => {
                "Request timeout - server not responding".to_string()
            }
            (Self::Transport(err), ResponsePolicy::Strict) => format!("Error: {err}"),
            (Self::Transport(err), _) => format!("Failed to connect: {err}"),
            (other, _) => other.to_string(),
        }
    }
}

/// Description of one remote call.
#[derive(Debug, Clone)]
pub(crate) struct Call {
    action: &'static str,
    params: Vec<(&'static str, String)>,
    method: HttpMethod,
    timeout: Option<Duration>,
    policy: ResponsePolicy,
    loading: Option<&'static str>,
    requires_config: bool,
    list_field: Option<ListField>,
}

impl Call {
    fn new(action: &'static str, method: HttpMethod, policy: ResponsePolicy) -> Self {
        Self {
            action,
            params: Vec::new(),
            method,
            timeout: None,
            policy,
            loading: None,
            requires_config: true,
            list_field: None,
        }
    }

    pub(crate) fn get(action: &'static str, policy: ResponsePolicy) -> Self {
        Self::new(action, HttpMethod::Get, policy)
    }

    pub(crate) fn post(action: &'static str, policy: ResponsePolicy) -> Self {
        Self::new(action, HttpMethod::Post, policy)
    }

    pub(crate) fn param(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.params.push((name, value.into()));
        self
    }

    pub(crate) fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    fn loading(mut self, message: &'static str) -> Self {
        self.loading = Some(message);
        self
    }

    fn without_config_check(mut self) -> Self {
        self.requires_config = false;
        self
    }

    fn list(mut self, field: ListField) -> Self {
        self.list_field = Some(field);
        self
    }

    fn to_request(&self, base: &str, timestamp_ms: i64) -> RemoteRequest {
        match self.method {
            HttpMethod::Get => {
                let separator = if base.contains('?') { '&' } else { '?' };
                let mut url = format!("{base}{separator}action={}", self.action);
                for (name, value) in &self.params {
                    url.push('&');
                    url.push_str(name);
                    url.push('=');
                    url.push_str(&percent_encode(value));
                }
                url.push_str(&format!("&timestamp={timestamp_ms}"));
                RemoteRequest {
                    method: HttpMethod::Get,
                    url,
                    body: None,
                    no_cache: true,
                }
            }
            HttpMethod::Post => {
                let mut body = Map::new();
                body.insert("action".into(), Value::String(self.action.into()));
                for (name, value) in &self.params {
                    body.insert((*name).into(), Value::String(value.clone()));
                }
                RemoteRequest {
                    method: HttpMethod::Post,
                    url: base.to_string(),
                    body: Some(Value::Object(body)),
                    no_cache: false,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Response folding
// ---------------------------------------------------------------------------

fn fold_response(
    action: &str,
    policy: ResponsePolicy,
    raw: RawResponse,
) -> Result<ApiResponse, CallError> {
    match policy {
        ResponsePolicy::Assumed(message) => Ok(ApiResponse::ok(message)),
        ResponsePolicy::Marker => {
            let success = raw.body.contains("success") || raw.body.contains("updated");
            Ok(ApiResponse {
                success,
                message: Some(raw.body),
                ..ApiResponse::default()
            })
        }
        ResponsePolicy::Optimistic(fallback) => match serde_json::from_str::<Value>(&raw.body) {
            // Only text that is not JSON at all falls back to success.
            Err(e) => {
                warn!(action, error = %e, "Could not parse response, assuming success");
                Ok(ApiResponse::ok(fallback))
            }
            Ok(value @ Value::Object(_)) => Ok(serde_json::from_value(value).unwrap_or_else(|e| {
                warn!(action, error = %e, "Unexpected response fields, reporting failure");
                ApiResponse::default()
            })),
            Ok(other) => {
                warn!(action, body = %other, "Response is not a JSON object, reporting failure");
                Ok(ApiResponse::default())
            }
        },
        ResponsePolicy::Strict => {
            if !raw.is_success() {
                warn!(action, status = raw.status, "HTTP error status");
                return Err(CallError::Status(raw.status));
            }
            if raw.body.trim().is_empty() {
                warn!(action, "Empty response from server");
                return Err(CallError::EmptyBody);
            }
            serde_json::from_str::<ApiResponse>(&raw.body).map_err(CallError::InvalidFormat)
        }
    }
}

fn fill_list(response: &mut ApiResponse, field: ListField) {
    if !response.success {
        return;
    }
    let slot = match field {
        ListField::Items => &mut response.items,
        ListField::Users => &mut response.users,
        ListField::Requests => &mut response.requests,
    };
    slot.get_or_insert_with(Vec::new);
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Client for the remote spreadsheet endpoint. Cheap to clone.
#[derive(Clone)]
pub struct RemoteClient {
    endpoint: EndpointConfig,
    transport: Arc<dyn Transport>,
    indicator: Arc<dyn Indicator>,
    options: CallOptions,
}

impl RemoteClient {
    pub fn new(
        endpoint: EndpointConfig,
        transport: Arc<dyn Transport>,
        indicator: Arc<dyn Indicator>,
    ) -> Self {
        Self {
            endpoint,
            transport,
            indicator,
            options: CallOptions::default(),
        }
    }

    /// A client whose calls use `options`.
    pub fn with_options(&self, options: CallOptions) -> Self {
        Self {
            options,
            ..self.clone()
        }
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_configured()
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    pub fn indicator(&self) -> &dyn Indicator {
        self.indicator.as_ref()
    }

    fn build_request(&self, call: &Call) -> RemoteRequest {
        call.to_request(self.endpoint.web_app_url(), Utc::now().timestamp_millis())
    }

    /// Send without indicator or response folding. GET replies must be 2xx;
    /// POST replies are opaque and any delivered request counts.
    pub(crate) async fn deliver(&self, call: &Call) -> Result<(), CallError> {
        let request = self.build_request(call);
        debug!(action = call.action, "delivering queued request");
        let raw = send_with_timeout(self.transport.as_ref(), request, call.timeout).await?;
        if call.method == HttpMethod::Get && !raw.is_success() {
            return Err(CallError::Status(raw.status));
        }
        Ok(())
    }

    async fn execute(&self, call: Call) -> Result<ApiResponse, CallError> {
        if call.requires_config && !self.is_configured() {
            warn!(action = call.action, "Remote endpoint not configured");
            return Err(CallError::NotConfigured);
        }

        let _loading = match call.loading {
            Some(message) if !self.options.caller_manages_indicator => {
                LoadingGuard::show(self.indicator.as_ref(), message, ShowOptions::default())
            }
            _ => LoadingGuard::inactive(),
        };

        let request = self.build_request(&call);
        debug!(action = call.action, method = ?call.method, "sending request");
        let raw = send_with_timeout(self.transport.as_ref(), request, call.timeout).await?;
        debug!(action = call.action, status = raw.status, "response received");

        let mut response = fold_response(call.action, call.policy, raw)?;
        if let Some(field) = call.list_field {
            fill_list(&mut response, field);
        }
        Ok(response)
    }

    async fn run(&self, call: Call) -> ApiResponse {
        let action = call.action;
        let policy = call.policy;
        match self.execute(call).await {
            Ok(response) => {
                if !response.success {
                    warn!(action, reason = response.message(), "endpoint reported failure");
                }
                response
            }
            Err(e) => {
                warn!(action, error = %e, "remote call failed");
                ApiResponse::failure(e.user_message(policy))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Accounts
    // -----------------------------------------------------------------------

    /// Remote credential check. Transport and format failures are returned
    /// as errors so the caller can tell them apart from a rejected login.
    pub(crate) async fn login(&self, email: &str, password: &str) -> Result<ApiResponse, CallError> {
        let call = Call::get("login", ResponsePolicy::Strict)
            .param("email", email)
            .param("password", password)
            .loading("Looking up account...");
        self.execute(call).await
    }

    pub async fn get_users(&self) -> ApiResponse {
        let call = Call::get("getUsers", ResponsePolicy::Strict)
            .loading("Loading users...")
            .list(ListField::Users);
        self.run(call).await
    }

    pub async fn get_user_by_email(&self, email: &str) -> ApiResponse {
        let call = Call::get("findUser", ResponsePolicy::Strict)
            .param("email", email)
            .timeout(FIND_USER_TIMEOUT)
            .loading("Checking user...");
        let response = self.run(call).await;
        if response.success {
            info!("findUser: user found");
        }
        response
    }

    pub async fn delete_user(&self, email: &str) -> ApiResponse {
        let call = Call::get("deleteUser", ResponsePolicy::Optimistic("User deleted"))
            .param("email", email)
            .loading("Deleting user...");
        self.run(call).await
    }

    // -----------------------------------------------------------------------
    // Items
    // -----------------------------------------------------------------------

    pub async fn get_items(&self) -> ApiResponse {
        let call = Call::get("getItems", ResponsePolicy::Strict)
            .loading("Loading items...")
            .list(ListField::Items);
        self.run(call).await
    }

    pub async fn add_item(&self, name: &str, stock: i64) -> ApiResponse {
        let call = Call::get("addItem", ResponsePolicy::Optimistic("Item added"))
            .param("name", name)
            .param("stock", stock.to_string())
            .loading("Adding item...");
        self.run(call).await
    }

    pub async fn update_item(&self, name: &str, stock: i64) -> ApiResponse {
        let call = Call::get("updateItem", ResponsePolicy::Optimistic("Stock updated"))
            .param("name", name)
            .param("stock", stock.to_string())
            .loading("Updating stock...");
        self.run(call).await
    }

    /// Write-without-confirmation: attempted even when unconfigured.
    pub async fn update_item_description(&self, name: &str, description: &str) -> ApiResponse {
        let call = Call::get("updateItem", ResponsePolicy::Marker)
            .param("name", name)
            .param("description", description)
            .without_config_check();
        self.run(call).await
    }

    /// Write-without-confirmation: attempted even when unconfigured.
    pub async fn update_item_name(&self, old_name: &str, new_name: &str) -> ApiResponse {
        let call = Call::get("updateItemName", ResponsePolicy::Marker)
            .param("oldName", old_name)
            .param("newName", new_name)
            .without_config_check();
        self.run(call).await
    }

    pub async fn delete_item(&self, name: &str) -> ApiResponse {
        let call = Call::post("deleteItem", ResponsePolicy::Assumed("Item deleted"))
            .param("name", name)
            .loading("Deleting item...");
        self.run(call).await
    }

    // -----------------------------------------------------------------------
    // Stock requests
    // -----------------------------------------------------------------------

    pub async fn request_stock(
        &self,
        teacher_email: &str,
        teacher_name: &str,
        item: &str,
        qty: i64,
    ) -> ApiResponse {
        let call = Call::get("requestStock", ResponsePolicy::Optimistic("Request sent"))
            .param("teacherEmail", teacher_email)
            .param("teacherName", teacher_name)
            .param("item", item)
            .param("qty", qty.to_string())
            .loading("Sending request...");
        self.run(call).await
    }

    pub async fn get_teacher_stock_requests(&self) -> ApiResponse {
        let call = Call::get("getTeacherStockRequests", ResponsePolicy::Strict)
            .loading("Loading requests...")
            .list(ListField::Requests);
        self.run(call).await
    }

    pub async fn update_request_status(
        &self,
        email: &str,
        item: &str,
        status: &str,
        reason: Option<&str>,
    ) -> ApiResponse {
        let call = Call::get("updateRequestStatus", ResponsePolicy::Optimistic("Status updated"))
            .param("email", email)
            .param("item", item)
            .param("status", status)
            .param("reason", reason.unwrap_or_default())
            .loading("Updating status...");
        self.run(call).await
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    pub async fn delete_order(&self, email: &str, item: &str, date: &str) -> ApiResponse {
        let call = Call::post("deleteOrder", ResponsePolicy::Assumed("Order deleted"))
            .param("email", email)
            .param("item", item)
            .param("date", date)
            .loading("Deleting order...");
        self.run(call).await
    }

    pub async fn delete_all_orders(&self) -> ApiResponse {
        let call = Call::post("deleteAllOrders", ResponsePolicy::Assumed("All orders deleted"))
            .loading("Deleting all orders...");
        self.run(call).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{IndicatorEvent, MockReply, MockTransport, RecordingIndicator, ENDPOINT};

    fn client(transport: &Arc<MockTransport>, indicator: &Arc<RecordingIndicator>) -> RemoteClient {
        RemoteClient::new(
            EndpointConfig::new(ENDPOINT),
            transport.clone(),
            indicator.clone(),
        )
    }

    fn unconfigured(
        transport: &Arc<MockTransport>,
        indicator: &Arc<RecordingIndicator>,
    ) -> RemoteClient {
        RemoteClient::new(
            EndpointConfig::unconfigured(),
            transport.clone(),
            indicator.clone(),
        )
    }

    #[tokio::test]
    async fn test_unconfigured_add_item_fails_without_network() {
        let transport = MockTransport::new();
        let indicator = RecordingIndicator::new();
        let remote = unconfigured(&transport, &indicator);

        let result = remote.add_item("Pencil", 10).await;
        assert!(!result.success);
        assert_eq!(result.message(), CONFIG_NOT_SET);
        assert!(transport.requests().is_empty());
        assert!(indicator.events().is_empty());
    }

    #[tokio::test]
    async fn test_write_without_confirmation_skips_config_check() {
        let transport = MockTransport::with_fallback(MockReply::text(200, "Item updated"));
        let indicator = RecordingIndicator::new();
        let remote = unconfigured(&transport, &indicator);

        let result = remote.update_item_name("Pen", "Red Pen").await;
        assert!(result.success);
        assert_eq!(result.message(), "Item updated");
        assert_eq!(transport.actions(), vec!["updateItemName"]);

        transport.set_fallback(MockReply::text(200, "Item not found"));
        let result = remote.update_item_description("Pen", "blue ink").await;
        assert!(!result.success);
        assert_eq!(result.message(), "Item not found");
    }

    #[tokio::test]
    async fn test_get_url_encodes_arguments_and_busts_cache() {
        let transport = MockTransport::new();
        let indicator = RecordingIndicator::new();
        let remote = client(&transport, &indicator);

        remote
            .request_stock("ann@x.com", "Ann Lee", "A4 paper & card", 3)
            .await;

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.method, HttpMethod::Get);
        assert!(request.no_cache);
        assert!(request.url.starts_with(&format!("{ENDPOINT}?action=requestStock&")));
        assert!(request.url.contains("teacherEmail=ann%40x.com"));
        assert!(request.url.contains("item=A4%20paper%20%26%20card"));
        assert_eq!(request.query_param("teacherName").as_deref(), Some("Ann Lee"));
        assert_eq!(request.query_param("qty").as_deref(), Some("3"));
        assert!(request
            .query_param("timestamp")
            .and_then(|t| t.parse::<i64>().ok())
            .is_some());
    }

    #[tokio::test]
    async fn test_optimistic_policy_treats_text_as_success() {
        let transport = MockTransport::with_fallback(MockReply::text(200, "<html>ok</html>"));
        let indicator = RecordingIndicator::new();
        let remote = client(&transport, &indicator);

        let result = remote.add_item("Pencil", 10).await;
        assert!(result.success);
        assert_eq!(result.message(), "Item added");

        transport.set_fallback(MockReply::json(
            serde_json::json!({ "success": false, "message": "Item exists" }),
        ));
        let result = remote.add_item("Pencil", 10).await;
        assert!(!result.success);
        assert_eq!(result.message(), "Item exists");
    }

    #[tokio::test]
    async fn test_optimistic_policy_non_object_json_is_not_success() {
        let transport = MockTransport::new();
        let indicator = RecordingIndicator::new();
        let remote = client(&transport, &indicator);

        for body in ["true", "[]", "\"ok\"", "42", "null"] {
            transport.set_fallback(MockReply::text(200, body));
            let result = remote.update_item("Pencil", 3).await;
            assert!(!result.success, "body {body} read as success");
            assert_eq!(result.message(), "");
        }
    }

    #[tokio::test]
    async fn test_strict_lookup_reports_each_failure_kind() {
        let transport = MockTransport::new();
        let indicator = RecordingIndicator::new();
        let remote = client(&transport, &indicator);

        transport.push(MockReply::text(500, "boom"));
        transport.push(MockReply::text(200, "   "));
        transport.push(MockReply::text(200, "not json"));
        transport.push(MockReply::Fail(TransportError::Other("reset".into())));

        assert_eq!(
            remote.get_user_by_email("a@x.com").await.message(),
            "Server error: 500"
        );
        assert_eq!(
            remote.get_user_by_email("a@x.com").await.message(),
            "Empty response from server"
        );
        assert_eq!(
            remote.get_user_by_email("a@x.com").await.message(),
            "Invalid response format from server"
        );
        assert_eq!(
            remote.get_user_by_email("a@x.com").await.message(),
            "Error: reset"
        );
        assert_eq!(transport.actions(), vec!["findUser"; 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_timeout_is_distinguishable() {
        let transport = MockTransport::with_fallback(MockReply::Hang);
        let indicator = RecordingIndicator::new();
        let remote = client(&transport, &indicator);

        let result = remote.get_user_by_email("slow@x.com").await;
        assert!(!result.success);
        assert_eq!(result.message(), "Request timeout - server not responding");
        assert_eq!(indicator.events().last(), Some(&IndicatorEvent::Hide));
    }

    #[tokio::test]
    async fn test_transport_failure_message_and_indicator_cleared() {
        let transport = MockTransport::failing();
        let indicator = RecordingIndicator::new();
        let remote = client(&transport, &indicator);

        let result = remote.update_item("Pencil", 4).await;
        assert!(!result.success);
        assert_eq!(
            result.message(),
            "Failed to connect: Cannot reach endpoint: connection refused"
        );
        assert_eq!(
            indicator.events(),
            vec![
                IndicatorEvent::Show("Updating stock...".into(), ShowOptions::default()),
                IndicatorEvent::Hide,
            ]
        );
    }

    #[tokio::test]
    async fn test_caller_managed_indicator_is_left_alone() {
        let transport = MockTransport::new();
        let indicator = RecordingIndicator::new();
        let remote = client(&transport, &indicator).with_options(CallOptions::caller_managed());

        let result = remote.get_user_by_email("a@x.com").await;
        assert!(result.success);
        assert!(indicator.events().is_empty());
    }

    #[tokio::test]
    async fn test_list_operations_default_to_empty() {
        let transport = MockTransport::new();
        let indicator = RecordingIndicator::new();
        let remote = client(&transport, &indicator);

        assert_eq!(remote.get_items().await.items, Some(vec![]));
        assert_eq!(remote.get_users().await.users, Some(vec![]));
        assert_eq!(remote.get_teacher_stock_requests().await.requests, Some(vec![]));

        transport.push(MockReply::json(serde_json::json!({
            "success": true,
            "items": [{ "name": "Pencil", "stock": 10 }],
            "updatedAt": "2026-01-01"
        })));
        let result = remote.get_items().await;
        assert_eq!(result.items.as_ref().map(Vec::len), Some(1));
        assert_eq!(
            result.extra.get("updatedAt").and_then(Value::as_str),
            Some("2026-01-01")
        );

        transport.push(MockReply::json(
            serde_json::json!({ "success": false, "message": "Sheet missing" }),
        ));
        let result = remote.get_items().await;
        assert!(!result.success);
        assert_eq!(result.items, None);
    }

    #[tokio::test]
    async fn test_delete_calls_post_json_and_assume_success() {
        let transport = MockTransport::with_fallback(MockReply::text(0, ""));
        let indicator = RecordingIndicator::new();
        let remote = client(&transport, &indicator);

        let result = remote.delete_order("ann@x.com", "Pencil", "2026-03-01").await;
        assert!(result.success);
        assert_eq!(result.message(), "Order deleted");
        assert!(remote.delete_all_orders().await.success);
        assert!(remote.delete_item("Pencil").await.success);

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r.method == HttpMethod::Post));
        assert!(requests.iter().all(|r| r.url == ENDPOINT));
        assert_eq!(
            requests[0].body,
            Some(serde_json::json!({
                "action": "deleteOrder",
                "email": "ann@x.com",
                "item": "Pencil",
                "date": "2026-03-01"
            }))
        );
        assert_eq!(
            requests[1].body,
            Some(serde_json::json!({ "action": "deleteAllOrders" }))
        );
    }

    #[tokio::test]
    async fn test_post_transport_failure_is_reported() {
        let transport = MockTransport::failing();
        let indicator = RecordingIndicator::new();
        let remote = client(&transport, &indicator);

        let result = remote.delete_user("ann@x.com").await;
        assert!(!result.success);
        assert!(result.message().starts_with("Failed to connect:"));
    }

    #[tokio::test]
    async fn test_update_request_status_sends_empty_reason_by_default() {
        let transport = MockTransport::new();
        let indicator = RecordingIndicator::new();
        let remote = client(&transport, &indicator);

        remote
            .update_request_status("ann@x.com", "Pencil", "approved", None)
            .await;
        let request = &transport.requests()[0];
        assert_eq!(request.query_param("reason").as_deref(), Some(""));
        assert_eq!(request.query_param("status").as_deref(), Some("approved"));
    }

    #[test]
    fn test_user_profile_extraction() {
        let response: ApiResponse = serde_json::from_value(serde_json::json!({
            "success": true,
            "user": { "name": "Ann", "email": "ann@x.com", "role": "teacher" }
        }))
        .unwrap();
        assert_eq!(
            response.user_profile(),
            Some(UserProfile {
                name: "Ann".into(),
                email: "ann@x.com".into()
            })
        );
        assert_eq!(ApiResponse::ok("fine").user_profile(), None);
    }
}
