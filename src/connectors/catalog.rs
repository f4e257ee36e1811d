//! Built-in mock connectors

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use ghostrun_core::RiskLevel;
use serde_json::{json, Value};

use super::{MockConnector, ToolSpec};

/// The connectors every registry starts with
pub fn default_connectors() -> Vec<Box<dyn MockConnector>> {
    vec![
        Box::new(StripeConnector::new()),
        Box::new(AwsConnector::new()),
        Box::new(PostgresConnector::new()),
        Box::new(RedisConnector::new()),
        Box::new(HttpConnector::new()),
        Box::new(
            CatalogConnector::new("slack").with_tool(
                ToolSpec::new("slack", RiskLevel::Low, 180).with_actions([
                    "send_message",
                    "create_channel",
                    "archive_channel",
                    "upload_file",
                ]),
            ),
        ),
    ]
}

fn tool_map(specs: impl IntoIterator<Item = ToolSpec>) -> BTreeMap<String, ToolSpec> {
    specs.into_iter().map(|s| (s.name.clone(), s)).collect()
}

/// Stable short id derived from the call, so identical calls echo identical ids
fn simulated_id(prefix: &str, action: &str, parameters: &BTreeMap<String, Value>) -> String {
    let mut hasher = DefaultHasher::new();
    action.hash(&mut hasher);
    for (key, value) in parameters {
        key.hash(&mut hasher);
        value.to_string().hash(&mut hasher);
    }
    format!("{}_sim_{:012x}", prefix, hasher.finish() & 0xffff_ffff_ffff)
}

fn param<'a>(parameters: &'a BTreeMap<String, Value>, key: &str) -> Option<&'a Value> {
    parameters.get(key)
}

/// Connector defined purely by its tool table, with generic payloads
pub struct CatalogConnector {
    name: String,
    tools: BTreeMap<String, ToolSpec>,
}

impl CatalogConnector {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: BTreeMap::new(),
        }
    }

    pub fn with_tool(mut self, tool: ToolSpec) -> Self {
        self.tools.insert(tool.name.clone(), tool);
        self
    }
}

impl MockConnector for CatalogConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn tools(&self) -> &BTreeMap<String, ToolSpec> {
        &self.tools
    }
}

/// Payment gateway
pub struct StripeConnector {
    tools: BTreeMap<String, ToolSpec>,
}

impl StripeConnector {
    pub fn new() -> Self {
        Self {
            tools: tool_map([ToolSpec::new("stripe", RiskLevel::High, 350)
                .with_actions([
                    "create_charge",
                    "retrieve_charge",
                    "list_charges",
                    "refund_charge",
                    "create_customer",
                    "update_customer",
                    "create_payment_intent",
                    "cancel_subscription",
                    "create_payout",
                ])
                .with_cost(0.0005)]),
        }
    }
}

impl Default for StripeConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector for StripeConnector {
    fn name(&self) -> &str {
        "stripe"
    }

    fn tools(&self) -> &BTreeMap<String, ToolSpec> {
        &self.tools
    }

    fn generate_response_data(
        &self,
        _tool: &ToolSpec,
        action: &str,
        parameters: &BTreeMap<String, Value>,
    ) -> Value {
        let amount = param(parameters, "amount").cloned().unwrap_or(json!(1000));
        let currency = param(parameters, "currency")
            .cloned()
            .unwrap_or(json!("usd"));

        match action {
            "create_charge" | "retrieve_charge" => json!({
                "id": simulated_id("ch", action, parameters),
                "object": "charge",
                "amount": amount,
                "currency": currency,
                "status": "succeeded",
                "livemode": false,
            }),
            "refund_charge" => json!({
                "id": simulated_id("re", action, parameters),
                "object": "refund",
                "amount": amount,
                "currency": currency,
                "status": "succeeded",
            }),
            "create_payment_intent" => json!({
                "id": simulated_id("pi", action, parameters),
                "object": "payment_intent",
                "amount": amount,
                "currency": currency,
                "status": "requires_confirmation",
            }),
            "create_customer" | "update_customer" => json!({
                "id": simulated_id("cus", action, parameters),
                "object": "customer",
                "email": param(parameters, "email").cloned().unwrap_or(Value::Null),
            }),
            "list_charges" => json!({ "object": "list", "data": [], "has_more": false }),
            "cancel_subscription" => json!({
                "id": simulated_id("sub", action, parameters),
                "object": "subscription",
                "status": "canceled",
            }),
            "create_payout" => json!({
                "id": simulated_id("po", action, parameters),
                "object": "payout",
                "amount": amount,
                "currency": currency,
                "status": "pending",
            }),
            _ => json!({ "object": action, "livemode": false }),
        }
    }
}

/// Cloud provider: general API plus S3, EC2 and Lambda
pub struct AwsConnector {
    tools: BTreeMap<String, ToolSpec>,
}

impl AwsConnector {
    pub fn new() -> Self {
        Self {
            tools: tool_map([
                ToolSpec::new("aws", RiskLevel::High, 450)
                    .with_actions([
                        "describe_instances",
                        "start_instance",
                        "stop_instance",
                        "terminate_instance",
                        "create_bucket",
                        "delete_bucket",
                        "put_object",
                        "get_object",
                        "delete_object",
                        "invoke_function",
                    ])
                    .with_cost(0.0004),
                ToolSpec::new("s3", RiskLevel::Medium, 120)
                    .with_actions([
                        "create_bucket",
                        "delete_bucket",
                        "put_object",
                        "get_object",
                        "delete_object",
                        "list_objects",
                    ])
                    .with_cost(0.000005),
                ToolSpec::new("ec2", RiskLevel::High, 800).with_actions([
                    "describe_instances",
                    "run_instances",
                    "start_instance",
                    "stop_instance",
                    "terminate_instance",
                ]),
                ToolSpec::new("lambda", RiskLevel::Medium, 250)
                    .with_actions([
                        "invoke_function",
                        "create_function",
                        "update_function",
                        "delete_function",
                    ])
                    .with_cost(0.0000002),
            ]),
        }
    }
}

impl Default for AwsConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector for AwsConnector {
    fn name(&self) -> &str {
        "aws"
    }

    fn tools(&self) -> &BTreeMap<String, ToolSpec> {
        &self.tools
    }

    fn generate_response_data(
        &self,
        tool: &ToolSpec,
        action: &str,
        parameters: &BTreeMap<String, Value>,
    ) -> Value {
        if action.contains("instance") {
            let state = match action {
                "start_instance" | "run_instances" => "pending",
                "stop_instance" => "stopping",
                "terminate_instance" => "shutting-down",
                _ => "running",
            };
            let instance_id = param(parameters, "instance_id")
                .cloned()
                .unwrap_or_else(|| json!(simulated_id("i", action, parameters)));
            return json!({ "instance_id": instance_id, "state": state });
        }

        if action.contains("bucket") || action.contains("object") {
            return json!({
                "bucket": param(parameters, "bucket").cloned().unwrap_or(json!("simulated-bucket")),
                "key": param(parameters, "key").cloned().unwrap_or(Value::Null),
                "etag": simulated_id("etag", action, parameters),
                "objects": if action == "list_objects" { json!([]) } else { Value::Null },
            });
        }

        if action.contains("function") {
            return json!({
                "function_name": param(parameters, "function_name")
                    .cloned()
                    .unwrap_or(json!("simulated-function")),
                "status_code": 200,
                "payload": {},
            });
        }

        json!({ "service": tool.name, "action": action, "request_id": simulated_id("req", action, parameters) })
    }
}

/// Relational database
pub struct PostgresConnector {
    tools: BTreeMap<String, ToolSpec>,
}

impl PostgresConnector {
    pub fn new() -> Self {
        Self {
            tools: tool_map([ToolSpec::new("postgres", RiskLevel::High, 60)
                .with_actions([
                    "query", "insert", "update", "delete", "migrate", "truncate",
                ])
                .with_cost(0.00001)]),
        }
    }
}

impl Default for PostgresConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector for PostgresConnector {
    fn name(&self) -> &str {
        "postgres"
    }

    fn tools(&self) -> &BTreeMap<String, ToolSpec> {
        &self.tools
    }

    fn generate_response_data(
        &self,
        _tool: &ToolSpec,
        action: &str,
        _parameters: &BTreeMap<String, Value>,
    ) -> Value {
        match action {
            "query" => json!({ "rows": [], "row_count": 0 }),
            "migrate" => json!({ "applied_migrations": 1 }),
            "truncate" => json!({ "rows_affected": 0, "truncated": true }),
            _ => json!({ "rows_affected": 1 }),
        }
    }
}

/// Key-value cache
pub struct RedisConnector {
    tools: BTreeMap<String, ToolSpec>,
}

impl RedisConnector {
    pub fn new() -> Self {
        Self {
            tools: tool_map([ToolSpec::new("redis", RiskLevel::Medium, 5)
                .with_actions(["get", "set", "delete", "incr", "expire", "publish"])]),
        }
    }
}

impl Default for RedisConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector for RedisConnector {
    fn name(&self) -> &str {
        "redis"
    }

    fn tools(&self) -> &BTreeMap<String, ToolSpec> {
        &self.tools
    }

    fn generate_response_data(
        &self,
        _tool: &ToolSpec,
        action: &str,
        parameters: &BTreeMap<String, Value>,
    ) -> Value {
        match action {
            "get" => json!({
                "key": param(parameters, "key").cloned().unwrap_or(Value::Null),
                "value": "simulated-value",
            }),
            "set" => json!({ "result": "OK" }),
            "delete" => json!({ "deleted": 1 }),
            "incr" => json!({ "value": 1 }),
            "expire" => json!({ "result": 1 }),
            "publish" => json!({ "receivers": 1 }),
            _ => json!({ "result": Value::Null }),
        }
    }
}

/// Generic HTTP client
pub struct HttpConnector {
    tools: BTreeMap<String, ToolSpec>,
}

impl HttpConnector {
    pub fn new() -> Self {
        Self {
            tools: tool_map([ToolSpec::new("http", RiskLevel::Low, 200)
                .with_actions(["get", "post", "put", "patch", "delete", "head"])]),
        }
    }
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector for HttpConnector {
    fn name(&self) -> &str {
        "http"
    }

    fn tools(&self) -> &BTreeMap<String, ToolSpec> {
        &self.tools
    }

    fn generate_response_data(
        &self,
        _tool: &ToolSpec,
        action: &str,
        parameters: &BTreeMap<String, Value>,
    ) -> Value {
        let status_code = match action {
            "post" => 201,
            "delete" => 204,
            _ => 200,
        };
        json!({
            "status_code": status_code,
            "url": param(parameters, "url").cloned().unwrap_or(Value::Null),
            "headers": { "content-type": "application/json" },
            "body": { "simulated": true },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_default_catalog_names_are_unique() {
        let mut names: Vec<String> = default_connectors()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let before = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), before);
    }

    #[test]
    fn test_stripe_charge_payload() {
        let stripe = StripeConnector::new();
        let spec = stripe.tool("stripe").unwrap();
        let data = stripe.generate_response_data(
            spec,
            "create_charge",
            &params(&[("amount", json!(2500)), ("currency", json!("eur"))]),
        );
        assert_eq!(data["object"], "charge");
        assert_eq!(data["amount"], 2500);
        assert_eq!(data["currency"], "eur");
        assert_eq!(data["status"], "succeeded");
        assert!(data["id"].as_str().unwrap().starts_with("ch_sim_"));
    }

    #[test]
    fn test_simulated_ids_are_stable() {
        let p = params(&[("amount", json!(1))]);
        assert_eq!(
            simulated_id("ch", "create_charge", &p),
            simulated_id("ch", "create_charge", &p)
        );
        assert_ne!(
            simulated_id("ch", "create_charge", &p),
            simulated_id("ch", "refund_charge", &p)
        );
    }

    #[test]
    fn test_aws_serves_sub_services() {
        let aws = AwsConnector::new();
        for tool in ["aws", "s3", "ec2", "lambda"] {
            assert!(aws.tool(tool).is_some(), "missing tool {}", tool);
        }
        assert!(aws.supports_action("s3", "put_object"));
        assert!(!aws.supports_action("s3", "terminate_instance"));
    }

    #[test]
    fn test_aws_instance_states() {
        let aws = AwsConnector::new();
        let spec = aws.tool("ec2").unwrap();
        let data = aws.generate_response_data(spec, "terminate_instance", &BTreeMap::new());
        assert_eq!(data["state"], "shutting-down");
    }

    #[test]
    fn test_http_status_codes() {
        let http = HttpConnector::new();
        let spec = http.tool("http").unwrap();
        assert_eq!(
            http.generate_response_data(spec, "post", &BTreeMap::new())["status_code"],
            201
        );
        assert_eq!(
            http.generate_response_data(spec, "get", &BTreeMap::new())["status_code"],
            200
        );
    }

    #[test]
    fn test_catalog_connector_generic_payload() {
        let slack = CatalogConnector::new("slack")
            .with_tool(ToolSpec::new("slack", RiskLevel::Low, 100).with_actions(["send_message"]));
        let spec = slack.tool("slack").unwrap();
        let data = slack.generate_response_data(spec, "send_message", &BTreeMap::new());
        assert_eq!(data["status"], "ok");
        assert_eq!(data["simulated"], true);
    }
}
