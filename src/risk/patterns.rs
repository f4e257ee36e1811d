//! Pattern tables used for risk classification
//!
//! All matching is case-insensitive substring matching against lowercased
//! input.

/// Targets that make any operation critical
pub const CRITICAL_PATTERNS: &[&str] = &["production", "prod", "live", "master", "main", "critical"];

/// Destructive or financial verbs
pub const HIGH_RISK_ACTIONS: &[&str] = &[
    "delete", "drop", "remove", "terminate", "cancel", "refund", "charge", "payment", "transfer",
    "withdraw", "debit",
];

/// Mutating verbs
pub const MEDIUM_RISK_ACTIONS: &[&str] = &[
    "create", "update", "modify", "send", "publish", "execute", "start", "stop", "restart",
    "deploy",
];

/// Payment, cloud, and database vendors; matched by exact tool name
pub const HIGH_RISK_TOOLS: &[&str] = &[
    "stripe",
    "paypal",
    "square",
    "braintree",
    "aws",
    "gcp",
    "azure",
    "kubernetes",
    "k8s",
    "postgres",
    "postgresql",
    "mysql",
    "mongodb",
    "oracle",
    "snowflake",
    "s3",
    "ec2",
    "lambda",
];

/// Substrings suggesting a data store
pub const DATABASE_TOOL_HINTS: &[&str] = &["sql", "database", "db", "mongo", "redis"];

/// Parameter keys that carry secrets or money
pub const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "secret",
    "key",
    "token",
    "credential",
    "auth",
    "amount",
    "price",
    "cost",
    "charge",
    "payment",
];

/// Actions that destroy state and should sit behind a dependency
pub const DESTRUCTIVE_ACTIONS: &[&str] = &["delete", "drop", "terminate"];

/// First pattern contained in `haystack`, which must already be lowercase
pub fn first_match(haystack: &str, patterns: &[&'static str]) -> Option<&'static str> {
    patterns.iter().copied().find(|p| haystack.contains(p))
}

pub fn is_high_risk_tool(tool: &str) -> bool {
    let tool = tool.to_lowercase();
    HIGH_RISK_TOOLS.contains(&tool.as_str())
}

/// Sensitive pattern contained in a parameter key
pub fn sensitive_key_match(key: &str) -> Option<&'static str> {
    first_match(&key.to_lowercase(), SENSITIVE_KEYS)
}
