//! Executable plan model
//!
//! The plan is produced by the compiler and consumed read-only by the
//! simulator. Every field deserializes leniently (missing fields become
//! empty values and unrecognised enum strings are kept as `Unknown`) so that
//! content problems surface as validation issues instead of parse failures.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// String-backed enum whose unrecognised values are preserved as `Unknown`.
macro_rules! open_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
            /// Value outside the recognised set, kept verbatim
            Unknown(String),
        }

        impl $name {
            /// Recognised wire values
            pub const KNOWN: &'static [&'static str] = &[$($text),+];

            pub fn as_str(&self) -> &str {
                match self {
                    $($name::$variant => $text,)+
                    $name::Unknown(raw) => raw.as_str(),
                }
            }

            pub fn is_known(&self) -> bool {
                !matches!(self, $name::Unknown(_))
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                match value.as_str() {
                    $($text => return $name::$variant,)+
                    _ => {}
                }
                $name::Unknown(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                $name::from(value.to_string())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.as_str().to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

open_enum! {
    /// Kind of work a step performs
    StepType {
        Action => "action",
        Condition => "condition",
        Loop => "loop",
        Parallel => "parallel",
        Sequential => "sequential",
        /// Human approval gate
        Approval => "approval",
    }
}

open_enum! {
    /// What a flow does when one of its steps fails
    FailureStrategy {
        Stop => "stop",
        Continue => "continue",
        Rollback => "rollback",
    }
}

open_enum! {
    /// Delay growth between retry attempts
    BackoffStrategy {
        Fixed => "fixed",
        Linear => "linear",
        Exponential => "exponential",
    }
}

impl Default for FailureStrategy {
    fn default() -> Self {
        FailureStrategy::Stop
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Exponential
    }
}

/// Retry configuration for a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: i64,
    /// Delay between attempts in milliseconds
    pub delay: i64,
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: 1000,
            backoff: BackoffStrategy::Exponential,
        }
    }
}

/// A single unit of work inside a flow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionStep {
    pub step_id: String,
    pub name: String,
    pub step_type: Option<StepType>,
    pub tool: Option<String>,
    pub action: Option<String>,
    pub parameters: BTreeMap<String, Value>,
    /// Ids of steps in the same flow that must run first
    pub depends_on: Vec<String>,
    /// Output binding name -> field of the tool response it is read from
    pub outputs: BTreeMap<String, String>,
    /// Timeout in milliseconds
    pub timeout: Option<i64>,
    pub retry_policy: Option<RetryPolicy>,
}

impl ExecutionStep {
    /// Create an `action` step with the given id and name
    pub fn new(step_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            name: name.into(),
            step_type: Some(StepType::Action),
            ..Default::default()
        }
    }

    /// Set the step type
    pub fn with_type(mut self, step_type: StepType) -> Self {
        self.step_type = Some(step_type);
        self
    }

    /// Set tool and action
    pub fn with_tool(mut self, tool: impl Into<String>, action: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self.action = Some(action.into());
        self
    }

    /// Add a dependency
    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on.push(step_id.into());
        self
    }

    /// Add a parameter
    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Add an output binding
    pub fn with_output(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.outputs.insert(name.into(), source.into());
        self
    }

    /// Set timeout in milliseconds
    pub fn with_timeout(mut self, timeout_ms: i64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    /// Set retry policy
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Lowercased action, empty when unset
    pub fn action_lower(&self) -> String {
        self.action.as_deref().unwrap_or_default().to_lowercase()
    }

    /// Lowercased tool, empty when unset
    pub fn tool_lower(&self) -> String {
        self.tool.as_deref().unwrap_or_default().to_lowercase()
    }
}

/// A named group of steps sharing failure and concurrency policy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionFlow {
    pub flow_id: String,
    pub name: String,
    pub steps: Vec<ExecutionStep>,
    pub parallel_execution: bool,
    pub max_concurrency: Option<i64>,
    pub on_failure: FailureStrategy,
}

impl ExecutionFlow {
    /// Create an empty flow
    pub fn new(flow_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            flow_id: flow_id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Append a step
    pub fn with_step(mut self, step: ExecutionStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Look up a step by id
    pub fn step(&self, step_id: &str) -> Option<&ExecutionStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }
}

/// Gate requiring human sign-off before matching steps run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalRule {
    pub name: String,
    /// Case-insensitive substring matched against step action and tool
    pub pattern: String,
    pub approvers: Vec<String>,
}

impl ApprovalRule {
    /// True when the rule's pattern appears in the step's action or tool
    pub fn matches(&self, step: &ExecutionStep) -> bool {
        let pattern = self.pattern.to_lowercase();
        if pattern.is_empty() {
            return false;
        }
        step.action_lower().contains(&pattern) || step.tool_lower().contains(&pattern)
    }
}

/// Security constraints attached to a plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityContext {
    /// Tools the plan may use; empty means unrestricted
    pub allowed_tools: Vec<String>,
    pub required_capabilities: Vec<String>,
    pub policy_refs: Vec<String>,
    pub approval_rules: Vec<ApprovalRule>,
    pub requires_approval: bool,
}

impl SecurityContext {
    /// Whether `tool` passes the allowlist
    pub fn allows_tool(&self, tool: &str) -> bool {
        self.allowed_tools.is_empty() || self.allowed_tools.iter().any(|t| t == tool)
    }
}

/// Declared resource needs, as Kubernetes quantity strings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceRequirements {
    pub cpu: Option<String>,
    pub memory: Option<String>,
    pub storage: Option<String>,
    pub external_services: Vec<String>,
}

/// Compiled plan handed to the simulator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutablePlan {
    pub plan_id: String,
    /// Content hash computed by the compiler; never recomputed here
    pub plan_hash: String,
    pub tenant_id: String,
    pub name: String,
    pub version: String,
    pub flows: Vec<ExecutionFlow>,
    pub main_flow: String,
    pub security_context: SecurityContext,
    pub resource_requirements: ResourceRequirements,
}

impl ExecutablePlan {
    /// Create a plan with identity fields filled in and no flows
    pub fn new(
        plan_id: impl Into<String>,
        plan_hash: impl Into<String>,
        tenant_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            plan_id: plan_id.into(),
            plan_hash: plan_hash.into(),
            tenant_id: tenant_id.into(),
            name: name.into(),
            version: "1.0.0".to_string(),
            ..Default::default()
        }
    }

    /// Append a flow; the first flow added becomes `main_flow`
    pub fn with_flow(mut self, flow: ExecutionFlow) -> Self {
        if self.main_flow.is_empty() {
            self.main_flow = flow.flow_id.clone();
        }
        self.flows.push(flow);
        self
    }

    /// Replace the security context
    pub fn with_security(mut self, security_context: SecurityContext) -> Self {
        self.security_context = security_context;
        self
    }

    /// Look up a flow by id
    pub fn flow(&self, flow_id: &str) -> Option<&ExecutionFlow> {
        self.flows.iter().find(|f| f.flow_id == flow_id)
    }

    /// Step count across all flows
    pub fn total_steps(&self) -> usize {
        self.flows.iter().map(|f| f.steps.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_step_type_is_preserved() {
        let step: ExecutionStep = serde_json::from_value(json!({
            "step_id": "a",
            "name": "A",
            "step_type": "teleport"
        }))
        .unwrap();
        assert_eq!(step.step_type, Some(StepType::Unknown("teleport".to_string())));
        assert!(!step.step_type.unwrap().is_known());
    }

    #[test]
    fn test_known_enums_round_trip_as_strings() {
        let flow = ExecutionFlow {
            on_failure: FailureStrategy::Rollback,
            ..ExecutionFlow::new("f", "F")
        };
        let value = serde_json::to_value(&flow).unwrap();
        assert_eq!(value["on_failure"], json!("rollback"));
        assert_eq!(StepType::from("approval"), StepType::Approval);
        assert_eq!(BackoffStrategy::from("linear").as_str(), "linear");
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let plan: ExecutablePlan = serde_json::from_value(json!({"name": "only-a-name"})).unwrap();
        assert!(plan.plan_id.is_empty());
        assert!(plan.flows.is_empty());
        assert!(plan.security_context.allowed_tools.is_empty());
    }

    #[test]
    fn test_first_flow_becomes_main() {
        let plan = ExecutablePlan::new("p", "h", "t", "n")
            .with_flow(ExecutionFlow::new("main", "Main"))
            .with_flow(ExecutionFlow::new("cleanup", "Cleanup"));
        assert_eq!(plan.main_flow, "main");
        assert!(plan.flow("cleanup").is_some());
    }

    #[test]
    fn test_approval_rule_matches_action_or_tool() {
        let rule = ApprovalRule {
            name: "payments".to_string(),
            pattern: "Refund".to_string(),
            approvers: vec![],
        };
        let step = ExecutionStep::new("s", "S").with_tool("stripe", "refund_charge");
        assert!(rule.matches(&step));
        assert!(!rule.matches(&ExecutionStep::new("q", "Q")));
    }

    #[test]
    fn test_empty_allowlist_allows_everything() {
        let open = SecurityContext::default();
        assert!(open.allows_tool("anything"));

        let closed = SecurityContext {
            allowed_tools: vec!["http".to_string()],
            ..Default::default()
        };
        assert!(closed.allows_tool("http"));
        assert!(!closed.allows_tool("stripe"));
    }
}
