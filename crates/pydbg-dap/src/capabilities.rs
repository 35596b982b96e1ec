//! Adapter capabilities as resolved after `initialize`.

use crate::protocol::Capabilities;

/// Resolved capabilities of the debug adapter, stored as plain booleans.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DapCapabilities {
    pub supports_configuration_done_request: bool,
    pub supports_conditional_breakpoints: bool,
    pub supports_hit_conditional_breakpoints: bool,
    pub supports_log_points: bool,
    pub supports_evaluate_for_hovers: bool,
    pub supports_set_variable: bool,
    pub supports_terminate_request: bool,
    pub support_terminate_debuggee: bool,
}

impl DapCapabilities {
    /// Resolve the optional flags from an `initialize` response body.
    pub fn from_initialize_response(caps: &Capabilities) -> Self {
        let flag = |value: Option<bool>| value.unwrap_or(false);
        Self {
            supports_configuration_done_request: flag(caps.supports_configuration_done_request),
            supports_conditional_breakpoints: flag(caps.supports_conditional_breakpoints),
            supports_hit_conditional_breakpoints: flag(caps.supports_hit_conditional_breakpoints),
            supports_log_points: flag(caps.supports_log_points),
            supports_evaluate_for_hovers: flag(caps.supports_evaluate_for_hovers),
            supports_set_variable: flag(caps.supports_set_variable),
            supports_terminate_request: flag(caps.supports_terminate_request),
            support_terminate_debuggee: flag(caps.support_terminate_debuggee),
        }
    }

    /// Parse an `initialize` response body. A missing or malformed body
    /// means no optional capabilities.
    pub fn from_body(body: Option<&serde_json::Value>) -> Self {
        body.and_then(|b| serde_json::from_value::<Capabilities>(b.clone()).ok())
            .map(|caps| Self::from_initialize_response(&caps))
            .unwrap_or_default()
    }
}
