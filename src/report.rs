//! Human-readable and JSON rendering of provisioning outcomes

use serde_json::{json, Value};

use crate::config::Config;
use crate::error::ProvisionError;
use crate::orchestrator::ExecutionResult;
use crate::plan::Plan;

/// Describe what a run would do
pub fn plan_summary(plan: &Plan, config: &Config) -> String {
    let mut out = format!(
        "Plan for {} host (sshd port {}):\n",
        plan.os, config.port
    );
    for (index, step) in plan.steps.iter().enumerate() {
        out.push_str(&format!("  {}. {}\n", index + 1, step));
    }
    if !plan.needs_install {
        out.push_str("  (OpenSSH server already installed, install skipped)\n");
    }
    out
}

/// Summary printed after a successful run
pub fn success_summary(result: &ExecutionResult, config: &Config) -> String {
    let mut out = format!(
        "sshd is running on port {} (steps: {})\n",
        config.port,
        result.steps.join(", ")
    );
    out.push_str(&format!("  allowed users: {}\n", config.users().join(" ")));
    if config.disable_force_cwd {
        out.push_str("  sessions start in the user's home directory\n");
    } else {
        out.push_str(&format!(
            "  sessions start in {}\n",
            config.default_cwd.display()
        ));
    }
    if !result.keys_setup || config.public_key.is_none() {
        out.push_str("  no public key was authorized; add one before logging in\n");
    }
    out
}

/// Failure report: stage, cause, completed steps and a remediation hint
pub fn failure_summary(err: &ProvisionError) -> String {
    let mut out = match err.stage() {
        Some(stage) => format!("Provisioning failed in the {} stage\n", stage),
        None => "Provisioning failed before any stage ran\n".to_string(),
    };

    out.push_str(&format!("  cause: {}\n", err.root_cause()));
    if let ProvisionError::Execution { result, .. } = err {
        let completed = if result.steps.is_empty() {
            "none".to_string()
        } else {
            result.steps.join(", ")
        };
        out.push_str(&format!("  completed steps: {}\n", completed));
    }
    if let Some(hint) = err.remediation() {
        out.push_str(&format!("  hint: {}\n", hint));
    }
    out
}

pub fn plan_json(plan: &Plan) -> Value {
    json!({ "plan": plan })
}

pub fn success_json(plan: &Plan, result: &ExecutionResult) -> Value {
    json!({ "plan": plan, "result": result })
}

pub fn failure_json(err: &ProvisionError) -> Value {
    let steps = match err {
        ProvisionError::Execution { result, .. } => result.steps.clone(),
        _ => Vec::new(),
    };
    json!({
        "success": false,
        "stage": err.stage(),
        "steps": steps,
        "error": err.root_cause().to_string(),
        "privilegeRelated": err.is_privilege_related(),
        "hint": err.remediation(),
    })
}
