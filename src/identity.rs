use crate::errors::AgentError;

/// Resolve the name under which this node reports to the shared store.
///
/// Without an identity neither telemetry attribution nor command targeting
/// is well-defined, so callers must treat a failure here as fatal at
/// startup rather than retry it.
pub fn resolve_node_name() -> Result<String, AgentError> {
    let name = gethostname::gethostname();
    let name = name.to_string_lossy().trim().to_string();
    if name.is_empty() {
        return Err(AgentError::SystemLookup(
            "hostname resolved to an empty string".to_string(),
        ));
    }
    Ok(name)
}
