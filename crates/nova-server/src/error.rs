//! Error mapping between the core layer and JSON-RPC

use nova_api_contract::rpc::codes;

/// Map a core error onto its JSON-RPC error code.
pub fn rpc_error_code(error: &nova_core::Error) -> i64 {
    use nova_core::Error;
    match error {
        Error::PluginNotFound(_) => codes::PLUGIN_NOT_FOUND,
        Error::AgentNotFound(_) => codes::AGENT_NOT_FOUND,
        Error::AgentDisabled(_) => codes::AGENT_DISABLED,
        Error::SessionNotFound(_) | Error::TranscriptNotFound(_) => codes::SESSION_NOT_FOUND,
        _ => codes::INTERNAL_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_wire_codes() {
        assert_eq!(
            rpc_error_code(&nova_core::Error::PluginNotFound("p".into())),
            -32001
        );
        assert_eq!(
            rpc_error_code(&nova_core::Error::AgentNotFound("a".into())),
            -32002
        );
        assert_eq!(
            rpc_error_code(&nova_core::Error::AgentDisabled("a".into())),
            -32002
        );
        assert_eq!(
            rpc_error_code(&nova_core::Error::SessionNotFound("s".into())),
            -32003
        );
        assert_eq!(
            rpc_error_code(&nova_core::Error::Spawn("boom".into())),
            -32603
        );
    }
}
