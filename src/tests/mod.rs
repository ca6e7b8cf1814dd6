use crate::diagnostics::DiagnosticLog;
use crate::http::DiagnosticClient;
use crate::sandbox::Sandbox;
use crate::tool_registry::ToolRegistry;
use crate::tools::ToolContext;

mod http_tests;

/// Tool context with no credentials configured and the default runtime.
pub(crate) fn blank_context(log: &DiagnosticLog) -> ToolContext {
    ToolContext {
        http: DiagnosticClient::with_client(reqwest::Client::new(), log.clone()),
        search: Default::default(),
        proxy_endpoint: String::new(),
        sandbox: Sandbox::node(),
    }
}

pub(crate) fn blank_registry(log: &DiagnosticLog) -> ToolRegistry {
    ToolRegistry::new(blank_context(log))
}

/// `sh -c <script>`; the harness argument lands in `$0` and is ignored.
pub(crate) fn shell_sandbox(script: &str) -> Sandbox {
    Sandbox::new("sh", vec!["-c".to_string(), script.to_string()])
}

/// `node` on PATH with a permission model (20 or newer).
pub(crate) fn node_available() -> bool {
    std::process::Command::new("node")
        .arg("--version")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| {
            let version = String::from_utf8_lossy(&o.stdout).trim().to_string();
            version
                .trim_start_matches('v')
                .split('.')
                .next()
                .and_then(|major| major.parse::<u32>().ok())
        })
        .is_some_and(|major| major >= 20)
}
