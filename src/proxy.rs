use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::net::TcpStream;

/// Proxy environment variables, in precedence order.
pub const PROXY_ENV_VARS: [&str; 4] = ["HTTP_PROXY", "HTTPS_PROXY", "http_proxy", "https_proxy"];

/// Upper bound for one OS settings command (`reg query`, `scutil --proxy`).
pub const SYSTEM_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Local ports commonly used by desktop proxy tools (Clash, V2Ray, ...).
pub const COMMON_PROXY_PORTS: [u16; 6] = [7890, 7891, 1080, 8080, 8888, 10809];

/// The proxy a client routes downloads through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub url: String,
}

impl ProxyConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl fmt::Display for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;
type SystemLookup = Arc<dyn Fn() -> BoxFuture<'static, Option<String>> + Send + Sync>;

/// Best-effort discovery of a usable HTTP proxy.
///
/// Sources are consulted in order: environment variables, the OS proxy
/// settings, then a TCP probe of [`COMMON_PROXY_PORTS`] on localhost. The
/// first hit wins. Nothing found is not an error.
#[derive(Clone)]
pub struct ProxyDetector {
    env: EnvLookup,
    system: Option<SystemLookup>,
    probe_host: String,
    probe_ports: Vec<u16>,
    probe_timeout: Duration,
}

impl Default for ProxyDetector {
    fn default() -> Self {
        Self {
            env: Arc::new(|name: &str| std::env::var(name).ok()),
            system: Some(Arc::new(|| -> BoxFuture<'static, Option<String>> {
                Box::pin(system_proxy())
            })),
            probe_host: "127.0.0.1".to_string(),
            probe_ports: COMMON_PROXY_PORTS.to_vec(),
            probe_timeout: Duration::from_secs(3),
        }
    }
}

impl fmt::Debug for ProxyDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyDetector")
            .field("system", &self.system.is_some())
            .field("probe_host", &self.probe_host)
            .field("probe_ports", &self.probe_ports)
            .field("probe_timeout", &self.probe_timeout)
            .finish()
    }
}

impl ProxyDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the environment lookup (tests, sandboxed hosts).
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(lookup);
        self
    }

    /// Replace the OS settings lookup.
    pub fn with_system_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Option<String>> + Send + Sync + 'static,
    {
        self.system = Some(Arc::new(lookup));
        self
    }

    /// Skip the OS settings lookup entirely.
    pub fn without_system(mut self) -> Self {
        self.system = None;
        self
    }

    pub fn with_probe_host(mut self, host: impl Into<String>) -> Self {
        self.probe_host = host.into();
        self
    }

    pub fn with_probe_ports(mut self, ports: Vec<u16>) -> Self {
        self.probe_ports = ports;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Run every source once and return the first proxy found.
    pub async fn detect(&self) -> Option<ProxyConfig> {
        for var in PROXY_ENV_VARS {
            let value = (self.env)(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty());
            if let Some(url) = value {
                tracing::debug!(var, proxy = %url, "Proxy found in environment");
                return Some(ProxyConfig::new(url));
            }
        }

        if let Some(lookup) = &self.system {
            if let Some(url) = lookup().await {
                tracing::debug!(proxy = %url, "Proxy found in system settings");
                return Some(ProxyConfig::new(url));
            }
        }

        for &port in &self.probe_ports {
            if probe(&self.probe_host, port, self.probe_timeout).await {
                let url = format!("http://{}:{}", self.probe_host, port);
                tracing::info!(proxy = %url, "Local proxy is accepting connections");
                return Some(ProxyConfig::new(url));
            }
        }

        tracing::debug!("No proxy detected");
        None
    }
}

/// Connect-and-close test against `host:port`.
pub async fn probe(host: &str, port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

/// Read the OS-level proxy setting, when the platform exposes one.
pub async fn system_proxy() -> Option<String> {
    platform_proxy().await
}

/// Run `cmd` and return its stdout, or `None` if it cannot start, exits
/// unsuccessfully, or outlives `timeout`. The child is killed on timeout.
pub async fn command_output(mut cmd: tokio::process::Command, timeout: Duration) -> Option<String> {
    cmd.kill_on_drop(true);
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(Ok(output)) => {
            tracing::debug!(status = %output.status, "Proxy settings command failed");
            None
        }
        Ok(Err(e)) => {
            tracing::debug!("Cannot run proxy settings command: {}", e);
            None
        }
        Err(_) => {
            tracing::debug!(?timeout, "Proxy settings command timed out");
            None
        }
    }
}

#[cfg(windows)]
async fn platform_proxy() -> Option<String> {
    let mut cmd = tokio::process::Command::new("reg");
    cmd.args([
        "query",
        r"HKCU\Software\Microsoft\Windows\CurrentVersion\Internet Settings",
    ]);
    parse_windows_registry(&command_output(cmd, SYSTEM_LOOKUP_TIMEOUT).await?)
}

#[cfg(target_os = "macos")]
async fn platform_proxy() -> Option<String> {
    let mut cmd = tokio::process::Command::new("scutil");
    cmd.arg("--proxy");
    parse_scutil_proxy(&command_output(cmd, SYSTEM_LOOKUP_TIMEOUT).await?)
}

#[cfg(not(any(windows, target_os = "macos")))]
async fn platform_proxy() -> Option<String> {
    None
}

/// Parse `reg query` output for the Internet Settings key.
pub fn parse_windows_registry(output: &str) -> Option<String> {
    let mut enabled = false;
    let mut server = None;
    for line in output.lines() {
        let mut parts = line.split_whitespace();
        let (Some(name), Some(_kind), Some(value)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        match name {
            "ProxyEnable" => {
                enabled = u32::from_str_radix(value.trim_start_matches("0x"), 16)
                    .map(|v| v != 0)
                    .unwrap_or(false);
            }
            "ProxyServer" => server = Some(value.to_string()),
            _ => {}
        }
    }
    if !enabled {
        return None;
    }
    let server = server?;
    // Per-protocol form: "http=host:port;https=host:port"
    let entry = if server.contains('=') {
        let entries: Vec<&str> = server.split(';').collect();
        entries
            .iter()
            .find_map(|e| e.strip_prefix("http="))
            .or_else(|| entries.first().and_then(|e| e.split_once('=').map(|(_, v)| v)))?
            .to_string()
    } else {
        server
    };
    (!entry.is_empty()).then(|| with_http_scheme(&entry))
}

/// Parse `scutil --proxy` output. HTTP settings win over HTTPS.
pub fn parse_scutil_proxy(output: &str) -> Option<String> {
    let field = |key: &str| {
        output.lines().find_map(|line| {
            let (k, v) = line.split_once(':')?;
            (k.trim() == key).then(|| v.trim().to_string())
        })
    };
    for prefix in ["HTTP", "HTTPS"] {
        if field(&format!("{}Enable", prefix)).as_deref() != Some("1") {
            continue;
        }
        let host = field(&format!("{}Proxy", prefix))?;
        return Some(match field(&format!("{}Port", prefix)) {
            Some(port) => format!("http://{}:{}", host, port),
            None => with_http_scheme(&host),
        });
    }
    None
}

fn with_http_scheme(server: &str) -> String {
    if server.starts_with("http://") || server.starts_with("https://") {
        server.to_string()
    } else {
        format!("http://{}", server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + Send + Sync + 'static {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn isolated() -> ProxyDetector {
        ProxyDetector::new()
            .with_env(|_| None)
            .without_system()
            .with_probe_ports(Vec::new())
    }

    #[tokio::test]
    async fn test_env_precedence() {
        let detector = isolated().with_env(env(&[
            ("https_proxy", "http://lower:1"),
            ("HTTPS_PROXY", "http://upper:2"),
        ]));
        assert_eq!(
            detector.detect().await,
            Some(ProxyConfig::new("http://upper:2"))
        );
    }

    #[tokio::test]
    async fn test_empty_env_value_is_skipped() {
        let detector = isolated().with_env(env(&[("HTTP_PROXY", "  "), ("http_proxy", "http://p:3")]));
        assert_eq!(detector.detect().await.map(|p| p.url), Some("http://p:3".into()));
    }

    #[tokio::test]
    async fn test_system_lookup_used_after_env() {
        let detector = isolated()
            .with_system_lookup(|| Box::pin(async { Some("http://sys:8080".to_string()) }));
        assert_eq!(detector.detect().await.map(|p| p.url), Some("http://sys:8080".into()));
    }

    #[tokio::test]
    async fn test_env_wins_over_system_lookup() {
        let consulted = Arc::new(AtomicBool::new(false));
        let flag = consulted.clone();
        let detector = isolated()
            .with_env(env(&[("HTTP_PROXY", "http://env:3128")]))
            .with_system_lookup(move || {
                flag.store(true, Ordering::SeqCst);
                Box::pin(async { Some("http://sys:8080".to_string()) })
            });

        assert_eq!(detector.detect().await.map(|p| p.url), Some("http://env:3128".into()));
        assert!(!consulted.load(Ordering::SeqCst));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_output_times_out() {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.args(["-c", "sleep 5"]);
        let started = std::time::Instant::now();
        assert_eq!(command_output(cmd, Duration::from_millis(100)).await, None);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_output_reads_stdout() {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.args(["-c", "echo HTTPEnable : 1"]);
        let out = command_output(cmd, Duration::from_secs(5)).await.unwrap();
        assert!(out.contains("HTTPEnable : 1"));

        let mut missing = tokio::process::Command::new("sh");
        missing.args(["-c", "exit 3"]);
        assert_eq!(command_output(missing, Duration::from_secs(5)).await, None);
    }

    #[tokio::test]
    async fn test_nothing_found() {
        assert!(isolated().detect().await.is_none());
    }

    #[tokio::test]
    async fn test_probe_finds_listening_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let detector = isolated()
            .with_probe_ports(vec![port])
            .with_probe_timeout(Duration::from_millis(500));
        assert_eq!(
            detector.detect().await,
            Some(ProxyConfig::new(format!("http://127.0.0.1:{}", port)))
        );
    }

    #[tokio::test]
    async fn test_probe_closed_port() {
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        assert!(!probe("127.0.0.1", port, Duration::from_millis(500)).await);
    }

    #[test]
    fn test_parse_windows_registry() {
        let output = r"
HKEY_CURRENT_USER\Software\Microsoft\Windows\CurrentVersion\Internet Settings
    ProxyEnable    REG_DWORD    0x1
    ProxyServer    REG_SZ    127.0.0.1:7890
";
        assert_eq!(
            parse_windows_registry(output),
            Some("http://127.0.0.1:7890".into())
        );

        let disabled = output.replace("0x1", "0x0");
        assert_eq!(parse_windows_registry(&disabled), None);

        let per_protocol = output.replace("127.0.0.1:7890", "https=10.0.0.1:443;http=10.0.0.1:80");
        assert_eq!(
            parse_windows_registry(&per_protocol),
            Some("http://10.0.0.1:80".into())
        );
    }

    #[test]
    fn test_parse_scutil() {
        let output = "<dictionary> {\n  HTTPEnable : 0\n  HTTPSEnable : 1\n  HTTPSPort : 7890\n  HTTPSProxy : 127.0.0.1\n}";
        assert_eq!(
            parse_scutil_proxy(output),
            Some("http://127.0.0.1:7890".into())
        );
        assert_eq!(parse_scutil_proxy("<dictionary> {\n}"), None);
    }
}
