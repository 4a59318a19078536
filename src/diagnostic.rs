//! Step-by-step connectivity check against one URL.
//!
//! Useful when downloads keep failing and it is unclear whether the
//! problem is name resolution, a blocked port, or the HTTP layer.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use reqwest::Url;
use tokio::net::TcpStream;

use crate::http::{HeaderProfile, HttpSession, Timeouts};

/// One stage of the diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticCheck {
    Dns,
    Tcp,
    Http,
}

impl fmt::Display for DiagnosticCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiagnosticCheck::Dns => "dns",
            DiagnosticCheck::Tcp => "tcp",
            DiagnosticCheck::Http => "http",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticStep {
    pub check: DiagnosticCheck,
    pub ok: bool,
    pub detail: String,
}

/// Result of [`network_diagnostic`]. Steps stop at the first failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticReport {
    pub url: String,
    /// `host:port` derived from the URL, empty when it could not be parsed.
    pub target: String,
    pub steps: Vec<DiagnosticStep>,
}

impl DiagnosticReport {
    /// True when every check ran and passed.
    pub fn is_healthy(&self) -> bool {
        self.steps.len() == 3 && self.steps.iter().all(|s| s.ok)
    }

    pub fn failed_step(&self) -> Option<&DiagnosticStep> {
        self.steps.iter().find(|s| !s.ok)
    }

    fn record(&mut self, check: DiagnosticCheck, ok: bool, detail: String) -> bool {
        if ok {
            tracing::info!(%check, target = %self.target, %detail, "Diagnostic step passed");
        } else {
            tracing::warn!(%check, target = %self.target, %detail, "Diagnostic step failed");
        }
        self.steps.push(DiagnosticStep { check, ok, detail });
        ok
    }

    async fn record_tcp(&mut self, addr: SocketAddr, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_)) => self.record(DiagnosticCheck::Tcp, true, format!("connected to {}", addr)),
            Ok(Err(e)) => self.record(DiagnosticCheck::Tcp, false, e.to_string()),
            Err(_) => self.record(
                DiagnosticCheck::Tcp,
                false,
                format!("timed out after {:?}", timeout),
            ),
        }
    }
}

/// Tunables for [`network_diagnostic_with`].
#[derive(Debug, Clone, Copy)]
pub struct DiagnosticOptions {
    pub tcp_timeout: Duration,
    pub http_timeouts: Timeouts,
}

impl Default for DiagnosticOptions {
    fn default() -> Self {
        Self {
            tcp_timeout: Duration::from_secs(10),
            http_timeouts: Timeouts::from_secs(30, 10, 30),
        }
    }
}

/// Resolve, connect to and `HEAD` the given URL with default timeouts.
pub async fn network_diagnostic(url: &str) -> DiagnosticReport {
    network_diagnostic_with(url, DiagnosticOptions::default()).await
}

pub async fn network_diagnostic_with(url: &str, options: DiagnosticOptions) -> DiagnosticReport {
    let mut report = DiagnosticReport {
        url: url.to_string(),
        target: String::new(),
        steps: Vec::new(),
    };

    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(e) => {
            report.record(DiagnosticCheck::Dns, false, format!("invalid URL: {}", e));
            return report;
        }
    };
    let Some(host) = parsed.host_str().map(String::from) else {
        report.record(DiagnosticCheck::Dns, false, "URL has no host".into());
        return report;
    };
    let port = parsed
        .port_or_known_default()
        .unwrap_or(if parsed.scheme() == "https" { 443 } else { 80 });
    report.target = format!("{}:{}", host, port);

    // 1. DNS
    let addr = match tokio::net::lookup_host((host.as_str(), port)).await {
        Ok(mut addrs) => addrs.next(),
        Err(e) => {
            report.record(DiagnosticCheck::Dns, false, e.to_string());
            return report;
        }
    };
    let Some(addr) = addr else {
        report.record(DiagnosticCheck::Dns, false, format!("no address for {}", host));
        return report;
    };
    report.record(DiagnosticCheck::Dns, true, format!("{} -> {}", host, addr.ip()));

    // 2. TCP
    if !report.record_tcp(addr, options.tcp_timeout).await {
        return report;
    }

    // 3. HTTP
    let session = HttpSession::download(HeaderProfile::Short, options.http_timeouts);
    let result = match session.client() {
        Ok(client) => client.head(url).send().await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    match result {
        Ok(resp) => report.record(DiagnosticCheck::Http, true, format!("status {}", resp.status())),
        Err(e) => report.record(DiagnosticCheck::Http, false, e),
    };

    report
}
