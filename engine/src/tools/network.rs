//! NetAgent: reachability and name resolution

use sdk::errors::StewardError;
use sdk::types::{ToolInput, ToolOutput};
use serde_json::json;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use super::HOST_TOKEN;
use crate::agent::DomainHandler;
use crate::dispatch::{Action, ParamKind, ParamSpec, Tool};
use crate::permissions::Operation;

pub const NAME: &str = "NetAgent";

const CHECK_TIMEOUT: Duration = Duration::from_secs(3);

/// Public resolvers tried for outbound connectivity
const RESOLVER_TARGETS: &[&str] = &["1.1.1.1:53", "8.8.8.8:53", "9.9.9.9:53"];

pub fn handler() -> Result<DomainHandler, StewardError> {
    DomainHandler::new(
        NAME,
        "Networking: ping hosts, resolve DNS names, check internet connectivity",
    )
    .with_tools(vec![
        Tool::new("ping_host", "Send 4 ICMP echo requests to a host", Operation::Execute, ping_host)
            .strong(&["ping"])
            .weak(&["reachable", "latency", "host"])
            .param(ParamSpec::required("host", ParamKind::String))
            .param(ParamSpec::optional("count", ParamKind::Integer).with_default(json!(4)))
            .extract("host", HOST_TOKEN)?,
        Tool::new("dns_lookup", "Resolve a host name to IP addresses", Operation::Execute, |input: &ToolInput| {
            let host = validate_host(input.arg_str("host")?)?;
            Ok(Action::native("dns_lookup", move || dns_lookup(&host)))
        })
        .strong(&["dns", "nslookup", "resolve", "ip address of"])
        .weak(&["lookup", "ip", "address"])
        .param(ParamSpec::required("host", ParamKind::String))
        .extract("host", HOST_TOKEN)?,
        Tool::new("check_connectivity", "Check outbound internet connectivity", Operation::Execute, |_| {
            Ok(Action::native("check_connectivity", check_connectivity))
        })
        .strong(&["internet", "connectivity", "online", "offline"])
        .weak(&["connection", "network", "connected"]),
    ])
}

fn validate_host(host: &str) -> Result<String, StewardError> {
    let ok = !host.is_empty()
        && !host.starts_with('-')
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == ':');
    if ok {
        Ok(host.to_string())
    } else {
        Err(StewardError::InvalidArgs(format!("invalid host '{}'", host)))
    }
}

fn ping_host(input: &ToolInput) -> Result<Action, StewardError> {
    let host = validate_host(input.arg_str("host")?)?;
    let count = input.arg_i64_opt("count").unwrap_or(4).clamp(1, 20).to_string();

    #[cfg(windows)]
    let flag = "-n";
    #[cfg(not(windows))]
    let flag = "-c";

    Ok(Action::command(["ping", flag, count.as_str(), host.as_str()]))
}

fn dns_lookup(host: &str) -> Result<ToolOutput, StewardError> {
    let mut addrs: Vec<String> = (host, 0)
        .to_socket_addrs()
        .map_err(|_| StewardError::DnsFailure(host.to_string()))?
        .map(|a| a.ip().to_string())
        .collect();
    addrs.sort();
    addrs.dedup();

    if addrs.is_empty() {
        return Err(StewardError::DnsFailure(host.to_string()));
    }
    Ok(ToolOutput::with_data(
        format!("{} resolves to {}", host, addrs.join(", ")),
        json!({ "host": host, "addresses": addrs }),
    ))
}

fn check_connectivity() -> Result<ToolOutput, StewardError> {
    let mut reached = Vec::new();
    for target in RESOLVER_TARGETS {
        let Ok(addr) = target.parse::<SocketAddr>() else {
            continue;
        };
        let started = Instant::now();
        if TcpStream::connect_timeout(&addr, CHECK_TIMEOUT).is_ok() {
            reached.push(json!({ "target": target, "ms": started.elapsed().as_millis() as u64 }));
        }
    }

    if reached.is_empty() {
        return Err(StewardError::HostUnreachable(
            "no public resolver reachable".to_string(),
        ));
    }
    Ok(ToolOutput::with_data(
        format!("Online: {}/{} resolvers answered", reached.len(), RESOLVER_TARGETS.len()),
        json!({ "reached": reached }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Handler;

    #[test]
    fn test_ping_builds_command() {
        let handler = handler().unwrap();
        let res = handler.tools().tier1("ping example.com").unwrap();
        assert_eq!(res.tool(), "ping_host");
        let line = handler.prepare(&res).unwrap().command_line().unwrap();
        assert!(line.starts_with("ping -"));
        assert!(line.ends_with("4 example.com"));
    }

    #[test]
    fn test_ping_without_host_falls_through() {
        let handler = handler().unwrap();
        assert!(handler.tools().tier1("ping my router").is_err());
    }

    #[test]
    fn test_dns_and_connectivity_selection() {
        let handler = handler().unwrap();
        assert_eq!(
            handler.tools().tier1("resolve dns for github.com").unwrap().tool(),
            "dns_lookup"
        );
        assert_eq!(
            handler.tools().tier1("am I online?").unwrap().tool(),
            "check_connectivity"
        );
    }

    #[test]
    fn test_validate_host() {
        assert!(validate_host("example.com").is_ok());
        assert!(validate_host("::1").is_ok());
        assert!(validate_host("-oProxy=evil").is_err());
        assert!(validate_host("a b").is_err());
    }

    #[test]
    fn test_dns_lookup_localhost() {
        let out = dns_lookup("localhost").unwrap();
        assert!(out.text.starts_with("localhost resolves to"));
    }
}
