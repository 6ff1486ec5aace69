use super::types::{ContainerSpec, ParsedGroup, PortMapping, RestartPolicy};
use crate::error::ParseError;
use crate::types::Protocol;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::net::Ipv6Addr;
use tracing::{debug, instrument};

/// Parser for compose-style group documents
pub struct ComposeParser;

impl ComposeParser {
    /// Parse a group document into its service specs.
    ///
    /// Unknown top-level and per-service keys are ignored so newer documents
    /// keep working. Services come back in document order.
    #[instrument(skip(content), fields(bytes = content.len()))]
    pub fn parse(content: &str) -> Result<ParsedGroup, ParseError> {
        let document: Value = serde_yaml::from_str(content).map_err(malformed)?;

        let root = match document {
            Value::Mapping(root) => root,
            Value::Null => return Err(malformed("document is empty")),
            _ => return Err(malformed("top level must be a mapping")),
        };

        let compose_version = match root.get("version") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                scalar_to_string(value).ok_or_else(|| malformed("'version' must be a scalar"))?,
            ),
        };

        let services = match root.get("services") {
            Some(Value::Mapping(services)) => Self::parse_services(services)?,
            Some(Value::Null) => Vec::new(),
            Some(_) => return Err(malformed("'services' must be a mapping")),
            None => return Err(malformed("missing 'services' mapping")),
        };

        debug!("Parsed {} services", services.len());
        Ok(ParsedGroup {
            compose_version,
            services,
        })
    }

    fn parse_services(services: &Mapping) -> Result<Vec<ContainerSpec>, ParseError> {
        let mut specs = Vec::with_capacity(services.len());
        for (key, body) in services {
            let name = scalar_to_string(key)
                .filter(|name| !name.trim().is_empty())
                .ok_or_else(|| malformed("service names must be non-empty strings"))?;
            specs.push(Self::parse_service(name, body)?);
        }
        Ok(specs)
    }

    fn parse_service(name: String, body: &Value) -> Result<ContainerSpec, ParseError> {
        let body = match body {
            Value::Mapping(body) => body,
            Value::Null => return Err(ParseError::MissingImage { service: name }),
            _ => {
                return Err(malformed(format!(
                    "service '{}' must be a mapping",
                    name
                )));
            }
        };

        let image = match body.get("image") {
            Some(Value::String(image)) if !image.trim().is_empty() => image.trim().to_string(),
            _ => return Err(ParseError::MissingImage { service: name }),
        };

        let ports = match body.get("ports") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Sequence(entries)) => entries
                .iter()
                .map(|entry| match entry {
                    Value::String(raw) => parse_port(&name, raw),
                    other => Err(ParseError::InvalidPortSyntax {
                        service: name.clone(),
                        port: scalar_to_string(other).unwrap_or_else(|| format!("{:?}", other)),
                        reason: "expected a quoted HOST:CONTAINER[/PROTO] string".to_string(),
                    }),
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => {
                return Err(ParseError::InvalidPortSyntax {
                    service: name,
                    port: format!("{:?}", other),
                    reason: "'ports' must be a list".to_string(),
                });
            }
        };

        let restart_policy = match body.get("restart") {
            None | Some(Value::Null) | Some(Value::Bool(false)) => RestartPolicy::No,
            Some(Value::String(policy)) => {
                RestartPolicy::parse(policy).ok_or_else(|| ParseError::InvalidRestartPolicy {
                    service: name.clone(),
                    policy: policy.clone(),
                })?
            }
            Some(other) => {
                return Err(ParseError::InvalidRestartPolicy {
                    service: name,
                    policy: scalar_to_string(other).unwrap_or_else(|| format!("{:?}", other)),
                });
            }
        };

        let env = match body.get("environment") {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(Value::Mapping(vars)) => parse_env_mapping(&name, vars)?,
            Some(Value::Sequence(vars)) => parse_env_list(&name, vars)?,
            Some(_) => {
                return Err(malformed(format!(
                    "service '{}': 'environment' must be a mapping or a list",
                    name
                )));
            }
        };

        Ok(ContainerSpec {
            service_name: name,
            image,
            ports,
            restart_policy,
            env,
        })
    }
}

/// Parse a single `[IP:]HOST:CONTAINER[/PROTO]` entry
pub fn parse_port(service: &str, raw: &str) -> Result<PortMapping, ParseError> {
    let invalid = |reason: &str| ParseError::InvalidPortSyntax {
        service: service.to_string(),
        port: raw.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = raw.trim();
    let (mapping, protocol) = match trimmed.rsplit_once('/') {
        Some((mapping, proto)) => (
            mapping,
            proto
                .parse::<Protocol>()
                .map_err(|e| invalid(e.as_str()))?,
        ),
        None => (trimmed, Protocol::Tcp),
    };

    // `[::1]:8080:80` binds an IPv6 address; its colons are not separators.
    let (bracketed_ip, mapping) = match mapping.strip_prefix('[') {
        Some(rest) => {
            let (ip, rest) = rest
                .split_once("]:")
                .ok_or_else(|| invalid("expected [IPV6]:HOST:CONTAINER"))?;
            if ip.parse::<Ipv6Addr>().is_err() {
                return Err(invalid("bracketed host IP must be an IPv6 address"));
            }
            (Some(ip), rest)
        }
        None => (None, mapping),
    };

    let parts: Vec<&str> = mapping.split(':').collect();
    let (host_ip, host, container) = match (bracketed_ip, parts.as_slice()) {
        (Some(ip), [host, container]) => (Some(ip.to_string()), *host, *container),
        (None, [host, container]) => (None, *host, *container),
        (None, [ip, host, container]) => {
            if ip.is_empty() {
                return Err(invalid("host IP must not be empty"));
            }
            (Some(ip.to_string()), *host, *container)
        }
        _ => return Err(invalid("expected HOST:CONTAINER[/PROTO]")),
    };

    let parse_number = |value: &str, which: &str| -> Result<u16, ParseError> {
        match value.trim().parse::<u16>() {
            Ok(port) if port > 0 => Ok(port),
            _ => Err(invalid(&format!("{} port must be between 1 and 65535", which))),
        }
    };

    Ok(PortMapping {
        host_ip,
        host_port: parse_number(host, "host")?,
        container_port: parse_number(container, "container")?,
        protocol,
    })
}

fn parse_env_mapping(service: &str, vars: &Mapping) -> Result<BTreeMap<String, String>, ParseError> {
    let mut env = BTreeMap::new();
    for (key, value) in vars {
        let key = scalar_to_string(key)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| malformed(format!("service '{}': invalid environment key", service)))?;
        let value = match value {
            Value::Null => String::new(),
            other => scalar_to_string(other).ok_or_else(|| {
                malformed(format!(
                    "service '{}': environment value for '{}' must be a scalar",
                    service, key
                ))
            })?,
        };
        env.insert(key, value);
    }
    Ok(env)
}

fn parse_env_list(service: &str, vars: &[Value]) -> Result<BTreeMap<String, String>, ParseError> {
    let mut env = BTreeMap::new();
    for entry in vars {
        let entry = match entry {
            Value::String(entry) => entry,
            _ => {
                return Err(malformed(format!(
                    "service '{}': environment list entries must be KEY=VALUE strings",
                    service
                )));
            }
        };
        let (key, value) = entry.split_once('=').unwrap_or((entry.as_str(), ""));
        if key.is_empty() {
            return Err(malformed(format!(
                "service '{}': environment entry '{}' has no key",
                service, entry
            )));
        }
        env.insert(key.to_string(), value.to_string());
    }
    Ok(env)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn malformed(reason: impl std::fmt::Display) -> ParseError {
    ParseError::MalformedYaml {
        reason: reason.to_string(),
    }
}
