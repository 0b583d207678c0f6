//! Data source endpoints and their network identity

use std::fmt;
use std::sync::OnceLock;

/// Network identity of a group member as reported by `replication_group_members`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse "host:port"
    pub fn parse(addr: &str) -> Option<Self> {
        let (host, port) = addr.rsplit_once(':')?;
        if host.is_empty() {
            return None;
        }
        Some(Self::new(host, port.parse().ok()?))
    }

    /// Same member: hostnames compare case-insensitively
    pub fn same_member(&self, other: &NodeAddress) -> bool {
        self.port == other.port && self.host.eq_ignore_ascii_case(&other.host)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// How to open a monitoring connection to a data source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: Option<String>,
}

impl ConnectOptions {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Error building an endpoint from a connection URL
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid data source URL `{url}`: {reason}")]
pub struct EndpointError {
    pub url: String,
    pub reason: &'static str,
}

/// A configured member of a replication group
///
/// The logical id (`ds_0`) is what routing consumers see; the primary is
/// discovered by network identity and translated back to this id.
#[derive(Debug, Clone)]
pub struct DataSourceEndpoint {
    id: String,
    options: ConnectOptions,
    /// Address the group reports for this member, when it differs from the
    /// address we connect to (MGR `report_host` / `report_port`)
    advertised: Option<NodeAddress>,
    resolved: OnceLock<NodeAddress>,
}

impl DataSourceEndpoint {
    pub fn new(id: impl Into<String>, options: ConnectOptions) -> Self {
        Self {
            id: id.into(),
            options,
            advertised: None,
            resolved: OnceLock::new(),
        }
    }

    /// Build from a JDBC-style URL such as
    /// `jdbc:mysql://127.0.0.1:3306/ds_0?serverTimezone=UTC&useSSL=false`
    pub fn from_url(
        id: impl Into<String>,
        url: &str,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, EndpointError> {
        let invalid = |reason| EndpointError {
            url: url.to_string(),
            reason,
        };

        let rest = url.strip_prefix("jdbc:").unwrap_or(url);
        let rest = rest
            .strip_prefix("mysql://")
            .ok_or_else(|| invalid("expected a mysql:// scheme"))?;
        let rest = rest.split('?').next().unwrap_or_default();
        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) => (authority, path),
            None => (rest, ""),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (
                host,
                port.parse::<u16>().map_err(|_| invalid("port is not a number"))?,
            ),
            None => (authority, 3306),
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        Ok(Self::new(
            id,
            ConnectOptions {
                host: host.to_string(),
                port,
                user: user.into(),
                password: password.into(),
                database: (!path.is_empty()).then(|| path.to_string()),
            },
        ))
    }

    pub fn with_advertised(mut self, advertised: NodeAddress) -> Self {
        self.advertised = Some(advertised);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Network identity used to match the group's primary-member answer
    pub fn target(&self) -> &NodeAddress {
        self.resolved.get_or_init(|| {
            self.advertised
                .clone()
                .unwrap_or_else(|| NodeAddress::new(&self.options.host, self.options.port))
        })
    }

    pub fn is_target(&self, address: &NodeAddress) -> bool {
        self.target().same_member(address)
    }
}
