//! Listener binding with free-port suggestions.
//!
//! Binding never switches addresses on its own: when the requested port is
//! taken, a bounded scan of the following ports on the same host yields at
//! most one suggestion for the caller to show.

use std::fmt::{Display, Formatter};
use std::io::ErrorKind;
use std::net::IpAddr;

use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::AppError;

/// Ports probed above the requested one before giving up on a suggestion.
pub const MAX_PROBES: u16 = 20;

/// A `host:port` pair where the host may be empty ("any interface").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddr {
    /// Host part as written, possibly empty or a bracketed IPv6 literal.
    pub host: String,
    /// Port number.
    pub port: u16,
}

impl ListenAddr {
    /// Parse `host:port` or `:port`.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the address is malformed.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let (host, port) = raw
            .rsplit_once(':')
            .ok_or_else(|| format!("missing port in address {raw:?}"))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| format!("invalid port in address {raw:?}"))?;
        Ok(Self {
            host: host.to_owned(),
            port,
        })
    }

    /// Address handed to the socket layer; an empty host binds all interfaces.
    #[must_use]
    pub fn bind_target(&self) -> String {
        let host = if self.host.is_empty() {
            "0.0.0.0"
        } else {
            &self.host
        };
        format!("{host}:{}", self.port)
    }

    /// Address shown to users; an empty host is rendered as `localhost`.
    #[must_use]
    pub fn display_host(&self) -> &str {
        if self.host.is_empty() {
            "localhost"
        } else {
            &self.host
        }
    }

    /// Whether the host is empty, `localhost`, a loopback or an unspecified IP.
    #[must_use]
    pub fn is_local(&self) -> bool {
        is_local_host(&self.host)
    }
}

impl Display for ListenAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Whether `host` is empty, `localhost`, or a loopback/unspecified IP.
#[must_use]
pub fn is_local_host(host: &str) -> bool {
    if host.is_empty() || host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok_and(|ip| ip.is_loopback() || ip.is_unspecified())
}

/// A free address found near a busy one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestedAddr {
    /// Same host as the requested address.
    pub host: String,
    /// Port that was free when probed.
    pub port: u16,
}

impl SuggestedAddr {
    /// Client flag that selects this address: `--port` for local hosts,
    /// `--listen` otherwise.
    #[must_use]
    pub fn flag(&self) -> String {
        if is_local_host(&self.host) {
            format!("--port={}", self.port)
        } else {
            format!("--listen={}:{}", self.host, self.port)
        }
    }

    /// One-line hint telling the user how to use the suggestion.
    #[must_use]
    pub fn hint(&self) -> String {
        if is_local_host(&self.host) {
            format!(
                "Note: port {} is available; specify {} to use it",
                self.port,
                self.flag()
            )
        } else {
            format!(
                "Note: address {}:{} is available; specify {} to use it",
                self.host,
                self.port,
                self.flag()
            )
        }
    }
}

/// Why the listener could not be bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindFailure {
    /// The address that was requested.
    pub addr: String,
    /// The port was already in use.
    pub in_use: bool,
    /// Underlying error text.
    pub reason: String,
    /// A free alternative, if one was found.
    pub suggestion: Option<SuggestedAddr>,
}

impl BindFailure {
    /// User-facing lines describing the failure and what to do about it.
    #[must_use]
    pub fn render(&self) -> Vec<String> {
        let headline = if self.in_use {
            format!("Failed to run on {} - port is already in use", self.addr)
        } else {
            format!("Failed to run on {} - {}", self.addr, self.reason)
        };
        let note = self.suggestion.as_ref().map_or_else(
            || "Note: specify --port=NUMBER to run on another port".to_owned(),
            SuggestedAddr::hint,
        );
        vec![headline, note]
    }
}

impl Display for BindFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to bind {}: {}", self.addr, self.reason)
    }
}

impl From<BindFailure> for AppError {
    fn from(failure: BindFailure) -> Self {
        Self::PortBind(failure.to_string())
    }
}

/// A bound listener plus the address to show for it.
#[derive(Debug)]
pub struct BoundListener {
    /// The bound socket.
    pub listener: TcpListener,
    /// Normalized display address (`localhost:PORT` for an empty host).
    pub display_addr: String,
}

/// Binds run listeners.
#[derive(Debug, Clone)]
pub struct PortBinder {
    max_probes: u16,
}

impl Default for PortBinder {
    fn default() -> Self {
        Self::new(MAX_PROBES)
    }
}

impl PortBinder {
    /// Binder scanning up to `max_probes` ports when suggesting alternatives.
    #[must_use]
    pub fn new(max_probes: u16) -> Self {
        Self { max_probes }
    }

    /// Bind `requested`.
    ///
    /// # Errors
    ///
    /// Returns a [`BindFailure`], carrying a suggestion when the port was in
    /// use and a nearby one is free.
    pub async fn bind(&self, requested: &str) -> Result<BoundListener, BindFailure> {
        let addr = ListenAddr::parse(requested).map_err(|reason| BindFailure {
            addr: requested.to_owned(),
            in_use: false,
            reason,
            suggestion: None,
        })?;

        match TcpListener::bind(addr.bind_target()).await {
            Ok(listener) => {
                let port = listener
                    .local_addr()
                    .map_or(addr.port, |local| local.port());
                let display_addr = format!("{}:{port}", addr.display_host());
                info!(requested, %display_addr, "run listener bound");
                Ok(BoundListener {
                    listener,
                    display_addr,
                })
            }
            Err(err) => {
                let in_use = err.kind() == ErrorKind::AddrInUse;
                let suggestion = if in_use {
                    self.find_available(&addr).await
                } else {
                    None
                };
                Err(BindFailure {
                    addr: requested.to_owned(),
                    in_use,
                    reason: err.to_string(),
                    suggestion,
                })
            }
        }
    }

    /// Probe the ports following `addr.port` on the same host.
    pub async fn find_available(&self, addr: &ListenAddr) -> Option<SuggestedAddr> {
        if addr.port == 0 {
            return None;
        }

        for offset in 1..=self.max_probes {
            let Some(port) = addr.port.checked_add(offset) else {
                break;
            };
            let candidate = ListenAddr {
                host: addr.host.clone(),
                port,
            };
            match TcpListener::bind(candidate.bind_target()).await {
                Ok(probe) => {
                    drop(probe);
                    debug!(port, "found free port");
                    return Some(SuggestedAddr {
                        host: addr.display_host().to_owned(),
                        port,
                    });
                }
                Err(err) => debug!(port, %err, "probe failed"),
            }
        }
        None
    }
}
