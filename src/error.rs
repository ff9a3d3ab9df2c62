use thiserror::Error;

/// Failures scoped to a single account's session. Every variant is recovered
/// at the account-loop boundary: logged, the session torn down, and the run
/// continues with the next account.
#[derive(Debug, Error)]
pub enum AccountError {
    /// The account declaration could not be completed (no server known,
    /// malformed address).
    #[error("account resolution: {0}")]
    Resolution(String),

    /// The proxy descriptor is unusable (unsupported type).
    #[error("proxy configuration: {0}")]
    Proxy(String),

    /// TCP connect failure, either to the server or to the proxy.
    #[error("connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// SOCKS4/SOCKS5 handshake failure.
    #[error("SOCKS handshake via {addr}: {source}")]
    Socks {
        addr: String,
        source: tokio_socks::Error,
    },

    /// HTTP CONNECT tunnel failure.
    #[error("HTTP CONNECT via {addr}: {source}")]
    HttpConnect {
        addr: String,
        source: async_http_proxy::HttpError,
    },

    /// TLS setup or handshake failure.
    #[error("TLS handshake with {addr}: {source}")]
    Tls {
        addr: String,
        source: tokio_native_tls::native_tls::Error,
    },

    /// LOGIN rejected.
    #[error("login as {user}: {source}")]
    Auth {
        user: String,
        source: async_imap::error::Error,
    },

    /// A required mailbox was not present on the server.
    #[error("no {0} mailbox found")]
    MissingMailbox(&'static str),

    /// Any other IMAP command failure (LIST, SELECT, FETCH).
    #[error("IMAP {operation}: {source}")]
    Protocol {
        operation: &'static str,
        source: async_imap::error::Error,
    },

    /// The batched MOVE failed after evaluation completed.
    #[error("move {count} messages to {mailbox}: {source}")]
    Move {
        mailbox: String,
        count: usize,
        source: async_imap::error::Error,
    },
}
