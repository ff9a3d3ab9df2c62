use crate::config::ProxyConfig;
use crate::error::AccountError;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_socks::tcp::{Socks4Stream, Socks5Stream};

/// Byte stream handed to the TLS layer; every connect path produces one.
pub trait ProxyStream: AsyncRead + AsyncWrite + Unpin + Send + Sync + fmt::Debug {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync + fmt::Debug> ProxyStream for T {}

pub type BoxedStream = Box<dyn ProxyStream>;

/// How to reach an account's server. Built once per account from its proxy
/// descriptor; holds no connection state.
#[derive(Debug, Clone)]
pub enum Dialer {
    Direct,
    HttpsConnect {
        addr: String,
        auth: Option<(String, String)>,
    },
    Socks4 {
        addr: String,
    },
    Socks5 {
        addr: String,
        auth: Option<(String, String)>,
    },
}

impl Dialer {
    /// Map a proxy descriptor to a dialer. An unsupported proxy type fails
    /// only this account.
    pub fn for_proxy(proxy: Option<&ProxyConfig>) -> Result<Self, AccountError> {
        let Some(proxy) = proxy else {
            return Ok(Dialer::Direct);
        };
        let auth = proxy
            .user
            .clone()
            .filter(|user| !user.is_empty())
            .map(|user| (user, proxy.password.clone().unwrap_or_default()));
        match proxy.kind.as_str() {
            "" | "none" => Ok(Dialer::Direct),
            "https" => Ok(Dialer::HttpsConnect {
                addr: proxy.addr.clone(),
                auth,
            }),
            "socks4" => Ok(Dialer::Socks4 {
                addr: proxy.addr.clone(),
            }),
            "socks5" => Ok(Dialer::Socks5 {
                addr: proxy.addr.clone(),
                auth,
            }),
            other => Err(AccountError::Proxy(format!(
                "unsupported proxy type: {other}"
            ))),
        }
    }

    /// Establish a TCP stream to host:port along the configured path.
    pub async fn dial(&self, host: &str, port: u16) -> Result<BoxedStream, AccountError> {
        match self {
            Dialer::Direct => {
                let stream =
                    TcpStream::connect((host, port))
                        .await
                        .map_err(|source| AccountError::Connect {
                            addr: format!("{host}:{port}"),
                            source,
                        })?;
                Ok(Box::new(stream))
            }
            Dialer::HttpsConnect { addr, auth } => {
                let mut stream = TcpStream::connect(addr.as_str()).await.map_err(|source| {
                    AccountError::Connect {
                        addr: addr.clone(),
                        source,
                    }
                })?;
                log::debug!("using HTTPS proxy {addr}");
                match auth {
                    Some((user, password)) => {
                        async_http_proxy::http_connect_tokio_with_basic_auth(
                            &mut stream,
                            host,
                            port,
                            user,
                            password,
                        )
                        .await
                    }
                    None => async_http_proxy::http_connect_tokio(&mut stream, host, port).await,
                }
                .map_err(|source| AccountError::HttpConnect {
                    addr: addr.clone(),
                    source,
                })?;
                Ok(Box::new(stream))
            }
            Dialer::Socks4 { addr } => {
                log::debug!("using SOCKS4 proxy {addr}");
                let stream = Socks4Stream::connect(addr.as_str(), (host.to_string(), port))
                    .await
                    .map_err(|source| AccountError::Socks {
                        addr: addr.clone(),
                        source,
                    })?;
                Ok(Box::new(stream))
            }
            Dialer::Socks5 { addr, auth } => {
                log::debug!("using SOCKS5 proxy {addr}");
                let target = (host.to_string(), port);
                let stream = match auth {
                    Some((user, password)) => {
                        Socks5Stream::connect_with_password(addr.as_str(), target, user, password)
                            .await
                    }
                    None => Socks5Stream::connect(addr.as_str(), target).await,
                }
                .map_err(|source| AccountError::Socks {
                    addr: addr.clone(),
                    source,
                })?;
                Ok(Box::new(stream))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy(kind: &str, user: Option<&str>) -> ProxyConfig {
        ProxyConfig {
            kind: kind.to_string(),
            addr: "10.0.0.1:1080".to_string(),
            user: user.map(str::to_string),
            password: user.map(|_| "pw".to_string()),
        }
    }

    #[test]
    fn no_proxy_means_direct() {
        assert!(matches!(Dialer::for_proxy(None), Ok(Dialer::Direct)));
    }

    #[test]
    fn kinds_map_to_their_connectors() {
        assert!(matches!(
            Dialer::for_proxy(Some(&proxy("https", None))),
            Ok(Dialer::HttpsConnect { .. })
        ));
        assert!(matches!(
            Dialer::for_proxy(Some(&proxy("socks4", None))),
            Ok(Dialer::Socks4 { .. })
        ));
        assert!(matches!(
            Dialer::for_proxy(Some(&proxy("socks5", None))),
            Ok(Dialer::Socks5 { .. })
        ));
    }

    #[test]
    fn auth_is_attached_only_when_a_user_is_present() {
        match Dialer::for_proxy(Some(&proxy("socks5", Some("pu")))).unwrap() {
            Dialer::Socks5 { auth, .. } => {
                assert_eq!(auth, Some(("pu".to_string(), "pw".to_string())))
            }
            other => panic!("unexpected dialer: {other:?}"),
        }
        match Dialer::for_proxy(Some(&proxy("socks5", None))).unwrap() {
            Dialer::Socks5 { auth, .. } => assert!(auth.is_none()),
            other => panic!("unexpected dialer: {other:?}"),
        }
        // An empty username is the same as no auth.
        match Dialer::for_proxy(Some(&proxy("https", Some("")))).unwrap() {
            Dialer::HttpsConnect { auth, .. } => assert!(auth.is_none()),
            other => panic!("unexpected dialer: {other:?}"),
        }
    }

    #[test]
    fn unsupported_kind_fails_the_account() {
        let result = Dialer::for_proxy(Some(&proxy("carrier-pigeon", None)));
        assert!(matches!(result, Err(AccountError::Proxy(_))));
    }
}
