use crate::config::{AccountConfig, Config, ProxyConfig};
use crate::error::AccountError;
use lazy_static::lazy_static;
use regex::Regex;

pub const DEFAULT_DELIMITER: &str = ":";

/// An account with every connection parameter pinned down: credentials,
/// server address, and the proxy path to reach it.
#[derive(Debug, Clone)]
pub struct ResolvedAccount {
    pub username: String,
    pub password: String,
    /// IMAP server as host:port.
    pub imapaddr: String,
    pub proxy: Option<ProxyConfig>,
}

struct Provider {
    pattern: Regex,
    addr: &'static str,
}

lazy_static! {
    /// Well-known providers, matched against the username when an account
    /// declares no server. Ordered; first match wins.
    static ref PROVIDERS: Vec<Provider> = vec![
        Provider {
            pattern: Regex::new("(?i)@hotmail").unwrap(),
            addr: "imap-mail.outlook.com:993",
        },
        Provider {
            pattern: Regex::new("(?i)@yahoo").unwrap(),
            addr: "imap.mail.yahoo.com:993",
        },
        Provider {
            pattern: Regex::new("(?i)@gmail").unwrap(),
            addr: "imap.gmail.com:993",
        },
    ];
}

/// Default server for a username, from the provider table.
pub fn default_server_for(username: &str) -> Option<&'static str> {
    PROVIDERS
        .iter()
        .find(|p| p.pattern.is_match(username))
        .map(|p| p.addr)
}

/// Turn the configured account declarations (inline first, then the optional
/// flat file) into fully resolved accounts. An account that cannot be
/// completed is logged and dropped; the rest of the pass is unaffected. An
/// unreadable accounts file is a configuration failure and aborts the run.
pub fn resolve(config: &Config) -> anyhow::Result<Vec<ResolvedAccount>> {
    let mut declared = config.accounts.clone();
    if let Some(file) = &config.accountsfile {
        let delimiter = file
            .delimiter
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or(DEFAULT_DELIMITER);
        declared.extend(load_accounts_file(&file.path, delimiter)?);
    }

    let mut resolved = Vec::with_capacity(declared.len());
    for account in declared {
        match resolve_account(account) {
            Ok(account) => resolved.push(account),
            Err(e) => log::warn!("skipping account: {e}"),
        }
    }
    Ok(resolved)
}

fn resolve_account(account: AccountConfig) -> Result<ResolvedAccount, AccountError> {
    let imapaddr = match account.imapaddr.filter(|a| !a.is_empty()) {
        Some(addr) => addr,
        None => default_server_for(&account.username)
            .ok_or_else(|| {
                AccountError::Resolution(format!(
                    "no IMAP server known for {}",
                    account.username
                ))
            })?
            .to_string(),
    };
    Ok(ResolvedAccount {
        username: account.username,
        password: account.password,
        imapaddr,
        proxy: account.proxy,
    })
}

fn load_accounts_file(path: &str, delimiter: &str) -> anyhow::Result<Vec<AccountConfig>> {
    let content = std::fs::read_to_string(path)?;
    let accounts: Vec<AccountConfig> = content
        .lines()
        .filter(|line| !line.is_empty())
        .filter_map(|line| parse_line(line, delimiter))
        .collect();
    log::debug!("loaded {} accounts from {path}", accounts.len());
    Ok(accounts)
}

/// One accounts-file line: username, password, [server], [proxy]. With the
/// default ":" delimiter the server and proxy fields each span two columns
/// (host, port); any other delimiter carries combined host:port tokens.
/// Lines with fewer than two columns are not accounts.
fn parse_line(line: &str, delimiter: &str) -> Option<AccountConfig> {
    let columns: Vec<&str> = line.split(delimiter).collect();
    if columns.len() < 2 {
        return None;
    }
    let mut account = AccountConfig {
        username: columns[0].to_string(),
        password: columns[1].to_string(),
        ..Default::default()
    };
    let mut i = 2;
    account.imapaddr = take_addr_field(&columns, &mut i, delimiter);
    if let Some(token) = take_addr_field(&columns, &mut i, delimiter) {
        account.proxy = proxy_from_token(&token);
    }
    Some(account)
}

fn take_addr_field(columns: &[&str], i: &mut usize, delimiter: &str) -> Option<String> {
    if *i >= columns.len() {
        return None;
    }
    let addr = if delimiter == DEFAULT_DELIMITER && columns.len() > *i + 1 {
        let host = columns[*i];
        let port = columns[*i + 1];
        *i += 2;
        if host.is_empty() {
            return None;
        }
        format!("{host}:{port}")
    } else {
        let token = columns[*i].to_string();
        *i += 1;
        token
    };
    if addr.is_empty() {
        None
    } else {
        Some(addr)
    }
}

/// Proxy type from the address token's leading sigil: `#` https, `+` socks4,
/// `*` socks5, none defaults to https. The sigil is stripped; an address
/// that is empty afterwards means no proxy.
fn proxy_from_token(token: &str) -> Option<ProxyConfig> {
    let (kind, addr) = if let Some(rest) = token.strip_prefix('#') {
        ("https", rest)
    } else if let Some(rest) = token.strip_prefix('+') {
        ("socks4", rest)
    } else if let Some(rest) = token.strip_prefix('*') {
        ("socks5", rest)
    } else {
        ("https", token)
    };
    if addr.is_empty() {
        return None;
    }
    Some(ProxyConfig {
        kind: kind.to_string(),
        addr: addr.to_string(),
        user: None,
        password: None,
    })
}
