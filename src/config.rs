use serde::{Deserialize, Serialize};

/// Top-level configuration document, loaded from YAML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Cron expression driving recurring passes. Absent means a single pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accountsfile: Option<AccountsFileConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accounts: Vec<AccountConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notjunkrules: Vec<RuleConfig>,
}

/// Flat accounts file: one account per line, fields delimiter-separated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountsFileConfig {
    pub path: String,
    /// Column delimiter; defaults to ":" when absent or empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountConfig {
    pub username: String,
    pub password: String,
    /// Explicit IMAP server as host:port. When absent, the resolver infers it
    /// from the username via the provider table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imapaddr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfig>,
}

/// Outbound proxy for one account.
///
/// `kind` stays a free-form string so that an unsupported value fails that
/// one account at dial time instead of failing the whole document parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub addr: String,
    /// Proxy credentials are only expressible here; the flat accounts file
    /// never carries them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Declarative allow rule: up to five optional regex patterns. A message in
/// Junk matching a rule is moved back to the Inbox.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bcc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Starting-point configuration written by `--generate-config`.
    pub fn sample() -> Self {
        Config {
            cron: Some("0 */6 * * *".to_string()),
            accountsfile: Some(AccountsFileConfig {
                path: "accounts.txt".to_string(),
                delimiter: None,
            }),
            accounts: vec![AccountConfig {
                username: "someone@example.org".to_string(),
                password: "secret".to_string(),
                imapaddr: Some("mail.example.org:993".to_string()),
                proxy: Some(ProxyConfig {
                    kind: "socks5".to_string(),
                    addr: "127.0.0.1:1080".to_string(),
                    user: None,
                    password: None,
                }),
            }],
            notjunkrules: vec![
                RuleConfig {
                    from: Some(r"^newsletter@trusted\.example$".to_string()),
                    ..Default::default()
                },
                RuleConfig {
                    subject: Some("(?i)invoice".to_string()),
                    ..Default::default()
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_document() {
        let yaml = r#"
cron: "0 */2 * * *"
accountsfile:
  path: /etc/junk-rescue/accounts
  delimiter: ";"
accounts:
  - username: user@example.org
    password: secret
    imapaddr: mail.example.org:993
    proxy:
      type: socks5
      addr: 10.0.0.1:1080
      user: pu
      password: pp
notjunkrules:
  - from: "^billing@example\\.com$"
    subject: "(?i)invoice"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.cron.as_deref(), Some("0 */2 * * *"));
        let file = config.accountsfile.as_ref().unwrap();
        assert_eq!(file.path, "/etc/junk-rescue/accounts");
        assert_eq!(file.delimiter.as_deref(), Some(";"));
        assert_eq!(config.accounts.len(), 1);
        let proxy = config.accounts[0].proxy.as_ref().unwrap();
        assert_eq!(proxy.kind, "socks5");
        assert_eq!(proxy.addr, "10.0.0.1:1080");
        assert_eq!(proxy.user.as_deref(), Some("pu"));
        assert_eq!(config.notjunkrules.len(), 1);
        assert_eq!(
            config.notjunkrules[0].subject.as_deref(),
            Some("(?i)invoice")
        );
    }

    #[test]
    fn minimal_document_defaults() {
        let config: Config = serde_yaml::from_str("accounts: []").unwrap();
        assert!(config.cron.is_none());
        assert!(config.accountsfile.is_none());
        assert!(config.accounts.is_empty());
        assert!(config.notjunkrules.is_empty());
    }

    #[test]
    fn sample_roundtrips_through_yaml() {
        let yaml = serde_yaml::to_string(&Config::sample()).unwrap();
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        assert!(config.cron.is_some());
        assert_eq!(config.accounts.len(), 1);
        assert_eq!(config.notjunkrules.len(), 2);
    }
}
