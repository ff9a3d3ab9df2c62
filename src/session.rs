use crate::dialer::{BoxedStream, Dialer};
use crate::error::AccountError;
use crate::resolver::ResolvedAccount;
use crate::rules::{MessageEnvelope, RuleEngine};
use async_imap::imap_proto::Address;
use async_imap::types::Fetch;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Bound on the fetch-to-evaluate handoff queue. Back-pressure from slow
/// evaluation throttles the fetch drain.
const ENVELOPE_QUEUE_DEPTH: usize = 10;

type ImapSession = async_imap::Session<tokio_native_tls::TlsStream<BoxedStream>>;

/// What one account's pass accomplished.
#[derive(Debug, Default, Clone)]
pub struct AccountOutcome {
    /// Messages found in the junk mailbox.
    pub examined: u32,
    /// Messages moved back to the inbox.
    pub moved: usize,
}

/// Totals for one full pass over all accounts.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub moved: usize,
}

/// Process every account in order. A failing account is logged and skipped;
/// it never interrupts the rest of the pass.
pub async fn run_pass(accounts: &[ResolvedAccount], rules: Arc<RuleEngine>) -> RunSummary {
    let mut summary = RunSummary::default();
    for account in accounts {
        summary.attempted += 1;
        log::info!("processing account {}", account.username);
        match run_account(account, rules.clone()).await {
            Ok(outcome) => {
                summary.succeeded += 1;
                summary.moved += outcome.moved;
                log::info!(
                    "{}: {} junk messages examined, {} rescued",
                    account.username,
                    outcome.examined,
                    outcome.moved
                );
            }
            Err(e) => log::warn!("account {} failed: {e}", account.username),
        }
    }
    summary
}

/// One account's full session: connect, authenticate, rescue cycle, logout.
/// The session is logged out on every exit path.
pub async fn run_account(
    account: &ResolvedAccount,
    rules: Arc<RuleEngine>,
) -> Result<AccountOutcome, AccountError> {
    let dialer = Dialer::for_proxy(account.proxy.as_ref())?;
    let (host, port) = split_host_port(&account.imapaddr)?;
    let mut session = connect(&dialer, &host, port, account).await?;
    let outcome = rescue_cycle(&mut session, account, rules).await;
    if let Err(e) = session.logout().await {
        log::debug!("{}: logout: {e}", account.username);
    }
    outcome
}

async fn connect(
    dialer: &Dialer,
    host: &str,
    port: u16,
    account: &ResolvedAccount,
) -> Result<ImapSession, AccountError> {
    let stream = dialer.dial(host, port).await?;
    let connector = tokio_native_tls::native_tls::TlsConnector::builder()
        .build()
        .map_err(|source| AccountError::Tls {
            addr: account.imapaddr.clone(),
            source,
        })?;
    let connector = tokio_native_tls::TlsConnector::from(connector);
    let tls_stream =
        connector
            .connect(host, stream)
            .await
            .map_err(|source| AccountError::Tls {
                addr: account.imapaddr.clone(),
                source,
            })?;
    log::info!("connected to {}", account.imapaddr);

    let client = async_imap::Client::new(tls_stream);
    let session = client
        .login(&account.username, &account.password)
        .await
        .map_err(|(source, _client)| AccountError::Auth {
            user: account.username.clone(),
            source,
        })?;
    log::info!("logged in as {}", account.username);
    Ok(session)
}

async fn rescue_cycle(
    session: &mut ImapSession,
    account: &ResolvedAccount,
    rules: Arc<RuleEngine>,
) -> Result<AccountOutcome, AccountError> {
    let (inbox, junk) = discover_mailboxes(session).await?;

    let mailbox = session.select(&junk).await.map_err(proto("SELECT"))?;
    if mailbox.exists == 0 {
        log::info!("{}: junk mailbox is empty", account.username);
        return Ok(AccountOutcome::default());
    }
    log::debug!(
        "{}: {} messages in {junk}",
        account.username,
        mailbox.exists
    );

    let batch = evaluate_mailbox(session, mailbox.exists, rules).await?;
    let moved = batch.len();
    if !batch.is_empty() {
        let set = sequence_set(&batch);
        log::info!("{}: moving {moved} messages to {inbox}", account.username);
        session
            .mv(&set, &inbox)
            .await
            .map_err(|source| AccountError::Move {
                mailbox: inbox.clone(),
                count: moved,
                source,
            })?;
    }
    Ok(AccountOutcome {
        examined: mailbox.exists,
        moved,
    })
}

/// LIST every mailbox and pick out the inbox and junk folders by name,
/// case-insensitively. Returns their server-side spellings.
async fn discover_mailboxes(session: &mut ImapSession) -> Result<(String, String), AccountError> {
    let mut inbox = None;
    let mut junk = None;
    {
        let mut names = session
            .list(Some(""), Some("*"))
            .await
            .map_err(proto("LIST"))?;
        while let Some(name) = names.next().await {
            let name = name.map_err(proto("LIST"))?;
            match name.name().to_uppercase().as_str() {
                "INBOX" => inbox = Some(name.name().to_string()),
                "JUNK" => junk = Some(name.name().to_string()),
                _ => {}
            }
        }
    }
    let inbox = inbox.ok_or(AccountError::MissingMailbox("inbox"))?;
    let junk = junk.ok_or(AccountError::MissingMailbox("junk"))?;
    Ok((inbox, junk))
}

/// Stream every envelope in ascending sequence order through a bounded
/// queue into the evaluation task and collect the move batch. A fetch
/// failure discards the partial batch: no move is issued for an account
/// whose enumeration did not complete.
async fn evaluate_mailbox(
    session: &mut ImapSession,
    count: u32,
    rules: Arc<RuleEngine>,
) -> Result<Vec<u32>, AccountError> {
    let (tx, rx) = mpsc::channel::<MessageEnvelope>(ENVELOPE_QUEUE_DEPTH);
    let evaluator = tokio::spawn(evaluate_envelopes(rules, rx));

    let fetch_result = drain_fetches(session, count, &tx).await;
    drop(tx);
    let batch = evaluator.await.expect("evaluator task panicked");

    fetch_result?;
    Ok(batch)
}

async fn drain_fetches(
    session: &mut ImapSession,
    count: u32,
    tx: &mpsc::Sender<MessageEnvelope>,
) -> Result<(), AccountError> {
    let range = format!("1:{count}");
    let mut fetches = session
        .fetch(&range, "ENVELOPE")
        .await
        .map_err(proto("FETCH"))?;
    while let Some(fetch) = fetches.next().await {
        let fetch = fetch.map_err(proto("FETCH"))?;
        if tx.send(project_envelope(&fetch)).await.is_err() {
            break;
        }
    }
    Ok(())
}

async fn evaluate_envelopes(
    rules: Arc<RuleEngine>,
    mut rx: mpsc::Receiver<MessageEnvelope>,
) -> Vec<u32> {
    let mut batch = Vec::new();
    while let Some(envelope) = rx.recv().await {
        log::debug!(
            "junk message #{}: from {:?}, subject {:?}",
            envelope.seq,
            envelope.from,
            envelope.subject
        );
        if rules.is_rescued(&envelope) {
            log::info!("rescuing message #{}", envelope.seq);
            batch.push(envelope.seq);
        } else {
            log::debug!("leaving message #{} in junk", envelope.seq);
        }
    }
    batch
}

/// Header-only projection of one FETCH response.
fn project_envelope(fetch: &Fetch) -> MessageEnvelope {
    let mut envelope = MessageEnvelope {
        seq: fetch.message,
        ..Default::default()
    };
    if let Some(env) = fetch.envelope() {
        envelope.from = bare_addresses(env.from.as_deref());
        envelope.to = bare_addresses(env.to.as_deref());
        envelope.cc = bare_addresses(env.cc.as_deref());
        envelope.bcc = bare_addresses(env.bcc.as_deref());
        envelope.subject = env
            .subject
            .as_ref()
            .map(|raw| decode_header(raw))
            .unwrap_or_default();
    }
    envelope
}

fn bare_addresses(list: Option<&[Address<'_>]>) -> Vec<String> {
    list.unwrap_or_default()
        .iter()
        .filter_map(bare_address)
        .collect()
}

/// `mailbox@host` without the display name, the form rule patterns match.
fn bare_address(address: &Address<'_>) -> Option<String> {
    let mailbox = address.mailbox.as_ref()?;
    let mailbox = String::from_utf8_lossy(mailbox);
    match address.host.as_ref() {
        Some(host) => Some(format!("{mailbox}@{}", String::from_utf8_lossy(host))),
        None => Some(mailbox.into_owned()),
    }
}

/// Decode an RFC 2047 encoded-word header value.
fn decode_header(raw: &[u8]) -> String {
    let mut composed = b"Subject: ".to_vec();
    composed.extend_from_slice(raw);
    match mailparse::parse_header(&composed) {
        Ok((header, _)) => header.get_value().trim().to_string(),
        Err(_) => String::from_utf8_lossy(raw).trim().to_string(),
    }
}

fn sequence_set(batch: &[u32]) -> String {
    batch
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn split_host_port(addr: &str) -> Result<(String, u16), AccountError> {
    let (host, port) = addr.rsplit_once(':').ok_or_else(|| {
        AccountError::Resolution(format!("IMAP address {addr:?} has no port"))
    })?;
    let port = port.parse().map_err(|_| {
        AccountError::Resolution(format!("IMAP address {addr:?} has an invalid port"))
    })?;
    Ok((host.to_string(), port))
}

fn proto(operation: &'static str) -> impl FnOnce(async_imap::error::Error) -> AccountError {
    move |source| AccountError::Protocol { operation, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleConfig;
    use std::borrow::Cow;

    fn rules(specs: Vec<RuleConfig>) -> Arc<RuleEngine> {
        Arc::new(RuleEngine::compile(&specs).unwrap())
    }

    fn envelope(seq: u32, from: &str) -> MessageEnvelope {
        MessageEnvelope {
            seq,
            from: vec![from.to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn batch_holds_exactly_the_rescued_messages() {
        let rules = rules(vec![RuleConfig {
            from: Some("^allowed@".to_string()),
            ..Default::default()
        }]);
        let (tx, rx) = mpsc::channel(ENVELOPE_QUEUE_DEPTH);
        let evaluator = tokio::spawn(evaluate_envelopes(rules, rx));

        tx.send(envelope(1, "spam@example.com")).await.unwrap();
        tx.send(envelope(2, "allowed@example.com")).await.unwrap();
        tx.send(envelope(3, "other@example.com")).await.unwrap();
        drop(tx);

        let batch = evaluator.await.unwrap();
        assert_eq!(batch, vec![2]);
    }

    #[tokio::test]
    async fn no_matches_means_an_empty_batch() {
        let rules = rules(vec![RuleConfig {
            from: Some("^allowed@".to_string()),
            ..Default::default()
        }]);
        let (tx, rx) = mpsc::channel(ENVELOPE_QUEUE_DEPTH);
        let evaluator = tokio::spawn(evaluate_envelopes(rules, rx));

        tx.send(envelope(1, "spam@example.com")).await.unwrap();
        drop(tx);

        // An empty batch means rescue_cycle skips the MOVE entirely.
        let batch = evaluator.await.unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn sequence_set_renders_comma_separated() {
        assert_eq!(sequence_set(&[2]), "2");
        assert_eq!(sequence_set(&[1, 3, 7]), "1,3,7");
    }

    #[test]
    fn split_host_port_parses_and_rejects() {
        assert_eq!(
            split_host_port("mail.example.org:993").unwrap(),
            ("mail.example.org".to_string(), 993)
        );
        assert!(split_host_port("mail.example.org").is_err());
        assert!(split_host_port("mail.example.org:notaport").is_err());
    }

    #[test]
    fn bare_address_drops_the_display_name() {
        let address = Address {
            name: Some(Cow::Borrowed(b"Some One".as_slice())),
            adl: None,
            mailbox: Some(Cow::Borrowed(b"user".as_slice())),
            host: Some(Cow::Borrowed(b"example.com".as_slice())),
        };
        assert_eq!(bare_address(&address).unwrap(), "user@example.com");
    }

    #[test]
    fn address_without_mailbox_is_skipped() {
        let address = Address {
            name: None,
            adl: None,
            mailbox: None,
            host: Some(Cow::Borrowed(b"example.com".as_slice())),
        };
        assert!(bare_address(&address).is_none());
    }

    #[test]
    fn decode_header_handles_encoded_words() {
        assert_eq!(decode_header(b"Plain subject"), "Plain subject");
        assert_eq!(decode_header(b"=?utf-8?q?caf=C3=A9?="), "caf\u{e9}");
    }
}
