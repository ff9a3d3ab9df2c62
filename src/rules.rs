use crate::config::RuleConfig;
use anyhow::Context;
use regex::Regex;

/// Header-only projection of one junk message, as far as rule evaluation is
/// concerned. Address lists hold bare `mailbox@host` strings.
#[derive(Debug, Default, Clone)]
pub struct MessageEnvelope {
    /// Message sequence number within the selected mailbox.
    pub seq: u32,
    pub from: Vec<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
}

/// One compiled allow rule. Predicates are independently optional; a rule
/// that ends up with none is discarded during compilation.
pub struct AllowRule {
    from: Option<Regex>,
    to: Option<Regex>,
    cc: Option<Regex>,
    bcc: Option<Regex>,
    subject: Option<Regex>,
}

/// The full compiled rule set, shared read-only across accounts.
pub struct RuleEngine {
    rules: Vec<AllowRule>,
}

impl RuleEngine {
    /// Compile the declarative rule specs. Invalid `from`/`to` patterns are
    /// hard errors; invalid `cc`/`bcc`/`subject` patterns are logged and
    /// that one predicate is dropped from its rule.
    pub fn compile(specs: &[RuleConfig]) -> anyhow::Result<Self> {
        let mut rules = Vec::new();
        for spec in specs {
            if let Some(rule) = AllowRule::compile(spec)? {
                rules.push(rule);
            }
        }
        Ok(RuleEngine { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether any rule rescues this message. Pure: no I/O, deterministic
    /// for a given (rule set, envelope) pair.
    pub fn is_rescued(&self, envelope: &MessageEnvelope) -> bool {
        self.rules.iter().any(|rule| rule.rescues(envelope))
    }
}

impl AllowRule {
    fn compile(spec: &RuleConfig) -> anyhow::Result<Option<AllowRule>> {
        let rule = AllowRule {
            from: compile_required(&spec.from, "from")?,
            to: compile_required(&spec.to, "to")?,
            cc: compile_optional(&spec.cc, "cc"),
            bcc: compile_optional(&spec.bcc, "bcc"),
            subject: compile_optional(&spec.subject, "subject"),
        };
        if rule.from.is_none()
            && rule.to.is_none()
            && rule.cc.is_none()
            && rule.bcc.is_none()
            && rule.subject.is_none()
        {
            // Nothing left to match on.
            return Ok(None);
        }
        Ok(Some(rule))
    }

    /// Evaluate this rule against one envelope.
    ///
    /// Each present address predicate passes if any address in its list
    /// matches, and otherwise raises the rule-wide blocked flag; the subject
    /// predicate passes only on a direct match. The verdict is "last
    /// evaluated predicate passed and nothing blocked", so a later predicate
    /// can overturn an earlier pass.
    fn rescues(&self, envelope: &MessageEnvelope) -> bool {
        let mut blocked = false;
        let mut matched = false;
        if let Some(re) = &self.from {
            matched = match_any(re, &envelope.from, &mut blocked);
        }
        if let Some(re) = &self.to {
            matched = match_any(re, &envelope.to, &mut blocked);
        }
        if let Some(re) = &self.cc {
            matched = match_any(re, &envelope.cc, &mut blocked);
        }
        if let Some(re) = &self.bcc {
            matched = match_any(re, &envelope.bcc, &mut blocked);
        }
        if let Some(re) = &self.subject {
            matched = re.is_match(&envelope.subject);
            if !matched {
                blocked = true;
            }
        }
        matched && !blocked
    }
}

fn match_any(re: &Regex, addresses: &[String], blocked: &mut bool) -> bool {
    let matched = addresses.iter().any(|address| re.is_match(address));
    if !matched {
        *blocked = true;
    }
    matched
}

/// Compile a load-bearing pattern field; a bad pattern aborts the run.
fn compile_required(pattern: &Option<String>, field: &str) -> anyhow::Result<Option<Regex>> {
    match pattern.as_deref().filter(|p| !p.is_empty()) {
        Some(p) => {
            let re = Regex::new(p).with_context(|| format!("invalid {field:?} pattern {p:?}"))?;
            Ok(Some(re))
        }
        None => Ok(None),
    }
}

/// Compile a best-effort pattern field; a bad pattern is logged and dropped.
fn compile_optional(pattern: &Option<String>, field: &str) -> Option<Regex> {
    let p = pattern.as_deref().filter(|p| !p.is_empty())?;
    match Regex::new(p) {
        Ok(re) => Some(re),
        Err(e) => {
            log::warn!("dropping {field:?} pattern {p:?}: {e}");
            None
        }
    }
}
