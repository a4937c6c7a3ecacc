//! Packet-filter rule management
//!
//! Rules are checked with `iptables -C` before being inserted, so calling
//! [`FirewallHelper::ensure_rule`] repeatedly never duplicates a rule.

use crate::process::{CommandRunner, ProcessError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const IPTABLES_TIMEOUT: Duration = Duration::from_secs(30);

/// `iptables -C` exit code for "no matching rule".
const RULE_ABSENT: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleChange {
    AlreadyPresent,
    Inserted,
}

pub struct FirewallHelper {
    binary: String,
    runner: Arc<dyn CommandRunner>,
    /// Serializes check-then-insert so concurrent callers cannot both insert.
    lock: Mutex<()>,
}

impl FirewallHelper {
    pub fn new(binary: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        FirewallHelper {
            binary: binary.into(),
            runner,
            lock: Mutex::new(()),
        }
    }

    /// Insert `rule` at the head of `chain` unless an identical rule exists.
    /// `rule` is an iptables rule specification such as
    /// `-p tcp --dport 8210 -j ACCEPT`.
    pub async fn ensure_rule(&self, chain: &str, rule: &str) -> Result<RuleChange, ProcessError> {
        let rule_args: Vec<String> = rule.split_whitespace().map(String::from).collect();
        let _guard = self.lock.lock().await;

        let check = self
            .runner
            .run(&self.binary, &Self::args("-C", chain, &rule_args), IPTABLES_TIMEOUT)
            .await?;

        if check.success() {
            tracing::debug!(chain = %chain, rule = %rule, "Firewall rule already present");
            return Ok(RuleChange::AlreadyPresent);
        }
        if check.status != Some(RULE_ABSENT) {
            return Err(ProcessError::Failed {
                program: self.binary.clone(),
                status: check.status,
                stderr: check.stderr.trim().to_string(),
            });
        }

        self.runner
            .run_checked(&self.binary, &Self::args("-I", chain, &rule_args), IPTABLES_TIMEOUT)
            .await?;

        tracing::info!(chain = %chain, rule = %rule, "Firewall rule inserted");
        Ok(RuleChange::Inserted)
    }

    fn args(action: &str, chain: &str, rule_args: &[String]) -> Vec<String> {
        let mut args = Vec::with_capacity(rule_args.len() + 2);
        args.push(action.to_string());
        args.push(chain.to_string());
        args.extend(rule_args.iter().cloned());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::CommandOutput;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// In-memory rule table standing in for iptables.
    #[derive(Default)]
    struct FakeIptables {
        rules: Mutex<Vec<Vec<String>>>,
        mutations: Mutex<usize>,
    }

    fn output(status: i32) -> CommandOutput {
        CommandOutput {
            status: Some(status),
            stdout: String::new(),
            stderr: if status == 0 {
                String::new()
            } else {
                "iptables: Bad rule (does a matching rule exist in that chain?).".to_string()
            },
        }
    }

    #[async_trait]
    impl CommandRunner for FakeIptables {
        async fn run(
            &self,
            _program: &str,
            args: &[String],
            _timeout: Duration,
        ) -> Result<CommandOutput, ProcessError> {
            tokio::task::yield_now().await;
            let rule = args[1..].to_vec();
            let mut rules = self.rules.lock().unwrap();
            match args[0].as_str() {
                "-C" => Ok(output(if rules.contains(&rule) { 0 } else { 1 })),
                "-I" => {
                    *self.mutations.lock().unwrap() += 1;
                    rules.push(rule);
                    Ok(output(0))
                }
                _ => Ok(output(2)),
            }
        }
    }

    #[tokio::test]
    async fn test_ensure_rule_inserts_once() {
        let fake = Arc::new(FakeIptables::default());
        let helper = FirewallHelper::new("iptables", fake.clone());

        let first = helper
            .ensure_rule("INPUT", "-p tcp --dport 8210 -j ACCEPT")
            .await
            .unwrap();
        let second = helper
            .ensure_rule("INPUT", "-p tcp --dport 8210 -j ACCEPT")
            .await
            .unwrap();

        assert_eq!(first, RuleChange::Inserted);
        assert_eq!(second, RuleChange::AlreadyPresent);
        assert_eq!(*fake.mutations.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_insert_once() {
        let fake = Arc::new(FakeIptables::default());
        let helper = FirewallHelper::new("iptables", fake.clone());
        let rule = "-p tcp --dport 8210 -j ACCEPT";

        let (first, second) =
            tokio::join!(helper.ensure_rule("INPUT", rule), helper.ensure_rule("INPUT", rule));

        let mut changes = vec![first.unwrap(), second.unwrap()];
        changes.sort_by_key(|change| *change == RuleChange::Inserted);
        assert_eq!(changes, vec![RuleChange::AlreadyPresent, RuleChange::Inserted]);
        assert_eq!(*fake.mutations.lock().unwrap(), 1);
        assert_eq!(fake.rules.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_different_chain_is_a_different_rule() {
        let fake = Arc::new(FakeIptables::default());
        let helper = FirewallHelper::new("iptables", fake.clone());

        helper.ensure_rule("INPUT", "-p tcp --dport 80 -j ACCEPT").await.unwrap();
        helper.ensure_rule("FORWARD", "-p tcp --dport 80 -j ACCEPT").await.unwrap();
        assert_eq!(*fake.mutations.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_check_failure_is_reported() {
        struct Broken;

        #[async_trait]
        impl CommandRunner for Broken {
            async fn run(
                &self,
                _program: &str,
                _args: &[String],
                _timeout: Duration,
            ) -> Result<CommandOutput, ProcessError> {
                Ok(CommandOutput {
                    status: Some(2),
                    stdout: String::new(),
                    stderr: "iptables v1.8.7: unknown option".to_string(),
                })
            }
        }

        let helper = FirewallHelper::new("iptables", Arc::new(Broken));
        let err = helper.ensure_rule("INPUT", "--bogus").await.unwrap_err();
        assert!(err.to_string().contains("unknown option"));
    }
}
