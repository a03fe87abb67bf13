//! The propose → validate → approve → execute → record loop.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use aish_config::AppConfig;
use aish_core::{
    Action, ApprovalDecision, HistoryEntry, SessionError, ValidationError, ValidationResult,
};
use aish_exec::{
    ApprovalSender, ExecutionPolicy, Executor, Gate, Interrupt, StreamKind, decide, request_approval, validate,
};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::events::{EventSender, SessionEvent};
use crate::proposer::{Proposal, ProposalRequest, Proposer};
use crate::state::SessionState;

/// How a single user turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Blank prompt; the model was not asked.
    Skipped,
    /// The model stopped proposing actions.
    Completed { reply: Option<String> },
    /// The user denied at least one action in the last round.
    Denied,
    /// A running command or the model request was interrupted.
    Interrupted,
    /// Approval could not be obtained; the session must end.
    Aborted,
    /// `session.max_rounds` proposals were made without the model finishing.
    RoundLimit,
}

impl TurnOutcome {
    pub fn ends_session(&self) -> bool {
        matches!(self, TurnOutcome::Aborted)
    }
}

/// Where interactive prompts come from.
#[async_trait]
pub trait PromptSource: Send {
    /// `None` once input is exhausted.
    async fn next_prompt(&mut self) -> Option<String>;
}

#[async_trait]
impl PromptSource for VecDeque<String> {
    async fn next_prompt(&mut self) -> Option<String> {
        self.pop_front()
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Working directory for shell commands and root for fs paths.
    pub workspace_root: PathBuf,
    pub accept_all: bool,
    pub max_rounds: usize,
}

impl SessionOptions {
    pub fn from_config(config: &AppConfig, workspace_root: impl Into<PathBuf>, accept_all: bool) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            accept_all,
            max_rounds: config.session.max_rounds.max(1),
        }
    }
}

/// What processing one action means for the rest of the round.
enum ActionFlow {
    Continue,
    UserDenied,
    Interrupted,
    Aborted,
}

pub struct Session {
    state: SessionState,
    policy: Arc<ExecutionPolicy>,
    executor: Executor,
    proposer: Arc<dyn Proposer>,
    approvals: ApprovalSender,
    events: EventSender,
    interrupt: Interrupt,
    max_rounds: usize,
    terminated: bool,
}

impl Session {
    pub fn new(
        options: SessionOptions,
        policy: Arc<ExecutionPolicy>,
        proposer: Arc<dyn Proposer>,
        approvals: ApprovalSender,
        events: EventSender,
        interrupt: Interrupt,
    ) -> Self {
        Self {
            state: SessionState::new(options.workspace_root, options.accept_all),
            executor: Executor::new(policy.clone()),
            policy,
            proposer,
            approvals,
            events,
            interrupt,
            max_rounds: options.max_rounds.max(1),
            terminated: false,
        }
    }

    pub fn history(&self) -> &[HistoryEntry] {
        self.state.entries()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// True once a turn was aborted; later turns are refused.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn export_history(&self, path: &Path) -> anyhow::Result<()> {
        self.state.export_jsonl(path)
    }

    /// Single-shot mode: one prompt, then the caller exits.
    pub async fn run_once(&mut self, prompt: &str) -> Result<TurnOutcome, SessionError> {
        let outcome = self.run_turn(prompt).await?;
        info!(?outcome, entries = self.state.entries().len(), "single-shot session finished");
        Ok(outcome)
    }

    /// Read prompts until input ends, the user types `quit`/`exit`, an
    /// interrupt arrives while waiting, or a turn aborts.  Model failures
    /// are reported as events and the loop goes on.
    pub async fn run_interactive(&mut self, source: &mut dyn PromptSource) -> Result<(), SessionError> {
        while !self.terminated {
            let mut armed = self.interrupt.arm();
            let next = tokio::select! {
                prompt = source.next_prompt() => prompt,
                () = armed.triggered() => {
                    info!("interrupted while waiting for input");
                    None
                }
            };
            let Some(prompt) = next else {
                break;
            };

            let prompt = prompt.trim();
            if prompt.is_empty() {
                continue;
            }
            if prompt.eq_ignore_ascii_case("quit") || prompt.eq_ignore_ascii_case("exit") {
                info!("user ended the session");
                break;
            }

            match self.run_turn(prompt).await {
                Ok(_) => {}
                Err(SessionError::Proposer(message)) => {
                    self.emit(SessionEvent::ProposerFailed(message));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Run one user prompt through as many proposal rounds as it takes.
    pub async fn run_turn(&mut self, prompt: &str) -> Result<TurnOutcome, SessionError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            debug!("skipping empty prompt");
            return Ok(TurnOutcome::Skipped);
        }
        if self.terminated {
            return Ok(TurnOutcome::Aborted);
        }

        let turn = self.state.begin_turn(prompt);
        info!(turn, "turn started");
        let mut last_reply = None;

        for round in 0..self.max_rounds {
            self.emit(SessionEvent::Thinking { turn, round });
            let proposal = match self.propose(prompt, turn, round).await {
                Ok(Some(proposal)) => proposal,
                Ok(None) => {
                    self.state.finish_turn(last_reply);
                    return Ok(TurnOutcome::Interrupted);
                }
                Err(e) => {
                    self.state.finish_turn(last_reply);
                    return Err(e);
                }
            };

            if let Some(reply) = &proposal.reply {
                self.emit(SessionEvent::Reply(reply.clone()));
            }
            last_reply = proposal.reply;
            if proposal.actions.is_empty() {
                info!(turn, round, "turn completed");
                self.state.finish_turn(last_reply.clone());
                return Ok(TurnOutcome::Completed { reply: last_reply });
            }

            let mut user_denied = false;
            for action in proposal.actions {
                match self.process_action(turn, round, prompt, action).await? {
                    ActionFlow::Continue => {}
                    ActionFlow::UserDenied => user_denied = true,
                    ActionFlow::Interrupted => {
                        info!(turn, round, "execution interrupted; ending turn");
                        self.state.finish_turn(last_reply);
                        return Ok(TurnOutcome::Interrupted);
                    }
                    ActionFlow::Aborted => {
                        warn!(turn, round, "approval aborted; ending session");
                        self.terminated = true;
                        self.state.finish_turn(last_reply);
                        return Ok(TurnOutcome::Aborted);
                    }
                }
            }
            if user_denied {
                info!(turn, round, "user denied an action; ending turn");
                self.state.finish_turn(last_reply);
                return Ok(TurnOutcome::Denied);
            }
        }

        warn!(turn, max_rounds = self.max_rounds, "round limit reached");
        self.state.finish_turn(last_reply);
        Ok(TurnOutcome::RoundLimit)
    }

    /// `Ok(None)` means the wait was interrupted.
    async fn propose(&self, prompt: &str, turn: usize, round: usize) -> Result<Option<Proposal>, SessionError> {
        let request = ProposalRequest {
            prompt,
            turn,
            round,
            state: &self.state,
        };
        let mut armed = self.interrupt.arm();
        let proposed = tokio::select! {
            proposed = self.proposer.propose(request) => Some(proposed),
            () = armed.triggered() => None,
        };
        match proposed {
            None => {
                info!(turn, round, "model request interrupted");
                Ok(None)
            }
            Some(Ok(proposal)) => Ok(Some(proposal)),
            Some(Err(e)) => {
                warn!(turn, round, error = %e, "model request failed");
                Err(SessionError::Proposer(format!("{e:#}")))
            }
        }
    }

    async fn process_action(
        &mut self,
        turn: usize,
        round: usize,
        prompt: &str,
        action: Action,
    ) -> Result<ActionFlow, SessionError> {
        let validation = validate(&action, &self.policy, self.state.cwd());
        let whitelist_match = self.policy.whitelist().matches(&action);
        let gate = decide(&action, &validation, self.state.accept_all(), whitelist_match);
        let prompt = Some(prompt.to_string());

        let decision = match gate {
            Gate::Rejected => {
                let reason = match validation {
                    ValidationResult::Denied(reason) => reason,
                    ValidationResult::Allowed => {
                        ValidationError::UnknownOperation("rejected without a reason".to_string())
                    }
                };
                info!(kind = %action.kind(), %reason, "action denied");
                self.emit(SessionEvent::Denied {
                    action: action.clone(),
                    reason: reason.clone(),
                });
                self.state
                    .record(HistoryEntry::rejected(turn, round, prompt, action, reason));
                return Ok(ActionFlow::Continue);
            }
            Gate::AutoApproved(pattern) => {
                info!(kind = %action.kind(), %pattern, "action auto-approved");
                self.emit(SessionEvent::AutoApproved {
                    action: action.clone(),
                    pattern: pattern.clone(),
                });
                ApprovalDecision::AutoApproved(pattern)
            }
            Gate::NeedsUser(request) => request_approval(&self.approvals, request, &self.interrupt).await,
        };

        if !decision.permits_execution() {
            let flow = match decision {
                ApprovalDecision::Aborted => ActionFlow::Aborted,
                _ => ActionFlow::UserDenied,
            };
            info!(kind = %action.kind(), %decision, "action not approved");
            self.emit(SessionEvent::Declined {
                action: action.clone(),
                decision: decision.clone(),
            });
            self.state
                .record(HistoryEntry::declined(turn, round, prompt, action, decision)?);
            return Ok(flow);
        }

        self.emit(SessionEvent::Executing(action.clone()));
        let events = self.events.clone();
        let mut sink = move |stream: StreamKind, text: &str| {
            let _ = events.send(SessionEvent::Output {
                stream,
                text: text.to_string(),
            });
        };
        let result = self
            .executor
            .execute(&action, self.state.cwd(), self.state.cwd(), &mut sink, &self.interrupt)
            .await?;

        let flow = if result.was_interrupted() {
            ActionFlow::Interrupted
        } else {
            ActionFlow::Continue
        };
        self.emit(SessionEvent::Finished {
            action: action.clone(),
            result: result.clone(),
        });
        self.state
            .record(HistoryEntry::executed(turn, round, prompt, action, decision, result)?);
        Ok(flow)
    }

    fn emit(&self, event: SessionEvent) {
        // The presentation layer may already be gone during shutdown.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use aish_core::{ExecStatus, OperationKind};
    use aish_exec::{ApprovalReceiver, UserResponse, approval_channel};
    use anyhow::anyhow;
    use tempfile::TempDir;

    use super::*;
    use crate::events::{EventReceiver, event_channel};

    /// Hands out scripted proposals and records the history size it saw.
    #[derive(Default)]
    struct Scripted {
        script: Mutex<VecDeque<anyhow::Result<Proposal>>>,
        calls: Mutex<Vec<(usize, usize, usize)>>,
    }

    impl Scripted {
        fn new(script: Vec<anyhow::Result<Proposal>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(usize, usize, usize)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Proposer for Scripted {
        async fn propose(&self, request: ProposalRequest<'_>) -> anyhow::Result<Proposal> {
            self.calls
                .lock()
                .unwrap()
                .push((request.turn, request.round, request.state.entries().len()));
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Proposal::default()))
        }
    }

    /// Always proposes the same action; used to hit the round limit.
    struct Repeating(Action);

    #[async_trait]
    impl Proposer for Repeating {
        async fn propose(&self, _request: ProposalRequest<'_>) -> anyhow::Result<Proposal> {
            Ok(Proposal {
                reply: None,
                actions: vec![self.0.clone()],
            })
        }
    }

    fn actions(actions: Vec<Action>) -> anyhow::Result<Proposal> {
        Ok(Proposal { reply: None, actions })
    }

    fn reply(text: &str) -> anyhow::Result<Proposal> {
        Ok(Proposal {
            reply: Some(text.to_string()),
            actions: Vec::new(),
        })
    }

    struct Harness {
        session: Session,
        approvals: ApprovalReceiver,
        events: EventReceiver,
        interrupt: Interrupt,
        dir: TempDir,
    }

    fn harness(proposer: Arc<dyn Proposer>, accept_all: bool, patch: impl FnOnce(&mut AppConfig)) -> Harness {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        patch(&mut config);
        let policy = ExecutionPolicy::from_config(&config, dir.path().join(".aish-config"))
            .unwrap()
            .with_home_dir(None);
        let (approval_tx, approval_rx) = approval_channel();
        let (event_tx, event_rx) = event_channel();
        let interrupt = Interrupt::new();
        let session = Session::new(
            SessionOptions::from_config(&config, dir.path(), accept_all),
            Arc::new(policy),
            proposer,
            approval_tx,
            event_tx,
            interrupt.clone(),
        );
        Harness {
            session,
            approvals: approval_rx,
            events: event_rx,
            interrupt,
            dir,
        }
    }

    /// Answer approval prompts in order; stops when the script runs out.
    fn answer(mut rx: ApprovalReceiver, answers: Vec<UserResponse>) -> tokio::task::JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let mut asked = Vec::new();
            for response in answers {
                let Some((request, reply)) = rx.recv().await else {
                    break;
                };
                asked.push(request.summary.clone());
                let _ = reply.send(response);
            }
            asked
        })
    }

    fn drain(events: &mut EventReceiver) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn blank_prompt_is_skipped_without_asking_the_model() {
        let proposer = Scripted::new(vec![]);
        let mut h = harness(proposer.clone(), false, |_| {});
        assert_eq!(h.session.run_turn("   \n").await.unwrap(), TurnOutcome::Skipped);
        assert!(proposer.calls().is_empty());
        assert!(h.session.state().turns().is_empty());
    }

    #[tokio::test]
    async fn reply_without_actions_completes_the_turn() {
        let mut h = harness(Scripted::new(vec![reply("Nothing to do.")]), false, |_| {});
        let outcome = h.session.run_once("hello").await.unwrap();
        assert_eq!(
            outcome,
            TurnOutcome::Completed {
                reply: Some("Nothing to do.".into())
            }
        );
        assert_eq!(h.session.state().turns()[0].reply.as_deref(), Some("Nothing to do."));
        assert!(h.session.history().is_empty());
    }

    #[tokio::test]
    async fn approved_command_runs_and_result_feeds_next_round() {
        let proposer = Scripted::new(vec![actions(vec![Action::shell("echo hi")]), reply("Printed hi.")]);
        let mut h = harness(proposer.clone(), false, |_| {});
        let asked = answer(h.approvals, vec![UserResponse::Approve]);

        let outcome = h.session.run_turn("say hi").await.unwrap();
        assert_eq!(
            outcome,
            TurnOutcome::Completed {
                reply: Some("Printed hi.".into())
            }
        );
        assert_eq!(asked.await.unwrap(), vec!["Run shell command: echo hi".to_string()]);

        let history = h.session.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].approval(), Some(&ApprovalDecision::UserApproved));
        let result = history[0].execution().unwrap();
        assert_eq!(result.status, ExecStatus::Success);
        assert_eq!(result.output, "hi\n");
        assert_eq!(result.exit_code, Some(0));

        // Second round saw the recorded entry.
        assert_eq!(proposer.calls(), vec![(0, 0, 0), (0, 1, 1)]);

        let events = drain(&mut h.events);
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::Output { stream: StreamKind::Stdout, text } if text == "hi\n"
        )));
        assert!(events.iter().any(|e| matches!(e, SessionEvent::Finished { .. })));
    }

    #[tokio::test]
    async fn denied_actions_have_no_side_effects_and_the_turn_continues() {
        let proposer = Scripted::new(vec![
            actions(vec![
                Action::write_file(".env", "SECRET=1"),
                Action::write_file("../escape.txt", "x"),
            ]),
            reply("Could not write those."),
        ]);
        let mut h = harness(proposer, false, |_| {});
        // Nothing should ever reach the approval channel.
        drop(h.approvals);

        let outcome = h.session.run_turn("write secrets").await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Completed { .. }));
        assert!(!h.dir.path().join(".env").exists());
        assert!(!h.dir.path().parent().unwrap().join("escape.txt").exists());

        let history = h.session.history();
        assert_eq!(history.len(), 2);
        assert!(matches!(
            history[0].validation(),
            ValidationResult::Denied(ValidationError::ExtensionBlocked { .. })
        ));
        assert!(matches!(
            history[1].validation(),
            ValidationResult::Denied(ValidationError::AbsolutePathDenied { .. })
        ));
        assert!(history.iter().all(|e| e.approval().is_none() && e.execution().is_none()));
        assert!(!h.session.is_terminated());
    }

    #[tokio::test]
    async fn user_denial_finishes_the_round_then_ends_the_turn() {
        let proposer = Scripted::new(vec![
            actions(vec![
                Action::write_file("a.txt", "a"),
                Action::write_file("b.txt", "b"),
            ]),
            reply("never requested"),
        ]);
        let mut h = harness(proposer.clone(), false, |_| {});
        let asked = answer(h.approvals, vec![UserResponse::Deny, UserResponse::Approve]);

        let outcome = h.session.run_turn("write two files").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Denied);
        assert_eq!(asked.await.unwrap().len(), 2);
        assert!(!h.dir.path().join("a.txt").exists());
        assert_eq!(std::fs::read_to_string(h.dir.path().join("b.txt")).unwrap(), "b");
        // Not re-queried after the denial.
        assert_eq!(proposer.calls().len(), 1);

        let history = h.session.history();
        assert_eq!(history[0].approval(), Some(&ApprovalDecision::UserDenied));
        assert!(history[0].execution().is_none());
        assert!(history[1].execution().is_some());
        assert!(!h.session.is_terminated());
    }

    #[tokio::test]
    async fn accept_all_only_skips_the_prompt_for_whitelisted_commands() {
        let proposer = Scripted::new(vec![
            actions(vec![Action::shell("echo auto"), Action::shell("touch made.txt")]),
            reply("done"),
        ]);
        let mut h = harness(proposer, true, |c| c.whitelist = vec!["^echo.*".into()]);
        let asked = answer(h.approvals, vec![UserResponse::Deny]);

        let outcome = h.session.run_turn("go").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Denied);
        assert_eq!(asked.await.unwrap(), vec!["Run shell command: touch made.txt".to_string()]);
        assert!(!h.dir.path().join("made.txt").exists());

        let history = h.session.history();
        assert_eq!(history[0].approval(), Some(&ApprovalDecision::AutoApproved("^echo.*".into())));
        assert_eq!(history[0].execution().unwrap().output, "auto\n");
        assert_eq!(history[1].approval(), Some(&ApprovalDecision::UserDenied));
    }

    #[tokio::test]
    async fn closed_approval_channel_aborts_the_session() {
        let proposer = Scripted::new(vec![actions(vec![Action::make_dir("out")]), reply("unused")]);
        let mut h = harness(proposer.clone(), false, |_| {});
        drop(h.approvals);

        assert_eq!(h.session.run_turn("make out").await.unwrap(), TurnOutcome::Aborted);
        assert!(h.session.is_terminated());
        assert!(!h.dir.path().join("out").exists());
        assert_eq!(h.session.history()[0].approval(), Some(&ApprovalDecision::Aborted));

        // Interactive mode refuses to continue.
        let mut input: VecDeque<String> = VecDeque::from(vec!["again".to_string()]);
        h.session.run_interactive(&mut input).await.unwrap();
        assert_eq!(proposer.calls().len(), 1);
    }

    #[tokio::test]
    async fn round_limit_cuts_off_a_model_that_never_finishes() {
        let mut h = harness(Arc::new(Repeating(Action::shell("echo again"))), true, |c| {
            c.whitelist = vec!["^echo".into()];
            c.session.max_rounds = 3;
        });
        let outcome = h.session.run_turn("loop forever").await.unwrap();
        assert_eq!(outcome, TurnOutcome::RoundLimit);
        let rounds: Vec<usize> = h.session.history().iter().map(|e| e.round()).collect();
        assert_eq!(rounds, vec![0, 1, 2]);
        drop(h.approvals);
    }

    #[tokio::test]
    async fn history_keeps_order_across_turns() {
        let proposer = Scripted::new(vec![
            actions(vec![Action::make_dir("one")]),
            reply("1"),
            actions(vec![Action::make_dir("two")]),
            reply("2"),
            actions(vec![Action::list_dir(".")]),
            reply("3"),
        ]);
        let mut h = harness(proposer, false, |_| {});
        let _asked = answer(h.approvals, vec![UserResponse::Approve; 3]);

        for prompt in ["first", "second", "third"] {
            h.session.run_turn(prompt).await.unwrap();
        }
        let history = h.session.history();
        let turns: Vec<usize> = history.iter().map(|e| e.turn()).collect();
        assert_eq!(turns, vec![0, 1, 2]);
        assert_eq!(history[2].action().operation(), Some(OperationKind::FsListDir));
        assert_eq!(history[2].execution().unwrap().output, "one\ntwo");
        assert_eq!(history[1].prompt(), Some("second"));
    }

    #[tokio::test]
    async fn interactive_reports_model_errors_and_stops_on_quit() {
        let proposer = Scripted::new(vec![Err(anyhow!("API error (401): bad key")), reply("ok")]);
        let mut h = harness(proposer.clone(), false, |_| {});
        let mut input: VecDeque<String> = ["first", "", "second", "QUIT", "never"]
            .into_iter()
            .map(String::from)
            .collect();

        h.session.run_interactive(&mut input).await.unwrap();
        assert_eq!(proposer.calls().len(), 2);
        assert_eq!(input, VecDeque::from(vec!["never".to_string()]));
        assert_eq!(h.session.state().turns().len(), 2);

        let events = drain(&mut h.events);
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::ProposerFailed(msg) if msg.contains("bad key")
        )));
        drop(h.approvals);
    }

    #[tokio::test]
    async fn run_once_surfaces_model_errors() {
        let mut h = harness(Scripted::new(vec![Err(anyhow!("timeout"))]), false, |_| {});
        let err = h.session.run_once("anything").await.unwrap_err();
        assert!(matches!(err, SessionError::Proposer(ref m) if m.contains("timeout")));
        drop(h.approvals);
    }

    #[tokio::test]
    async fn interrupted_command_ends_the_turn_but_not_the_session() {
        let proposer = Scripted::new(vec![
            actions(vec![Action::shell("sleep 10"), Action::shell("echo skipped")]),
            reply("after"),
        ]);
        let mut h = harness(proposer, true, |c| c.whitelist = vec!["^(sleep|echo)".into()]);
        let trigger = h.interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.trigger();
        });

        let outcome = tokio::time::timeout(Duration::from_secs(8), h.session.run_turn("wait"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, TurnOutcome::Interrupted);
        assert!(!h.session.is_terminated());
        assert_eq!(h.session.history().len(), 1);
        assert!(h.session.history()[0].execution().unwrap().was_interrupted());

        let next = h.session.run_turn("next").await.unwrap();
        assert_eq!(next, TurnOutcome::Completed { reply: Some("after".into()) });
        drop(h.approvals);
    }
}
