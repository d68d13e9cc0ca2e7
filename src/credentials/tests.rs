use super::*;
use crate::cluster::{ClusterSettings, MachineRegistry};
use crate::subprocess::{ExitStatus, MockProcessRunner, ProcessError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Replays prompt events per opened command and records what was typed.
#[derive(Default)]
struct ScriptedFactory {
    scripts: Mutex<VecDeque<(Vec<PromptEvent>, ExitStatus)>>,
    opened: Arc<Mutex<Vec<ProcessCommand>>>,
    typed: Arc<Mutex<Vec<String>>>,
    aborted: Arc<Mutex<usize>>,
}

impl ScriptedFactory {
    fn script(self, events: &[PromptEvent], status: ExitStatus) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .push_back((events.to_vec(), status));
        self
    }

    fn typed(&self) -> Vec<String> {
        self.typed.lock().unwrap().clone()
    }
}

struct ScriptedChannel {
    events: VecDeque<PromptEvent>,
    status: ExitStatus,
    typed: Arc<Mutex<Vec<String>>>,
    aborted: Arc<Mutex<usize>>,
}

#[async_trait]
impl InteractiveChannel for ScriptedChannel {
    async fn next_event(&mut self) -> std::result::Result<PromptEvent, ProcessError> {
        Ok(self.events.pop_front().unwrap_or(PromptEvent::EndOfStream))
    }

    async fn send_line(&mut self, line: &str) -> std::result::Result<(), ProcessError> {
        self.typed.lock().unwrap().push(line.to_string());
        Ok(())
    }

    fn transcript(&self) -> &str {
        "scripted"
    }

    async fn finish(&mut self) -> std::result::Result<ExitStatus, ProcessError> {
        Ok(self.status.clone())
    }

    async fn abort(&mut self) {
        *self.aborted.lock().unwrap() += 1;
    }
}

#[async_trait]
impl ChannelFactory for ScriptedFactory {
    async fn open(
        &self,
        command: ProcessCommand,
    ) -> std::result::Result<Box<dyn InteractiveChannel>, ProcessError> {
        self.opened.lock().unwrap().push(command);
        let (events, status) = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((vec![], ExitStatus::Success));
        Ok(Box::new(ScriptedChannel {
            events: events.into(),
            status,
            typed: Arc::clone(&self.typed),
            aborted: Arc::clone(&self.aborted),
        }))
    }
}

fn session() -> ClusterSession {
    ClusterSession::new(
        MachineRegistry::new("inline", vec![MachineEntry::new("h1", "u1", "/d", 2)]),
        ClusterSettings::default(),
        "sqs.log",
    )
    .unwrap()
}

#[tokio::test]
async fn test_new_host_accepts_key_and_reuses_password() {
    use PromptEvent::*;
    let factory = Arc::new(
        ScriptedFactory::default()
            .script(&[HostKeyConfirmation, PasswordPrompt, EndOfStream], ExitStatus::Success)
            .script(&[PasswordPrompt, EndOfStream], ExitStatus::Success),
    );
    let operator = Arc::new(ScriptedOperator::new(["pw"]));
    let bootstrapper = CredentialBootstrapper::new(factory.clone(), operator.clone());

    let mut session = session();
    let outcomes = bootstrapper
        .ensure_access(&mut session, Path::new("/home/op/.ssh/id_rsa.pub"))
        .await
        .unwrap();

    assert_eq!(
        outcomes,
        vec![AuthOutcome {
            host: "h1".into(),
            host_key_accepted: true,
            rejections: 0,
        }]
    );
    assert_eq!(factory.typed(), vec!["yes", "pw", "pw"]);
    assert_eq!(operator.prompts().len(), 1);

    let opened = factory.opened.lock().unwrap().clone();
    assert_eq!(opened[0].program, "scp");
    assert_eq!(opened[0].args.last().unwrap(), "u1@h1:~");
    assert_eq!(opened[1].program, "ssh");
    assert!(opened[1]
        .args
        .last()
        .unwrap()
        .ends_with("cat ~/id_rsa.pub >> ~/.ssh/authorized_keys"));
    assert!(!opened[1].args.iter().any(|a| a == "BatchMode=yes"));
}

#[tokio::test]
async fn test_rejected_password_is_corrected_once() {
    use PromptEvent::*;
    let factory = Arc::new(
        ScriptedFactory::default()
            .script(
                &[PasswordPrompt, PermissionDenied, PasswordPrompt, EndOfStream],
                ExitStatus::Success,
            )
            .script(&[PasswordPrompt, EndOfStream], ExitStatus::Success),
    );
    let operator = Arc::new(ScriptedOperator::new(["typo", "right"]));
    let bootstrapper = CredentialBootstrapper::new(factory.clone(), operator.clone());

    let mut session = session();
    let outcomes = bootstrapper
        .ensure_access(&mut session, Path::new("id_rsa.pub"))
        .await
        .unwrap();

    assert_eq!(outcomes[0].rejections, 1);
    assert_eq!(factory.typed(), vec!["typo", "right", "right"]);
    assert_eq!(session.password(), Some("typo"));
}

#[tokio::test]
async fn test_corrected_password_stays_with_its_machine() {
    use PromptEvent::*;
    let factory = Arc::new(
        ScriptedFactory::default()
            .script(
                &[PasswordPrompt, PermissionDenied, PasswordPrompt, EndOfStream],
                ExitStatus::Success,
            )
            .script(&[PasswordPrompt, EndOfStream], ExitStatus::Success)
            .script(&[PasswordPrompt, EndOfStream], ExitStatus::Success)
            .script(&[PasswordPrompt, EndOfStream], ExitStatus::Success),
    );
    let operator = Arc::new(ScriptedOperator::new(["shared", "h1-only"]));
    let bootstrapper = CredentialBootstrapper::new(factory.clone(), operator.clone());

    let mut session = ClusterSession::new(
        MachineRegistry::new(
            "inline",
            vec![
                MachineEntry::new("h1", "u1", "/d", 1),
                MachineEntry::new("h2", "u2", "/d", 1),
            ],
        ),
        ClusterSettings::default(),
        "sqs.log",
    )
    .unwrap();
    let outcomes = bootstrapper
        .ensure_access(&mut session, Path::new("id_rsa.pub"))
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 2);
    assert_eq!(
        factory.typed(),
        vec!["shared", "h1-only", "h1-only", "shared", "shared"]
    );
    assert_eq!(operator.prompts().len(), 2);
}

#[tokio::test]
async fn test_second_rejection_is_auth_error() {
    use PromptEvent::*;
    let factory = Arc::new(ScriptedFactory::default().script(
        &[PasswordPrompt, PermissionDenied, PasswordPrompt, PermissionDenied],
        ExitStatus::Success,
    ));
    let operator = Arc::new(ScriptedOperator::new(["a", "b"]));
    let bootstrapper = CredentialBootstrapper::new(factory.clone(), operator);

    let mut session = session();
    let err = bootstrapper
        .ensure_access(&mut session, Path::new("id_rsa.pub"))
        .await
        .unwrap_err();

    assert!(matches!(err, SqsError::Auth { ref host, .. } if host == "h1"));
    assert_eq!(*factory.aborted.lock().unwrap(), 1);
    assert_eq!(factory.opened.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_remote_failure_after_login_is_auth_error() {
    let factory = Arc::new(
        ScriptedFactory::default()
            .script(&[], ExitStatus::Success)
            .script(&[], ExitStatus::Error(1)),
    );
    let bootstrapper =
        CredentialBootstrapper::new(factory, Arc::new(ScriptedOperator::default()));

    let mut session = session();
    let err = bootstrapper
        .ensure_access(&mut session, Path::new("id_rsa.pub"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("exit code 1"));
}

#[tokio::test]
async fn test_existing_key_pair_is_kept() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("id_rsa"), "private").unwrap();
    std::fs::write(dir.path().join("id_rsa.pub"), "public").unwrap();

    let mock = MockProcessRunner::new();
    let public = ensure_key_pair(&mock, dir.path()).await.unwrap();

    assert_eq!(public, dir.path().join("id_rsa.pub"));
    assert!(mock.get_call_history().is_empty());
}

#[tokio::test]
async fn test_missing_key_pair_is_generated() {
    let dir = tempfile::tempdir().unwrap();
    let ssh_dir = dir.path().join(".ssh");

    let mut mock = MockProcessRunner::new();
    mock.expect_command("ssh-keygen").returns_success().finish();

    ensure_key_pair(&mock, &ssh_dir).await.unwrap();

    assert!(ssh_dir.is_dir());
    let history = mock.get_call_history();
    assert_eq!(history.len(), 1);
    let expected_path = ssh_dir.join("id_rsa").display().to_string();
    assert_eq!(
        history[0].args,
        vec!["-q", "-t", "rsa", "-N", "", "-f", expected_path.as_str()]
    );
}

#[tokio::test]
async fn test_public_key_rebuilt_from_private() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("id_rsa"), "private").unwrap();

    let mut mock = MockProcessRunner::new();
    mock.expect_command("ssh-keygen")
        .with_args(|args| args.first().map(String::as_str) == Some("-y"))
        .returns_stdout("ssh-rsa AAAA op@laptop\n")
        .finish();

    ensure_key_pair(&mock, dir.path()).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(dir.path().join("id_rsa.pub")).unwrap(),
        "ssh-rsa AAAA op@laptop\n"
    );
}

#[tokio::test]
async fn test_keygen_failure_is_auth_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut mock = MockProcessRunner::new();
    mock.expect_command("ssh-keygen")
        .returns_exit_code(1)
        .returns_stderr("Saving key failed")
        .finish();

    let err = ensure_key_pair(&mock, dir.path()).await.unwrap_err();
    assert!(matches!(err, SqsError::Auth { .. }));
    assert!(err.to_string().contains("Saving key failed"));
}
