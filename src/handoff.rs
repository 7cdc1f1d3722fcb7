//! Hand-off to an external, interactively operated pixel classifier.
//!
//! The tool is started as a child process and the pipeline waits for it to
//! exit. The wait runs on its own thread and has no timeout, since a person
//! may keep the tool open for as long as they like; cancelling the token kills
//! the child.

use crate::error::HandoffError;
use crate::pipeline::CancelToken;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};
use std::thread::JoinHandle;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ExternalClassifier {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl ExternalClassifier {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Start the tool and return a handle to its waiter thread
    pub fn launch(&self, cancel: CancelToken) -> Result<Handoff, HandoffError> {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|source| HandoffError::Launch {
            program: self.program.clone(),
            source,
        })?;
        tracing::info!("Launched {} (pid {})", self.program, child.id());

        let program = self.program.clone();
        let waiter = std::thread::Builder::new()
            .name("classifier-wait".to_string())
            .spawn(move || wait_for_exit(child, &program, &cancel))
            .map_err(|source| HandoffError::Wait {
                program: self.program.clone(),
                source,
            })?;

        Ok(Handoff {
            program: self.program.clone(),
            waiter,
        })
    }

    /// Launch and block until the tool exits or `cancel` fires
    pub fn run(&self, cancel: CancelToken) -> Result<(), HandoffError> {
        self.launch(cancel)?.wait()
    }
}

/// A running external tool
pub struct Handoff {
    program: String,
    waiter: JoinHandle<Result<ExitStatus, HandoffError>>,
}

impl Handoff {
    /// True once the tool has exited or the wait was cancelled
    pub fn is_finished(&self) -> bool {
        self.waiter.is_finished()
    }

    /// Block until the tool exits; a non-zero exit is an error
    pub fn wait(self) -> Result<(), HandoffError> {
        let status = self.waiter.join().map_err(|_| HandoffError::Wait {
            program: self.program.clone(),
            source: std::io::Error::other("waiter thread panicked"),
        })??;

        if status.success() {
            tracing::info!("{} exited", self.program);
            Ok(())
        } else {
            Err(HandoffError::Failed {
                program: self.program,
                status,
            })
        }
    }
}

fn wait_for_exit(mut child: Child, program: &str, cancel: &CancelToken) -> Result<ExitStatus, HandoffError> {
    let lost = |source| HandoffError::Wait {
        program: program.to_string(),
        source,
    };

    loop {
        if let Some(status) = child.try_wait().map_err(lost)? {
            return Ok(status);
        }
        if cancel.is_cancelled() {
            tracing::info!("Stopping {}", program);
            child.kill().map_err(lost)?;
            child.wait().map_err(lost)?;
            return Err(HandoffError::Cancelled {
                program: program.to_string(),
            });
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_fails_to_launch() {
        let classifier = ExternalClassifier::new("/nonexistent/classifier-binary");
        let result = classifier.run(CancelToken::new());
        assert!(matches!(result, Err(HandoffError::Launch { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn waits_for_clean_exit() {
        let classifier = ExternalClassifier::new("sh").args(["-c", "exit 0"]);
        assert!(classifier.run(CancelToken::new()).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn reports_failed_exit() {
        let classifier = ExternalClassifier::new("sh").args(["-c", "exit 3"]);
        assert!(matches!(
            classifier.run(CancelToken::new()),
            Err(HandoffError::Failed { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn cancel_kills_long_running_tool() {
        let cancel = CancelToken::new();
        let classifier = ExternalClassifier::new("sleep").args(["30"]);
        let handoff = classifier.launch(cancel.clone()).unwrap();
        assert!(!handoff.is_finished());

        cancel.cancel();
        assert!(matches!(handoff.wait(), Err(HandoffError::Cancelled { .. })));
    }
}
