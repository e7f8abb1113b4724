//! Fan-out with a join barrier
//!
//! Branches run on scoped threads under one child cancel token. The first
//! branch to fail cancels the token, so siblings stop at their next remote
//! call; every branch is joined before [`run_fanout`] returns.

use std::sync::Mutex;
use std::thread;

use gorelease_agent::CancelToken;
use tracing::Span;

use crate::stages::{Stage, StageError};

type BranchFn<'a> = Box<dyn FnOnce(&CancelToken) -> Result<(), StageError> + Send + 'a>;

/// One concurrently running stage
pub struct Branch<'a> {
    stage: Stage,
    run: BranchFn<'a>,
}

impl<'a> Branch<'a> {
    pub fn new<F>(stage: Stage, run: F) -> Self
    where
        F: FnOnce(&CancelToken) -> Result<(), StageError> + Send + 'a,
    {
        Self {
            stage,
            run: Box::new(run),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }
}

/// Run every branch to completion; the first failure wins
pub fn run_fanout(parent: &CancelToken, branches: Vec<Branch<'_>>) -> Result<(), (Stage, StageError)> {
    if branches.is_empty() {
        return Ok(());
    }
    let group = parent.child();
    let first_error: Mutex<Option<(Stage, StageError)>> = Mutex::new(None);
    let span = Span::current();

    thread::scope(|scope| {
        for branch in branches {
            let group = &group;
            let first_error = &first_error;
            let span = &span;
            scope.spawn(move || {
                let stage_span = tracing::info_span!(parent: span, "stage", stage = %branch.stage);
                let _enter = stage_span.enter();

                let result = (branch.run)(group);
                match result {
                    Ok(()) => tracing::info!("stage complete"),
                    Err(err) => {
                        let mut slot = first_error.lock().unwrap_or_else(|e| e.into_inner());
                        if slot.is_none() {
                            tracing::error!(error = %err, "stage failed, cancelling siblings");
                            *slot = Some((branch.stage, err));
                        } else {
                            tracing::debug!(error = %err, "stage stopped after sibling failure");
                        }
                        group.cancel();
                    }
                }
            });
        }
    });

    match first_error.into_inner().unwrap_or_else(|e| e.into_inner()) {
        Some(failure) => Err(failure),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_all_branches_succeed() {
        let ran = AtomicUsize::new(0);
        let branches = (0..3)
            .map(|_| {
                Branch::new(Stage::Test, |_: &CancelToken| {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        run_fanout(&CancelToken::new(), branches).unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_first_failure_cancels_siblings() {
        let root = CancelToken::new();
        let branches = vec![
            Branch::new(Stage::Installer, |_: &CancelToken| {
                Err(StageError::Remote {
                    command: "bash pkg.bash".to_string(),
                    message: "exit status 1".to_string(),
                    output: String::new(),
                })
            }),
            Branch::new(Stage::LongTest, |cancel: &CancelToken| {
                if cancel.sleep(Duration::from_secs(30), Duration::from_millis(5)) {
                    Ok(())
                } else {
                    Err(StageError::Cancelled)
                }
            }),
        ];

        let (stage, err) = run_fanout(&root, branches).unwrap_err();
        assert_eq!(stage, Stage::Installer);
        assert!(matches!(err, StageError::Remote { .. }));
        // The group token is cancelled, not the caller's
        assert!(!root.is_cancelled());
    }

    #[test]
    fn test_parent_cancellation_reaches_branches() {
        let root = CancelToken::new();
        root.cancel();
        let branches = vec![Branch::new(Stage::Zip, |cancel: &CancelToken| Ok(cancel.check()?))];

        let (stage, err) = run_fanout(&root, branches).unwrap_err();
        assert_eq!(stage, Stage::Zip);
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_no_branches() {
        assert!(run_fanout(&CancelToken::new(), Vec::new()).is_ok());
    }
}
