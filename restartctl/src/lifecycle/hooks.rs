//! Callbacks invoked at fixed points of the restart sequence.
//!
//! Pre- and post-restart hooks run in registration order and each one is its own failure
//! domain: an error or panic is logged and counted, and the next hook still runs. Restart
//! actions use the same trait but are run by the orchestrator with failures treated as fatal.

use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

use super::orchestrator::RestartAttempt;

#[async_trait]
pub trait RestartHook: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &str;

    async fn run(&self, attempt: &RestartAttempt) -> anyhow::Result<()>;
}

/// Hook backed by an async closure. Build one with [`hook_fn`].
pub struct FnHook<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> RestartHook for FnHook<F>
where
    F: Fn(RestartAttempt) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, attempt: &RestartAttempt) -> anyhow::Result<()> {
        (self.f)(attempt.clone()).await
    }
}

/// Wraps an async closure as a [`RestartHook`].
pub fn hook_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn RestartHook>
where
    F: Fn(RestartAttempt) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHook { name: name.into(), f })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    PreRestart,
    PostRestart,
}

impl HookPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            HookPhase::PreRestart => "pre_restart",
            HookPhase::PostRestart => "post_restart",
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs a hook, converting a panic into an error.
pub(crate) async fn run_isolated(hook: &dyn RestartHook, attempt: &RestartAttempt) -> anyhow::Result<()> {
    match AssertUnwindSafe(hook.run(attempt)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(anyhow::anyhow!("hook panicked: {}", panic_message(panic.as_ref()))),
    }
}

/// Runs every hook in order, isolating failures. Returns how many failed.
pub(crate) async fn run_hooks(phase: HookPhase, hooks: &[Arc<dyn RestartHook>], attempt: &RestartAttempt) -> usize {
    let mut failures = 0;

    for hook in hooks {
        debug!(attempt_id = %attempt.id, %phase, hook = hook.name(), "Running restart hook");

        if let Err(e) = run_isolated(hook.as_ref(), attempt).await {
            failures += 1;
            warn!(attempt_id = %attempt.id, %phase, hook = hook.name(), "Restart hook failed: {:#}", e);
            metrics::counter!("restartctl_hook_failures_total", "phase" => phase.as_str()).increment(1);
        }
    }

    failures
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::RestartOptions;
    use std::sync::Mutex;

    async fn explode(_: RestartAttempt) -> anyhow::Result<()> {
        panic!("exploded")
    }

    fn attempt() -> RestartAttempt {
        RestartAttempt::new("tester".to_string(), RestartOptions::default())
    }

    fn recording_hook(name: &'static str, log: Arc<Mutex<Vec<&'static str>>>) -> Arc<dyn RestartHook> {
        hook_fn(name, move |_| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(name);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_hooks_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hooks = vec![
            recording_hook("first", log.clone()),
            recording_hook("second", log.clone()),
            recording_hook("third", log.clone()),
        ];

        let failures = run_hooks(HookPhase::PreRestart, &hooks, &attempt()).await;

        assert_eq!(failures, 0);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test_log::test(tokio::test)]
    async fn test_failing_and_panicking_hooks_are_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hooks = vec![
            hook_fn("errors", |_| async { Err::<(), _>(anyhow::anyhow!("flush failed")) }),
            recording_hook("after-error", log.clone()),
            hook_fn("panics", explode),
            recording_hook("after-panic", log.clone()),
        ];

        let failures = run_hooks(HookPhase::PostRestart, &hooks, &attempt()).await;

        assert_eq!(failures, 2);
        assert_eq!(*log.lock().unwrap(), vec!["after-error", "after-panic"]);
    }

    #[tokio::test]
    async fn test_run_isolated_reports_panic_message() {
        let hook = hook_fn("panics", explode);
        let err = run_isolated(hook.as_ref(), &attempt()).await.unwrap_err();
        assert!(err.to_string().contains("exploded"));
    }

    #[tokio::test]
    async fn test_hook_sees_attempt() {
        let seen = Arc::new(Mutex::new(None));
        let hook = {
            let seen = seen.clone();
            hook_fn("inspect", move |attempt: RestartAttempt| {
                let seen = seen.clone();
                async move {
                    *seen.lock().unwrap() = Some(attempt.requestor);
                    Ok(())
                }
            })
        };

        run_hooks(HookPhase::PreRestart, &[hook], &attempt()).await;
        assert_eq!(seen.lock().unwrap().as_deref(), Some("tester"));
    }
}
