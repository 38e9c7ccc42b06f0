//! Before/after hook callbacks around plan and apply.
//!
//! An ordered callback list with best-effort isolated invocation: hooks run
//! in registration order (audit hooks depend on it), a hook error is logged
//! and skipped, and only an explicit [`HookOutcome::Abort`] stops the
//! surrounding operation.

use async_trait::async_trait;
use tracing::warn;

use crate::error::{Error, Result};
use crate::plan::MigrationPlan;

/// The points at which hooks fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    BeforePlan,
    AfterPlan,
    BeforeApply,
    AfterApply,
}

/// What a hook sees when it fires.
pub struct HookContext<'a> {
    pub event: HookEvent,
    /// The plan in play; absent for BeforePlan.
    pub plan: Option<&'a MigrationPlan>,
}

/// A hook's verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Continue,
    Abort(String),
}

/// A registered callback.
#[async_trait]
pub trait Hook: Send + Sync {
    fn name(&self) -> &str;
    async fn invoke(&self, ctx: &HookContext<'_>) -> Result<HookOutcome>;
}

/// Interactive or policy-driven approval for destructive plans, consulted
/// when `force_destructive` is not set.
#[async_trait]
pub trait DestructiveApproval: Send + Sync {
    async fn approve(&self, plan: &MigrationPlan) -> bool;
}

struct FnHook<F> {
    name: String,
    callback: F,
}

#[async_trait]
impl<F> Hook for FnHook<F>
where
    F: Fn(&HookContext<'_>) -> HookOutcome + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, ctx: &HookContext<'_>) -> Result<HookOutcome> {
        Ok((self.callback)(ctx))
    }
}

/// Ordered hook collection.
#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<(HookEvent, Box<dyn Hook>)>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, event: HookEvent, hook: Box<dyn Hook>) {
        self.hooks.push((event, hook));
    }

    /// Convenience registration for plain closures.
    pub fn register_fn<F>(&mut self, event: HookEvent, name: impl Into<String>, callback: F)
    where
        F: Fn(&HookContext<'_>) -> HookOutcome + Send + Sync + 'static,
    {
        self.register(
            event,
            Box::new(FnHook {
                name: name.into(),
                callback,
            }),
        );
    }

    /// Fire all hooks for an event in registration order. Errors are logged
    /// and skipped; an explicit abort surfaces as [`Error::HookAbort`].
    pub async fn fire(&self, event: HookEvent, plan: Option<&MigrationPlan>) -> Result<()> {
        let ctx = HookContext { event, plan };
        for (hook_event, hook) in &self.hooks {
            if *hook_event != event {
                continue;
            }
            match hook.invoke(&ctx).await {
                Ok(HookOutcome::Continue) => {}
                Ok(HookOutcome::Abort(reason)) => {
                    return Err(Error::HookAbort {
                        hook: hook.name().to_string(),
                        reason,
                    });
                }
                Err(e) => {
                    warn!(hook = hook.name(), error = %e, "hook failed; continuing");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingHook;

    #[async_trait]
    impl Hook for FailingHook {
        fn name(&self) -> &str {
            "failing"
        }

        async fn invoke(&self, _ctx: &HookContext<'_>) -> Result<HookOutcome> {
            Err(Error::Config("boom".to_string()))
        }
    }

    #[tokio::test]
    async fn hooks_run_in_registration_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            registry.register_fn(HookEvent::BeforeApply, label, move |_| {
                order.lock().unwrap().push(label);
                HookOutcome::Continue
            });
        }

        registry.fire(HookEvent::BeforeApply, None).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn hook_errors_do_not_abort() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut registry = HookRegistry::new();
        registry.register(HookEvent::BeforePlan, Box::new(FailingHook));
        {
            let ran = Arc::clone(&ran);
            registry.register_fn(HookEvent::BeforePlan, "after-failure", move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
                HookOutcome::Continue
            });
        }

        registry.fire(HookEvent::BeforePlan, None).await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn explicit_abort_stops_the_operation() {
        let mut registry = HookRegistry::new();
        registry.register_fn(HookEvent::BeforeApply, "gate", |_| {
            HookOutcome::Abort("maintenance window closed".to_string())
        });

        let err = registry
            .fire(HookEvent::BeforeApply, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HookAbort { .. }));
        assert!(err.to_string().contains("maintenance window closed"));
    }

    #[tokio::test]
    async fn events_are_scoped() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut registry = HookRegistry::new();
        {
            let ran = Arc::clone(&ran);
            registry.register_fn(HookEvent::AfterApply, "after-only", move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
                HookOutcome::Continue
            });
        }

        registry.fire(HookEvent::BeforeApply, None).await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        registry.fire(HookEvent::AfterApply, None).await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
