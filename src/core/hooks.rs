//! Query Hooks
//!
//! `pre_query` / `post_query` listeners. Hooks are registered while the
//! database context is being built and run synchronously, in registration
//! order, around every dispatch in both execution modes.

use std::sync::Arc;

use super::context::RequestContext;
use super::operation::Command;
use crate::response::Response;

/// Listener invoked around each dispatched command
pub trait QueryHook: Send + Sync {
    /// Called after compilation, before a connection is acquired
    fn pre_query(&self, _command: &Command, _ctx: &RequestContext) {}

    /// Called with the normalized envelope
    fn post_query(&self, _command: &Command, _ctx: &RequestContext, _response: &Response) {}
}

/// Ordered set of hooks
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn QueryHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hook
    pub fn register(&mut self, hook: impl QueryHook + 'static) {
        self.hooks.push(Arc::new(hook));
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub(crate) fn pre_query(&self, command: &Command, ctx: &RequestContext) {
        for hook in &self.hooks {
            hook.pre_query(command, ctx);
        }
    }

    pub(crate) fn post_query(&self, command: &Command, ctx: &RequestContext, response: &Response) {
        for hook in &self.hooks {
            hook.post_query(command, ctx, response);
        }
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::ExecutionMode;
    use crate::core::operation::CountCmd;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl QueryHook for Recorder {
        fn pre_query(&self, command: &Command, _ctx: &RequestContext) {
            self.seen.lock().unwrap().push(format!("pre:{}", command.name()));
        }

        fn post_query(&self, command: &Command, _ctx: &RequestContext, response: &Response) {
            self.seen
                .lock()
                .unwrap()
                .push(format!("post:{}:{}", command.name(), response.count));
        }
    }

    #[test]
    fn test_hooks_run_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        registry.register(Recorder { seen: seen.clone() });

        let cmd = Command::Count(CountCmd {
            collection: "users".into(),
            filter: json!({}),
        });
        let ctx = RequestContext::new(ExecutionMode::Sync, None);

        registry.pre_query(&cmd, &ctx);
        registry.post_query(&cmd, &ctx, &Response::affected(3, "3 documents"));

        assert_eq!(*seen.lock().unwrap(), vec!["pre:count", "post:count:3"]);
    }

    #[test]
    fn test_empty_registry() {
        let registry = HookRegistry::new();
        assert!(registry.is_empty());
    }
}
