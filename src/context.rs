//! Task-local invocation context.
//!
//! Carries the (channel, chat id) a message or scheduled task originated
//! from, so tools like `schedule_task` can capture a delivery target
//! without threading it through every call. The value is scoped to one
//! logical unit of work and is invisible to unrelated tasks.

use std::cell::RefCell;
use std::future::Future;

/// Where the current unit of work originated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationOrigin {
    pub channel: String,
    pub chat_id: String,
}

tokio::task_local! {
    static ORIGIN: RefCell<Option<InvocationOrigin>>;
}

/// Run `fut` inside a fresh invocation-context scope.
///
/// Work spawned from inside the scope that should see the same origin must
/// itself be wrapped in a scope carrying a copy; the value never leaks to
/// unrelated tasks.
pub async fn scope<F: Future>(origin: Option<InvocationOrigin>, fut: F) -> F::Output {
    ORIGIN.scope(RefCell::new(origin), fut).await
}

/// Set the origin for the current scope. No-op outside a scope.
pub fn set_origin(channel: &str, chat_id: &str) {
    let _ = ORIGIN.try_with(|cell| {
        *cell.borrow_mut() = Some(InvocationOrigin {
            channel: channel.to_string(),
            chat_id: chat_id.to_string(),
        });
    });
}

/// The origin of the current unit of work, when inside a scope.
pub fn current_origin() -> Option<InvocationOrigin> {
    ORIGIN
        .try_with(|cell| cell.borrow().clone())
        .ok()
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn origin_is_visible_inside_its_scope_only() {
        assert_eq!(current_origin(), None);

        scope(None, async {
            assert_eq!(current_origin(), None);
            set_origin("telegram", "42");
            let origin = current_origin().expect("origin set");
            assert_eq!(origin.channel, "telegram");
            assert_eq!(origin.chat_id, "42");
        })
        .await;

        assert_eq!(current_origin(), None);
    }

    #[tokio::test]
    async fn sibling_tasks_do_not_share_origins() {
        let first = tokio::spawn(scope(None, async {
            set_origin("telegram", "1");
            tokio::task::yield_now().await;
            current_origin().map(|origin| origin.chat_id)
        }));
        let second = tokio::spawn(scope(None, async {
            set_origin("telegram", "2");
            tokio::task::yield_now().await;
            current_origin().map(|origin| origin.chat_id)
        }));

        assert_eq!(first.await.expect("join"), Some("1".to_string()));
        assert_eq!(second.await.expect("join"), Some("2".to_string()));
    }

    #[tokio::test]
    async fn set_outside_scope_is_a_noop() {
        set_origin("telegram", "7");
        assert_eq!(current_origin(), None);
    }
}
