use std::sync::Arc;

use super::subscription::Subscription;

/// Observer notified when subscriptions are activated or torn down
///
/// Callbacks run outside the broker's structural lock, so a listener may call
/// back into the broker without deadlocking. A panicking or slow listener
/// still runs on the caller's task; keep implementations short.
pub trait SubscriptionListener: Send + Sync {
    fn subscribed(&self, subscription: &Subscription);
    fn unsubscribed(&self, subscription: &Subscription);
}

/// Fans one event out to a listener list
pub(crate) fn notify_subscribed(
    listeners: &[Arc<dyn SubscriptionListener>],
    subscription: &Subscription,
) {
    for listener in listeners {
        listener.subscribed(subscription);
    }
}

pub(crate) fn notify_unsubscribed(
    listeners: &[Arc<dyn SubscriptionListener>],
    subscription: &Subscription,
) {
    for listener in listeners {
        listener.unsubscribed(subscription);
    }
}
