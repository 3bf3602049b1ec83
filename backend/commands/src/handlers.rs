/// Ad-hoc message handlers checked before command matching.
///
/// Two ordered lists: persistent handlers fire on every matching message;
/// one-shot handlers are removed the first time they match. Either kind may
/// carry a lifespan, after which it is evicted and its expiry callback runs.
/// Eviction and removal go through the same lock, so for any entry exactly
/// one of them happens and the callback never runs for a removed entry.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use opbot_core::InboundMessage;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::bot::BotHandle;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Identity of a registered handler, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Persistent,
    OneShot,
}

/// Action run when a handler's predicate matches.
#[async_trait]
pub trait HandlerAction: Send + Sync {
    async fn run(&self, message: &InboundMessage, bot: &BotHandle) -> Result<()>;
}

pub type Predicate = Arc<dyn Fn(&InboundMessage) -> bool + Send + Sync>;
pub type ExpiryCallback = Box<dyn FnOnce() + Send>;

/// Optional lifespan and expiry callback for a handler.
#[derive(Default)]
pub struct HandlerOptions {
    pub lifespan: Option<Duration>,
    pub on_expire: Option<ExpiryCallback>,
}

impl HandlerOptions {
    pub fn expiring(lifespan: Duration) -> Self {
        Self {
            lifespan: Some(lifespan),
            on_expire: None,
        }
    }

    pub fn on_expire(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_expire = Some(Box::new(callback));
        self
    }
}

/// Outcome of checking one message against the handler lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerReport {
    pub matched: usize,
    pub failed: usize,
}

struct HandlerEntry {
    id: HandlerId,
    predicate: Predicate,
    action: Arc<dyn HandlerAction>,
    on_expire: Option<ExpiryCallback>,
    timer: Option<AbortHandle>,
}

impl HandlerEntry {
    /// Removal path shared by manual removal and one-shot claiming: the
    /// timer is cancelled and the expiry callback dropped unrun.
    fn retire(mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[derive(Default)]
struct HandlerLists {
    persistent: Vec<HandlerEntry>,
    one_shot: Vec<HandlerEntry>,
}

impl HandlerLists {
    fn list_mut(&mut self, kind: HandlerKind) -> &mut Vec<HandlerEntry> {
        match kind {
            HandlerKind::Persistent => &mut self.persistent,
            HandlerKind::OneShot => &mut self.one_shot,
        }
    }

    fn take(&mut self, kind: HandlerKind, id: HandlerId) -> Option<HandlerEntry> {
        let list = self.list_mut(kind);
        let pos = list.iter().position(|e| e.id == id)?;
        Some(list.remove(pos))
    }
}

type Snapshot = Vec<(HandlerId, Predicate, Arc<dyn HandlerAction>)>;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Shared handler lists. Clones refer to the same lists.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    inner: Arc<Mutex<HandlerLists>>,
    next_id: Arc<AtomicU64>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HandlerLists> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a handler that fires on every matching message.
    pub fn add_handler<P>(
        &self,
        predicate: P,
        action: impl HandlerAction + 'static,
        options: HandlerOptions,
    ) -> HandlerId
    where
        P: Fn(&InboundMessage) -> bool + Send + Sync + 'static,
    {
        self.insert(HandlerKind::Persistent, Arc::new(predicate), Arc::new(action), options)
    }

    /// Register a handler that is removed after its first match.
    pub fn add_one_off_handler<P>(
        &self,
        predicate: P,
        action: impl HandlerAction + 'static,
        options: HandlerOptions,
    ) -> HandlerId
    where
        P: Fn(&InboundMessage) -> bool + Send + Sync + 'static,
    {
        self.insert(HandlerKind::OneShot, Arc::new(predicate), Arc::new(action), options)
    }

    /// Lifespans need a tokio runtime to schedule the eviction timer.
    fn insert(
        &self,
        kind: HandlerKind,
        predicate: Predicate,
        action: Arc<dyn HandlerAction>,
        options: HandlerOptions,
    ) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut lists = self.lock();

        let timer = options
            .lifespan
            .map(|lifespan| self.schedule_expiry(kind, id, lifespan));

        lists.list_mut(kind).push(HandlerEntry {
            id,
            predicate,
            action,
            on_expire: options.on_expire,
            timer,
        });
        debug!(%id, ?kind, lifespan = ?options.lifespan, "Handler registered");
        id
    }

    fn schedule_expiry(&self, kind: HandlerKind, id: HandlerId, lifespan: Duration) -> AbortHandle {
        let lists: Weak<Mutex<HandlerLists>> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(lifespan).await;
            let Some(lists) = lists.upgrade() else {
                return;
            };
            let entry = lists
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take(kind, id);
            // Already removed: nothing to do.
            let Some(entry) = entry else {
                return;
            };
            debug!(%id, ?kind, "Handler expired");
            if let Some(callback) = entry.on_expire {
                callback();
            }
        })
        .abort_handle()
    }

    /// Remove a handler from whichever list holds it. Its expiry callback
    /// will not run. Returns `false` if it was already gone.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut lists = self.lock();
        let entry = lists
            .take(HandlerKind::Persistent, id)
            .or_else(|| lists.take(HandlerKind::OneShot, id));
        drop(lists);

        match entry {
            Some(entry) => {
                entry.retire();
                debug!(%id, "Handler removed");
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: HandlerId) -> bool {
        let lists = self.lock();
        lists
            .persistent
            .iter()
            .chain(lists.one_shot.iter())
            .any(|e| e.id == id)
    }

    /// `(persistent, one_shot)` list lengths.
    pub fn counts(&self) -> (usize, usize) {
        let lists = self.lock();
        (lists.persistent.len(), lists.one_shot.len())
    }

    pub fn is_empty(&self) -> bool {
        self.counts() == (0, 0)
    }

    fn snapshot(&self, kind: HandlerKind) -> Snapshot {
        let mut lists = self.lock();
        lists
            .list_mut(kind)
            .iter()
            .map(|e| (e.id, Arc::clone(&e.predicate), Arc::clone(&e.action)))
            .collect()
    }

    /// Check `message` against both lists: every matching persistent handler
    /// fires in registration order, then every matching one-shot handler that
    /// this call manages to claim. A one-shot entry is claimed (removed) under
    /// the lock before its action runs, so concurrent messages cannot both
    /// fire it. Action failures are logged and do not stop the rest.
    pub async fn dispatch(&self, message: &InboundMessage, bot: &BotHandle) -> HandlerReport {
        let mut report = HandlerReport::default();

        let persistent: Vec<_> = self
            .snapshot(HandlerKind::Persistent)
            .into_iter()
            .filter(|(_, predicate, _)| predicate(message))
            .collect();

        let one_shot_matches: Vec<HandlerId> = self
            .snapshot(HandlerKind::OneShot)
            .into_iter()
            .filter(|(_, predicate, _)| predicate(message))
            .map(|(id, _, _)| id)
            .collect();

        for (id, _, action) in persistent {
            report.matched += 1;
            if let Err(e) = action.run(message, bot).await {
                report.failed += 1;
                warn!(%id, error = %e, "Handler action failed");
            }
        }

        let claimed: Vec<HandlerEntry> = {
            let mut lists = self.lock();
            one_shot_matches
                .into_iter()
                .filter_map(|id| lists.take(HandlerKind::OneShot, id))
                .collect()
        };

        for entry in claimed {
            let id = entry.id;
            let action = Arc::clone(&entry.action);
            entry.retire();
            report.matched += 1;
            debug!(%id, "One-shot handler claimed");
            if let Err(e) = action.run(message, bot).await {
                report.failed += 1;
                warn!(%id, error = %e, "One-shot handler action failed");
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_bot;
    use std::sync::atomic::AtomicUsize;

    struct Count(Arc<AtomicUsize>);

    #[async_trait]
    impl HandlerAction for Count {
        async fn run(&self, _message: &InboundMessage, _bot: &BotHandle) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fail;

    #[async_trait]
    impl HandlerAction for Fail {
        async fn run(&self, _message: &InboundMessage, _bot: &BotHandle) -> Result<()> {
            anyhow::bail!("boom")
        }
    }

    fn says(word: &'static str) -> impl Fn(&InboundMessage) -> bool + Send + Sync + 'static {
        move |m: &InboundMessage| m.text.contains(word)
    }

    fn msg(text: &str) -> InboundMessage {
        InboundMessage::new(text, "u", "C1")
    }

    #[tokio::test]
    async fn test_persistent_handlers_all_fire() {
        let (bot, _) = test_bot();
        let handlers = bot.handlers().clone();
        let hits = Arc::new(AtomicUsize::new(0));
        handlers.add_handler(says("hi"), Count(hits.clone()), HandlerOptions::default());
        handlers.add_handler(says("hi"), Count(hits.clone()), HandlerOptions::default());
        handlers.add_handler(says("bye"), Count(hits.clone()), HandlerOptions::default());

        let report = handlers.dispatch(&msg("hi there"), &bot).await;
        assert_eq!(report, HandlerReport { matched: 2, failed: 0 });
        handlers.dispatch(&msg("hi again"), &bot).await;
        assert_eq!(hits.load(Ordering::SeqCst), 4);
        assert_eq!(handlers.counts(), (3, 0));
    }

    #[tokio::test]
    async fn test_one_shot_fires_once() {
        let (bot, _) = test_bot();
        let handlers = bot.handlers().clone();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = handlers.add_one_off_handler(says("yes"), Count(hits.clone()), HandlerOptions::default());

        assert_eq!(handlers.dispatch(&msg("yes"), &bot).await.matched, 1);
        assert_eq!(handlers.dispatch(&msg("yes"), &bot).await.matched, 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!handlers.contains(id));
    }

    #[tokio::test]
    async fn test_one_shot_removed_even_when_action_fails() {
        let (bot, _) = test_bot();
        let handlers = bot.handlers().clone();
        handlers.add_one_off_handler(says("yes"), Fail, HandlerOptions::default());

        let report = handlers.dispatch(&msg("yes"), &bot).await;
        assert_eq!(report, HandlerReport { matched: 1, failed: 1 });
        assert!(handlers.is_empty());
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_other_handlers() {
        let (bot, _) = test_bot();
        let handlers = bot.handlers().clone();
        let hits = Arc::new(AtomicUsize::new(0));
        handlers.add_handler(says("x"), Fail, HandlerOptions::default());
        handlers.add_handler(says("x"), Count(hits.clone()), HandlerOptions::default());
        handlers.add_one_off_handler(says("x"), Count(hits.clone()), HandlerOptions::default());

        let report = handlers.dispatch(&msg("x"), &bot).await;
        assert_eq!(report, HandlerReport { matched: 3, failed: 1 });
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_messages_claim_one_shot_once() {
        let (bot, _) = test_bot();
        let handlers = bot.handlers().clone();
        let hits = Arc::new(AtomicUsize::new(0));
        handlers.add_one_off_handler(says("go"), Count(hits.clone()), HandlerOptions::default());

        let first = msg("go");
        let second = msg("go");
        let (a, b) = tokio::join!(
            handlers.dispatch(&first, &bot),
            handlers.dispatch(&second, &bot)
        );
        assert_eq!(a.matched + b.matched, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expiry_evicts_and_calls_back() {
        let (bot, _) = test_bot();
        let handlers = bot.handlers().clone();
        let expired = Arc::new(AtomicUsize::new(0));
        let flag = expired.clone();
        let id = handlers.add_handler(
            says("hi"),
            Count(Arc::new(AtomicUsize::new(0))),
            HandlerOptions::expiring(Duration::from_millis(50)).on_expire(move || {
                flag.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert!(handlers.contains(id));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!handlers.contains(id));
        assert_eq!(expired.load(Ordering::SeqCst), 1);
        assert_eq!(handlers.dispatch(&msg("hi"), &bot).await.matched, 0);
    }

    #[tokio::test]
    async fn test_removed_handler_never_expires() {
        let handlers = HandlerRegistry::new();
        let expired = Arc::new(AtomicUsize::new(0));
        let flag = expired.clone();
        let id = handlers.add_one_off_handler(
            says("hi"),
            Fail,
            HandlerOptions::expiring(Duration::from_millis(50)).on_expire(move || {
                flag.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(handlers.remove_handler(id));
        assert!(!handlers.remove_handler(id));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(expired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_claimed_one_shot_never_expires() {
        let (bot, _) = test_bot();
        let handlers = bot.handlers().clone();
        let expired = Arc::new(AtomicUsize::new(0));
        let flag = expired.clone();
        handlers.add_one_off_handler(
            says("yes"),
            Count(Arc::new(AtomicUsize::new(0))),
            HandlerOptions::expiring(Duration::from_millis(50)).on_expire(move || {
                flag.fetch_add(1, Ordering::SeqCst);
            }),
        );

        handlers.dispatch(&msg("yes"), &bot).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(expired.load(Ordering::SeqCst), 0);
    }
}
