//! Slug ↔ remote id mapping with deduplicated hydration.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
};

use {
    futures::{
        FutureExt,
        future::{BoxFuture, Shared},
    },
    tracing::debug,
    unicode_normalization::UnicodeNormalization,
};

use crate::error::{Error, Result};

/// Slug used when normalization leaves nothing.
pub const FALLBACK_SLUG: &str = "series";

/// Lowercase, decompose, drop combining marks and collapse everything that
/// is not `[a-z0-9]` into single dashes.
#[must_use]
pub fn normalize_slug(value: &str) -> String {
    normalize_or(value, FALLBACK_SLUG)
}

/// [`normalize_slug`] with a caller-chosen result for empty input.
pub(crate) fn normalize_or(value: &str, fallback: &str) -> String {
    let folded: String = value
        .to_lowercase()
        .nfkd()
        .filter(|c| !('\u{0300}'..='\u{036f}').contains(c))
        .collect();

    let mut slug = String::with_capacity(folded.len());
    let mut pending_dash = false;
    for c in folded.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        fallback.to_string()
    } else {
        slug
    }
}

fn default_is_remote_id(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

type Hydrator = Arc<dyn Fn(String) -> BoxFuture<'static, Result<String>> + Send + Sync>;
type Pending = Shared<BoxFuture<'static, std::result::Result<String, Arc<Error>>>>;

#[derive(Default)]
struct State {
    slug_to_remote: HashMap<String, String>,
    remote_to_slug: HashMap<String, String>,
    /// Keyed by normalized slug. The counter tells a hydration apart from a
    /// newer one started after `clear`.
    in_flight: HashMap<String, (u64, Pending)>,
    next_hydration: u64,
}

impl State {
    fn register(&mut self, slug: String, remote_id: String) {
        if let Some(old_remote) = self.slug_to_remote.get(&slug)
            && *old_remote != remote_id
        {
            self.remote_to_slug.remove(old_remote);
        }
        if let Some(old_slug) = self.remote_to_slug.get(&remote_id)
            && *old_slug != slug
        {
            self.slug_to_remote.remove(old_slug);
        }
        self.slug_to_remote.insert(slug.clone(), remote_id.clone());
        self.remote_to_slug.insert(remote_id, slug);
    }
}

/// Maps human-readable slugs to a source's remote ids.
///
/// Clones share state. Concurrent lookups of the same unknown slug share a
/// single hydration, which runs as its own task.
#[derive(Clone)]
pub struct SlugResolver {
    state: Arc<Mutex<State>>,
    hydrate: Option<Hydrator>,
    is_remote_id: Arc<dyn Fn(&str) -> bool + Send + Sync>,
    normalize: Arc<dyn Fn(&str) -> String + Send + Sync>,
}

impl Default for SlugResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SlugResolver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            hydrate: None,
            is_remote_id: Arc::new(default_is_remote_id),
            normalize: Arc::new(normalize_slug),
        }
    }

    /// Resolve unknown slugs through `hydrate`, which receives the
    /// normalized slug.
    #[must_use]
    pub fn with_hydrator<F, Fut>(mut self, hydrate: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        self.hydrate = Some(Arc::new(move |slug| hydrate(slug).boxed()));
        self
    }

    #[must_use]
    pub fn with_remote_id_predicate(
        mut self,
        predicate: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.is_remote_id = Arc::new(predicate);
        self
    }

    #[must_use]
    pub fn with_normalizer(mut self, normalize: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.normalize = Arc::new(normalize);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, slug: &str, remote_id: &str) {
        let slug = (self.normalize)(slug);
        self.lock().register(slug, remote_id.to_string());
    }

    #[must_use]
    pub fn remote_id(&self, slug: &str) -> Option<String> {
        let slug = (self.normalize)(slug);
        self.lock().slug_to_remote.get(&slug).cloned()
    }

    #[must_use]
    pub fn slug(&self, remote_id: &str) -> Option<String> {
        self.lock().remote_to_slug.get(remote_id).cloned()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.slug_to_remote.clear();
        state.remote_to_slug.clear();
        state.in_flight.clear();
    }

    /// Turn a slug or remote id into a remote id, hydrating at most once per
    /// normalized slug at a time.
    pub async fn ensure_remote_id(&self, input: &str) -> Result<String> {
        if (self.is_remote_id)(input) {
            let mut state = self.lock();
            let slug = state
                .remote_to_slug
                .get(input)
                .cloned()
                .unwrap_or_else(|| (self.normalize)(input));
            state.register(slug, input.to_string());
            return Ok(input.to_string());
        }

        let normalized = (self.normalize)(input);
        let pending = {
            let mut state = self.lock();
            if let Some(remote_id) = state.slug_to_remote.get(&normalized) {
                return Ok(remote_id.clone());
            }
            match state.in_flight.get(&normalized) {
                Some((_, pending)) => pending.clone(),
                None => {
                    let hydrate = self
                        .hydrate
                        .clone()
                        .ok_or_else(|| Error::validation("SlugResolver requires a hydrate function"))?;
                    let generation = state.next_hydration;
                    state.next_hydration += 1;
                    let pending = self.spawn_hydration(hydrate, normalized.clone(), generation);
                    state
                        .in_flight
                        .insert(normalized.clone(), (generation, pending.clone()));
                    pending
                },
            }
        };

        pending.await.map_err(Error::Shared)
    }

    /// Must be called with the state lock held so the task cannot settle
    /// before its in-flight entry exists.
    fn spawn_hydration(&self, hydrate: Hydrator, slug: String, generation: u64) -> Pending {
        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            debug!(%slug, "hydrating slug");
            let outcome = hydrate(slug.clone()).await.map_err(Arc::new);
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            if let Ok(remote_id) = &outcome {
                state.register(slug.clone(), remote_id.clone());
            }
            if state
                .in_flight
                .get(&slug)
                .is_some_and(|(g, _)| *g == generation)
            {
                state.in_flight.remove(&slug);
            }
            outcome
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                Err(Arc::new(Error::domain(format!("slug hydration task failed: {e}"))))
            })
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        std::{
            sync::atomic::{AtomicUsize, Ordering},
            time::Duration,
        },
    };

    #[test]
    fn normalizes_accents_punctuation_and_blank() {
        assert_eq!(normalize_slug("Pokémon Adventures!"), "pokemon-adventures");
        assert_eq!(normalize_slug("  --Solo   Leveling--  "), "solo-leveling");
        assert_eq!(normalize_slug("ＡＢＣ 123"), "abc-123");
        assert_eq!(normalize_slug("!!!"), FALLBACK_SLUG);
        assert_eq!(normalize_slug(""), FALLBACK_SLUG);
    }

    #[test]
    fn register_keeps_maps_inverse() {
        let resolver = SlugResolver::new();
        resolver.register("One Piece", "op-1");
        assert_eq!(resolver.remote_id("one piece").as_deref(), Some("op-1"));
        assert_eq!(resolver.slug("op-1").as_deref(), Some("one-piece"));

        resolver.register("One Piece", "op-2");
        assert!(resolver.slug("op-1").is_none());
        assert_eq!(resolver.slug("op-2").as_deref(), Some("one-piece"));

        resolver.register("Piece One", "op-2");
        assert!(resolver.remote_id("one-piece").is_none());
        assert_eq!(resolver.remote_id("piece-one").as_deref(), Some("op-2"));

        resolver.clear();
        assert!(resolver.slug("op-2").is_none());
    }

    #[tokio::test]
    async fn remote_ids_pass_through_and_register() {
        let resolver = SlugResolver::new();
        assert_eq!(resolver.ensure_remote_id("abc_123").await.unwrap(), "abc_123");
        assert_eq!(resolver.slug("abc_123").as_deref(), Some("abc-123"));
    }

    #[tokio::test]
    async fn missing_hydrator_is_an_error() {
        let err = SlugResolver::new()
            .ensure_remote_id("Solo Leveling")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "SlugResolver requires a hydrate function");
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_hydration() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let resolver = SlugResolver::new().with_hydrator(move |slug| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(format!("id-{slug}"))
            }
        });

        let results = futures::future::join_all(
            (0..8).map(|_| resolver.ensure_remote_id("Solo Leveling!")),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.unwrap(), "id-solo-leveling");
        }
        assert_eq!(resolver.remote_id("solo leveling").as_deref(), Some("id-solo-leveling"));
        assert!(resolver.lock().in_flight.is_empty());

        resolver.ensure_remote_id("Solo Leveling!").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_hydration_is_shared_then_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let resolver = SlugResolver::new().with_hydrator(move |slug| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(Error::domain(format!("lookup of {slug} failed")))
                } else {
                    Ok("remote".to_string())
                }
            }
        });

        let (a, b) = tokio::join!(
            resolver.ensure_remote_id("Tower of God?"),
            resolver.ensure_remote_id("tower of god")
        );
        assert_eq!(a.unwrap_err().to_string(), "lookup of tower-of-god failed");
        assert!(b.is_err());
        assert!(resolver.lock().in_flight.is_empty());

        assert_eq!(resolver.ensure_remote_id("Tower of God?").await.unwrap(), "remote");
    }

    #[tokio::test]
    async fn hydration_settles_when_waiters_drop() {
        let resolver = SlugResolver::new().with_hydrator(|_slug| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok("late".to_string())
        });
        let attempt = tokio::time::timeout(
            Duration::from_millis(1),
            resolver.ensure_remote_id("Kingdom?"),
        )
        .await;
        assert!(attempt.is_err());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(resolver.remote_id("kingdom").as_deref(), Some("late"));
        assert!(resolver.lock().in_flight.is_empty());
    }
}
