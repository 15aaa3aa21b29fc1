use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::catalog::{CatalogError, RecipeSource};
use crate::db::{LocalStorage, SharedConnection};
use crate::favorites::FavoritesStore;
use crate::recipe::Recipe;
use crate::search::SearchController;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything one chat sees: its search, its favorites and the recipe it
/// last opened.
pub struct ChatSession {
    pub search: SearchController,
    favorites: Mutex<FavoritesStore<LocalStorage>>,
    last_detail: Mutex<Option<Recipe>>,
    source: Arc<dyn RecipeSource>,
}

impl ChatSession {
    pub fn favorites(&self) -> MutexGuard<'_, FavoritesStore<LocalStorage>> {
        lock(&self.favorites)
    }

    pub fn is_favorite(&self, id: &str) -> bool {
        self.favorites().is_favorite(id)
    }

    /// Fetch a recipe for the detail view and remember it.
    pub async fn open_detail(&self, id: &str) -> Result<Recipe, CatalogError> {
        let recipe = self.source.fetch_by_id(id).await?;
        *lock(&self.last_detail) = Some(recipe.clone());
        Ok(recipe)
    }

    /// A recipe the chat has already seen, without going to the network.
    pub fn known_recipe(&self, id: &str) -> Option<Recipe> {
        if let Some(recipe) = self.search.state().find(id) {
            return Some(recipe.clone());
        }
        if let Some(recipe) = lock(&self.last_detail).as_ref().filter(|r| r.id == id) {
            return Some(recipe.clone());
        }
        self.favorites().get(id).cloned()
    }

    pub async fn resolve(&self, id: &str) -> Result<Recipe, CatalogError> {
        match self.known_recipe(id) {
            Some(recipe) => Ok(recipe),
            None => self.source.fetch_by_id(id).await,
        }
    }

    /// Toggle a favorite by id. Returns whether the recipe is now a favorite.
    pub async fn toggle_favorite(&self, id: &str) -> Result<(Recipe, bool), CatalogError> {
        let recipe = self.resolve(id).await?;
        let mut favorites = self.favorites();
        favorites.toggle(&recipe);
        let now = favorites.is_favorite(&recipe.id);
        Ok((recipe, now))
    }
}

struct OpenSession {
    session: Arc<ChatSession>,
    last_seen: Instant,
}

/// Chat sessions, opened lazily on first contact and evicted once idle.
/// Favorites are persisted on every toggle, so eviction only forgets the
/// transient search and the last opened recipe.
pub struct Sessions {
    source: Arc<dyn RecipeSource>,
    conn: SharedConnection,
    debounce: Duration,
    chats: Mutex<HashMap<i64, OpenSession>>,
}

impl Sessions {
    pub fn new(source: Arc<dyn RecipeSource>, conn: SharedConnection, debounce: Duration) -> Self {
        Self {
            source,
            conn,
            debounce,
            chats: Mutex::new(HashMap::new()),
        }
    }

    /// The session of `chat`, and whether it was opened by this call.
    pub fn get_or_open(&self, chat: i64) -> (Arc<ChatSession>, bool) {
        let mut chats = lock(&self.chats);
        if let Some(open) = chats.get_mut(&chat) {
            open.last_seen = Instant::now();
            return (open.session.clone(), false);
        }
        log::info!("Opening session for chat {}", chat);
        let storage = LocalStorage::new(self.conn.clone(), chat);
        let session = Arc::new(ChatSession {
            search: SearchController::new(self.source.clone(), self.debounce),
            favorites: Mutex::new(FavoritesStore::load(storage)),
            last_detail: Mutex::new(None),
            source: self.source.clone(),
        });
        chats.insert(
            chat,
            OpenSession {
                session: session.clone(),
                last_seen: Instant::now(),
            },
        );
        (session, true)
    }

    /// Drop sessions untouched for longer than `max_idle`. Returns how many
    /// were dropped.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut chats = lock(&self.chats);
        let before = chats.len();
        chats.retain(|chat, open| {
            let keep = open.last_seen.elapsed() <= max_idle;
            if !keep {
                log::info!("Closing idle session for chat {}", chat);
            }
            keep
        });
        before - chats.len()
    }

    pub fn len(&self) -> usize {
        lock(&self.chats).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::recipe::tests::recipe;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct LookupOnly {
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl RecipeSource for LookupOnly {
        async fn search_by_name(&self, _term: &str) -> Result<Vec<Recipe>, CatalogError> {
            Ok(Vec::new())
        }

        async fn fetch_by_id(&self, id: &str) -> Result<Recipe, CatalogError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            match id {
                "52772" => Ok(recipe("52772", "Teriyaki Chicken Casserole")),
                _ => Err(CatalogError::NotFound(id.to_string())),
            }
        }
    }

    fn sessions() -> (Arc<LookupOnly>, Sessions) {
        let source = Arc::new(LookupOnly::default());
        let sessions = Sessions::new(source.clone(), open_in_memory().unwrap(), Duration::from_millis(300));
        (source, sessions)
    }

    #[tokio::test]
    async fn detail_of_unknown_id_is_not_found() {
        let (_, sessions) = sessions();
        let (session, _) = sessions.get_or_open(1);
        assert!(matches!(
            session.open_detail("999999").await,
            Err(CatalogError::NotFound(id)) if id == "999999"
        ));
    }

    #[tokio::test]
    async fn toggle_reuses_the_opened_detail() {
        let (source, sessions) = sessions();
        let (session, created) = sessions.get_or_open(1);
        assert!(created);

        let opened = session.open_detail("52772").await.unwrap();
        let (toggled, now) = session.toggle_favorite("52772").await.unwrap();
        assert_eq!(opened, toggled);
        assert!(now);
        assert_eq!(source.lookups.load(Ordering::SeqCst), 1);

        let (_, now) = session.toggle_favorite("52772").await.unwrap();
        assert!(!now);
        assert!(!session.is_favorite("52772"));
    }

    #[tokio::test]
    async fn favorites_reload_in_a_new_session() {
        let conn = open_in_memory().unwrap();
        let source = Arc::new(LookupOnly::default());
        let first = Sessions::new(source.clone(), conn.clone(), Duration::from_millis(300));
        let (session, _) = first.get_or_open(5);
        session.toggle_favorite("52772").await.unwrap();

        let second = Sessions::new(source, conn, Duration::from_millis(300));
        let (session, _) = second.get_or_open(5);
        assert!(session.is_favorite("52772"));
        let (other_chat, _) = second.get_or_open(6);
        assert!(other_chat.favorites().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_are_evicted_and_close_their_results() {
        let (_, sessions) = sessions();
        let (idle, _) = sessions.get_or_open(1);
        let mut results = idle.search.subscribe();
        drop(idle);

        tokio::time::advance(Duration::from_secs(7200)).await;
        sessions.get_or_open(2);
        assert_eq!(sessions.evict_idle(Duration::from_secs(3600)), 1);
        assert_eq!(sessions.len(), 1);

        assert!(results.changed().await.is_err());
        let (_, created) = sessions.get_or_open(1);
        assert!(created);
    }

    #[tokio::test(start_paused = true)]
    async fn touching_a_session_keeps_it_open() {
        let (_, sessions) = sessions();
        sessions.get_or_open(1);
        tokio::time::advance(Duration::from_secs(3000)).await;
        sessions.get_or_open(1);
        tokio::time::advance(Duration::from_secs(3000)).await;

        assert_eq!(sessions.evict_idle(Duration::from_secs(3600)), 0);
    }

    #[tokio::test]
    async fn same_chat_gets_the_same_session() {
        let (_, sessions) = sessions();
        let (a, _) = sessions.get_or_open(3);
        let (b, created) = sessions.get_or_open(3);
        assert!(!created);
        assert!(Arc::ptr_eq(&a, &b));
    }
}
