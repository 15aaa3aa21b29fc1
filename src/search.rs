//! Debounced search.
//!
//! A term change arms a single timer; only when it elapses without being
//! replaced does the catalog get queried. Every query carries the generation
//! it was issued for, and a completion whose generation is no longer current
//! is dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::catalog::RecipeSource;
use crate::recipe::Recipe;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPhase {
    Idle,
    Loading,
    Settled,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchState {
    pub term: String,
    pub results: Vec<Recipe>,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl SearchState {
    pub fn phase(&self) -> SearchPhase {
        if self.is_loading {
            SearchPhase::Loading
        } else if self.term.trim().is_empty() {
            SearchPhase::Idle
        } else {
            SearchPhase::Settled
        }
    }

    /// Settled without error and without matches.
    pub fn is_empty_result(&self) -> bool {
        self.phase() == SearchPhase::Settled && self.error.is_none() && self.results.is_empty()
    }

    pub fn find(&self, id: &str) -> Option<&Recipe> {
        self.results.iter().find(|r| r.id == id)
    }
}

#[derive(Default)]
struct Pending {
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

struct Shared {
    source: Arc<dyn RecipeSource>,
    pending: Mutex<Pending>,
    state: watch::Sender<SearchState>,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(self: Arc<Self>, generation: u64, term: String) {
        // The pending lock is held while publishing so a concurrent term
        // change cannot slip in between the generation check and the send.
        {
            let pending = self.pending();
            if pending.generation != generation {
                return;
            }
            let previous = self.state.borrow().results.clone();
            self.state.send_replace(SearchState {
                term: term.clone(),
                results: previous,
                is_loading: true,
                error: None,
            });
        }

        let outcome = self.source.search_by_name(&term).await;

        let pending = self.pending();
        if pending.generation != generation {
            log::debug!("Discarding stale results for {:?}", term);
            return;
        }
        let settled = match outcome {
            Ok(results) => SearchState {
                term,
                results,
                is_loading: false,
                error: None,
            },
            Err(e) => {
                log::warn!("Search for {:?} failed: {}", term, e);
                SearchState {
                    term,
                    results: Vec::new(),
                    is_loading: false,
                    error: Some(e.user_message()),
                }
            }
        };
        self.state.send_replace(settled);
        drop(pending);
    }
}

/// Owns the search term of one user and the state derived from it.
pub struct SearchController {
    shared: Arc<Shared>,
    delay: Duration,
}

impl SearchController {
    pub fn new(source: Arc<dyn RecipeSource>, delay: Duration) -> Self {
        let (state, _) = watch::channel(SearchState::default());
        Self {
            shared: Arc::new(Shared {
                source,
                pending: Mutex::new(Pending::default()),
                state,
            }),
            delay,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchState> {
        self.shared.state.subscribe()
    }

    pub fn state(&self) -> SearchState {
        self.shared.state.borrow().clone()
    }

    /// Cancel the armed timer and start a new generation. Returns `None` if
    /// the term is blank, after moving to idle.
    fn supersede(&self, term: &str) -> Option<(u64, String)> {
        if term.trim().is_empty() {
            self.clear();
            return None;
        }
        let mut pending = self.shared.pending();
        pending.generation += 1;
        if let Some(timer) = pending.timer.take() {
            timer.abort();
        }
        Some((pending.generation, term.to_string()))
    }

    /// Term changed: debounce, then search.
    pub fn set_term(&self, term: &str) {
        let Some((generation, term)) = self.supersede(term) else {
            return;
        };
        let shared = self.shared.clone();
        let delay = self.delay;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Detached so that aborting a later timer never cancels a query
            // that is already in flight.
            tokio::spawn(shared.run(generation, term));
        });
        self.shared.pending().timer = Some(timer);
    }

    /// Search right away, skipping the debounce delay.
    pub fn search_now(&self, term: &str) {
        if let Some((generation, term)) = self.supersede(term) {
            tokio::spawn(self.shared.clone().run(generation, term));
        }
    }

    /// Back to idle, dropping any armed or in-flight search. Returns whether
    /// the published state changed; an already idle state is not republished.
    pub fn clear(&self) -> bool {
        let mut pending = self.shared.pending();
        pending.generation += 1;
        if let Some(timer) = pending.timer.take() {
            timer.abort();
        }
        self.shared.state.send_if_modified(|state| {
            if *state == SearchState::default() {
                return false;
            }
            *state = SearchState::default();
            true
        })
    }
}

impl Drop for SearchController {
    fn drop(&mut self) {
        if let Some(timer) = self.shared.pending().timer.take() {
            timer.abort();
        }
    }
}
