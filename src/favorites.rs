use rand::seq::SliceRandom;
use rand::Rng;

use crate::db::{Storage, StorageError};
use crate::recipe::Recipe;

pub const FAVORITES_KEY: &str = "favoriteRecipes";

/// Favorite recipes of one user, kept in memory and mirrored to storage
/// after every toggle.
pub struct FavoritesStore<S: Storage> {
    storage: S,
    recipes: Vec<Recipe>,
}

impl<S: Storage> FavoritesStore<S> {
    /// Never fails: an absent, unreadable or corrupt entry gives an empty set.
    pub fn load(storage: S) -> Self {
        let recipes = match storage.get_item(FAVORITES_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                log::warn!("Ignoring corrupt favorites entry: {}", e);
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                log::warn!("Could not read favorites: {}", e);
                Vec::new()
            }
        };
        log::debug!("Loaded {} favorites", recipes.len());
        Self { storage, recipes }
    }

    pub fn is_favorite(&self, id: &str) -> bool {
        self.recipes.iter().any(|r| r.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&Recipe> {
        self.recipes.iter().find(|r| r.id == id)
    }

    pub fn recipes(&self) -> &[Recipe] {
        &self.recipes
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    pub fn pick_random<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&Recipe> {
        self.recipes.choose(rng)
    }

    /// Remove the recipe if present, insert it otherwise, then persist.
    /// The in-memory set stays authoritative if persisting fails.
    pub fn toggle(&mut self, recipe: &Recipe) -> &[Recipe] {
        if let Some(pos) = self.recipes.iter().position(|r| r.id == recipe.id) {
            self.recipes.remove(pos);
            log::debug!("Removed {} from favorites", recipe.id);
        } else {
            self.recipes.push(recipe.clone());
            log::debug!("Added {} to favorites", recipe.id);
        }
        if let Err(e) = self.persist() {
            log::warn!("Could not persist favorites: {}", e);
        }
        &self.recipes
    }

    fn persist(&self) -> Result<(), StorageError> {
        let raw = serde_json::to_string(&self.recipes)?;
        self.storage.set_item(FAVORITES_KEY, &raw)
    }
}
