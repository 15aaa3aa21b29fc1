//! HTTP client for the recipe catalog.
//!
//! Two read-only queries: keyword search and lookup by id. Nothing here
//! caches or retries.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::recipe::{MealJson, Recipe};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("network error: {0}")]
    Network(String),

    #[error("malformed catalog response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("recipe {0} not found")]
    NotFound(String),
}

impl CatalogError {
    /// Message shown to the user in place of results.
    pub fn user_message(&self) -> String {
        match self {
            CatalogError::Network(detail) => {
                format!("Could not reach the recipe catalog ({detail}). Please try again.")
            }
            CatalogError::Parse(_) => {
                "The recipe catalog sent an unreadable answer. Please try again later.".to_string()
            }
            CatalogError::NotFound(_) => "Recipe not found.".to_string(),
        }
    }
}

impl From<reqwest::Error> for CatalogError {
    fn from(e: reqwest::Error) -> Self {
        CatalogError::Network(e.to_string())
    }
}

/// Anything that can answer the two catalog queries.
#[async_trait]
pub trait RecipeSource: Send + Sync {
    async fn search_by_name(&self, term: &str) -> Result<Vec<Recipe>, CatalogError>;
    async fn fetch_by_id(&self, id: &str) -> Result<Recipe, CatalogError>;
}

#[derive(Debug, Deserialize)]
struct MealsEnvelope {
    #[serde(default)]
    meals: Option<Vec<MealJson>>,
}

/// Parse a `{"meals": [...] | null}` body. A null or missing array is an
/// empty result, not an error.
pub fn parse_meals(body: &str) -> Result<Vec<Recipe>, CatalogError> {
    let envelope: MealsEnvelope = serde_json::from_str(body)?;
    Ok(envelope
        .meals
        .unwrap_or_default()
        .into_iter()
        .map(Recipe::from)
        .collect())
}

/// The single record of a lookup body. Zero records is `NotFound`.
pub fn first_meal(body: &str, id: &str) -> Result<Recipe, CatalogError> {
    parse_meals(body)?
        .into_iter()
        .next()
        .ok_or_else(|| CatalogError::NotFound(id.to_string()))
}

fn check_status(status: StatusCode) -> Result<(), CatalogError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(CatalogError::Network(format!("catalog answered {status}")))
    }
}

pub struct CatalogClient {
    client: Client,
    base_url: String,
}

impl CatalogClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CatalogError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_body(&self, endpoint: &str, param: (&str, &str)) -> Result<String, CatalogError> {
        let url = format!("{}/{endpoint}", self.base_url);
        log::debug!("GET {url} {}={}", param.0, param.1);
        let response = self.client.get(&url).query(&[param]).send().await?;
        check_status(response.status())?;
        Ok(response.text().await?)
    }
}

#[async_trait]
impl RecipeSource for CatalogClient {
    async fn search_by_name(&self, term: &str) -> Result<Vec<Recipe>, CatalogError> {
        if term.trim().is_empty() {
            return Ok(Vec::new());
        }
        let recipes = parse_meals(&self.get_body("search.php", ("s", term)).await?)?;
        log::debug!("Search {:?} returned {} recipes", term, recipes.len());
        Ok(recipes)
    }

    async fn fetch_by_id(&self, id: &str) -> Result<Recipe, CatalogError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(CatalogError::NotFound(String::new()));
        }
        let body = self.get_body("lookup.php", ("i", id)).await?;
        first_meal(&body, id)
    }
}
