use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Number of ingredient slots a catalog record carries.
pub const INGREDIENT_SLOTS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    pub measure: String,
}

/// A recipe as returned by the catalog. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    pub name: String,
    pub category: String,
    pub area: String,
    pub instructions: String,
    pub thumbnail_url: String,
    pub video_url: Option<String>,
    pub ingredients: Vec<Ingredient>,
}

impl Recipe {
    pub fn instruction_paragraphs(&self) -> Vec<&str> {
        self.instructions
            .lines()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect()
    }

    pub fn has_video(&self) -> bool {
        self.video_url.is_some()
    }
}

/// Raw `meals[]` entry of a catalog response.
///
/// Ingredient and measure slots (`strIngredient1`..`strIngredient20`,
/// `strMeasure1`..`strMeasure20`) land in `slots`.
#[derive(Debug, Deserialize)]
pub struct MealJson {
    #[serde(rename = "idMeal")]
    pub id: String,
    #[serde(rename = "strMeal")]
    pub name: String,
    #[serde(rename = "strCategory", default)]
    pub category: Option<String>,
    #[serde(rename = "strArea", default)]
    pub area: Option<String>,
    #[serde(rename = "strInstructions", default)]
    pub instructions: Option<String>,
    #[serde(rename = "strMealThumb", default)]
    pub thumbnail: Option<String>,
    #[serde(rename = "strYoutube", default)]
    pub youtube: Option<String>,
    #[serde(flatten)]
    pub slots: HashMap<String, serde_json::Value>,
}

impl MealJson {
    fn slot(&self, prefix: &str, index: usize) -> Option<&str> {
        self.slots
            .get(&format!("{prefix}{index}"))
            .and_then(|v| v.as_str())
            .map(str::trim)
    }

    fn ingredients(&self) -> Vec<Ingredient> {
        (1..=INGREDIENT_SLOTS)
            .filter_map(|i| {
                let name = self.slot("strIngredient", i).filter(|n| !n.is_empty())?;
                Some(Ingredient {
                    name: name.to_string(),
                    measure: self.slot("strMeasure", i).unwrap_or_default().to_string(),
                })
            })
            .collect()
    }
}

impl From<MealJson> for Recipe {
    fn from(meal: MealJson) -> Self {
        let ingredients = meal.ingredients();
        Recipe {
            id: meal.id,
            name: meal.name,
            category: meal.category.unwrap_or_default(),
            area: meal.area.unwrap_or_default(),
            instructions: meal.instructions.unwrap_or_default(),
            thumbnail_url: meal.thumbnail.unwrap_or_default(),
            video_url: meal
                .youtube
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty()),
            ingredients,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn recipe(id: &str, name: &str) -> Recipe {
        Recipe {
            id: id.to_string(),
            name: name.to_string(),
            category: "Chicken".to_string(),
            area: "Japanese".to_string(),
            instructions: "Boil.\r\n\r\nServe.".to_string(),
            thumbnail_url: format!("https://img.example/{id}.jpg"),
            video_url: None,
            ingredients: vec![Ingredient {
                name: "Salt".to_string(),
                measure: "1 tsp".to_string(),
            }],
        }
    }

    fn meal(value: serde_json::Value) -> Recipe {
        serde_json::from_value::<MealJson>(value).unwrap().into()
    }

    #[test]
    fn lone_ingredient_slot_is_extracted() {
        let mut raw = json!({
            "idMeal": "52772",
            "strMeal": "Teriyaki Chicken Casserole",
            "strIngredient3": "Salt",
            "strMeasure3": "1 tsp",
        });
        for i in 1..=20 {
            if i != 3 {
                raw[format!("strIngredient{i}")] = json!("");
                raw[format!("strMeasure{i}")] = json!(" ");
            }
        }
        let recipe = meal(raw);
        assert_eq!(
            recipe.ingredients,
            vec![Ingredient {
                name: "Salt".to_string(),
                measure: "1 tsp".to_string()
            }]
        );
    }

    #[test]
    fn ingredients_follow_slot_order_and_skip_blank_names() {
        let recipe = meal(json!({
            "idMeal": "1",
            "strMeal": "Soup",
            "strIngredient1": " Water ",
            "strMeasure1": "1 l",
            "strIngredient2": "   ",
            "strMeasure2": "ignored",
            "strIngredient10": "Leek",
            "strMeasure10": null,
            "strIngredient12": null,
        }));
        let names: Vec<_> = recipe.ingredients.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Water", "Leek"]);
        assert_eq!(recipe.ingredients[1].measure, "");
    }

    #[test]
    fn blank_video_is_absent_and_nulls_default_to_empty() {
        let recipe = meal(json!({
            "idMeal": "2",
            "strMeal": "Toast",
            "strCategory": null,
            "strYoutube": "",
        }));
        assert_eq!(recipe.category, "");
        assert!(!recipe.has_video());
    }

    #[test]
    fn paragraphs_drop_blank_lines() {
        let r = recipe("3", "Stew");
        assert_eq!(r.instruction_paragraphs(), vec!["Boil.", "Serve."]);
    }
}
