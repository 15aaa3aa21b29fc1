//! Text and keyboards the bot sends. Message text is MarkdownV2.

use reqwest::Url;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardButtonKind, InlineKeyboardMarkup};

use crate::recipe::Recipe;
use crate::search::{SearchPhase, SearchState};

/// Telegram caps a message at 4096 characters; leave room for escapes.
const DETAIL_BUDGET: usize = 3500;
/// Telegram allows at most 100 buttons per keyboard.
const MAX_CARDS: usize = 30;

static SPECIAL_CHARACTERS: [char; 19] = [
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!', '\\',
];

pub fn escape_markdown(str: &str) -> String {
    let mut new_str = String::new();
    for c in str.chars() {
        if SPECIAL_CHARACTERS.contains(&c) {
            new_str.push('\\');
        }
        new_str.push(c)
    }
    new_str
}

fn bold(str: &str) -> String {
    format!("*{}*", escape_markdown(str))
}

/// What an inline button asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Detail(String),
    ToggleFavorite(String),
    ToggleFavoriteInDetail(String),
    BackToResults,
}

impl Action {
    pub fn encode(&self) -> String {
        match self {
            Action::Detail(id) => format!("detail:{id}"),
            Action::ToggleFavorite(id) => format!("fav:{id}"),
            Action::ToggleFavoriteInDetail(id) => format!("favd:{id}"),
            Action::BackToResults => "back".to_string(),
        }
    }

    pub fn decode(data: &str) -> Option<Self> {
        if data == "back" {
            return Some(Action::BackToResults);
        }
        let (kind, id) = data.split_once(':')?;
        if id.is_empty() {
            return None;
        }
        let id = id.to_string();
        match kind {
            "detail" => Some(Action::Detail(id)),
            "fav" => Some(Action::ToggleFavorite(id)),
            "favd" => Some(Action::ToggleFavoriteInDetail(id)),
            _ => None,
        }
    }
}

pub fn heart_label(favorite: bool, compact: bool) -> String {
    match (favorite, compact) {
        (true, true) => "♥".to_string(),
        (false, true) => "♡".to_string(),
        (true, false) => "♥ Remove from favorites".to_string(),
        (false, false) => "♡ Add to favorites".to_string(),
    }
}

fn video_button(recipe: &Recipe, label: &str) -> Option<InlineKeyboardButton> {
    let url = Url::parse(recipe.video_url.as_deref()?).ok()?;
    Some(InlineKeyboardButton::url(label, url))
}

fn card_row(recipe: &Recipe, favorite: bool) -> Vec<InlineKeyboardButton> {
    let mut row = vec![
        InlineKeyboardButton::callback(&recipe.name, Action::Detail(recipe.id.clone()).encode()),
        InlineKeyboardButton::callback(
            heart_label(favorite, true),
            Action::ToggleFavorite(recipe.id.clone()).encode(),
        ),
    ];
    row.extend(video_button(recipe, "▶"));
    row
}

fn card_line(index: usize, recipe: &Recipe) -> String {
    format!(
        "{}\\. {}\n    {}",
        index + 1,
        bold(&recipe.name),
        escape_markdown(&format!("{} · {}", recipe.category, recipe.area))
    )
}

/// A list of recipe cards: a text body and one keyboard row per recipe.
fn card_list(
    title: String,
    recipes: &[Recipe],
    is_favorite: &dyn Fn(&str) -> bool,
) -> (String, InlineKeyboardMarkup) {
    let shown = &recipes[..recipes.len().min(MAX_CARDS)];
    let mut text = title;
    text.push_str("\n\n");
    text.push_str(
        &shown
            .iter()
            .enumerate()
            .map(|(i, r)| card_line(i, r))
            .collect::<Vec<_>>()
            .join("\n"),
    );
    if recipes.len() > shown.len() {
        text.push_str(&escape_markdown(&format!(
            "\n\n…and {} more. Refine your search to narrow it down.",
            recipes.len() - shown.len()
        )));
    }
    let rows = shown.iter().map(|r| card_row(r, is_favorite(&r.id))).collect::<Vec<_>>();
    (text, InlineKeyboardMarkup::new(rows))
}

/// Rendering of a search state. `None` while a query is in flight.
pub fn search_results(
    state: &SearchState,
    is_favorite: &dyn Fn(&str) -> bool,
) -> Option<(String, Option<InlineKeyboardMarkup>)> {
    match state.phase() {
        SearchPhase::Loading => None,
        SearchPhase::Idle => Some((
            format!(
                "{}\n{}",
                bold("Start your recipe search"),
                escape_markdown("Type the name of a dish or an ingredient (e.g. chicken, pasta, cake...).")
            ),
            None,
        )),
        SearchPhase::Settled => {
            if let Some(error) = &state.error {
                return Some((
                    format!("{}\n{}", bold("Search failed"), escape_markdown(error)),
                    None,
                ));
            }
            if state.is_empty_result() {
                return Some((
                    format!(
                        "{}\n{}",
                        escape_markdown(&format!("No recipes found for \"{}\".", state.term)),
                        escape_markdown("Try other keywords.")
                    ),
                    None,
                ));
            }
            let title = bold(&format!(
                "{} recipes for \"{}\"",
                state.results.len(),
                state.term
            ));
            let (text, keyboard) = card_list(title, &state.results, is_favorite);
            Some((text, Some(keyboard)))
        }
    }
}

pub fn favorites_list(recipes: &[Recipe]) -> (String, Option<InlineKeyboardMarkup>) {
    if recipes.is_empty() {
        return (
            format!(
                "{}\n{}",
                bold("No favorite recipes yet"),
                escape_markdown("Tap ♡ on a recipe to keep it here.")
            ),
            None,
        );
    }
    let title = bold(&format!("My favorite recipes ({})", recipes.len()));
    let (text, keyboard) = card_list(title, recipes, &|_| true);
    (text, Some(keyboard))
}

pub fn detail_keyboard(recipe: &Recipe, favorite: bool) -> InlineKeyboardMarkup {
    let mut rows = vec![vec![InlineKeyboardButton::callback(
        heart_label(favorite, false),
        Action::ToggleFavoriteInDetail(recipe.id.clone()).encode(),
    )]];
    if let Some(button) = video_button(recipe, "▶ Watch the video") {
        rows.push(vec![button]);
    }
    rows.push(vec![InlineKeyboardButton::callback(
        "« Back to the search",
        Action::BackToResults.encode(),
    )]);
    InlineKeyboardMarkup::new(rows)
}

pub fn detail(recipe: &Recipe, favorite: bool) -> (String, InlineKeyboardMarkup) {
    let mut text = format!(
        "{}\n{}\n\n{}\n",
        bold(&recipe.name),
        escape_markdown(&format!("{} · {}", recipe.category, recipe.area)),
        bold(&format!("Ingredients ({})", recipe.ingredients.len()))
    );
    for ingredient in &recipe.ingredients {
        let line = if ingredient.measure.is_empty() {
            format!("• {}", ingredient.name)
        } else {
            format!("• {} {}", ingredient.measure, ingredient.name)
        };
        text.push_str(&escape_markdown(&line));
        text.push('\n');
    }
    text.push('\n');
    text.push_str(&bold("Instructions"));
    for paragraph in recipe.instruction_paragraphs() {
        let paragraph = escape_markdown(paragraph);
        if text.chars().count() + paragraph.chars().count() > DETAIL_BUDGET {
            text.push_str("\n\n…");
            break;
        }
        text.push_str("\n\n");
        text.push_str(&paragraph);
    }
    (text, detail_keyboard(recipe, favorite))
}

pub fn caption(recipe: &Recipe) -> String {
    bold(&recipe.name)
}

pub fn video_link(recipe: &Recipe) -> String {
    if !recipe.has_video() {
        return escape_markdown(&format!("{} has no video.", recipe.name));
    }
    format!(
        "{}\n{}",
        bold(&recipe.name),
        escape_markdown(recipe.video_url.as_deref().unwrap_or_default())
    )
}

pub fn error(message: &str) -> String {
    format!("{}\n{}", bold("Something went wrong"), escape_markdown(message))
}

pub fn plain(message: &str) -> String {
    escape_markdown(message)
}

/// Relabel the favorite button carrying `data`, leaving the rest untouched.
pub fn relabel(markup: &InlineKeyboardMarkup, data: &str, label: String) -> InlineKeyboardMarkup {
    let mut markup = markup.clone();
    for button in markup.inline_keyboard.iter_mut().flatten() {
        if matches!(&button.kind, InlineKeyboardButtonKind::CallbackData(d) if d == data) {
            button.text = label.clone();
        }
    }
    markup
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::tests::recipe;

    fn settled(term: &str, results: Vec<Recipe>) -> SearchState {
        SearchState {
            term: term.to_string(),
            results,
            is_loading: false,
            error: None,
        }
    }

    fn callbacks(markup: &InlineKeyboardMarkup) -> Vec<String> {
        markup
            .inline_keyboard
            .iter()
            .flatten()
            .filter_map(|b| match &b.kind {
                InlineKeyboardButtonKind::CallbackData(d) => Some(d.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn escapes_markdown_specials() {
        assert_eq!(escape_markdown("Pad Thai (v2)!"), "Pad Thai \\(v2\\)\\!");
    }

    #[test]
    fn action_codes_decode_back() {
        for action in [
            Action::Detail("52772".to_string()),
            Action::ToggleFavorite("1".to_string()),
            Action::ToggleFavoriteInDetail("2".to_string()),
            Action::BackToResults,
        ] {
            assert_eq!(Action::decode(&action.encode()), Some(action));
        }
        assert_eq!(Action::decode("fav:"), None);
        assert_eq!(Action::decode("nope:1"), None);
    }

    #[test]
    fn idle_state_invites_a_search() {
        let (text, keyboard) = search_results(&SearchState::default(), &|_| false).unwrap();
        assert!(text.contains("Start your recipe search"));
        assert!(keyboard.is_none());
    }

    #[test]
    fn loading_renders_nothing() {
        let mut state = settled("chicken", Vec::new());
        state.is_loading = true;
        assert!(search_results(&state, &|_| false).is_none());
    }

    #[test]
    fn empty_results_differ_from_errors() {
        let (empty, _) = search_results(&settled("zzz", Vec::new()), &|_| false).unwrap();
        assert!(empty.contains("No recipes found for \"zzz\""));

        let mut failed = settled("zzz", Vec::new());
        failed.error = Some("Could not reach the recipe catalog".to_string());
        let (error, _) = search_results(&failed, &|_| false).unwrap();
        assert!(error.contains("Search failed"));
        assert!(!error.contains("No recipes found"));
    }

    #[test]
    fn cards_show_name_category_area_and_link_to_detail() {
        let results = vec![recipe("1", "Katsu"), recipe("2", "Ramen")];
        let (text, keyboard) =
            search_results(&settled("chicken", results), &|id| id == "2").unwrap();
        assert!(text.contains("*Katsu*"));
        assert!(text.contains("Chicken · Japanese"));

        let keyboard = keyboard.unwrap();
        assert_eq!(
            callbacks(&keyboard),
            vec!["detail:1", "fav:1", "detail:2", "fav:2"]
        );
        assert_eq!(keyboard.inline_keyboard[1][1].text, "♥");
    }

    #[test]
    fn detail_lists_ingredients_and_paragraphs() {
        let mut r = recipe("52772", "Teriyaki Chicken Casserole");
        r.video_url = Some("https://www.youtube.com/watch?v=4aZr5hZXP_s".to_string());
        let (text, keyboard) = detail(&r, false);
        assert!(text.contains("Ingredients \\(1\\)"));
        assert!(text.contains("• 1 tsp Salt"));
        assert!(text.contains("Boil\\.\n\nServe\\."));
        assert_eq!(keyboard.inline_keyboard.len(), 3);
        assert_eq!(keyboard.inline_keyboard[0][0].text, "♡ Add to favorites");
    }

    #[test]
    fn long_instructions_are_cut() {
        let mut r = recipe("1", "Feast");
        r.instructions = "Stir the pot slowly.\n".repeat(400);
        let (text, _) = detail(&r, true);
        assert!(text.chars().count() < 4096);
        assert!(text.ends_with('…'));
    }

    #[test]
    fn relabel_touches_only_the_matching_button() {
        let (_, keyboard) = favorites_list(&[recipe("1", "Katsu"), recipe("2", "Ramen")]);
        let keyboard = relabel(&keyboard.unwrap(), "fav:2", heart_label(false, true));
        assert_eq!(keyboard.inline_keyboard[0][1].text, "♥");
        assert_eq!(keyboard.inline_keyboard[1][1].text, "♡");
    }
}
