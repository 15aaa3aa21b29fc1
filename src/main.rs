use dotenv::dotenv;
use std::sync::Arc;
use std::time::Duration;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::dispatching::*;
use teloxide::types::{ChatAction, InlineKeyboardMarkup, InputFile, ParseMode};
use teloxide::{prelude::*, utils::command::BotCommands};

mod catalog;
mod config;
mod db;
mod favorites;
mod recipe;
mod search;
mod session;
mod view;

use catalog::{CatalogClient, RecipeSource};
use config::Config;
use recipe::Recipe;
use search::SearchState;
use session::{ChatSession, Sessions};
use view::Action;

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
type MyDialogue = Dialogue<State, InMemStorage<State>>;

#[derive(BotCommands, Clone)]
#[command(
    rename_rule = "lowercase",
    description = "Send any dish or ingredient to search for it. These commands are supported:"
)]
enum Command {
    #[command(description = "Display this text.")]
    Help,
    #[command(description = "Start over with a suggested search.")]
    Start,
    #[command(description = "Search recipes right away, e.g. /search pasta.")]
    Search(String),
    #[command(description = "Clear the current search.")]
    Clear,
    #[command(description = "Switch between your favorites and the search.")]
    Favorites,
    #[command(description = "Show a recipe by id, e.g. /recipe 52772.")]
    Recipe(String),
    #[command(description = "Add or remove a recipe from your favorites by id.")]
    Fav(String),
    #[command(description = "Get the video link of a recipe by id.")]
    Video(String),
    #[command(description = "Propose one of your favorites at random.")]
    Surprise,
}

#[derive(Clone, Default)]
pub enum State {
    #[default]
    Searching,
    BrowsingFavorites,
}

#[tokio::main]
async fn main() {
    // Load all env variables from .env file.
    dotenv().ok();
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init();
    log::info!("Starting bot...");

    if let Err(e) = run().await {
        log::error!("Bot stopped: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::load()?;
    let source: Arc<dyn RecipeSource> =
        Arc::new(CatalogClient::new(&config.catalog_url, config.http_timeout)?);

    log::info!("Loading database");
    let conn = db::open_db(&config.db_path)?;
    let dialogues = InMemStorage::<State>::new();
    let chats = Arc::new(Chats {
        sessions: Sessions::new(source, conn, config.debounce),
        dialogues: dialogues.clone(),
    });
    spawn_eviction(chats.clone(), config.session_idle);

    let bot = Bot::from_env();
    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        log::warn!("Could not register bot commands: {}", e);
    }

    let commands = dptree::entry()
        .filter_command::<Command>()
        .branch(dptree::case![Command::Help].endpoint(help))
        .branch(dptree::case![Command::Start].endpoint(start))
        .branch(dptree::case![Command::Search(term)].endpoint(search))
        .branch(dptree::case![Command::Clear].endpoint(clear))
        .branch(dptree::case![Command::Favorites].endpoint(switch_view))
        .branch(dptree::case![Command::Recipe(id)].endpoint(recipe))
        .branch(dptree::case![Command::Fav(id)].endpoint(fav))
        .branch(dptree::case![Command::Video(id)].endpoint(video))
        .branch(dptree::case![Command::Surprise].endpoint(surprise));

    let typing = dptree::case![State::Searching]
        .filter_map(search_term)
        .endpoint(type_term);

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .enter_dialogue::<Message, InMemStorage<State>, State>()
                .branch(commands)
                .branch(typing.clone())
                .branch(dptree::case![State::BrowsingFavorites].endpoint(remind_favorites)),
        )
        .branch(
            Update::filter_edited_message()
                .enter_dialogue::<Message, InMemStorage<State>, State>()
                .branch(typing),
        )
        .branch(Update::filter_callback_query().endpoint(button));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![chats, Arc::new(config), dialogues])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
    Ok(())
}

/// Free text is a search term; unknown commands are not.
fn search_term(msg: Message) -> Option<String> {
    msg.text()
        .filter(|text| !text.starts_with('/'))
        .map(str::to_string)
}

/// Only the search view shows search results.
fn should_post(state: &State) -> bool {
    matches!(state, State::Searching)
}

/// Chat sessions together with the view each chat is in.
struct Chats {
    sessions: Sessions,
    dialogues: Arc<InMemStorage<State>>,
}

impl Chats {
    /// Open the chat's session, starting the task that posts its search
    /// results the first time.
    fn open(&self, bot: &Bot, chat: ChatId) -> Arc<ChatSession> {
        let (session, created) = self.sessions.get_or_open(chat.0);
        if created {
            let mut results = session.search.subscribe();
            let bot = bot.clone();
            let dialogues = self.dialogues.clone();
            // Weak so an evicted session drops its controller, which closes
            // the channel and ends this task.
            let watched = Arc::downgrade(&session);
            tokio::spawn(async move {
                while results.changed().await.is_ok() {
                    let state = results.borrow_and_update().clone();
                    let Some(session) = watched.upgrade() else {
                        break;
                    };
                    if !shows_search(&dialogues, chat).await {
                        log::debug!("Chat {} is viewing favorites, holding results back", chat);
                        continue;
                    }
                    if let Err(e) = send_search(&bot, chat, &session, &state).await {
                        log::error!("Failed to send results to chat {}: {}", chat, e);
                    }
                }
                log::debug!("Results watcher for chat {} stopped", chat);
            });
        }
        session
    }
}

async fn shows_search(dialogues: &Arc<InMemStorage<State>>, chat: ChatId) -> bool {
    match MyDialogue::new(dialogues.clone(), chat).get().await {
        Ok(state) => should_post(&state.unwrap_or_default()),
        Err(e) => {
            log::warn!("Could not read the view of chat {}: {}", chat, e);
            true
        }
    }
}

fn spawn_eviction(chats: Arc<Chats>, idle: Duration) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval((idle / 4).max(Duration::from_secs(15)));
        loop {
            tick.tick().await;
            let closed = chats.sessions.evict_idle(idle);
            if closed > 0 {
                log::info!("Closed {} idle sessions, {} still open", closed, chats.sessions.len());
            }
        }
    });
}

/// Back to the idle search. The watcher posts the change; an already idle
/// search is re-sent here since nothing gets published for it.
async fn reset_search(bot: &Bot, chat: ChatId, session: &ChatSession) -> HandlerResult {
    if session.search.clear() {
        return Ok(());
    }
    send_search(bot, chat, session, &session.search.state()).await
}

async fn send_markdown(
    bot: &Bot,
    chat: ChatId,
    text: String,
    keyboard: Option<InlineKeyboardMarkup>,
) -> HandlerResult {
    let request = bot.send_message(chat, text).parse_mode(ParseMode::MarkdownV2);
    match keyboard {
        Some(keyboard) => request.reply_markup(keyboard).await?,
        None => request.await?,
    };
    Ok(())
}

async fn send_search(
    bot: &Bot,
    chat: ChatId,
    session: &ChatSession,
    state: &SearchState,
) -> HandlerResult {
    match view::search_results(state, &|id| session.is_favorite(id)) {
        Some((text, keyboard)) => send_markdown(bot, chat, text, keyboard).await,
        None => {
            bot.send_chat_action(chat, ChatAction::Typing).await?;
            Ok(())
        }
    }
}

async fn send_detail(bot: &Bot, chat: ChatId, recipe: &Recipe, favorite: bool) -> HandlerResult {
    if let Ok(url) = reqwest::Url::parse(&recipe.thumbnail_url) {
        if let Err(e) = bot
            .send_photo(chat, InputFile::url(url))
            .caption(view::caption(recipe))
            .parse_mode(ParseMode::MarkdownV2)
            .await
        {
            log::warn!("Failed to send picture of {}: {}", recipe.id, e);
        }
    }
    let (text, keyboard) = view::detail(recipe, favorite);
    send_markdown(bot, chat, text, Some(keyboard)).await
}

/// Detail view of `id`. A favorite can still be shown when the catalog is
/// unreachable since its full record is stored.
async fn show_detail(bot: &Bot, chat: ChatId, session: &ChatSession, id: &str) -> HandlerResult {
    let recipe = match session.open_detail(id).await {
        Ok(recipe) => recipe,
        Err(e) => {
            let stored = session.favorites().get(id.trim()).cloned();
            match stored {
                Some(recipe) => {
                    log::warn!("Showing stored copy of {}: {}", id, e);
                    recipe
                }
                None => {
                    log::info!("Detail of {:?} failed: {}", id, e);
                    return send_markdown(bot, chat, view::error(&e.user_message()), None).await;
                }
            }
        }
    };
    let favorite = session.is_favorite(&recipe.id);
    send_detail(bot, chat, &recipe, favorite).await
}

async fn help(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, Command::descriptions().to_string())
        .await?;
    Ok(())
}

async fn start(
    bot: Bot,
    dialogue: MyDialogue,
    chats: Arc<Chats>,
    config: Arc<Config>,
    msg: Message,
) -> HandlerResult {
    dialogue.update(State::Searching).await?;
    let session = chats.open(&bot, msg.chat.id);
    send_markdown(
        &bot,
        msg.chat.id,
        view::plain("Welcome! Send the name of a dish or an ingredient to find recipes. /help lists everything else."),
        None,
    )
    .await?;
    session.search.search_now(&config.default_term);
    Ok(())
}

async fn search(
    bot: Bot,
    dialogue: MyDialogue,
    chats: Arc<Chats>,
    msg: Message,
    term: String,
) -> HandlerResult {
    dialogue.update(State::Searching).await?;
    let session = chats.open(&bot, msg.chat.id);
    if term.trim().is_empty() {
        return reset_search(&bot, msg.chat.id, &session).await;
    }
    session.search.search_now(&term);
    Ok(())
}

async fn type_term(bot: Bot, chats: Arc<Chats>, msg: Message, term: String) -> HandlerResult {
    chats.open(&bot, msg.chat.id).search.set_term(&term);
    Ok(())
}

async fn clear(bot: Bot, dialogue: MyDialogue, chats: Arc<Chats>, msg: Message) -> HandlerResult {
    dialogue.update(State::Searching).await?;
    let session = chats.open(&bot, msg.chat.id);
    reset_search(&bot, msg.chat.id, &session).await
}

async fn switch_view(
    bot: Bot,
    dialogue: MyDialogue,
    chats: Arc<Chats>,
    msg: Message,
    state: State,
) -> HandlerResult {
    let session = chats.open(&bot, msg.chat.id);
    match state {
        State::Searching => {
            dialogue.update(State::BrowsingFavorites).await?;
            let (text, keyboard) = view::favorites_list(session.favorites().recipes());
            send_markdown(&bot, msg.chat.id, text, keyboard).await
        }
        State::BrowsingFavorites => {
            dialogue.update(State::Searching).await?;
            send_search(&bot, msg.chat.id, &session, &session.search.state()).await
        }
    }
}

async fn remind_favorites(bot: Bot, msg: Message) -> HandlerResult {
    send_markdown(
        &bot,
        msg.chat.id,
        view::plain("You are looking at your favorites. Send /favorites to get back to the search."),
        None,
    )
    .await
}

async fn recipe(bot: Bot, chats: Arc<Chats>, msg: Message, id: String) -> HandlerResult {
    let session = chats.open(&bot, msg.chat.id);
    show_detail(&bot, msg.chat.id, &session, &id).await
}

async fn fav(bot: Bot, chats: Arc<Chats>, msg: Message, id: String) -> HandlerResult {
    let session = chats.open(&bot, msg.chat.id);
    let text = match session.toggle_favorite(id.trim()).await {
        Ok((recipe, true)) => view::plain(&format!(
            "Added {} to your favorites ({}).",
            recipe.name,
            session.favorites().len()
        )),
        Ok((recipe, false)) => view::plain(&format!(
            "Removed {} from your favorites ({}).",
            recipe.name,
            session.favorites().len()
        )),
        Err(e) => view::error(&e.user_message()),
    };
    send_markdown(&bot, msg.chat.id, text, None).await
}

async fn video(bot: Bot, chats: Arc<Chats>, msg: Message, id: String) -> HandlerResult {
    let session = chats.open(&bot, msg.chat.id);
    let text = match session.resolve(id.trim()).await {
        Ok(recipe) => view::video_link(&recipe),
        Err(e) => view::error(&e.user_message()),
    };
    send_markdown(&bot, msg.chat.id, text, None).await
}

async fn surprise(bot: Bot, chats: Arc<Chats>, msg: Message) -> HandlerResult {
    let session = chats.open(&bot, msg.chat.id);
    let picked = session
        .favorites()
        .pick_random(&mut rand::thread_rng())
        .cloned();
    match picked {
        Some(recipe) => send_detail(&bot, msg.chat.id, &recipe, true).await,
        None => {
            send_markdown(
                &bot,
                msg.chat.id,
                view::plain("You have no favorites yet. Tap ♡ on a recipe first."),
                None,
            )
            .await
        }
    }
}

async fn button(bot: Bot, chats: Arc<Chats>, q: CallbackQuery) -> HandlerResult {
    let chat = q
        .message
        .as_ref()
        .map(|m| m.chat().id)
        .unwrap_or_else(|| q.from.id.into());
    let session = chats.open(&bot, chat);

    let Some(action) = q.data.as_deref().and_then(Action::decode) else {
        log::debug!("Ignoring unknown button data {:?}", q.data);
        bot.answer_callback_query(q.id.clone()).await?;
        return Ok(());
    };

    match &action {
        Action::Detail(id) => {
            bot.answer_callback_query(q.id.clone()).await?;
            show_detail(&bot, chat, &session, id).await?;
        }
        Action::ToggleFavorite(id) | Action::ToggleFavoriteInDetail(id) => {
            let compact = matches!(action, Action::ToggleFavorite(_));
            match session.toggle_favorite(id).await {
                Ok((recipe, now)) => {
                    let note = if now {
                        format!("Added {} to your favorites", recipe.name)
                    } else {
                        format!("Removed {} from your favorites", recipe.name)
                    };
                    bot.answer_callback_query(q.id.clone()).text(note).await?;

                    let message = q.message.as_ref().and_then(|m| m.regular_message());
                    if let Some(message) = message {
                        if let Some(markup) = message.reply_markup() {
                            let markup =
                                view::relabel(markup, &action.encode(), view::heart_label(now, compact));
                            bot.edit_message_reply_markup(chat, message.id)
                                .reply_markup(markup)
                                .await?;
                        }
                    }
                }
                Err(e) => {
                    bot.answer_callback_query(q.id.clone())
                        .text(e.user_message())
                        .show_alert(true)
                        .await?;
                }
            }
        }
        Action::BackToResults => {
            bot.answer_callback_query(q.id.clone()).await?;
            send_search(&bot, chat, &session, &session.search.state()).await?;
        }
    }
    Ok(())
}
