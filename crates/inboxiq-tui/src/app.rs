use std::path::PathBuf;

use inboxiq_core::{
    endpoint_for_user, ApiClient, Category, ChatMessage, ChatSession, ClientError, Committed,
    Composer, Config, ConnectionEvent, ConnectionManager, EmailAccount, LineInput, SelectionToken,
    Session, Tag, WsConnector,
};
use ratatui::widgets::ListState;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::tui::AppEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Login,
    Chat,
    Tags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginField {
    #[default]
    Email,
    Password,
}

#[derive(Debug, Default)]
pub struct LoginForm {
    pub email: LineInput,
    pub password: LineInput,
    pub focus: LoginField,
    pub error: Option<String>,
    pub submitting: bool,
}

impl LoginForm {
    pub fn active_mut(&mut self) -> &mut LineInput {
        match self.focus {
            LoginField::Email => &mut self.email,
            LoginField::Password => &mut self.password,
        }
    }

    pub fn toggle_focus(&mut self) {
        self.focus = match self.focus {
            LoginField::Email => LoginField::Password,
            LoginField::Password => LoginField::Email,
        };
    }
}

/// Colors offered to new tags, in order. `#RRGGBB` as the tag API expects.
pub const TAG_COLORS: [&str; 5] = ["#4caf50", "#2196f3", "#f44336", "#ff9800", "#9c27b0"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagsFocus {
    #[default]
    Tags,
    /// Typing the name of a new tag
    NewTag,
    /// Picking the account to bind the selected tag to
    Accounts,
}

/// State of the tag management screen. The tag and account lists themselves
/// live in the composer, which already keeps them fresh for suggestions.
#[derive(Debug, Default)]
pub struct TagsView {
    pub focus: TagsFocus,
    pub tag_state: ListState,
    pub account_state: ListState,
    pub new_name: LineInput,
    pub busy: bool,
    pub info: Option<String>,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub screen: Screen,
    pub input_mode: InputMode,

    pub login: LoginForm,
    pub account: Option<Session>,
    pub chat: Option<ChatSession>,

    // Selected message in the chat stream
    pub message_state: ListState,
    pub tags_view: TagsView,
    // One-line error shown in the footer until the next action
    pub notice: Option<String>,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    config: Config,
    config_path: PathBuf,
    api: ApiClient,
    events: UnboundedSender<AppEvent>,
    connection_events: UnboundedSender<ConnectionEvent>,
}

impl App {
    pub fn new(
        config: Config,
        config_path: PathBuf,
        events: UnboundedSender<AppEvent>,
        connection_events: UnboundedSender<ConnectionEvent>,
    ) -> Self {
        let api = ApiClient::new(&config.api_base_url());
        let saved_session = config.session.clone();

        let mut app = Self {
            should_quit: false,
            screen: Screen::Login,
            input_mode: InputMode::Editing,
            login: LoginForm::default(),
            account: None,
            chat: None,
            message_state: ListState::default(),
            tags_view: TagsView::default(),
            notice: None,
            animation_frame: 0,
            config,
            config_path,
            api,
            events,
            connection_events,
        };

        if let Some(session) = saved_session {
            info!(user_id = %session.user_id, "resuming saved session");
            app.start_chat(session);
        }
        app
    }

    // Login

    pub fn submit_login(&mut self) {
        if self.login.submitting {
            return;
        }
        let email = self.login.email.text().trim().to_string();
        let password = self.login.password.text().to_string();
        if email.is_empty() || password.is_empty() {
            self.login.error = Some("Email and password are required".to_string());
            return;
        }

        self.login.error = None;
        self.login.submitting = true;

        let api = self.api.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let result = api.login(&email, &password).await;
            let _ = tx.send(AppEvent::LoggedIn(result));
        });
    }

    pub fn on_logged_in(&mut self, result: Result<Session, ClientError>) {
        self.login.submitting = false;
        match result {
            Ok(session) => {
                info!(user_id = %session.user_id, "logged in");
                self.config.session = Some(session.clone());
                self.persist_config();
                self.login = LoginForm::default();
                self.start_chat(session);
            }
            Err(ClientError::Unauthorized(_)) => {
                self.login.error = Some("Invalid email or password".to_string());
            }
            Err(e) => {
                warn!(error = %e, "login failed");
                self.login.error = Some(format!("Login failed: {}", e));
            }
        }
    }

    fn start_chat(&mut self, session: Session) {
        let url = match endpoint_for_user(&self.config.ws_url(), &session.user_id) {
            Ok(url) => url,
            Err(e) => {
                self.login.error = Some(e.to_string());
                return;
            }
        };

        let manager = ConnectionManager::new(
            WsConnector,
            url,
            self.config.reconnect_delay(),
            self.connection_events.clone(),
        );
        let mut chat = ChatSession::new(manager, session.user_id.clone());
        chat.start();

        self.api = ApiClient::new(&self.config.api_base_url()).with_token(&session.token);
        self.chat = Some(chat);
        self.account = Some(session);
        self.screen = Screen::Chat;
        self.input_mode = InputMode::Editing;
        self.message_state = ListState::default();
        self.notice = None;

        // Warm both suggestion sources so the first `/` is instant.
        self.fetch_accounts();
        self.fetch_tags();
    }

    pub fn logout(&mut self) {
        if let Some(mut chat) = self.chat.take() {
            chat.end();
        }
        info!("logged out");

        self.account = None;
        self.config.session = None;
        self.persist_config();
        self.api = ApiClient::new(&self.config.api_base_url());

        self.screen = Screen::Login;
        self.input_mode = InputMode::Editing;
        self.message_state = ListState::default();
        self.tags_view = TagsView::default();
        self.notice = None;
        self.login = LoginForm::default();
    }

    /// Closes the connection before the process exits.
    pub fn shutdown(&mut self) {
        if let Some(chat) = self.chat.as_mut() {
            chat.end();
        }
    }

    fn persist_config(&self) {
        if let Err(e) = self.config.save_to(&self.config_path) {
            warn!(error = %e, path = %self.config_path.display(), "could not save config");
        }
    }

    fn handle_error(&mut self, err: ClientError, what: &str) {
        if err.is_unauthorized() {
            warn!("session rejected by the server");
            self.logout();
            self.login.error = Some("Your session has expired. Please log in again.".to_string());
            return;
        }
        warn!(error = %err, "{}", what);
        self.notice = Some(format!("{}: {}", what, err));
    }

    // Suggestion sources and tag resolution

    fn fetch_category(&self, category: Category) {
        match category {
            Category::Email => self.fetch_accounts(),
            Category::Tags => self.fetch_tags(),
        }
    }

    fn fetch_accounts(&self) {
        let api = self.api.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let _ = tx.send(AppEvent::AccountsLoaded(api.list_email_accounts().await));
        });
    }

    fn fetch_tags(&self) {
        let api = self.api.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let _ = tx.send(AppEvent::TagsLoaded(api.list_tags().await));
        });
    }

    fn resolve_tag(&self, tag_id: String, token: SelectionToken) {
        let api = self.api.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let result = api.account_for_tag(&tag_id).await;
            let _ = tx.send(AppEvent::TagResolved { token, result });
        });
    }

    pub fn on_accounts_loaded(&mut self, result: Result<Vec<EmailAccount>, ClientError>) {
        let Some(chat) = self.chat.as_mut() else { return };
        match result {
            Ok(accounts) => chat.composer_mut().set_accounts(accounts),
            Err(e) => self.handle_error(e, "Could not load email accounts"),
        }
    }

    pub fn on_tags_loaded(&mut self, result: Result<Vec<Tag>, ClientError>) {
        let Some(chat) = self.chat.as_mut() else { return };
        match result {
            Ok(tags) => {
                let len = tags.len();
                chat.composer_mut().set_tags(tags);
                clamp_selection(&mut self.tags_view.tag_state, len);
            }
            Err(e) => self.handle_error(e, "Could not load tags"),
        }
    }

    pub fn on_tag_resolved(&mut self, token: SelectionToken, result: Result<Option<EmailAccount>, ClientError>) {
        let Some(chat) = self.chat.as_mut() else { return };
        match result {
            Ok(account) => {
                chat.apply_tag_resolution(token, account.map(|a| a.address));
            }
            Err(e) => self.handle_error(e, "Could not look up the tag's email account"),
        }
    }

    // Tag management

    pub fn open_tags(&mut self) {
        if self.chat.is_none() {
            return;
        }
        self.screen = Screen::Tags;
        self.tags_view.focus = TagsFocus::Tags;
        self.tags_view.info = None;
        self.notice = None;
        let len = self.tags().len();
        clamp_selection(&mut self.tags_view.tag_state, len);
        self.fetch_tags();
        self.fetch_accounts();
    }

    pub fn close_tags(&mut self) {
        self.screen = Screen::Chat;
        self.input_mode = InputMode::Normal;
        self.tags_view.focus = TagsFocus::Tags;
        self.tags_view.new_name.clear();
    }

    pub fn tags(&self) -> &[Tag] {
        self.composer().map(|c| c.tags()).unwrap_or_default()
    }

    pub fn accounts(&self) -> &[EmailAccount] {
        self.composer().map(|c| c.accounts()).unwrap_or_default()
    }

    pub fn selected_tag(&self) -> Option<&Tag> {
        self.tags().get(self.tags_view.tag_state.selected()?)
    }

    /// Moves the selection in whichever list has focus.
    pub fn tags_move(&mut self, down: bool) {
        let (len, state) = match self.tags_view.focus {
            TagsFocus::Tags => (self.tags().len(), &mut self.tags_view.tag_state),
            TagsFocus::Accounts => (self.accounts().len(), &mut self.tags_view.account_state),
            TagsFocus::NewTag => return,
        };
        if len == 0 {
            return;
        }
        let i = match (state.selected(), down) {
            (None, _) => 0,
            (Some(i), true) => (i + 1).min(len - 1),
            (Some(i), false) => i.saturating_sub(1),
        };
        state.select(Some(i));
    }

    pub fn start_new_tag(&mut self) {
        self.tags_view.focus = TagsFocus::NewTag;
        self.tags_view.new_name.clear();
        self.tags_view.info = None;
        self.notice = None;
    }

    pub fn cancel_tag_step(&mut self) {
        self.tags_view.focus = TagsFocus::Tags;
        self.tags_view.new_name.clear();
    }

    pub fn submit_new_tag(&mut self) {
        let name = self.tags_view.new_name.text().trim().to_string();
        if name.is_empty() || self.tags_view.busy {
            return;
        }
        if self.tags().iter().any(|t| t.name.eq_ignore_ascii_case(&name)) {
            self.notice = Some(format!("Tag \"{}\" already exists", name));
            return;
        }

        // Lower priority sorts first, so new tags go to the end.
        let count = self.tags().len();
        let color = TAG_COLORS[count % TAG_COLORS.len()];
        let priority = count as i64;

        self.tags_view.busy = true;
        self.notice = None;
        let api = self.api.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let result = api.create_tag(&name, color, priority).await;
            let _ = tx.send(AppEvent::TagCreated(result));
        });
    }

    pub fn on_tag_created(&mut self, result: Result<Tag, ClientError>) {
        self.tags_view.busy = false;
        let Some(chat) = self.chat.as_mut() else { return };
        match result {
            Ok(tag) => {
                info!(tag_id = %tag.id, name = %tag.name, "created tag");
                self.tags_view.info = Some(format!("Created #{}", tag.name));
                let mut tags = chat.composer().tags().to_vec();
                tags.push(tag);
                let selected = tags.len() - 1;
                chat.composer_mut().set_tags(tags);
                self.tags_view.tag_state.select(Some(selected));
                self.tags_view.focus = TagsFocus::Tags;
                self.tags_view.new_name.clear();
            }
            Err(e) => self.handle_error(e, "Could not create tag"),
        }
    }

    /// Switches to the account list to bind the selected tag.
    pub fn start_assign(&mut self) {
        if self.selected_tag().is_none() {
            return;
        }
        if self.accounts().is_empty() {
            self.notice = Some("No email accounts connected".to_string());
            return;
        }
        self.tags_view.focus = TagsFocus::Accounts;
        self.tags_view.info = None;
        self.notice = None;
        let len = self.accounts().len();
        clamp_selection(&mut self.tags_view.account_state, len);
    }

    pub fn submit_assign(&mut self) {
        if self.tags_view.busy {
            return;
        }
        let Some(tag) = self.selected_tag().cloned() else { return };
        let Some(account) = self
            .tags_view
            .account_state
            .selected()
            .and_then(|i| self.accounts().get(i))
            .cloned()
        else {
            return;
        };

        self.tags_view.busy = true;
        let api = self.api.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let result = api.assign_tag(&account.id, &tag.id).await;
            let _ = tx.send(AppEvent::TagAssigned {
                tag_name: tag.name,
                address: account.address,
                result,
            });
        });
    }

    pub fn on_tag_assigned(&mut self, tag_name: String, address: String, result: Result<(), ClientError>) {
        self.tags_view.busy = false;
        if self.chat.is_none() {
            return;
        }
        match result {
            Ok(()) => {
                info!(tag = %tag_name, account = %address, "assigned tag");
                self.tags_view.info = Some(format!("#{} now scopes {}", tag_name, address));
                self.tags_view.focus = TagsFocus::Tags;
            }
            Err(e) => self.handle_error(e, "Could not assign tag"),
        }
    }

    // Composer

    pub fn composer(&self) -> Option<&Composer> {
        self.chat.as_ref().map(|chat| chat.composer())
    }

    /// Applies an edit to the composer and refreshes the suggestion source
    /// of any category the edit entered.
    pub fn edit(&mut self, f: impl FnOnce(&mut Composer) -> Option<Category>) {
        let Some(chat) = self.chat.as_mut() else { return };
        if let Some(category) = f(chat.composer_mut()) {
            self.fetch_category(category);
        }
    }

    pub fn commit_suggestion(&mut self) {
        let Some(chat) = self.chat.as_mut() else { return };
        match chat.composer_mut().commit() {
            Some(Committed::Category(category)) => self.fetch_category(category),
            Some(Committed::Tag { tag_id, token }) => self.resolve_tag(tag_id, token),
            Some(Committed::EmailAccount) | None => {}
        }
    }

    pub fn submit_message(&mut self) {
        let Some(chat) = self.chat.as_mut() else { return };
        match chat.submit() {
            Ok(true) => {
                self.notice = None;
                self.select_last();
            }
            Ok(false) => {}
            Err(ClientError::NotConnected) => {
                self.notice = Some("Not connected. Your message was kept.".to_string());
            }
            // The failure notice is already in the log.
            Err(_) => self.select_last(),
        }
    }

    // Messages

    pub fn selected_message(&self) -> Option<&ChatMessage> {
        let index = self.message_state.selected()?;
        self.chat.as_ref()?.log().get(index)
    }

    fn message_count(&self) -> usize {
        self.chat.as_ref().map_or(0, |chat| chat.log().len())
    }

    pub fn select_next(&mut self) {
        let len = self.message_count();
        if len > 0 {
            let i = self.message_state.selected().map_or(0, |i| i + 1);
            self.message_state.select(Some(i.min(len - 1)));
        }
    }

    pub fn select_prev(&mut self) {
        let len = self.message_count();
        if len > 0 {
            let i = self.message_state.selected().unwrap_or(len);
            self.message_state.select(Some(i.saturating_sub(1)));
        }
    }

    pub fn select_last(&mut self) {
        let len = self.message_count();
        if len > 0 {
            self.message_state.select(Some(len - 1));
        }
    }

    pub fn decide_selected(&mut self, approved: bool) {
        let Some(request_id) = self
            .selected_message()
            .and_then(|m| m.permission())
            .filter(|p| !p.decision.is_terminal())
            .map(|p| p.request_id.clone())
        else {
            return;
        };
        let Some(chat) = self.chat.as_mut() else { return };
        match chat.decide(&request_id, approved) {
            Ok(_) => self.notice = None,
            Err(ClientError::NotConnected) => {
                self.notice = Some("Not connected. The request is still waiting for your decision.".to_string());
            }
            Err(e) => self.handle_error(e, "Could not send decision"),
        }
    }

    pub fn retry_selected(&mut self) {
        let Some(tool_name) = self.selected_message().and_then(|m| m.denied_tool()).map(str::to_string) else {
            return;
        };
        let Some(chat) = self.chat.as_mut() else { return };
        match chat.retry(&tool_name) {
            Ok(()) => {
                self.notice = None;
                self.select_last();
            }
            Err(ClientError::NotConnected) => {
                self.notice = Some("Not connected. Try again once the connection is back.".to_string());
            }
            Err(e) => self.handle_error(e, "Could not request a retry"),
        }
    }

    pub fn on_connection_event(&mut self, event: ConnectionEvent) {
        let Some(chat) = self.chat.as_mut() else { return };
        let len_before = chat.log().len();
        // Keep following the newest message unless the user moved away.
        let following = self.message_state.selected().map_or(true, |i| i + 1 >= len_before);
        if chat.handle_connection_event(event) && following {
            self.select_last();
        }
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.chat.as_ref().is_some_and(|chat| chat.is_awaiting_reply()) {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }
}

/// Keeps a list selection inside `len` items, selecting the first item when
/// nothing is selected yet.
fn clamp_selection(state: &mut ListState, len: usize) {
    match (len, state.selected()) {
        (0, _) => state.select(None),
        (_, None) => state.select(Some(0)),
        (len, Some(i)) if i >= len => state.select(Some(len - 1)),
        _ => {}
    }
}
