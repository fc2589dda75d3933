use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use inboxiq_core::LineInput;
use crate::app::{App, InputMode, LoginField, Screen, TagsFocus};
use crate::tui::AppEvent;

pub fn handle_event(app: &mut App, event: AppEvent) {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => app.tick_animation(),
        AppEvent::Connection(event) => app.on_connection_event(event),
        AppEvent::LoggedIn(result) => app.on_logged_in(result),
        AppEvent::AccountsLoaded(result) => app.on_accounts_loaded(result),
        AppEvent::TagsLoaded(result) => app.on_tags_loaded(result),
        AppEvent::TagResolved { token, result } => app.on_tag_resolved(token, result),
        AppEvent::TagCreated(result) => app.on_tag_created(result),
        AppEvent::TagAssigned { tag_name, address, result } => app.on_tag_assigned(tag_name, address, result),
    }
}

fn handle_key(app: &mut App, key: KeyEvent) {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }

    match (app.screen, app.input_mode) {
        (Screen::Login, _) => handle_login(app, key),
        (Screen::Chat, InputMode::Normal) => handle_chat_normal(app, key),
        (Screen::Chat, InputMode::Editing) => handle_chat_editing(app, key),
        (Screen::Tags, _) => handle_tags(app, key),
    }
}

fn handle_login(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => app.should_quit = true,
        KeyCode::Tab | KeyCode::BackTab | KeyCode::Up | KeyCode::Down => app.login.toggle_focus(),
        KeyCode::Enter => {
            if app.login.focus == LoginField::Email {
                app.login.toggle_focus();
            } else {
                app.submit_login();
            }
        }
        code => edit_line(app.login.active_mut(), code),
    }
}

/// Plain single-line editing for form fields.
fn edit_line(line: &mut LineInput, code: KeyCode) {
    match code {
        KeyCode::Backspace => {
            line.backspace();
        }
        KeyCode::Delete => {
            line.delete();
        }
        KeyCode::Left => line.move_left(),
        KeyCode::Right => line.move_right(),
        KeyCode::Home => line.move_home(),
        KeyCode::End => line.move_end(),
        KeyCode::Char(c) => line.insert(c),
        _ => {}
    }
}

fn handle_tags(app: &mut App, key: KeyEvent) {
    match app.tags_view.focus {
        TagsFocus::Tags => match key.code {
            KeyCode::Char('j') | KeyCode::Down => app.tags_move(true),
            KeyCode::Char('k') | KeyCode::Up => app.tags_move(false),
            KeyCode::Char('n') => app.start_new_tag(),
            KeyCode::Char('a') | KeyCode::Enter => app.start_assign(),
            KeyCode::Esc | KeyCode::Char('q') => app.close_tags(),
            _ => {}
        },
        TagsFocus::NewTag => match key.code {
            KeyCode::Enter => app.submit_new_tag(),
            KeyCode::Esc => app.cancel_tag_step(),
            code => edit_line(&mut app.tags_view.new_name, code),
        },
        TagsFocus::Accounts => match key.code {
            KeyCode::Char('j') | KeyCode::Down => app.tags_move(true),
            KeyCode::Char('k') | KeyCode::Up => app.tags_move(false),
            KeyCode::Enter => app.submit_assign(),
            KeyCode::Esc => app.cancel_tag_step(),
            _ => {}
        },
    }
}

fn handle_chat_normal(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => app.should_quit = true,
        KeyCode::Char('j') | KeyCode::Down => app.select_next(),
        KeyCode::Char('k') | KeyCode::Up => app.select_prev(),
        KeyCode::Char('G') | KeyCode::End => app.select_last(),
        KeyCode::Char('y') => app.decide_selected(true),
        KeyCode::Char('n') => app.decide_selected(false),
        KeyCode::Char('r') => app.retry_selected(),
        KeyCode::Char('t') => app.open_tags(),
        KeyCode::Char('i') | KeyCode::Tab | KeyCode::Enter => app.input_mode = InputMode::Editing,
        KeyCode::Char('L') => app.logout(),
        KeyCode::Esc => app.notice = None,
        _ => {}
    }
}

fn handle_chat_editing(app: &mut App, key: KeyEvent) {
    if key.code == KeyCode::Char('k') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.edit(|composer| {
            composer.remove_context();
            None
        });
        return;
    }

    let suggesting = app.composer().is_some_and(|c| c.suggestions().is_some());
    match key.code {
        KeyCode::Up if suggesting => app.edit(|c| {
            c.highlight_prev();
            None
        }),
        KeyCode::Down if suggesting => app.edit(|c| {
            c.highlight_next();
            None
        }),
        KeyCode::Enter | KeyCode::Tab if suggesting => app.commit_suggestion(),
        KeyCode::Esc if suggesting => app.edit(|c| {
            c.cancel_suggestions();
            None
        }),
        KeyCode::Esc => app.input_mode = InputMode::Normal,
        KeyCode::Enter => app.submit_message(),
        KeyCode::Backspace => app.edit(|c| c.backspace()),
        KeyCode::Delete => app.edit(|c| c.delete()),
        KeyCode::Left => app.edit(|c| {
            c.move_left();
            None
        }),
        KeyCode::Right => app.edit(|c| {
            c.move_right();
            None
        }),
        KeyCode::Home => app.edit(|c| {
            c.move_home();
            None
        }),
        KeyCode::End => app.edit(|c| {
            c.move_end();
            None
        }),
        KeyCode::Char(ch) => app.edit(|c| c.insert_char(ch)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inboxiq_core::{ChatRole, ClientError, Config, ConnectionEvent, Decision, EmailAccount, Session, Tag};
    use tokio::sync::mpsc;

    struct Harness {
        app: App,
        _dir: tempfile::TempDir,
        _events: mpsc::UnboundedReceiver<AppEvent>,
        _connection: mpsc::UnboundedReceiver<ConnectionEvent>,
    }

    fn harness(session: Option<Session>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            // Nothing listens here; connection attempts fail quietly.
            api_base_url: Some("http://127.0.0.1:9".to_string()),
            ws_url: Some("ws://127.0.0.1:9/ws".to_string()),
            session,
            ..Config::new()
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        let app = App::new(config, dir.path().join("config.json"), tx, conn_tx);
        Harness {
            app,
            _dir: dir,
            _events: rx,
            _connection: conn_rx,
        }
    }

    fn logged_in() -> Harness {
        harness(Some(Session {
            user_id: "u1".to_string(),
            email: "me@example.com".to_string(),
            token: "jwt".to_string(),
        }))
    }

    fn press(app: &mut App, code: KeyCode) {
        handle_key(app, KeyEvent::new(code, KeyModifiers::NONE));
    }

    fn ctrl(app: &mut App, c: char) {
        handle_key(app, KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL));
    }

    fn type_text(app: &mut App, text: &str) {
        for c in text.chars() {
            press(app, KeyCode::Char(c));
        }
    }

    fn epoch(app: &App) -> u64 {
        app.chat.as_ref().unwrap().connection().epoch()
    }

    fn frame(app: &App, text: &str) -> AppEvent {
        AppEvent::Connection(ConnectionEvent::Frame {
            epoch: epoch(app),
            text: text.to_string(),
        })
    }

    fn tag(id: &str, name: &str) -> Tag {
        Tag {
            id: id.to_string(),
            name: name.to_string(),
            color: String::new(),
        }
    }

    fn account(id: &str, address: &str) -> EmailAccount {
        EmailAccount {
            id: id.to_string(),
            address: address.to_string(),
            provider_type: "gmail".to_string(),
        }
    }

    #[test]
    fn test_login_fields() {
        let mut h = harness(None);
        let app = &mut h.app;
        assert_eq!(app.screen, Screen::Login);

        type_text(app, "me@example.com");
        press(app, KeyCode::Tab);
        assert_eq!(app.login.focus, LoginField::Password);
        type_text(app, "secert");
        press(app, KeyCode::Left);
        press(app, KeyCode::Left);
        press(app, KeyCode::Backspace);
        press(app, KeyCode::Right);
        type_text(app, "e");
        assert_eq!(app.login.email.text(), "me@example.com");
        assert_eq!(app.login.password.text(), "secret");
    }

    #[test]
    fn test_empty_login_is_rejected_locally() {
        let mut h = harness(None);
        let app = &mut h.app;
        press(app, KeyCode::Enter);
        assert_eq!(app.login.focus, LoginField::Password);
        press(app, KeyCode::Enter);
        assert!(app.login.error.is_some());
        assert!(!app.login.submitting);
    }

    #[tokio::test]
    async fn test_saved_session_opens_chat() {
        let h = logged_in();
        assert_eq!(h.app.screen, Screen::Chat);
        assert_eq!(h.app.input_mode, InputMode::Editing);
        assert!(h.app.chat.is_some());
    }

    #[tokio::test]
    async fn test_enter_while_disconnected_keeps_input() {
        let mut h = logged_in();
        let app = &mut h.app;
        type_text(app, "hello");
        press(app, KeyCode::Enter);

        assert_eq!(app.composer().unwrap().input(), "hello");
        assert!(app.chat.as_ref().unwrap().log().is_empty());
        assert!(app.notice.is_some());
    }

    #[tokio::test]
    async fn test_suggestion_keys() {
        let mut h = logged_in();
        let app = &mut h.app;
        handle_event(
            app,
            AppEvent::TagsLoaded(Ok(vec![tag("1", "Work"), tag("2", "Personal")])),
        );

        type_text(app, "/tags ");
        let suggestions = app.composer().unwrap().suggestions().unwrap();
        assert_eq!(suggestions.candidates.len(), 2);

        press(app, KeyCode::Down);
        press(app, KeyCode::Enter);
        let composer = app.composer().unwrap();
        assert_eq!(composer.input(), "#Personal ");
        assert_eq!(composer.selected().unwrap().identifier, "tag-2");
        // Enter committed the suggestion; it did not leave editing.
        assert_eq!(app.input_mode, InputMode::Editing);

        ctrl(app, 'k');
        assert!(app.composer().unwrap().selected().is_none());

        type_text(app, "/t");
        press(app, KeyCode::Esc);
        assert!(app.composer().unwrap().suggestions().is_none());
        assert_eq!(app.input_mode, InputMode::Editing);
        press(app, KeyCode::Esc);
        assert_eq!(app.input_mode, InputMode::Normal);
    }

    #[tokio::test]
    async fn test_stale_tag_resolution_after_logout_is_ignored() {
        let mut h = logged_in();
        let app = &mut h.app;
        handle_event(app, AppEvent::TagsLoaded(Ok(vec![tag("1", "Work")])));
        type_text(app, "/tags ");
        press(app, KeyCode::Enter);
        let token = app.composer().unwrap().selected().unwrap().token();

        press(app, KeyCode::Esc);
        press(app, KeyCode::Char('L'));
        assert_eq!(app.screen, Screen::Login);

        handle_event(app, AppEvent::TagResolved { token, result: Ok(None) });
        assert!(app.chat.is_none());
    }

    #[tokio::test]
    async fn test_normal_mode_selection_and_decisions() {
        let mut h = logged_in();
        let app = &mut h.app;
        let opened = AppEvent::Connection(ConnectionEvent::Opened { epoch: epoch(app) });
        handle_event(app, opened);
        let greeting = frame(app, "Hi! How can I help?");
        handle_event(app, greeting);
        let request = frame(
            app,
            r#"{"type":"permission_request","action":"send an email to bob@example.com","request_id":"r-1"}"#,
        );
        handle_event(app, request);
        press(app, KeyCode::Esc);
        assert_eq!(app.input_mode, InputMode::Normal);
        assert_eq!(app.message_state.selected(), Some(1));

        press(app, KeyCode::Char('k'));
        assert_eq!(app.selected_message().unwrap().role, ChatRole::Assistant);
        assert!(app.selected_message().unwrap().permission().is_none());

        // `y` on a plain message does nothing.
        press(app, KeyCode::Char('y'));
        press(app, KeyCode::Char('j'));
        let decision = app.selected_message().unwrap().permission().unwrap().decision;
        assert_eq!(decision, Decision::Pending);

        press(app, KeyCode::Char('i'));
        assert_eq!(app.input_mode, InputMode::Editing);
    }

    #[tokio::test]
    async fn test_unauthorized_returns_to_login() {
        let mut h = logged_in();
        let app = &mut h.app;
        handle_event(
            app,
            AppEvent::AccountsLoaded(Err(inboxiq_core::ClientError::Unauthorized("expired".to_string()))),
        );
        assert_eq!(app.screen, Screen::Login);
        assert!(app.chat.is_none());
        assert!(app.login.error.is_some());
    }

    #[tokio::test]
    async fn test_ctrl_c_quits_anywhere() {
        let mut h = logged_in();
        ctrl(&mut h.app, 'c');
        assert!(h.app.should_quit);
    }

    #[tokio::test]
    async fn test_create_tag_from_tags_screen() {
        let mut h = logged_in();
        let app = &mut h.app;
        handle_event(app, AppEvent::TagsLoaded(Ok(vec![tag("1", "Work")])));

        press(app, KeyCode::Esc);
        press(app, KeyCode::Char('t'));
        assert_eq!(app.screen, Screen::Tags);
        assert_eq!(app.selected_tag().unwrap().name, "Work");

        press(app, KeyCode::Char('n'));
        assert_eq!(app.tags_view.focus, TagsFocus::NewTag);
        // `j` and `q` are text while naming a tag.
        type_text(app, "jq");
        press(app, KeyCode::Backspace);
        press(app, KeyCode::Backspace);

        type_text(app, "work");
        press(app, KeyCode::Enter);
        assert!(app.notice.as_deref().unwrap().contains("already exists"));
        assert!(!app.tags_view.busy);

        app.tags_view.new_name.set("Finance");
        press(app, KeyCode::Enter);
        assert!(app.tags_view.busy);

        handle_event(
            app,
            AppEvent::TagCreated(Ok(Tag {
                id: "12".to_string(),
                name: "Finance".to_string(),
                color: "#2196f3".to_string(),
            })),
        );
        assert!(!app.tags_view.busy);
        assert_eq!(app.tags_view.focus, TagsFocus::Tags);
        assert_eq!(app.selected_tag().unwrap().id, "12");
        assert!(app.tags_view.new_name.is_empty());

        // The new tag is offered by `/tags` right away.
        press(app, KeyCode::Esc);
        assert_eq!(app.screen, Screen::Chat);
        press(app, KeyCode::Char('i'));
        type_text(app, "/tags fin");
        let suggestions = app.composer().unwrap().suggestions().unwrap();
        assert_eq!(suggestions.candidates.len(), 1);
    }

    #[tokio::test]
    async fn test_assign_tag_to_account() {
        let mut h = logged_in();
        let app = &mut h.app;
        handle_event(app, AppEvent::TagsLoaded(Ok(vec![tag("1", "Work"), tag("2", "Personal")])));
        handle_event(
            app,
            AppEvent::AccountsLoaded(Ok(vec![account("3", "me@gmail.com"), account("4", "work@corp.com")])),
        );

        press(app, KeyCode::Esc);
        press(app, KeyCode::Char('t'));
        press(app, KeyCode::Char('a'));
        assert_eq!(app.tags_view.focus, TagsFocus::Accounts);
        press(app, KeyCode::Char('j'));
        assert_eq!(app.tags_view.account_state.selected(), Some(1));
        press(app, KeyCode::Enter);
        assert!(app.tags_view.busy);

        handle_event(
            app,
            AppEvent::TagAssigned {
                tag_name: "Work".to_string(),
                address: "work@corp.com".to_string(),
                result: Err(ClientError::Api {
                    status: 409,
                    message: "Tag is already assigned to another email account".to_string(),
                }),
            },
        );
        assert!(!app.tags_view.busy);
        assert!(app.notice.as_deref().unwrap().contains("already assigned"));
        assert_eq!(app.tags_view.focus, TagsFocus::Accounts);

        handle_event(
            app,
            AppEvent::TagAssigned {
                tag_name: "Work".to_string(),
                address: "work@corp.com".to_string(),
                result: Ok(()),
            },
        );
        assert_eq!(app.tags_view.focus, TagsFocus::Tags);
        assert_eq!(app.tags_view.info.as_deref(), Some("#Work now scopes work@corp.com"));
    }

    #[tokio::test]
    async fn test_assign_without_accounts_stays_on_tag_list() {
        let mut h = logged_in();
        let app = &mut h.app;
        handle_event(app, AppEvent::TagsLoaded(Ok(vec![tag("1", "Work")])));
        press(app, KeyCode::Esc);
        press(app, KeyCode::Char('t'));

        press(app, KeyCode::Enter);
        assert_eq!(app.tags_view.focus, TagsFocus::Tags);
        assert!(app.notice.is_some());
    }

    #[tokio::test]
    async fn test_expired_session_while_creating_tag_returns_to_login() {
        let mut h = logged_in();
        let app = &mut h.app;
        press(app, KeyCode::Esc);
        press(app, KeyCode::Char('t'));
        press(app, KeyCode::Char('n'));
        type_text(app, "Work");
        press(app, KeyCode::Enter);

        handle_event(app, AppEvent::TagCreated(Err(ClientError::Unauthorized("expired".to_string()))));
        assert_eq!(app.screen, Screen::Login);
        assert!(app.chat.is_none());
        assert!(!app.tags_view.busy);
    }
}
