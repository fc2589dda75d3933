use chrono::Local;
use inboxiq_core::{
    Category, ChatMessage, ChatRole, ConnectionState, ContextKind, Decision, MessageKind, ParsedIntent,
};
use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
};
use crate::app::{App, InputMode, LoginField, Screen, TagsFocus};

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, footer
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    match app.screen {
        Screen::Login => render_login(app, frame, body_area),
        Screen::Chat => render_chat(app, frame, body_area),
        Screen::Tags => render_tags(app, frame, body_area),
    }

    render_footer(app, frame, footer_area);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let mut spans = vec![Span::styled(" InboxIQ ", Style::default().fg(Color::Cyan).bold())];

    if let Some(account) = &app.account {
        spans.push(Span::styled(format!(" {} ", account.email), Style::default().fg(Color::White)));
    }
    if let Some(chat) = &app.chat {
        let state = chat.connection().state();
        let color = match state {
            ConnectionState::Open => Color::Green,
            ConnectionState::Connecting => Color::Yellow,
            ConnectionState::Reconnecting => Color::Red,
            ConnectionState::Closed => Color::Gray,
        };
        spans.push(Span::styled(format!(" ● {} ", state.label()), Style::default().fg(color)));
    }
    spans.push(Span::styled(
        format!("v{}", env!("CARGO_PKG_VERSION")),
        Style::default().fg(Color::Gray),
    ));

    let header = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let (mode_text, mode_style) = match (app.screen, app.input_mode) {
        (Screen::Login, _) => (" LOGIN ", Style::default().bg(Color::Magenta).fg(Color::White)),
        (Screen::Chat, InputMode::Normal) => (" NORMAL ", Style::default().bg(Color::Blue).fg(Color::White)),
        (Screen::Chat, InputMode::Editing) => (" INSERT ", Style::default().bg(Color::Yellow).fg(Color::Black)),
        (Screen::Tags, _) => (" TAGS ", Style::default().bg(Color::Green).fg(Color::Black)),
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);
    let hint = |key: &'static str, label: &'static str| {
        [Span::styled(key, key_style), Span::styled(label, label_style)]
    };

    let mut hints: Vec<Span> = Vec::new();
    match (app.screen, app.input_mode) {
        (Screen::Login, _) => {
            hints.extend(hint(" Tab ", " switch field "));
            hints.extend(hint(" Enter ", " log in "));
            hints.extend(hint(" Esc ", " quit "));
        }
        (Screen::Chat, InputMode::Editing) => {
            let composer = app.composer();
            if composer.is_some_and(|c| c.suggestions().is_some()) {
                hints.extend(hint(" ↑/↓ ", " choose "));
                hints.extend(hint(" Enter ", " select "));
                hints.extend(hint(" Esc ", " dismiss "));
            } else {
                hints.extend(hint(" Enter ", " send "));
                hints.extend(hint(" / ", " context "));
                if composer.is_some_and(|c| c.selected().is_some()) {
                    hints.extend(hint(" Ctrl+K ", " remove context "));
                }
                hints.extend(hint(" Esc ", " stop typing "));
            }
        }
        (Screen::Chat, InputMode::Normal) => {
            hints.extend(hint(" j/k ", " select "));
            let selected = app.selected_message();
            if selected.is_some_and(|m| m.is_pending_request()) {
                hints.extend(hint(" y/n ", " approve/deny "));
            }
            if selected.is_some_and(|m| m.denied_tool().is_some()) {
                hints.extend(hint(" r ", " retry "));
            }
            hints.extend(hint(" i ", " type "));
            hints.extend(hint(" t ", " tags "));
            hints.extend(hint(" L ", " log out "));
            hints.extend(hint(" q ", " quit "));
        }
        (Screen::Tags, _) => match app.tags_view.focus {
            TagsFocus::Tags => {
                hints.extend(hint(" j/k ", " select "));
                hints.extend(hint(" n ", " new tag "));
                hints.extend(hint(" a ", " assign to account "));
                hints.extend(hint(" Esc ", " back "));
            }
            TagsFocus::NewTag => {
                hints.extend(hint(" Enter ", " create "));
                hints.extend(hint(" Esc ", " cancel "));
            }
            TagsFocus::Accounts => {
                hints.extend(hint(" j/k ", " select "));
                hints.extend(hint(" Enter ", " assign "));
                hints.extend(hint(" Esc ", " cancel "));
            }
        },
    }

    let status = app
        .notice
        .as_deref()
        .map(|notice| Span::styled(format!(" {} ", notice), Style::default().fg(Color::Red)))
        .or_else(|| {
            app.chat
                .as_ref()
                .and_then(|chat| chat.connection().status())
                .map(|status| Span::styled(format!(" {} ", status), Style::default().fg(Color::Yellow)))
        });

    let footer_content = Line::from(
        vec![
            Span::styled(mode_text, mode_style),
            Span::styled(" ", label_style),
        ]
        .into_iter()
        .chain(hints)
        .chain(status)
        .collect::<Vec<_>>(),
    );

    let footer = Paragraph::new(footer_content).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}

fn render_login(app: &App, frame: &mut Frame, area: Rect) {
    let popup_width = 56.min(area.width.saturating_sub(4));
    let popup_height = 11.min(area.height);
    let popup_x = area.x + (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = area.y + (area.height.saturating_sub(popup_height)) / 2;
    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" Log in to InboxIQ ");
    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);
    if inner.height < 7 {
        return;
    }

    let form = &app.login;
    let field_style = |field: LoginField| {
        if form.focus == field {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default().fg(Color::White)
        }
    };

    let row = |offset: u16| Rect::new(inner.x, inner.y + offset, inner.width, 1);
    let width = inner.width as usize;

    frame.render_widget(Paragraph::new("Email").style(field_style(LoginField::Email)), row(0));
    let (email, email_x) = visible_slice(form.email.text(), form.email.cursor(), width);
    frame.render_widget(Paragraph::new(email).style(Style::default().fg(Color::Cyan)), row(1));

    frame.render_widget(Paragraph::new("Password").style(field_style(LoginField::Password)), row(3));
    // Mask the password
    let masked = "*".repeat(form.password.text().chars().count());
    let (password, password_x) = visible_slice(&masked, form.password.cursor(), width);
    frame.render_widget(Paragraph::new(password).style(Style::default().fg(Color::Cyan)), row(4));

    let status = if form.submitting {
        Span::styled("Logging in...", Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC))
    } else if let Some(error) = &form.error {
        Span::styled(error.clone(), Style::default().fg(Color::Red))
    } else {
        Span::styled("Enter to continue, Tab to switch field", Style::default().fg(Color::DarkGray))
    };
    frame.render_widget(Paragraph::new(Line::from(status)), row(6));

    let (cursor_row, cursor_x) = match form.focus {
        LoginField::Email => (row(1), email_x),
        LoginField::Password => (row(4), password_x),
    };
    frame.set_cursor_position((cursor_row.x + cursor_x, cursor_row.y));
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    let has_context = app.composer().is_some_and(|c| c.selected().is_some());

    let [messages_area, context_area, input_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(if has_context { 1 } else { 0 }),
        Constraint::Length(3),
    ])
    .areas(area);

    render_messages(app, frame, messages_area);
    if has_context {
        render_context_chip(app, frame, context_area);
    }
    render_input(app, frame, input_area);
    render_suggestions(app, frame, input_area);
}

fn render_messages(app: &mut App, frame: &mut Frame, area: Rect) {
    let focused = app.input_mode == InputMode::Normal;
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if focused { Color::Cyan } else { Color::DarkGray }))
        .title(" Conversation ");

    // Inner width minus the highlight symbol
    let width = area.width.saturating_sub(4).max(1) as usize;
    let items: Vec<ListItem<'static>> = {
        let Some(chat) = app.chat.as_ref() else { return };

        if chat.log().is_empty() && !chat.is_awaiting_reply() {
            let placeholder = Paragraph::new(Span::styled(
                "Ask about your inbox. Type / to attach an email account or tag.",
                Style::default().fg(Color::DarkGray),
            ))
            .wrap(Wrap { trim: true })
            .block(block);
            frame.render_widget(placeholder, area);
            return;
        }

        let mut items: Vec<ListItem> = chat.log().iter().map(|m| message_item(m, width)).collect();
        if chat.is_awaiting_reply() {
            // Animated ellipsis: cycles through ".", "..", "..."
            let dots = ".".repeat((app.animation_frame as usize) + 1);
            items.push(ListItem::new(Line::from(Span::styled(
                format!("Assistant is typing{}", dots),
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            ))));
        }
        items
    };

    let list = List::new(items)
        .block(block)
        .highlight_style(Style::default().add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, area, &mut app.message_state);
}

fn message_item(message: &ChatMessage, width: usize) -> ListItem<'static> {
    let (label, color) = match message.role {
        ChatRole::User => ("You", Color::Cyan),
        ChatRole::Assistant => ("Assistant", Color::Yellow),
    };
    let time = message.timestamp.with_timezone(&Local).format("%H:%M").to_string();

    let mut lines = vec![Line::from(vec![
        Span::styled(label, Style::default().fg(color).add_modifier(Modifier::BOLD)),
        Span::styled(format!("  {}", time), Style::default().fg(Color::DarkGray)),
    ])];

    match &message.kind {
        MessageKind::Plain => {
            lines.extend(wrap_text(&message.content, width).into_iter().map(Line::from));
        }
        MessageKind::PermissionRequest { permission, intent } => {
            lines.push(Line::from(Span::styled(
                "Permission required",
                Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD),
            )));
            lines.extend(wrap_text(&intent.summary(), width).into_iter().map(Line::from));
            if let ParsedIntent::SendEmail { body: Some(body), .. } = intent {
                lines.extend(
                    wrap_text(body, width.saturating_sub(2).max(1))
                        .into_iter()
                        .map(|l| Line::from(Span::styled(format!("  {}", l), Style::default().fg(Color::Gray)))),
                );
            }
            let decision = match permission.decision {
                Decision::Pending => Span::styled(
                    "[y] approve  [n] deny",
                    Style::default().fg(Color::Yellow),
                ),
                Decision::Approved => Span::styled("Approved", Style::default().fg(Color::Green)),
                Decision::Denied => Span::styled("Denied", Style::default().fg(Color::Red)),
            };
            lines.push(Line::from(decision));
        }
        MessageKind::PermissionDenied { tool_name } => {
            lines.extend(
                wrap_text(&message.content, width)
                    .into_iter()
                    .map(|l| Line::from(Span::styled(l, Style::default().fg(Color::Red)))),
            );
            lines.push(Line::from(Span::styled(
                format!("[r] ask to retry {}", tool_name),
                Style::default().fg(Color::DarkGray),
            )));
        }
    }
    lines.push(Line::default());

    ListItem::new(Text::from(lines))
}

fn render_context_chip(app: &App, frame: &mut Frame, area: Rect) {
    let Some(context) = app.composer().and_then(|c| c.selected()) else {
        return;
    };

    let mut spans = vec![Span::styled(" Context: ", Style::default().fg(Color::DarkGray))];
    match context.kind {
        ContextKind::EmailAccount => {
            spans.push(Span::styled(context.display_value.clone(), Style::default().fg(Color::Green)));
        }
        ContextKind::Tag => {
            spans.push(Span::styled(format!("#{}", context.display_value), Style::default().fg(Color::Magenta)));
            if let Some(address) = &context.resolved_account_address {
                spans.push(Span::styled(format!(" → {}", address), Style::default().fg(Color::Green)));
            }
        }
    }
    spans.push(Span::styled("  Ctrl+K to remove", Style::default().fg(Color::DarkGray)));

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let Some(chat) = app.chat.as_ref() else { return };
    let composer = chat.composer();

    let editing = app.input_mode == InputMode::Editing;
    let title = if chat.is_open() { " Message " } else { " Message (offline) " };
    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if editing { Color::Yellow } else { Color::DarkGray }))
        .title(title);

    // Inner width = total width - 2 (for borders)
    let inner_width = area.width.saturating_sub(2) as usize;
    let (visible_text, cursor_x) = visible_slice(composer.input(), composer.cursor(), inner_width);

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(input_block);
    frame.render_widget(input, area);

    // Show cursor when editing
    if editing {
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_suggestions(app: &App, frame: &mut Frame, input_area: Rect) {
    let Some(state) = app.composer().and_then(|c| c.suggestions()) else {
        return;
    };

    let popup_height = (state.candidates.len().max(1) as u16 + 2).min(8).min(input_area.y);
    if popup_height < 3 {
        return;
    }
    let popup_width = 50.min(input_area.width);
    let popup_area = Rect::new(input_area.x, input_area.y - popup_height, popup_width, popup_height);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let title = match state.category {
        Some(category) => format!(" {} ", category.display_name()),
        None => " Attach context ".to_string(),
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(title);

    if state.candidates.is_empty() {
        let text = match (state.category, state.filter.trim().is_empty()) {
            (Some(Category::Email), true) => "No email accounts connected",
            (Some(Category::Tags), true) => "No tags yet",
            _ => "No matches",
        };
        let empty = Paragraph::new(text).style(Style::default().fg(Color::DarkGray)).block(block);
        frame.render_widget(empty, popup_area);
        return;
    }

    let items: Vec<ListItem> = state
        .candidates
        .iter()
        .map(|candidate| ListItem::new(format!(" {} ", candidate.label())))
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    let mut list_state = ListState::default().with_selected(Some(state.highlighted));
    frame.render_stateful_widget(list, popup_area, &mut list_state);
}

fn render_tags(app: &mut App, frame: &mut Frame, area: Rect) {
    let naming = app.tags_view.focus == TagsFocus::NewTag;
    let [lists_area, status_area, input_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(1),
        Constraint::Length(if naming { 3 } else { 0 }),
    ])
    .areas(area);
    let [tags_area, accounts_area] =
        Layout::horizontal([Constraint::Percentage(50), Constraint::Percentage(50)]).areas(lists_area);

    let focus = app.tags_view.focus;
    let border = |active: bool| Style::default().fg(if active { Color::Cyan } else { Color::DarkGray });
    let highlight = Style::default()
        .bg(Color::Blue)
        .fg(Color::White)
        .add_modifier(Modifier::BOLD);

    let tag_items: Vec<ListItem> = app
        .tags()
        .iter()
        .map(|tag| {
            ListItem::new(Line::from(vec![
                Span::styled("● ", Style::default().fg(tag_color(&tag.color))),
                Span::raw(tag.name.clone()),
            ]))
        })
        .collect();
    let tags_block = Block::default()
        .borders(Borders::ALL)
        .border_style(border(focus != TagsFocus::Accounts))
        .title(" Tags ");
    if tag_items.is_empty() {
        let empty = Paragraph::new("No tags yet. Press n to create one.")
            .style(Style::default().fg(Color::DarkGray))
            .block(tags_block);
        frame.render_widget(empty, tags_area);
    } else {
        let list = List::new(tag_items)
            .block(tags_block)
            .highlight_style(highlight)
            .highlight_symbol("> ");
        frame.render_stateful_widget(list, tags_area, &mut app.tags_view.tag_state);
    }

    let account_items: Vec<ListItem> = app
        .accounts()
        .iter()
        .map(|account| ListItem::new(format!("{} ({})", account.address, account.provider_type)))
        .collect();
    let accounts_title = match app.selected_tag() {
        Some(tag) if focus == TagsFocus::Accounts => format!(" Bind #{} to ", tag.name),
        _ => " Email accounts ".to_string(),
    };
    let accounts_block = Block::default()
        .borders(Borders::ALL)
        .border_style(border(focus == TagsFocus::Accounts))
        .title(accounts_title);
    if account_items.is_empty() {
        let empty = Paragraph::new("No email accounts connected")
            .style(Style::default().fg(Color::DarkGray))
            .block(accounts_block);
        frame.render_widget(empty, accounts_area);
    } else if focus == TagsFocus::Accounts {
        let list = List::new(account_items)
            .block(accounts_block)
            .highlight_style(highlight)
            .highlight_symbol("> ");
        frame.render_stateful_widget(list, accounts_area, &mut app.tags_view.account_state);
    } else {
        frame.render_widget(List::new(account_items).block(accounts_block), accounts_area);
    }

    let status = if app.tags_view.busy {
        Span::styled(" Saving...", Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC))
    } else if let Some(info) = &app.tags_view.info {
        Span::styled(format!(" {}", info), Style::default().fg(Color::Green))
    } else {
        Span::styled(" A tag scopes the assistant to the one account it is bound to.", Style::default().fg(Color::DarkGray))
    };
    frame.render_widget(Paragraph::new(Line::from(status)), status_area);

    if naming {
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow))
            .title(" New tag name ");
        let name = &app.tags_view.new_name;
        let (visible, cursor_x) = visible_slice(name.text(), name.cursor(), input_area.width.saturating_sub(2) as usize);
        frame.render_widget(Paragraph::new(visible).style(Style::default().fg(Color::Cyan)).block(block), input_area);
        frame.set_cursor_position((input_area.x + cursor_x + 1, input_area.y + 1));
    }
}

/// `#RRGGBB` to a terminal color; anything else falls back to magenta.
fn tag_color(hex: &str) -> Color {
    let parse = |hex: &str| -> Option<Color> {
        let digits = hex.strip_prefix('#')?;
        if digits.len() != 6 {
            return None;
        }
        let value = u32::from_str_radix(digits, 16).ok()?;
        Some(Color::Rgb((value >> 16) as u8, (value >> 8) as u8, value as u8))
    };
    parse(hex).unwrap_or(Color::Magenta)
}

/// The part of a single-line input that fits in `width` columns with the
/// cursor visible, and the cursor's column within it.
fn visible_slice(text: &str, cursor: usize, width: usize) -> (String, u16) {
    // Calculate scroll offset to keep cursor visible
    let scroll_offset = if width == 0 {
        0
    } else if cursor >= width {
        cursor - width + 1
    } else {
        0
    };

    let visible: String = text.chars().skip(scroll_offset).take(width).collect();
    (visible, (cursor - scroll_offset) as u16)
}

/// Word wrap measured in display columns, so wide characters never overflow
/// the message column.
fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let options = textwrap::Options::new(width.max(1))
        .wrap_algorithm(textwrap::WrapAlgorithm::FirstFit)
        .word_splitter(textwrap::WordSplitter::NoHyphenation);
    textwrap::wrap(text, options)
        .into_iter()
        .map(|line| line.into_owned())
        .collect()
}
