//! Input composer with slash-command context selection.
//!
//! Typing `/email` or `/tags` at the end of the input opens a suggestion list
//! of connected accounts or tags. Committing a suggestion replaces the slash
//! command with a literal token and attaches the item as the context of the
//! next outgoing message. At most one context is attached at a time.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::api::{EmailAccount, Tag};
use crate::line::LineInput;

static NEXT_SELECTION: AtomicU64 = AtomicU64::new(1);

/// Identifies one act of selecting a context. Async lookups started for a
/// selection carry its token and are dropped if the selection changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SelectionToken(u64);

impl SelectionToken {
    fn next() -> Self {
        Self(NEXT_SELECTION.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Email,
    Tags,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Email, Category::Tags];

    pub fn keyword(&self) -> &'static str {
        match self {
            Category::Email => "email",
            Category::Tags => "tags",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.keyword() == keyword)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Category::Email => "Email accounts",
            Category::Tags => "Tags",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    Keyword(Category),
    Account(EmailAccount),
    Tag(Tag),
}

impl Candidate {
    pub fn label(&self) -> String {
        match self {
            Candidate::Keyword(category) => format!("/{}", category.keyword()),
            Candidate::Account(account) if account.provider_type.is_empty() => account.address.clone(),
            Candidate::Account(account) => format!("{} ({})", account.address, account.provider_type),
            Candidate::Tag(tag) => format!("#{}", tag.name),
        }
    }

    fn matches(&self, needle: &str) -> bool {
        if needle.is_empty() {
            return true;
        }
        let name = match self {
            Candidate::Keyword(category) => category.keyword().to_string(),
            Candidate::Account(account) => account.address.clone(),
            Candidate::Tag(tag) => tag.name.clone(),
        };
        name.to_lowercase().contains(needle) || self.label().to_lowercase().contains(needle)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestionState {
    /// `None` while the user has typed only `/` and both keywords are offered.
    pub category: Option<Category>,
    pub candidates: Vec<Candidate>,
    pub filter: String,
    pub highlighted: usize,
    trigger_start: usize,
}

impl SuggestionState {
    pub fn highlighted_candidate(&self) -> Option<&Candidate> {
        self.candidates.get(self.highlighted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    EmailAccount,
    Tag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedContext {
    pub kind: ContextKind,
    pub identifier: String,
    pub display_value: String,
    /// Tag only: the account the tag is bound to, once looked up.
    pub resolved_account_address: Option<String>,
    token: SelectionToken,
}

impl SelectedContext {
    pub fn new(kind: ContextKind, identifier: impl Into<String>, display_value: impl Into<String>) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
            display_value: display_value.into(),
            resolved_account_address: None,
            token: SelectionToken::next(),
        }
    }

    pub fn email_account(account: &EmailAccount) -> Self {
        Self::new(
            ContextKind::EmailAccount,
            format!("account-{}", account.id),
            account.address.clone(),
        )
    }

    pub fn tag(tag: &Tag) -> Self {
        Self::new(ContextKind::Tag, format!("tag-{}", tag.id), tag.name.clone())
    }

    pub fn token(&self) -> SelectionToken {
        self.token
    }
}

/// What a commit did, so the front end can start follow-up lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Committed {
    /// A keyword was completed; the category's source should be refreshed.
    Category(Category),
    EmailAccount,
    /// A tag was attached; its bound account should be looked up.
    Tag { tag_id: String, token: SelectionToken },
}

struct Trigger {
    start: usize,
    category: Option<Category>,
    filter: String,
}

/// Finds a slash command at the end of the input: `/` followed by a prefix
/// of a keyword, or a full keyword, one space and a filter.
fn detect_trigger(input: &str) -> Option<Trigger> {
    let start = input.rfind('/')?;
    let rest = &input[start + 1..];

    if rest.chars().all(|c| c.is_ascii_lowercase()) {
        let mut matching = Category::ALL
            .into_iter()
            .filter(|c| c.keyword().starts_with(rest));
        let first = matching.next()?;
        let category = match matching.next() {
            Some(_) => None,
            None => Some(first),
        };
        return Some(Trigger {
            start,
            category,
            filter: String::new(),
        });
    }

    let (keyword, filter) = rest.split_once(' ')?;
    let category = Category::from_keyword(keyword)?;
    Some(Trigger {
        start,
        category: Some(category),
        filter: filter.to_string(),
    })
}

#[derive(Debug, Default)]
pub struct Composer {
    line: LineInput,
    selected: Option<SelectedContext>,
    suggestions: Option<SuggestionState>,
    dismissed_trigger: Option<usize>,
    accounts: Vec<EmailAccount>,
    tags: Vec<Tag>,
}

impl Composer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(&self) -> &str {
        self.line.text()
    }

    pub fn cursor(&self) -> usize {
        self.line.cursor()
    }

    pub fn selected(&self) -> Option<&SelectedContext> {
        self.selected.as_ref()
    }

    pub fn suggestions(&self) -> Option<&SuggestionState> {
        self.suggestions.as_ref()
    }

    // Editing. Each edit re-evaluates the trigger and returns the category
    // that was just entered, if any.

    pub fn insert_char(&mut self, c: char) -> Option<Category> {
        self.line.insert(c);
        self.refresh()
    }

    pub fn backspace(&mut self) -> Option<Category> {
        if !self.line.backspace() {
            return None;
        }
        self.refresh()
    }

    pub fn delete(&mut self) -> Option<Category> {
        if !self.line.delete() {
            return None;
        }
        self.refresh()
    }

    pub fn set_input(&mut self, text: &str) -> Option<Category> {
        self.line.set(text);
        self.refresh()
    }

    pub fn move_left(&mut self) {
        self.line.move_left();
    }

    pub fn move_right(&mut self) {
        self.line.move_right();
    }

    pub fn move_home(&mut self) {
        self.line.move_home();
    }

    pub fn move_end(&mut self) {
        self.line.move_end();
    }

    // Suggestion sources

    pub fn set_accounts(&mut self, accounts: Vec<EmailAccount>) {
        self.accounts = accounts;
        self.refresh();
    }

    pub fn set_tags(&mut self, tags: Vec<Tag>) {
        self.tags = tags;
        self.refresh();
    }

    pub fn accounts(&self) -> &[EmailAccount] {
        &self.accounts
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    fn candidates_for(&self, category: Option<Category>, filter: &str) -> Vec<Candidate> {
        let needle = filter.trim().to_lowercase();
        let all: Vec<Candidate> = match category {
            None => Category::ALL.into_iter().map(Candidate::Keyword).collect(),
            Some(Category::Email) => self.accounts.iter().cloned().map(Candidate::Account).collect(),
            Some(Category::Tags) => self.tags.iter().cloned().map(Candidate::Tag).collect(),
        };
        all.into_iter().filter(|c| c.matches(&needle)).collect()
    }

    fn refresh(&mut self) -> Option<Category> {
        let previous = self.suggestions.as_ref().and_then(|s| s.category);

        let Some(trigger) = detect_trigger(self.line.text()) else {
            self.suggestions = None;
            self.dismissed_trigger = None;
            return None;
        };
        if self.dismissed_trigger == Some(trigger.start) {
            self.suggestions = None;
            return None;
        }
        self.dismissed_trigger = None;

        let candidates = self.candidates_for(trigger.category, &trigger.filter);
        let highlighted = match &self.suggestions {
            Some(s) if s.category == trigger.category && s.filter == trigger.filter => {
                s.highlighted.min(candidates.len().saturating_sub(1))
            }
            _ => 0,
        };
        self.suggestions = Some(SuggestionState {
            category: trigger.category,
            candidates,
            filter: trigger.filter,
            highlighted,
            trigger_start: trigger.start,
        });

        match trigger.category {
            Some(category) if previous != Some(category) => Some(category),
            _ => None,
        }
    }

    // Suggestion navigation

    pub fn highlight_next(&mut self) {
        if let Some(s) = self.suggestions.as_mut() {
            if !s.candidates.is_empty() {
                s.highlighted = (s.highlighted + 1).min(s.candidates.len() - 1);
            }
        }
    }

    pub fn highlight_prev(&mut self) {
        if let Some(s) = self.suggestions.as_mut() {
            s.highlighted = s.highlighted.saturating_sub(1);
        }
    }

    /// Closes the suggestion list and leaves the input as typed.
    pub fn cancel_suggestions(&mut self) {
        if let Some(s) = self.suggestions.take() {
            self.dismissed_trigger = Some(s.trigger_start);
        }
    }

    /// Commits the highlighted suggestion. Returns `None` when no suggestion
    /// list is open or it is empty.
    pub fn commit(&mut self) -> Option<Committed> {
        let state = self.suggestions.as_ref()?;
        let candidate = state.highlighted_candidate()?.clone();
        let start = state.trigger_start;
        self.suggestions = None;

        let committed = match candidate {
            Candidate::Keyword(category) => {
                self.line.replace_tail(start, &format!("/{} ", category.keyword()));
                self.refresh();
                return Some(Committed::Category(category));
            }
            Candidate::Account(account) => {
                self.line.replace_tail(start, &format!("{} ", account.address));
                self.selected = Some(SelectedContext::email_account(&account));
                Committed::EmailAccount
            }
            Candidate::Tag(tag) => {
                self.line.replace_tail(start, &format!("#{} ", tag.name));
                let context = SelectedContext::tag(&tag);
                let token = context.token();
                self.selected = Some(context);
                Committed::Tag {
                    tag_id: tag.id,
                    token,
                }
            }
        };
        Some(committed)
    }

    /// Applies the result of a tag-to-account lookup. Dropped unless the
    /// selection that started the lookup is still the current one.
    pub fn apply_tag_resolution(&mut self, token: SelectionToken, address: Option<String>) -> bool {
        match self.selected.as_mut() {
            Some(ctx) if ctx.kind == ContextKind::Tag && ctx.token == token => {
                ctx.resolved_account_address = address;
                true
            }
            _ => {
                debug!(?token, "dropping stale tag resolution");
                false
            }
        }
    }

    pub fn remove_context(&mut self) {
        self.selected = None;
    }

    /// Clears the input and the attached context together after a send.
    pub fn clear_after_send(&mut self) {
        self.line.clear();
        self.selected = None;
        self.suggestions = None;
        self.dismissed_trigger = None;
    }

    /// Forgets everything, including suggestion sources (logout).
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tag(id: &str, name: &str) -> Tag {
        Tag {
            id: id.to_string(),
            name: name.to_string(),
            color: "#3366ff".to_string(),
        }
    }

    fn account(id: &str, address: &str) -> EmailAccount {
        EmailAccount {
            id: id.to_string(),
            address: address.to_string(),
            provider_type: "gmail".to_string(),
        }
    }

    fn type_text(composer: &mut Composer, text: &str) -> Vec<Category> {
        text.chars().filter_map(|c| composer.insert_char(c)).collect()
    }

    fn labels(composer: &Composer) -> Vec<String> {
        composer
            .suggestions()
            .map(|s| s.candidates.iter().map(Candidate::label).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_filter_is_case_insensitive_substring() {
        let mut composer = Composer::new();
        composer.set_tags(vec![tag("1", "Work"), tag("2", "Personal")]);

        type_text(&mut composer, "/tags wo");
        assert_eq!(labels(&composer), vec!["#Work".to_string()]);

        composer.set_input("/tags WO");
        assert_eq!(labels(&composer), vec!["#Work".to_string()]);
    }

    #[test]
    fn test_filtering_keeps_source_intact() {
        let mut composer = Composer::new();
        composer.set_tags(vec![tag("1", "Work"), tag("2", "Personal")]);
        composer.set_input("/tags zzz");
        assert!(labels(&composer).is_empty());
        assert!(composer.suggestions().is_some());

        composer.set_input("/tags ");
        assert_eq!(labels(&composer).len(), 2);
    }

    #[test]
    fn test_bare_slash_offers_keywords() {
        let mut composer = Composer::new();
        let entered = type_text(&mut composer, "hi /");
        assert!(entered.is_empty());
        assert_eq!(labels(&composer), vec!["/email".to_string(), "/tags".to_string()]);

        composer.highlight_next();
        assert_eq!(composer.commit(), Some(Committed::Category(Category::Tags)));
        assert_eq!(composer.input(), "hi /tags ");
        assert_eq!(
            composer.suggestions().and_then(|s| s.category),
            Some(Category::Tags)
        );
    }

    #[test]
    fn test_keyword_prefix_enters_category_once() {
        let mut composer = Composer::new();
        let entered = type_text(&mut composer, "/ema");
        assert_eq!(entered, vec![Category::Email]);

        // Finishing the keyword and typing a filter stays in the same category.
        let entered = type_text(&mut composer, "il gm");
        assert!(entered.is_empty());
        assert_eq!(composer.suggestions().unwrap().filter, "gm");
    }

    #[test]
    fn test_non_trigger_input_exits_suggestions() {
        let mut composer = Composer::new();
        type_text(&mut composer, "/t");
        assert!(composer.suggestions().is_some());

        composer.insert_char('x');
        assert!(composer.suggestions().is_none());

        composer.backspace();
        assert!(composer.suggestions().is_some());

        composer.set_input("see https://example.com/Page");
        assert!(composer.suggestions().is_none());
    }

    #[test]
    fn test_highlight_is_clamped() {
        let mut composer = Composer::new();
        composer.set_tags(vec![tag("1", "Work"), tag("2", "Personal")]);
        composer.set_input("/tags ");

        composer.highlight_prev();
        assert_eq!(composer.suggestions().unwrap().highlighted, 0);
        composer.highlight_next();
        composer.highlight_next();
        composer.highlight_next();
        assert_eq!(composer.suggestions().unwrap().highlighted, 1);
    }

    #[test]
    fn test_escape_keeps_input_and_stays_closed() {
        let mut composer = Composer::new();
        composer.set_tags(vec![tag("1", "Work")]);
        composer.set_input("ask /tags w");
        composer.cancel_suggestions();

        assert_eq!(composer.input(), "ask /tags w");
        assert!(composer.suggestions().is_none());

        composer.insert_char('o');
        assert!(composer.suggestions().is_none());

        // A new slash command opens suggestions again.
        composer.set_input("ask /tags wo and /t");
        assert!(composer.suggestions().is_some());
    }

    #[test]
    fn test_commit_account_replaces_command() {
        let mut composer = Composer::new();
        composer.set_accounts(vec![account("3", "me@gmail.com")]);
        composer.set_input("summarize /email me");

        assert_eq!(composer.commit(), Some(Committed::EmailAccount));
        assert_eq!(composer.input(), "summarize me@gmail.com ");
        assert_eq!(composer.cursor(), composer.input().chars().count());

        let ctx = composer.selected().unwrap();
        assert_eq!(ctx.kind, ContextKind::EmailAccount);
        assert_eq!(ctx.identifier, "account-3");
        assert_eq!(ctx.display_value, "me@gmail.com");
        assert!(composer.suggestions().is_none());
    }

    #[test]
    fn test_commit_on_empty_list_does_nothing() {
        let mut composer = Composer::new();
        composer.set_input("/email nobody");
        assert_eq!(composer.commit(), None);
        assert_eq!(composer.input(), "/email nobody");
        assert!(composer.selected().is_none());
    }

    #[test]
    fn test_stale_tag_resolution_is_dropped() {
        let mut composer = Composer::new();
        composer.set_tags(vec![tag("1", "Work"), tag("2", "Personal")]);

        composer.set_input("/tags work");
        let Some(Committed::Tag { tag_id, token: first }) = composer.commit() else {
            panic!("expected tag commit");
        };
        assert_eq!(tag_id, "1");

        composer.set_input("/tags personal");
        let Some(Committed::Tag { token: second, .. }) = composer.commit() else {
            panic!("expected tag commit");
        };

        assert!(!composer.apply_tag_resolution(first, Some("work@corp.com".to_string())));
        let ctx = composer.selected().unwrap();
        assert_eq!(ctx.identifier, "tag-2");
        assert_eq!(ctx.resolved_account_address, None);

        assert!(composer.apply_tag_resolution(second, Some("me@home.com".to_string())));
        assert_eq!(
            composer.selected().unwrap().resolved_account_address.as_deref(),
            Some("me@home.com")
        );
    }

    #[test]
    fn test_resolution_after_removal_is_dropped() {
        let mut composer = Composer::new();
        composer.set_tags(vec![tag("1", "Work")]);
        composer.set_input("/tags ");
        let Some(Committed::Tag { token, .. }) = composer.commit() else {
            panic!("expected tag commit");
        };

        composer.remove_context();
        assert!(!composer.apply_tag_resolution(token, Some("x@y.com".to_string())));
        assert!(composer.selected().is_none());
    }

    #[test]
    fn test_clear_after_send_clears_input_and_context() {
        let mut composer = Composer::new();
        composer.set_accounts(vec![account("3", "me@gmail.com")]);
        composer.set_input("/email ");
        composer.commit();
        composer.clear_after_send();

        assert_eq!(composer.input(), "");
        assert_eq!(composer.cursor(), 0);
        assert!(composer.selected().is_none());
    }

    #[test]
    fn test_utf8_editing() {
        let mut composer = Composer::new();
        type_text(&mut composer, "héllo");
        composer.move_left();
        composer.backspace();
        assert_eq!(composer.input(), "hélo");
        composer.move_home();
        composer.delete();
        assert_eq!(composer.input(), "élo");
    }
}
