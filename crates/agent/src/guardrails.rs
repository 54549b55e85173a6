use frontdesk_core::domain::cta::{CtaNodeId, CtaSummary};
use frontdesk_core::domain::intent::Intent;
use frontdesk_core::domain::session::Session;
use frontdesk_core::domain::tenant::TenantConfig;
use frontdesk_core::navigator::CtaNavigator;

pub const DEFAULT_GREETING: &str = "Hi there! How can I help you today?";
pub const INTRO_ACK_TEXT: &str = "Please choose one of the options below.";
pub const EMPTY_REPLY_TEXT: &str =
    "Sorry, I didn't quite catch that. Could you tell me a little more about what you need?";

const INTRO_TRIGGERS: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "start",
    "get started",
    "menu",
    "options",
    "help",
    "show choices",
    "what can you do",
    "action:click-intro",
];
const RESET_TRIGGERS: &[&str] = &["reset", "restart"];
const APPOINTMENT_TRIGGERS: &[&str] = &[
    "book an appointment",
    "book appointment",
    "schedule an appointment",
    "schedule a call",
    "book a call",
    "booking",
    "reschedule",
    "availability",
];
const ALLOWED_TAGS: &[&str] = &["b", "i", "u", "br", "code", "a"];
const PARAGRAPH_BREAK: &str = "<br><br>";

pub fn appointment_text(link: &str) -> String {
    format!(
        "You can check our availability and schedule directly through our calendar here: {link}."
    )
}

/// Conditions answered without consulting the model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HardGuard {
    /// Greeting or menu request. `reset` clears the conversation first.
    Intro { reset: bool },
    Appointment { link: String },
}

impl HardGuard {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Intro { reset: false } => "intro",
            Self::Intro { reset: true } => "reset",
            Self::Appointment { .. } => "appointment",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalResponse {
    pub text: String,
    pub ctas: Vec<CtaSummary>,
    /// Locked fields echoed in bold by this response, now confirmed.
    pub confirmed_fields: Vec<String>,
}

/// Output contract for assistant replies: hard guards before the model,
/// deterministic repair after it.
#[derive(Clone, Debug, Default)]
pub struct ResponseGuard {
    navigator: CtaNavigator,
    default_appointment_link: Option<String>,
}

impl ResponseGuard {
    pub fn new(default_appointment_link: Option<String>) -> Self {
        Self {
            navigator: CtaNavigator,
            default_appointment_link: default_appointment_link
                .map(|link| link.trim().to_string())
                .filter(|link| !link.is_empty()),
        }
    }

    pub fn detect(&self, message: &str, tenant: &TenantConfig) -> Option<HardGuard> {
        let clean = message.trim().to_lowercase();
        let clean = clean.trim_end_matches(['!', '.', '?']).trim();

        if RESET_TRIGGERS.contains(&clean) {
            return Some(HardGuard::Intro { reset: true });
        }
        if INTRO_TRIGGERS.contains(&clean) {
            return Some(HardGuard::Intro { reset: false });
        }
        if APPOINTMENT_TRIGGERS.iter().any(|trigger| clean.contains(trigger)) {
            return self.appointment_link(tenant).map(|link| HardGuard::Appointment { link });
        }
        None
    }

    /// First greeting uses the tenant greeting; later ones skip the
    /// boilerplate and just point at the options.
    pub fn intro_response(&self, tenant: &TenantConfig, already_introduced: bool) -> FinalResponse {
        let text = if already_introduced {
            INTRO_ACK_TEXT.to_string()
        } else {
            tenant
                .greeting_message
                .as_deref()
                .map(str::trim)
                .filter(|greeting| !greeting.is_empty())
                .unwrap_or(DEFAULT_GREETING)
                .to_string()
        };

        FinalResponse {
            text,
            ctas: self.navigator.entry_ctas(tenant, Intent::General),
            confirmed_fields: Vec::new(),
        }
    }

    pub fn appointment_response(&self, tenant: &TenantConfig, link: &str) -> FinalResponse {
        FinalResponse {
            text: appointment_text(link),
            ctas: self.navigator.entry_ctas(tenant, Intent::AppointmentInquiry),
            confirmed_fields: Vec::new(),
        }
    }

    pub fn enforce(
        &self,
        raw_model_output: &str,
        session: &Session,
        tenant: &TenantConfig,
        intent: Intent,
    ) -> FinalResponse {
        let mut text = format_paragraph(raw_model_output);
        if text.is_empty() {
            text = EMPTY_REPLY_TEXT.to_string();
        }

        let mut confirmed_fields = Vec::new();
        for (field, locked) in &session.locked_fields {
            if locked.value.is_empty() {
                continue;
            }
            if locked.confirmed {
                text = unwrap_emphasis(&text, &locked.value, 0);
            } else if let Some(emphasized) = emphasize_once(&text, &locked.value) {
                text = emphasized;
                confirmed_fields.push(field.clone());
            }
        }

        FinalResponse {
            text,
            ctas: self.ctas_for(session.cta_cursor.as_ref(), tenant, intent),
            confirmed_fields,
        }
    }

    /// Entry CTAs for a specific intent, else the children at the session's
    /// cursor, else the general entry point.
    pub fn ctas_for(
        &self,
        cursor: Option<&CtaNodeId>,
        tenant: &TenantConfig,
        intent: Intent,
    ) -> Vec<CtaSummary> {
        if intent != Intent::General {
            let entry = self.navigator.entry_ctas(tenant, intent);
            if !entry.is_empty() {
                return entry;
            }
        }
        if let Some(cursor) = cursor {
            let children = self.navigator.children_of(tenant, cursor);
            if !children.is_empty() {
                return children;
            }
        }
        self.navigator.entry_ctas(tenant, Intent::General)
    }

    fn appointment_link(&self, tenant: &TenantConfig) -> Option<String> {
        tenant
            .appointment_link
            .as_deref()
            .map(str::trim)
            .filter(|link| !link.is_empty())
            .map(str::to_string)
            .or_else(|| self.navigator.redirect_url_for(tenant, Intent::AppointmentInquiry))
            .or_else(|| self.default_appointment_link.clone())
    }
}

/// Strips list markers and disallowed tags, collapses the text into one
/// paragraph, and keeps at most one paragraph break before a closing question.
pub fn format_paragraph(raw: &str) -> String {
    let unlisted = raw.lines().map(strip_list_marker).collect::<Vec<_>>().join("\n");
    let sanitized = sanitize_tags(&unlisted);

    let mut parts = split_breaks(&sanitized)
        .into_iter()
        .map(|part| collapse_whitespace(&part))
        .filter(|part| !part.is_empty());

    let Some(first) = parts.next() else {
        return String::new();
    };
    let rest = parts.collect::<Vec<_>>();
    if rest.is_empty() {
        first
    } else {
        format!("{first}{PARAGRAPH_BREAK}{}", rest.join(" "))
    }
}

fn strip_list_marker(line: &str) -> &str {
    let trimmed = line.trim_start();
    for marker in ["- ", "* ", "• ", "+ "] {
        if let Some(rest) = trimmed.strip_prefix(marker) {
            return rest;
        }
    }

    let digits = trimmed.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 && digits <= 3 {
        let rest = &trimmed[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return rest;
        }
    }
    trimmed
}

// Removes tags outside the allow-list, keeping their inner text, and
// normalises every `<br/>` spelling to `<br>`.
fn sanitize_tags(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('<') {
        output.push_str(&rest[..open]);
        let candidate = &rest[open..];
        let Some(close) = candidate.find('>') else {
            output.push_str(candidate);
            return output;
        };

        let tag = &candidate[..=close];
        let name = tag
            .trim_start_matches('<')
            .trim_start_matches('/')
            .chars()
            .take_while(char::is_ascii_alphanumeric)
            .collect::<String>()
            .to_ascii_lowercase();

        if name == "br" {
            output.push_str("<br>");
        } else if ALLOWED_TAGS.contains(&name.as_str()) {
            output.push_str(tag);
        } else if name.is_empty() {
            output.push('<');
            rest = &candidate[1..];
            continue;
        }
        rest = &candidate[close + 1..];
    }

    output.push_str(rest);
    output
}

// Blank lines and runs of two or more `<br>` are paragraph breaks; a single
// newline or `<br>` is just whitespace.
fn split_breaks(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut pending_breaks = 0;
    let mut rest = text;

    loop {
        let next_br = rest.find("<br>");
        let next_newline = rest.find('\n');
        let (index, width) = match (next_br, next_newline) {
            (Some(br), Some(nl)) if nl < br => (nl, 1),
            (Some(br), _) => (br, 4),
            (None, Some(nl)) => (nl, 1),
            (None, None) => break,
        };

        let segment = &rest[..index];
        if !segment.trim().is_empty() {
            if pending_breaks >= 2 && !current.trim().is_empty() {
                parts.push(std::mem::take(&mut current));
            } else if pending_breaks > 0 {
                current.push(' ');
            }
            current.push_str(segment);
            pending_breaks = 0;
        }
        pending_breaks += 1;
        rest = &rest[index + width..];
    }

    if !rest.trim().is_empty() {
        if pending_breaks >= 2 && !current.trim().is_empty() {
            parts.push(std::mem::take(&mut current));
        } else if pending_breaks > 0 {
            current.push(' ');
        }
        current.push_str(rest);
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn find_ignore_ascii_case(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    haystack.get(from..)?.to_ascii_lowercase().find(&needle.to_ascii_lowercase()).map(|at| at + from)
}

// First case-insensitive match of `needle` that stands as its own word and
// sits outside any tag. Offsets hold for `text` because ASCII lowercasing
// keeps byte lengths.
fn find_word(text: &str, needle: &str) -> Option<usize> {
    let lowered = text.to_ascii_lowercase();
    let needle = needle.to_ascii_lowercase();
    let mut cursor = 0;

    while let Some(found) = lowered.get(cursor..)?.find(&needle) {
        let at = cursor + found;
        let end = at + needle.len();
        let before = text[..at].chars().next_back();
        let after = text[end..].chars().next();
        let standalone = !before.is_some_and(char::is_alphanumeric)
            && !after.is_some_and(char::is_alphanumeric);
        if standalone && !inside_tag(text, at) {
            return Some(at);
        }
        cursor = at + lowered[at..].chars().next().map_or(1, char::len_utf8);
    }
    None
}

fn inside_tag(text: &str, at: usize) -> bool {
    let before = &text[..at];
    match (before.rfind('<'), before.rfind('>')) {
        (Some(open), Some(close)) => open > close,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Bolds the first mention of `value`, removing any other emphasis of it.
/// `None` when the value is not mentioned.
fn emphasize_once(text: &str, value: &str) -> Option<String> {
    let bold = format!("<b>{value}</b>");
    if let Some(at) = find_ignore_ascii_case(text, &bold, 0) {
        let keep_until = at + bold.len();
        return Some(format!("{}{}", &text[..keep_until], unwrap_emphasis(&text[keep_until..], value, 0)));
    }

    let at = find_word(text, value)?;
    let end = at + value.len();
    Some(format!("{}<b>{}</b>{}", &text[..at], &text[at..end], &text[end..]))
}

fn unwrap_emphasis(text: &str, value: &str, from: usize) -> String {
    let bold = format!("<b>{value}</b>");
    let mut output = text.to_string();
    let mut cursor = from;
    while let Some(at) = find_ignore_ascii_case(&output, &bold, cursor) {
        let inner = output[at + 3..at + 3 + value.len()].to_string();
        output.replace_range(at..at + bold.len(), &inner);
        cursor = at + inner.len();
    }
    output
}
