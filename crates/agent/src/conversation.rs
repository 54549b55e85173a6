use frontdesk_core::domain::session::PiiField;

/// Personal details found in a single user message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtractedFields {
    pub first_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl ExtractedFields {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none() && self.email.is_none() && self.phone.is_none()
    }

    pub fn entries(&self) -> Vec<(PiiField, String)> {
        [
            (PiiField::FirstName, &self.first_name),
            (PiiField::Email, &self.email),
            (PiiField::Phone, &self.phone),
        ]
        .into_iter()
        .filter_map(|(field, value)| value.clone().map(|value| (field, value)))
        .collect()
    }
}

/// Deterministic PII extraction. The model is never trusted to decide what
/// the user said their email or phone was.
#[derive(Clone, Debug, Default)]
pub struct FieldExtractor;

impl FieldExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, text: &str) -> ExtractedFields {
        let tokens = tokenize(text);
        ExtractedFields {
            first_name: extract_first_name(&tokens),
            email: tokens.iter().find_map(|token| normalize_email(token)),
            phone: extract_phone(text),
        }
    }
}

/// Lowercased address when `raw` looks like `local@domain.tld`.
pub fn normalize_email(raw: &str) -> Option<String> {
    let candidate = raw
        .trim()
        .trim_matches(|c: char| matches!(c, ',' | ';' | ':' | '(' | ')' | '<' | '>' | '"' | '\''))
        .trim_end_matches(['.', '!', '?']);
    let (local, domain) = candidate.split_once('@')?;

    let local_ok = !local.is_empty()
        && local.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '%' | '+' | '-'));
    let labels = domain.split('.').collect::<Vec<_>>();
    let domain_ok = labels.len() >= 2
        && labels.iter().all(|label| {
            !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
        && labels.last().map(|tld| tld.len() >= 2).unwrap_or(false);

    (local_ok && domain_ok).then(|| candidate.to_ascii_lowercase())
}

/// E.164-like form (`+` and 7 to 15 digits). Ten-digit numbers without a
/// country code are read as North American.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.chars().any(|c| !(c.is_ascii_digit() || matches!(c, '+' | '-' | '(' | ')' | '.' | ' '))) {
        return None;
    }

    let digits = trimmed.chars().filter(char::is_ascii_digit).collect::<String>();
    if !(7..=15).contains(&digits.len()) {
        return None;
    }

    if !trimmed.starts_with('+') && digits.len() == 10 {
        Some(format!("+1{digits}"))
    } else {
        Some(format!("+{digits}"))
    }
}

// Scans for a phone-shaped run that stands on its own. Runs glued to a
// word or tag (`#1234567`, `A1234567`) and ISO dates are skipped.
fn extract_phone(text: &str) -> Option<String> {
    let chars = text.chars().collect::<Vec<_>>();
    let mut start = 0;

    while start < chars.len() {
        let opens = chars[start].is_ascii_digit() || matches!(chars[start], '+' | '(');
        let attached = start > 0 && is_word_char(chars[start - 1]);
        if !opens || attached {
            start += 1;
            continue;
        }

        let mut end = start + 1;
        while end < chars.len()
            && (chars[end].is_ascii_digit() || matches!(chars[end], '-' | '(' | ')' | '.' | ' '))
        {
            end += 1;
        }

        let run = chars[start..end].iter().collect::<String>();
        let candidate = run.trim_end_matches(['-', '.', ' ', '(']);
        let glued = chars
            .get(start + candidate.chars().count())
            .is_some_and(|next| is_word_char(*next));
        if !glued && !starts_with_date(candidate) {
            if let Some(phone) = normalize_phone(candidate) {
                return Some(phone);
            }
        }
        start = end;
    }
    None
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '#' | '_' | '/' | '@')
}

// `2024-05-01` or `2024.05.01` at the start of a run.
fn starts_with_date(run: &str) -> bool {
    let bytes = run.as_bytes();
    let digits = |range: std::ops::Range<usize>| bytes[range].iter().all(u8::is_ascii_digit);
    bytes.len() >= 10
        && digits(0..4)
        && matches!(bytes[4], b'-' | b'.')
        && digits(5..7)
        && bytes[7] == bytes[4]
        && digits(8..10)
        && !bytes.get(10).is_some_and(u8::is_ascii_digit)
}

// Phrases after which the next word is taken as a first name. The flag marks
// phrases that also introduce ordinary sentences ("I'm looking for..."), where
// only a capitalised word counts.
const NAME_MARKERS: &[(&[&str], bool)] = &[
    (&["my", "name", "is"], false),
    (&["call", "me"], true),
    (&["name's"], false),
    (&["i'm"], true),
    (&["im"], true),
    (&["i", "am"], true),
    (&["this", "is"], true),
];

const NOT_NAMES: &[&str] = &[
    "a", "an", "the", "just", "not", "so", "very", "here", "looking", "interested", "trying",
    "calling", "wondering", "hoping", "asking", "planning", "thinking", "going", "having", "good",
    "fine", "great", "ok", "okay", "sorry", "from", "with", "in", "at", "on", "available", "free",
    "busy", "happy", "glad", "ready", "new", "also", "still", "back", "tomorrow", "today",
    "later", "now", "asap", "when", "if", "about",
];

fn extract_first_name(tokens: &[String]) -> Option<String> {
    let normalized = tokens.iter().map(|token| normalize_text(token)).collect::<Vec<_>>();

    for (marker, needs_capital) in NAME_MARKERS {
        for start in 0..normalized.len() {
            let end = start + marker.len();
            if end >= normalized.len() {
                break;
            }
            if normalized[start..end].iter().map(String::as_str).ne(marker.iter().copied()) {
                continue;
            }

            let raw = strip_punctuation(&tokens[end]);
            if *needs_capital && !raw.chars().next().map(char::is_uppercase).unwrap_or(false) {
                continue;
            }
            if let Some(name) = plausible_name(raw) {
                return Some(name);
            }
        }
    }
    None
}

fn plausible_name(raw: &str) -> Option<String> {
    let lowered = normalize_text(raw);
    if !(2..=30).contains(&raw.chars().count())
        || NOT_NAMES.contains(&lowered.as_str())
        || !raw.chars().all(|c| c.is_alphabetic() || matches!(c, '-' | '\''))
    {
        return None;
    }

    let mut chars = lowered.chars();
    chars.next().map(|first| first.to_uppercase().chain(chars).collect())
}

fn strip_punctuation(token: &str) -> &str {
    token.trim_matches(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '-'))
}

fn normalize_text(text: &str) -> String {
    text.to_lowercase().replace('\u{2019}', "'")
}

fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(|token| token.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::{normalize_email, normalize_phone, ExtractedFields, FieldExtractor};
    use frontdesk_core::domain::session::PiiField;

    #[test]
    fn extracts_email_phone_and_name_from_one_message() {
        let fields = FieldExtractor::new()
            .extract("Hi, my name is ana. Reach me at Ana.Lopez@Example.com or (555) 123-4567.");

        assert_eq!(fields.first_name.as_deref(), Some("Ana"));
        assert_eq!(fields.email.as_deref(), Some("ana.lopez@example.com"));
        assert_eq!(fields.phone.as_deref(), Some("+15551234567"));
    }

    #[test]
    fn casual_im_phrases_are_not_names() {
        let extractor = FieldExtractor::new();
        assert_eq!(extractor.extract("I'm looking for catering").first_name, None);
        assert_eq!(extractor.extract("i'm sam").first_name, None);
        assert_eq!(extractor.extract("Hello, I'm Sam!").first_name.as_deref(), Some("Sam"));
        assert_eq!(extractor.extract("This is Priya from Acme").first_name.as_deref(), Some("Priya"));
    }

    #[test]
    fn international_numbers_keep_their_country_code() {
        assert_eq!(normalize_phone("+44 20 7946 0958").as_deref(), Some("+442079460958"));
        assert_eq!(normalize_phone("12345").as_deref(), None);
        assert_eq!(normalize_phone("555-CALL-NOW"), None);
        assert_eq!(normalize_phone("1234567890123456"), None);
    }

    #[test]
    fn short_digit_runs_are_not_phones() {
        let fields = FieldExtractor::new().extract("We need coffee for 25 people at 9am");
        assert!(fields.phone.is_none());
        assert!(fields.is_empty());
    }

    #[test]
    fn dates_and_order_numbers_are_not_phones() {
        let extractor = FieldExtractor::new();
        assert_eq!(extractor.extract("My order from 2024-05-01 was wrong").phone, None);
        assert_eq!(extractor.extract("Order #1234567 never arrived").phone, None);
        assert_eq!(extractor.extract("Ticket A12345678 is still open").phone, None);
        assert_eq!(
            extractor.extract("On 2024-05-01 call 555-123-4567 please").phone.as_deref(),
            Some("+15551234567")
        );
    }

    #[test]
    fn call_me_needs_a_capitalised_name() {
        let extractor = FieldExtractor::new();
        assert_eq!(extractor.extract("Can you call me back tomorrow?").first_name, None);
        assert_eq!(extractor.extract("Call me Back when you can").first_name, None);
        assert_eq!(extractor.extract("Please call me Jo").first_name.as_deref(), Some("Jo"));
    }

    #[test]
    fn email_validation_rejects_partial_addresses() {
        assert_eq!(normalize_email("ana@example"), None);
        assert_eq!(normalize_email("@example.com"), None);
        assert_eq!(normalize_email("ana@@example.com"), None);
        assert_eq!(normalize_email("<ana@example.co.uk>,").as_deref(), Some("ana@example.co.uk"));
    }

    #[test]
    fn entries_lists_fields_in_stable_order() {
        let fields = ExtractedFields {
            first_name: Some("Ana".into()),
            email: None,
            phone: Some("+15551234567".into()),
        };
        let entries = fields.entries();
        assert_eq!(entries[0].0, PiiField::FirstName);
        assert_eq!(entries[1].0, PiiField::Phone);
    }
}
