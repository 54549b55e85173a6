use serde::{Deserialize, Serialize};

/// Coarse classification of an inbound message, used to pick a CTA entry point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    ServiceInquiry,
    AppointmentInquiry,
    SalesInquiry,
    #[serde(rename = "general_inquiry", alias = "general")]
    General,
}

const SERVICE_KEYWORDS: &[&str] =
    &["service", "offer", "provide", "what do you", "tell me about", "what can you"];
const APPOINTMENT_KEYWORDS: &[&str] =
    &["appointment", "schedule", "book", "call", "meeting", "calendar", "consultation"];
const SALES_KEYWORDS: &[&str] =
    &["sales", "speak to", "talk to", "contact", "representative", "speak with"];

impl Intent {
    pub const ALL: [Intent; 4] =
        [Self::ServiceInquiry, Self::AppointmentInquiry, Self::SalesInquiry, Self::General];

    /// Keyword classifier. Categories are checked in a fixed order so a message
    /// mentioning both a service and a booking resolves to `ServiceInquiry`.
    pub fn classify(message: &str) -> Self {
        let normalized = message.to_lowercase();
        if normalized.trim().is_empty() {
            return Self::General;
        }

        let matches_any =
            |keywords: &[&str]| keywords.iter().any(|keyword| normalized.contains(keyword));

        if matches_any(SERVICE_KEYWORDS) {
            Self::ServiceInquiry
        } else if matches_any(APPOINTMENT_KEYWORDS) {
            Self::AppointmentInquiry
        } else if matches_any(SALES_KEYWORDS) {
            Self::SalesInquiry
        } else {
            Self::General
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServiceInquiry => "service_inquiry",
            Self::AppointmentInquiry => "appointment_inquiry",
            Self::SalesInquiry => "sales_inquiry",
            Self::General => "general_inquiry",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "service_inquiry" => Some(Self::ServiceInquiry),
            "appointment_inquiry" => Some(Self::AppointmentInquiry),
            "sales_inquiry" => Some(Self::SalesInquiry),
            "general_inquiry" | "general" => Some(Self::General),
            _ => None,
        }
    }
}
