use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Submissions are stamped in UTC+7.
const TIMESTAMP_OFFSET_SECS: i32 = 7 * 3600;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The five fields posted by the contact form.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
pub struct ContactForm {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub title: String,
    pub message: String,
}

impl ContactForm {
    /// Names of the fields that are blank after trimming.
    pub fn blank_fields(&self) -> Vec<&'static str> {
        [
            ("name", &self.name),
            ("email", &self.email),
            ("phone", &self.phone),
            ("title", &self.title),
            ("message", &self.message),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub form: ContactForm,
    pub created_at: String,
}

impl Submission {
    /// Stamps the form with the current time.
    pub fn received(form: ContactForm) -> Submission {
        Submission::received_at(form, Utc::now())
    }

    pub fn received_at(form: ContactForm, now: DateTime<Utc>) -> Submission {
        Submission {
            form,
            created_at: format_timestamp(now),
        }
    }
}

/// A submission after the store assigned its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSubmission {
    pub id: i64,
    pub submission: Submission,
}

impl StoredSubmission {
    pub fn form(&self) -> &ContactForm {
        &self.submission.form
    }

    pub fn created_at(&self) -> &str {
        &self.submission.created_at
    }

    /// Message posted to the chat webhook.
    pub fn notification_text(&self, site_name: &str) -> String {
        format!("[{site_name}] New contact form submission:{}", self.details())
    }

    /// Plain-text body of the notification email.
    pub fn email_text(&self, site_name: &str) -> String {
        format!("[{site_name}] New Contact Form Submission{}", self.details())
    }

    fn details(&self) -> String {
        let form = self.form();
        format!(
            "\n\n *Time: {}*\n\n- Name: {}\n- Email: {}\n- Phone: {}\n- Title: {}\n- Message:\n\n{}",
            self.created_at(),
            form.name,
            form.email,
            form.phone,
            form.title,
            form.message,
        )
    }
}

pub fn format_timestamp(now: DateTime<Utc>) -> String {
    // 7 hours is always a valid offset
    let offset = FixedOffset::east_opt(TIMESTAMP_OFFSET_SECS).unwrap_or_else(|| Utc.fix());
    now.with_timezone(&offset).format(TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn jane() -> ContactForm {
        ContactForm {
            name: "Jane Doe".to_string(),
            email: "jane@example.com".to_string(),
            phone: "+1234567890".to_string(),
            title: "Hello".to_string(),
            message: "Test".to_string(),
        }
    }

    #[test]
    fn timestamp_is_rendered_in_utc_plus_seven() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 20, 15, 42).unwrap();
        assert_eq!(format_timestamp(now), "2024-03-10 03:15:42");
    }

    #[test]
    fn each_submission_gets_its_own_timestamp() {
        let first = Submission::received_at(jane(), Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let second = Submission::received_at(jane(), Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 5).unwrap());
        assert_eq!(first.created_at, "2024-01-01 07:00:00");
        assert_eq!(second.created_at, "2024-01-01 07:00:05");
    }

    #[test]
    fn blank_fields_are_reported() {
        assert!(jane().blank_fields().is_empty());

        let mut form = jane();
        form.phone = "  ".to_string();
        form.message = String::new();
        assert_eq!(form.blank_fields(), vec!["phone", "message"]);
    }

    #[test]
    fn notification_text_lists_every_field() {
        let stored = StoredSubmission {
            id: 1,
            submission: Submission::received_at(jane(), Utc.with_ymd_and_hms(2024, 5, 1, 1, 2, 3).unwrap()),
        };
        assert_eq!(
            stored.notification_text("Acme"),
            "[Acme] New contact form submission:\n\n *Time: 2024-05-01 08:02:03*\n\n- Name: Jane Doe\n- Email: jane@example.com\n- Phone: +1234567890\n- Title: Hello\n- Message:\n\nTest"
        );
    }

    #[test]
    fn email_text_uses_its_own_heading() {
        let stored = StoredSubmission {
            id: 1,
            submission: Submission::received_at(jane(), Utc.with_ymd_and_hms(2024, 5, 1, 1, 2, 3).unwrap()),
        };
        let text = stored.email_text("Acme");
        assert!(text.starts_with("[Acme] New Contact Form Submission\n\n *Time: 2024-05-01 08:02:03*"));
        assert!(text.ends_with("- Message:\n\nTest"));
    }
}
