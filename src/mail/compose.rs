//! Wording of payslip notifications and delivery log lines.
//!
//! Kept in one place so the text recipients and operators see can be
//! checked by tests without a transport.

use super::{MailAttachment, OutgoingMail};

/// Subject line: names the identifier and the attached file.
pub fn subject(identifier: &str, filename: &str) -> String {
    format!("User ID: {} in File: {}", identifier, filename)
}

/// Plain-text body addressed to the recipient.
pub fn body(recipient: &str) -> String {
    format!(
        "Hi {},\n\nPlease find the attached file for your reference.\n\nRegards,\nYours Thankfully.",
        recipient
    )
}

/// Informational message returned for a delivered file.
pub fn sent_message(recipient: &str, identifier: &str) -> String {
    format!(
        "Email notification sent to {} for user ID {}.",
        recipient, identifier
    )
}

/// Log line recorded for a file that could not be delivered.
pub fn failed_message(recipient: &str) -> String {
    format!("Email notification failed to {}.", recipient)
}

/// Assemble the full message for one split file.
pub fn payslip_mail(
    recipient: &str,
    identifier: &str,
    filename: &str,
    content: Vec<u8>,
) -> OutgoingMail {
    OutgoingMail {
        to: recipient.to_string(),
        subject: subject(identifier, filename),
        body: body(recipient),
        attachment: Some(MailAttachment {
            filename: filename.to_string(),
            content,
        }),
    }
}
