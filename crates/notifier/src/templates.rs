//! Email templates for delivered keepsakes.

use keepla_common::types::{DeliveryChannel, DueDelivery, EmailMessage};

/// Confirmation sent to the author once the keepsake has been delivered.
pub fn sender_confirmation(delivery: &DueDelivery, from: &str) -> EmailMessage {
    let recipient = delivery.recipient_display();
    let title = match delivery.title.as_deref() {
        Some(title) if !title.trim().is_empty() => title.trim(),
        _ => "Your keepsake",
    };
    let date = delivery.delivery_date.format("%B %-d, %Y");

    let (headline, detail) = match delivery.channel {
        DeliveryChannel::Email => (
            format!("{} has been delivered", title),
            format!("We delivered your keepsake to {} on {}.", recipient, date),
        ),
        DeliveryChannel::Physical => (
            format!("{} is on its way", title),
            format!(
                "Your keepsake for {} reached its delivery date on {} and is being shipped.",
                recipient, date
            ),
        ),
    };

    let text = format!(
        "Hi {},\n\n{}\n\nThank you for using Keepla.\n",
        delivery.sender_display(),
        detail
    );
    let html = layout(
        &headline,
        &format!(
            "<p>Hi {},</p><p>{}</p><p>Thank you for using Keepla.</p>",
            escape_html(delivery.sender_display()),
            escape_html(&detail)
        ),
    );

    EmailMessage {
        from: from.to_string(),
        to: delivery.sender_email.clone(),
        subject: headline,
        html,
        text,
    }
}

/// The keepsake itself, addressed to the recipient.
pub fn recipient_delivery(delivery: &DueDelivery, from: &str) -> EmailMessage {
    let sender = delivery.sender_display();
    let subject = match delivery.title.as_deref() {
        Some(title) if !title.trim().is_empty() => {
            format!("{} sent you a keepsake: {}", sender, title.trim())
        }
        _ => format!("{} sent you a keepsake", sender),
    };

    let text = format!(
        "Hi {},\n\n{} wrote you a message to be opened today:\n\n{}\n\nDelivered by Keepla.\n",
        delivery.recipient_display(),
        sender,
        delivery.message
    );
    let html = layout(
        &subject,
        &format!(
            "<p>Hi {},</p><p>{} wrote you a message to be opened today:</p>\
             <blockquote style=\"white-space:pre-wrap\">{}</blockquote>\
             <p>Delivered by Keepla.</p>",
            escape_html(delivery.recipient_display()),
            escape_html(sender),
            escape_html(&delivery.message)
        ),
    );

    EmailMessage {
        from: from.to_string(),
        to: delivery.recipient_email.clone(),
        subject,
        html,
        text,
    }
}

fn layout(heading: &str, body: &str) -> String {
    format!(
        "<!doctype html><html><body style=\"font-family:sans-serif\">\
         <h1>{}</h1>{}</body></html>",
        escape_html(heading),
        body
    )
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use keepla_common::types::DeliverySource;
    use uuid::Uuid;

    const FROM: &str = "Keepla <no-reply@keepla.app>";

    fn make_delivery(channel: DeliveryChannel) -> DueDelivery {
        DueDelivery {
            id: Uuid::new_v4(),
            source: DeliverySource::Keepsakes,
            title: Some("Open on your birthday".to_string()),
            message: "Happy 30th! <3".to_string(),
            delivery_date: Utc.with_ymd_and_hms(2030, 5, 4, 9, 0, 0).unwrap(),
            sender_name: Some("Ana".to_string()),
            sender_email: "ana@example.com".to_string(),
            recipient_name: Some("Bo".to_string()),
            recipient_email: "bo@example.com".to_string(),
            channel,
        }
    }

    #[test]
    fn test_recipient_email_carries_message() {
        let msg = recipient_delivery(&make_delivery(DeliveryChannel::Email), FROM);
        assert_eq!(msg.to, "bo@example.com");
        assert_eq!(msg.from, FROM);
        assert_eq!(msg.subject, "Ana sent you a keepsake: Open on your birthday");
        assert!(msg.text.contains("Happy 30th! <3"));
        assert!(msg.html.contains("Happy 30th! &lt;3"));
        assert!(!msg.html.contains("<3"));
    }

    #[test]
    fn test_sender_confirmation_addresses_sender() {
        let msg = sender_confirmation(&make_delivery(DeliveryChannel::Email), FROM);
        assert_eq!(msg.to, "ana@example.com");
        assert_eq!(msg.subject, "Open on your birthday has been delivered");
        assert!(msg.text.contains("to Bo on May 4, 2030"));
    }

    #[test]
    fn test_sender_confirmation_physical() {
        let msg = sender_confirmation(&make_delivery(DeliveryChannel::Physical), FROM);
        assert_eq!(msg.subject, "Open on your birthday is on its way");
        assert!(msg.text.contains("being shipped"));
    }

    #[test]
    fn test_fallbacks_without_names_or_title() {
        let mut delivery = make_delivery(DeliveryChannel::Email);
        delivery.title = None;
        delivery.sender_name = None;
        delivery.recipient_name = None;

        let msg = recipient_delivery(&delivery, FROM);
        assert_eq!(msg.subject, "ana@example.com sent you a keepsake");
        assert!(msg.text.starts_with("Hi bo@example.com,"));

        let confirmation = sender_confirmation(&delivery, FROM);
        assert_eq!(confirmation.subject, "Your keepsake has been delivered");
    }

    #[test]
    fn test_blank_title_falls_back() {
        let mut delivery = make_delivery(DeliveryChannel::Email);
        delivery.title = Some("   ".to_string());

        let confirmation = sender_confirmation(&delivery, FROM);
        assert_eq!(confirmation.subject, "Your keepsake has been delivered");

        let msg = recipient_delivery(&delivery, FROM);
        assert_eq!(msg.subject, "Ana sent you a keepsake");

        delivery.title = Some("  Open later ".to_string());
        let confirmation = sender_confirmation(&delivery, FROM);
        assert_eq!(confirmation.subject, "Open later has been delivered");
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;"
        );
    }
}
