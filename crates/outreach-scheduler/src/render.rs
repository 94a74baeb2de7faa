//! Late-bound template rendering.
//!
//! Subject/body are stored with `{{ns.field}}` placeholders and only
//! substituted at send time, so edits to a recipient between enqueue
//! and delivery are reflected. Unknown placeholders render blank;
//! rendering itself never fails.

use std::sync::LazyLock;

use outreach_core::types::{Recipient, SendingIdentity};
use regex::Regex;
use serde_json::{Value, json};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([^}]+)\}\}").expect("placeholder pattern"));

/// Substitute `{{ns.field}}` placeholders from `context`. Unknown or
/// null paths become the empty string.
pub fn render(text: &str, context: &Value) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &regex::Captures<'_>| {
            lookup(context, caps[1].trim()).unwrap_or_default()
        })
        .into_owned()
}

fn lookup(context: &Value, path: &str) -> Option<String> {
    let mut current = context;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    match current {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Build the substitution context for one recipient. Both the
/// `candidate` and `contact` namespaces are always present — templates
/// written against either keep working when a task is retargeted from
/// one group kind to the other.
pub fn render_context(recipient: &Recipient, identity: Option<&SendingIdentity>) -> Value {
    let salutation = recipient.salutation();
    let email = recipient.email().unwrap_or_default();

    let (candidate_ns, contact_ns) = match recipient {
        Recipient::Candidate(c) => {
            let candidate = json!({
                "name": c.name,
                "salutation": salutation,
                "primary_email": email,
                "location": c.location.clone().unwrap_or_default(),
                "gender": c.gender.as_str(),
                "predicted_position": c.predicted_position.clone().unwrap_or_default(),
                "keywords": c.keywords.join(", "),
            });
            let contact = json!({
                "name": c.name,
                "salutation": salutation,
                "email": email,
                "company": "",
                "position": c.predicted_position.clone().unwrap_or_default(),
                "department": "",
            });
            (candidate, contact)
        }
        Recipient::Contact(c) => {
            let contact = json!({
                "name": c.name,
                "salutation": salutation,
                "email": email,
                "company": c.company,
                "position": c.position.clone().unwrap_or_default(),
                "department": c.department.clone().unwrap_or_default(),
            });
            let candidate = json!({
                "name": c.name,
                "salutation": salutation,
                "primary_email": email,
                "location": "",
                "gender": c.gender.as_str(),
                "predicted_position": c.position.clone().unwrap_or_default(),
                "keywords": "",
            });
            (candidate, contact)
        }
    };

    let sender_ns = match identity {
        Some(identity) => json!({
            "name": identity.sender_name.clone().unwrap_or_else(|| identity.address.clone()),
            "address": identity.address,
            "signature": identity.signature.clone().unwrap_or_default(),
        }),
        None => json!({}),
    };

    json!({
        "candidate": candidate_ns,
        "contact": contact_ns,
        "sender": sender_ns,
    })
}
