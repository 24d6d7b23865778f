mod common;

use std::sync::Arc;

use anyhow::Result;
use chrono::DateTime;
use common::{CLIENT_ID, DOMAIN, FakeRegistry, KIND_ID, SENDER, USER_ID, cloak, delivery};
use email_service::{
    delivery::{
        packager::{NO_SUBJECT, Packager},
        templates::TemplateResolver,
    },
    error::PackError,
    models::{
        delivery::Delivery,
        message::{
            CLIENT_ID_HEADER, NOTIFICATION_ID_HEADER, NOTIFICATION_TIMESTAMP_HEADER,
            REQUEST_RECEIVED_HEADER, TEXT_HTML, TEXT_PLAIN,
        },
    },
};

fn packager(registry: &Arc<FakeRegistry>) -> Packager {
    Packager::new(
        TemplateResolver::new(registry.clone(), registry.clone(), registry.clone()),
        cloak(),
    )
}

fn addressed(message_id: &str) -> Delivery {
    let mut delivery = delivery(message_id);
    delivery.email = "user@example.com".to_string();
    delivery
}

/// Test: Descriptions and subject fall back when not supplied
#[tokio::test]
async fn test_prepare_context_applies_fallbacks() -> Result<()> {
    let registry = Arc::new(FakeRegistry::seeded());
    let mut delivery = addressed("m1");
    delivery.options.subject = String::new();

    let context = packager(&registry)
        .prepare_context(&delivery, SENDER, DOMAIN)
        .await?;

    assert_eq!(context.subject, NO_SUBJECT);
    assert_eq!(context.kind_description, KIND_ID);
    assert_eq!(context.source_description, CLIENT_ID);
    assert_eq!(context.from, SENDER);
    assert_eq!(context.to, "user@example.com");
    assert_eq!(context.domain, DOMAIN);
    assert_eq!(context.space, "production");
    assert_eq!(context.organization_guid, "org-guid");

    Ok(())
}

/// Test: Supplied descriptions are kept
#[tokio::test]
async fn test_prepare_context_keeps_supplied_descriptions() -> Result<()> {
    let registry = Arc::new(FakeRegistry::seeded());
    let mut delivery = addressed("m1");
    delivery.options.kind_description = "Build results".to_string();
    delivery.options.source_description = "CI".to_string();

    let context = packager(&registry)
        .prepare_context(&delivery, SENDER, DOMAIN)
        .await?;

    assert_eq!(context.kind_description, "Build results");
    assert_eq!(context.source_description, "CI");
    assert_eq!(context.subject, "Your build finished");

    Ok(())
}

/// Test: The unsubscribe id is stable and opens to the user, client and kind
#[tokio::test]
async fn test_unsubscribe_id_is_stable_and_reversible() -> Result<()> {
    let registry = Arc::new(FakeRegistry::seeded());
    let packager = packager(&registry);

    let first = packager
        .prepare_context(&addressed("m1"), SENDER, DOMAIN)
        .await?;
    let second = packager
        .prepare_context(&addressed("m2"), SENDER, DOMAIN)
        .await?;

    assert_eq!(first.unsubscribe_id, second.unsubscribe_id);

    let opened = cloak().unveil(&first.unsubscribe_id)?;
    assert_eq!(
        String::from_utf8(opened)?,
        format!("{}|{}|{}", USER_ID, CLIENT_ID, KIND_ID)
    );

    Ok(())
}

/// Test: Plaintext renders raw, HTML renders escaped
#[tokio::test]
async fn test_html_part_escapes_and_text_part_does_not() -> Result<()> {
    let registry = Arc::new(FakeRegistry::seeded());
    registry.add_template(
        "escaping",
        "{{ subject }}",
        "Subject: {{ subject }}",
        "<h1>{{ subject }}</h1>",
    );
    registry.add_kind(KIND_ID, CLIENT_ID, false, "escaping");

    let mut delivery = addressed("m1");
    delivery.options.subject = r#"Tom & "Jerry" <cat>"#.to_string();

    let packager = packager(&registry);
    let context = packager.prepare_context(&delivery, SENDER, DOMAIN).await?;
    let message = packager.pack(&context)?;

    assert_eq!(
        message.part(TEXT_PLAIN),
        Some(r#"Subject: Tom & "Jerry" <cat>"#)
    );

    let html = message.part(TEXT_HTML).unwrap_or_default();
    assert!(html.contains("<h1>Tom &amp; &quot;Jerry&quot; &lt;cat&gt;</h1>"));
    assert!(!html.contains("<cat>"));

    Ok(())
}

/// Test: Template logic sees the same raw values in both parts
#[tokio::test]
async fn test_html_conditions_and_filters_see_raw_values() -> Result<()> {
    let registry = Arc::new(FakeRegistry::seeded());
    let logic = r#"{% if subject == "R&D" %}MATCH{% else %}NO{% endif %} len={{ subject|length }}"#;
    registry.add_template("logic", "{{ subject }}", logic, logic);
    registry.add_kind(KIND_ID, CLIENT_ID, false, "logic");

    let mut delivery = addressed("m1");
    delivery.options.subject = "R&D".to_string();

    let packager = packager(&registry);
    let context = packager.prepare_context(&delivery, SENDER, DOMAIN).await?;
    let parts = packager.compile_parts(&context)?;

    assert_eq!(parts.text.as_deref(), Some("MATCH len=3"));
    assert!(parts.html.unwrap_or_default().contains("MATCH len=3"));

    Ok(())
}

/// Test: Client HTML is inserted into the document shell unescaped
#[tokio::test]
async fn test_html_body_is_wrapped_in_document_shell() -> Result<()> {
    let registry = Arc::new(FakeRegistry::seeded());
    let mut delivery = addressed("m1");
    delivery.options.html.doctype = "<!DOCTYPE html>".to_string();
    delivery.options.html.head = "<title>Build</title>".to_string();
    delivery.options.html.body_attributes = r#"class="mail""#.to_string();

    let packager = packager(&registry);
    let context = packager.prepare_context(&delivery, SENDER, DOMAIN).await?;
    let message = packager.pack(&context)?;

    let html = message.part(TEXT_HTML).unwrap_or_default();
    assert!(html.starts_with("<!DOCTYPE html>\n<html>"));
    assert!(html.contains("<head><title>Build</title></head>"));
    assert!(html.contains(r#"<body class="mail">"#));
    assert!(html.contains("<p>Build 42 passed.</p>"));
    assert!(html.trim_end().ends_with("</html>"));

    Ok(())
}

/// Test: Parts are ordered plaintext then HTML, and empty bodies are omitted
#[tokio::test]
async fn test_parts_order_and_omission() -> Result<()> {
    let registry = Arc::new(FakeRegistry::seeded());
    let packager = packager(&registry);

    let context = packager
        .prepare_context(&addressed("both"), SENDER, DOMAIN)
        .await?;
    let message = packager.pack(&context)?;
    let types: Vec<_> = message
        .parts
        .iter()
        .map(|part| part.content_type.as_str())
        .collect();
    assert_eq!(types, vec![TEXT_PLAIN, TEXT_HTML]);

    let mut text_only = addressed("text-only");
    text_only.options.html.body_content = String::new();
    let context = packager.prepare_context(&text_only, SENDER, DOMAIN).await?;
    let message = packager.pack(&context)?;
    assert_eq!(message.parts.len(), 1);
    assert_eq!(message.parts[0].content_type, TEXT_PLAIN);

    let mut html_only = addressed("html-only");
    html_only.options.text = String::new();
    let context = packager.prepare_context(&html_only, SENDER, DOMAIN).await?;
    let message = packager.pack(&context)?;
    assert_eq!(message.parts.len(), 1);
    assert_eq!(message.parts[0].content_type, TEXT_HTML);

    Ok(())
}

/// Test: Notification headers are attached in RFC 3339 form
#[tokio::test]
async fn test_pack_sets_notification_headers() -> Result<()> {
    let registry = Arc::new(FakeRegistry::seeded());
    let packager = packager(&registry);

    let context = packager
        .prepare_context(&addressed("m1"), SENDER, DOMAIN)
        .await?;
    let message = packager.pack(&context)?;

    assert_eq!(message.header(CLIENT_ID_HEADER), Some(CLIENT_ID));
    assert_eq!(message.header(NOTIFICATION_ID_HEADER), Some("m1"));
    assert_eq!(
        message.header(REQUEST_RECEIVED_HEADER),
        Some("2024-03-01T10:00:00.000000000Z")
    );

    let timestamp = message
        .header(NOTIFICATION_TIMESTAMP_HEADER)
        .unwrap_or_default();
    assert!(DateTime::parse_from_rfc3339(timestamp).is_ok());

    Ok(())
}

/// Test: The endorsement is expanded before the bodies and appears in both parts
#[tokio::test]
async fn test_endorsement_is_compiled_into_both_parts() -> Result<()> {
    let registry = Arc::new(FakeRegistry::seeded());
    let mut delivery = addressed("m1");
    delivery.options.endorsement = "You received this as a member of {{ space }} & co".to_string();

    let packager = packager(&registry);
    let context = packager.prepare_context(&delivery, SENDER, DOMAIN).await?;
    let parts = packager.compile_parts(&context)?;

    assert_eq!(parts.subject, "CF Notification: Your build finished");
    assert!(
        parts
            .text
            .unwrap_or_default()
            .starts_with("You received this as a member of production & co")
    );
    assert!(
        parts
            .html
            .unwrap_or_default()
            .contains("<p>You received this as a member of production &amp; co</p>")
    );

    Ok(())
}

/// Test: Unknown template variables are compile errors
#[tokio::test]
async fn test_undefined_variable_is_compile_error() -> Result<()> {
    let registry = Arc::new(FakeRegistry::seeded());
    registry.add_template("broken", "{{ subject }}", "{{ nope }}", "");
    registry.add_kind(KIND_ID, CLIENT_ID, false, "broken");

    let packager = packager(&registry);
    let context = packager
        .prepare_context(&addressed("m1"), SENDER, DOMAIN)
        .await?;

    assert!(matches!(
        packager.pack(&context),
        Err(PackError::Compile { part: "text", .. })
    ));

    Ok(())
}

/// Test: Template lookup failures surface from prepare_context
#[tokio::test]
async fn test_missing_client_is_template_error() -> Result<()> {
    let registry = Arc::new(FakeRegistry::default());
    let mut delivery = addressed("m1");
    delivery.kind_id = String::new();

    let result = packager(&registry)
        .prepare_context(&delivery, SENDER, DOMAIN)
        .await;

    assert!(matches!(result, Err(PackError::Templates(_))));

    Ok(())
}
