use chrono::{SecondsFormat, Utc};
use minijinja::{AutoEscape, Environment, UndefinedBehavior, Value};
use serde::Serialize;

use crate::{
    delivery::{cloak::Cloak, templates::TemplateResolver},
    error::PackError,
    models::{
        context::MessageContext,
        delivery::{Delivery, Html},
        message::{
            CLIENT_ID_HEADER, Message, NOTIFICATION_ID_HEADER, NOTIFICATION_TIMESTAMP_HEADER,
            Part, REQUEST_RECEIVED_HEADER,
        },
    },
};

pub const NO_SUBJECT: &str = "[no subject]";

/// Shell every HTML part is wrapped in.
const EMAIL_DOCUMENT: &str = "{{ html_components.doctype }}
<html>
\t<head>{{ html_components.head }}</head>
\t<body {{ html_components.body_attributes }}>
\t\t{{ html }}
\t</body>
</html>";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledParts {
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
}

/// What a template sees: every message field, plus the client markup slots.
#[derive(Serialize)]
struct RenderContext<'a> {
    #[serde(flatten)]
    message: &'a MessageContext,
    html: Value,
    html_components: Value,
}

/// Client-supplied markup, marked safe so HTML auto-escaping leaves it alone.
#[derive(Serialize)]
struct TrustedMarkup {
    body_content: Value,
    body_attributes: Value,
    head: Value,
    doctype: Value,
}

impl TrustedMarkup {
    fn from_html(html: &Html) -> Self {
        Self {
            body_content: Value::from_safe_string(html.body_content.clone()),
            body_attributes: Value::from_safe_string(html.body_attributes.clone()),
            head: Value::from_safe_string(html.head.clone()),
            doctype: Value::from_safe_string(html.doctype.clone()),
        }
    }
}

pub struct Packager {
    templates: TemplateResolver,
    cloak: Cloak,
    text_env: Environment<'static>,
    html_env: Environment<'static>,
}

impl Packager {
    pub fn new(templates: TemplateResolver, cloak: Cloak) -> Self {
        Self {
            templates,
            cloak,
            text_env: template_env(AutoEscape::None),
            html_env: template_env(AutoEscape::Html),
        }
    }

    pub async fn prepare_context(
        &self,
        delivery: &Delivery,
        sender: &str,
        domain: &str,
    ) -> Result<MessageContext, PackError> {
        let options = &delivery.options;
        let templates = self
            .templates
            .load_templates(&delivery.client_id, &delivery.kind_id, &options.template_id)
            .await?;

        let unsubscribe_id = self.cloak.veil(
            format!(
                "{}|{}|{}",
                delivery.user_guid, delivery.client_id, delivery.kind_id
            )
            .as_bytes(),
        )?;

        Ok(MessageContext {
            from: sender.to_string(),
            reply_to: options.reply_to.clone(),
            to: delivery.email.clone(),
            subject: or_fallback(&options.subject, NO_SUBJECT),
            text: options.text.clone(),
            html: options.html.body_content.clone(),
            html_components: options.html.clone(),
            text_template: templates.text,
            html_template: templates.html,
            subject_template: templates.subject,
            kind_description: or_fallback(&options.kind_description, &delivery.kind_id),
            source_description: or_fallback(&options.source_description, &delivery.client_id),
            user_guid: delivery.user_guid.clone(),
            client_id: delivery.client_id.clone(),
            message_id: delivery.message_id.clone(),
            space: delivery.space.name.clone(),
            space_guid: delivery.space.guid.clone(),
            organization: delivery.organization.name.clone(),
            organization_guid: delivery.organization.guid.clone(),
            unsubscribe_id,
            scope: delivery.scope.clone(),
            endorsement: options.endorsement.clone(),
            role: options.role.clone(),
            domain: domain.to_string(),
            request_received: delivery.request_received,
        })
    }

    pub fn pack(&self, context: &MessageContext) -> Result<Message, PackError> {
        let compiled = self.compile_parts(context)?;

        let mut parts = Vec::with_capacity(2);
        if let Some(text) = compiled.text {
            parts.push(Part::plain(text));
        }
        if let Some(html) = compiled.html {
            parts.push(Part::html(html));
        }

        Ok(Message {
            from: context.from.clone(),
            reply_to: context.reply_to.clone(),
            to: context.to.clone(),
            subject: compiled.subject,
            parts,
            headers: vec![
                (CLIENT_ID_HEADER.to_string(), context.client_id.clone()),
                (NOTIFICATION_ID_HEADER.to_string(), context.message_id.clone()),
                (
                    NOTIFICATION_TIMESTAMP_HEADER.to_string(),
                    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
                ),
                (
                    REQUEST_RECEIVED_HEADER.to_string(),
                    context
                        .request_received
                        .to_rfc3339_opts(SecondsFormat::Nanos, true),
                ),
            ],
        })
    }

    /// Compiles the endorsement first, then subject, plaintext and HTML against
    /// a context carrying the compiled endorsement. Only the HTML path escapes.
    pub fn compile_parts(&self, context: &MessageContext) -> Result<CompiledParts, PackError> {
        let mut message = context.clone();
        let endorsement =
            compile(&self.text_env, "endorsement", &message.endorsement, &plain(&message))?;
        message.endorsement = endorsement;

        let text_context = plain(&message);
        let subject = compile(
            &self.text_env,
            "subject",
            &message.subject_template,
            &text_context,
        )?;

        let text = if message.text.is_empty() {
            None
        } else {
            Some(compile(&self.text_env, "text", &message.text_template, &text_context)?)
        };

        let html = if message.html.is_empty() {
            None
        } else {
            let body = compile(
                &self.html_env,
                "html",
                &message.html_template,
                &trusted(&message, message.html.clone()),
            )?;
            Some(compile(
                &self.html_env,
                "document",
                EMAIL_DOCUMENT,
                &trusted(&message, body),
            )?)
        };

        Ok(CompiledParts {
            subject,
            text,
            html,
        })
    }
}

fn template_env(auto_escape: AutoEscape) -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_auto_escape_callback(move |_| auto_escape.clone());
    env
}

fn plain(message: &MessageContext) -> RenderContext<'_> {
    RenderContext {
        message,
        html: Value::from(message.html.clone()),
        html_components: Value::from_serialize(&message.html_components),
    }
}

fn trusted(message: &MessageContext, html: String) -> RenderContext<'_> {
    let markup = TrustedMarkup::from_html(&message.html_components);

    RenderContext {
        message,
        html: Value::from_safe_string(html),
        html_components: Value::from_serialize(&markup),
    }
}

fn compile<S: Serialize>(
    env: &Environment<'static>,
    part: &'static str,
    source: &str,
    context: &S,
) -> Result<String, PackError> {
    env.render_str(source, context)
        .map_err(|e| PackError::Compile {
            part,
            reason: e.to_string(),
        })
}

fn or_fallback(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}
