//! Template Renderer - personalizes a message for one target

use hookline_storage::{Campaign, MessageTemplate, RecipientFields, SendingProfile, Target};
use minijinja::Environment;
use serde::Serialize;
use thiserror::Error;

/// Template rendering errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to render {part}: {message}")]
pub struct TemplateError {
    pub part: &'static str,
    pub message: String,
}

/// Personalized message content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
}

/// Values available to a template for one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateContext {
    pub rid: String,
    pub recipient: RecipientFields,
    pub from: String,
    /// Landing page the campaign points at
    pub base_url: String,
    /// Click-tracking link that redirects to the landing page
    pub url: String,
    /// Open-tracking pixel address
    pub tracking_url: String,
}

impl TemplateContext {
    pub fn new(
        campaign: &Campaign,
        target: &Target,
        profile: &SendingProfile,
        tracking_base_url: &str,
    ) -> Self {
        let base = tracking_base_url.trim_end_matches('/');
        Self {
            rid: target.rid.clone(),
            recipient: target.recipient.clone(),
            from: profile.from_address.clone(),
            base_url: campaign.url.clone(),
            url: format!("{}/{}/click?rid={}", base, campaign.id, target.rid),
            tracking_url: format!("{}/{}/open?rid={}", base, campaign.id, target.rid),
        }
    }

    /// HTML snippet that fires the open callback
    pub fn tracker(&self) -> String {
        format!(
            "<img alt='' style='display: none' src='{}'/>",
            self.tracking_url
        )
    }
}

#[derive(Serialize)]
struct TemplateVars<'a> {
    rid: &'a str,
    first_name: &'a str,
    last_name: &'a str,
    email: &'a str,
    position: &'a str,
    from: &'a str,
    url: &'a str,
    tracking_url: &'a str,
    tracker: String,
    base_url: &'a str,
}

impl<'a> From<&'a TemplateContext> for TemplateVars<'a> {
    fn from(ctx: &'a TemplateContext) -> Self {
        Self {
            rid: &ctx.rid,
            first_name: &ctx.recipient.first_name,
            last_name: &ctx.recipient.last_name,
            email: &ctx.recipient.email,
            position: &ctx.recipient.position,
            from: &ctx.from,
            url: &ctx.url,
            tracking_url: &ctx.tracking_url,
            tracker: ctx.tracker(),
            base_url: &ctx.base_url,
        }
    }
}

/// Renders message templates. Must be pure.
pub trait TemplateRenderer: Send + Sync {
    fn render(
        &self,
        template: &MessageTemplate,
        ctx: &TemplateContext,
    ) -> Result<RenderedMessage, TemplateError>;

    /// Check a template parses without rendering it
    fn validate(&self, template: &MessageTemplate) -> Result<(), TemplateError>;
}

/// Jinja-syntax renderer
pub struct MiniJinjaRenderer {
    env: Environment<'static>,
}

impl MiniJinjaRenderer {
    pub fn new() -> Self {
        Self {
            env: Environment::new(),
        }
    }

    fn render_part(
        &self,
        part: &'static str,
        source: &str,
        vars: &TemplateVars<'_>,
    ) -> Result<String, TemplateError> {
        self.env
            .render_str(source, vars)
            .map_err(|e| TemplateError {
                part,
                message: e.to_string(),
            })
    }

    fn check_part(&self, part: &'static str, source: &str) -> Result<(), TemplateError> {
        self.env
            .template_from_str(source)
            .map(|_| ())
            .map_err(|e| TemplateError {
                part,
                message: e.to_string(),
            })
    }
}

impl Default for MiniJinjaRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer for MiniJinjaRenderer {
    fn render(
        &self,
        template: &MessageTemplate,
        ctx: &TemplateContext,
    ) -> Result<RenderedMessage, TemplateError> {
        let vars = TemplateVars::from(ctx);

        let subject = self.render_part("subject", &template.subject, &vars)?;
        let text = template
            .text
            .as_deref()
            .map(|body| self.render_part("text", body, &vars))
            .transpose()?;
        let html = template
            .html
            .as_deref()
            .map(|body| self.render_part("html", body, &vars))
            .transpose()?;

        Ok(RenderedMessage {
            subject,
            text,
            html,
        })
    }

    fn validate(&self, template: &MessageTemplate) -> Result<(), TemplateError> {
        self.check_part("subject", &template.subject)?;
        if let Some(text) = &template.text {
            self.check_part("text", text)?;
        }
        if let Some(html) = &template.html {
            self.check_part("html", html)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hookline_storage::CampaignStatus;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn context() -> TemplateContext {
        let owner_id = Uuid::new_v4();
        let campaign = Campaign {
            id: Uuid::nil(),
            owner_id,
            name: "Payroll".to_string(),
            template_id: Uuid::new_v4(),
            page_id: None,
            sending_profile_id: Uuid::new_v4(),
            url: "https://landing.example.com".to_string(),
            launch_date: Utc::now(),
            send_by_date: None,
            status: CampaignStatus::Queued,
            created_at: Utc::now(),
            completed_at: None,
            cancelled_at: None,
        };
        let target = Target {
            id: Uuid::new_v4(),
            campaign_id: campaign.id,
            recipient: RecipientFields {
                email: "jdoe@example.com".to_string(),
                first_name: "John".to_string(),
                last_name: "Doe".to_string(),
                position: "Accountant".to_string(),
            },
            rid: "aB3dE9z".to_string(),
        };
        let profile = SendingProfile {
            id: campaign.sending_profile_id,
            owner_id,
            name: "relay".to_string(),
            from_address: "IT Support <it@example.com>".to_string(),
            host: "smtp.example.com".to_string(),
            port: 587,
            username: None,
            password: None,
            use_tls: false,
            use_starttls: true,
        };
        TemplateContext::new(&campaign, &target, &profile, "https://track.example.com/t/")
    }

    fn template(subject: &str, text: Option<&str>, html: Option<&str>) -> MessageTemplate {
        MessageTemplate {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            name: "t".to_string(),
            subject: subject.to_string(),
            text: text.map(str::to_string),
            html: html.map(str::to_string),
        }
    }

    #[test]
    fn test_context_links() {
        let ctx = context();
        assert_eq!(
            ctx.url,
            "https://track.example.com/t/00000000-0000-0000-0000-000000000000/click?rid=aB3dE9z"
        );
        assert_eq!(
            ctx.tracking_url,
            "https://track.example.com/t/00000000-0000-0000-0000-000000000000/open?rid=aB3dE9z"
        );
        assert!(ctx.tracker().contains(&ctx.tracking_url));
    }

    #[test]
    fn test_render_fields() {
        let renderer = MiniJinjaRenderer::new();
        let rendered = renderer
            .render(
                &template(
                    "Action required, {{ first_name }}",
                    Some("Hi {{ first_name }} {{ last_name }} ({{ position }}), visit {{ url }}"),
                    Some("<p>{{ email }}</p>{{ tracker }}"),
                ),
                &context(),
            )
            .unwrap();

        assert_eq!(rendered.subject, "Action required, John");
        assert_eq!(
            rendered.text.as_deref(),
            Some(
                "Hi John Doe (Accountant), visit https://track.example.com/t/00000000-0000-0000-0000-000000000000/click?rid=aB3dE9z"
            )
        );
        let html = rendered.html.unwrap();
        assert!(html.starts_with("<p>jdoe@example.com</p><img"));
    }

    #[test]
    fn test_unknown_variable_renders_empty() {
        let renderer = MiniJinjaRenderer::new();
        let rendered = renderer
            .render(&template("Hello {{ nickname }}!", None, None), &context())
            .unwrap();
        assert_eq!(rendered.subject, "Hello !");
        assert!(rendered.text.is_none());
    }

    #[test]
    fn test_malformed_template() {
        let renderer = MiniJinjaRenderer::new();
        let broken = template("ok", Some("{% if %}"), None);

        let err = renderer.render(&broken, &context()).unwrap_err();
        assert_eq!(err.part, "text");
        assert!(renderer.validate(&broken).is_err());
        assert!(renderer
            .validate(&template("{{ rid }}", None, Some("{{ tracker }}")))
            .is_ok());
    }
}
