//! Dispatcher - renders and transmits one claimed mail log entry

use super::template::{TemplateContext, TemplateRenderer};
use super::transport::{MailTransport, OutboundMessage};
use crate::clock::Clock;
use crate::mail_log::MailLog;
use crate::repos::Repositories;
use crate::result_store::ResultStore;
use hookline_common::{Error, Result};
use hookline_storage::{MailLogEntry, MailLogState, SendingProfile};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Outcome of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    TransientFailure(String),
    PermanentFailure(String),
}

/// What a dispatch did to its entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchReport {
    /// Entry is `sent`
    Sent,
    /// Entry went back to `pending` for another attempt
    Retried,
    /// Entry is terminal `error`
    Failed,
    /// The lease was reclaimed before the outcome could be recorded
    LeaseLost,
}

/// Dispatcher - one message per claimed entry
pub struct Dispatcher {
    repos: Repositories,
    mail_log: MailLog,
    results: ResultStore,
    renderer: Arc<dyn TemplateRenderer>,
    transport: Arc<dyn MailTransport>,
    tracking_base_url: String,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(
        repos: Repositories,
        mail_log: MailLog,
        results: ResultStore,
        renderer: Arc<dyn TemplateRenderer>,
        transport: Arc<dyn MailTransport>,
        tracking_base_url: String,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repos,
            mail_log,
            results,
            renderer,
            transport,
            tracking_base_url,
            clock,
        }
    }

    /// Render and transmit the message for `entry`
    pub async fn send(&self, entry: &MailLogEntry) -> DeliveryOutcome {
        let (profile, message) = match self.prepare(entry).await {
            Ok(prepared) => prepared,
            Err(outcome) => return outcome,
        };

        match self.transport.send(&profile, &message).await {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(e) if e.permanent => DeliveryOutcome::PermanentFailure(e.message),
            Err(e) => DeliveryOutcome::TransientFailure(e.message),
        }
    }

    async fn prepare(
        &self,
        entry: &MailLogEntry,
    ) -> std::result::Result<(SendingProfile, OutboundMessage), DeliveryOutcome> {
        let campaign = match self.repos.campaigns.get(entry.campaign_id).await {
            Ok(Some(campaign)) => campaign,
            Ok(None) => {
                return Err(DeliveryOutcome::PermanentFailure(
                    "campaign no longer exists".to_string(),
                ))
            }
            Err(e) => return Err(load_failure(e)),
        };

        let target = match self.repos.campaigns.get_target(entry.target_id).await {
            Ok(Some(target)) => target,
            Ok(None) => {
                return Err(DeliveryOutcome::PermanentFailure(
                    "target no longer exists".to_string(),
                ))
            }
            Err(e) => return Err(load_failure(e)),
        };

        let template = match self
            .repos
            .assets
            .get_template(campaign.owner_id, campaign.template_id)
            .await
        {
            Ok(Some(template)) => template,
            Ok(None) => {
                return Err(DeliveryOutcome::PermanentFailure(
                    "template not found".to_string(),
                ))
            }
            Err(e) => return Err(load_failure(e)),
        };

        let profile = match self
            .repos
            .assets
            .get_sending_profile(campaign.owner_id, campaign.sending_profile_id)
            .await
        {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                return Err(DeliveryOutcome::PermanentFailure(
                    "sending profile not found".to_string(),
                ))
            }
            Err(e) => return Err(load_failure(e)),
        };

        let ctx = TemplateContext::new(&campaign, &target, &profile, &self.tracking_base_url);
        let rendered = self
            .renderer
            .render(&template, &ctx)
            .map_err(|e| DeliveryOutcome::PermanentFailure(e.to_string()))?;

        let message = OutboundMessage {
            from: profile.from_address.clone(),
            to: target.recipient.email.clone(),
            subject: rendered.subject,
            text: rendered.text,
            html: rendered.html,
        };
        Ok((profile, message))
    }

    /// Send `entry` and record the outcome under `owner`'s lease
    pub async fn dispatch(&self, entry: &MailLogEntry, owner: &str) -> Result<DispatchReport> {
        let outcome = self.send(entry).await;
        self.record(entry, owner, outcome).await
    }

    /// Write a delivery outcome back to the mail log and result
    pub async fn record(
        &self,
        entry: &MailLogEntry,
        owner: &str,
        outcome: DeliveryOutcome,
    ) -> Result<DispatchReport> {
        let now = self.clock.now();

        let (error, permanent) = match outcome {
            DeliveryOutcome::Delivered => {
                let Some(done) = self.mail_log.complete(entry.id, owner, now).await? else {
                    warn!(
                        mail_log_id = %entry.id,
                        owner,
                        "Delivered after lease was lost, outcome not recorded"
                    );
                    return Ok(DispatchReport::LeaseLost);
                };

                // On error the result stays queued until the next status refresh
                self.results
                    .mark_sent(done.campaign_id, done.target_id, now)
                    .await?;
                info!(
                    mail_log_id = %done.id,
                    campaign_id = %done.campaign_id,
                    retry_count = done.retry_count,
                    "Message sent"
                );
                return Ok(DispatchReport::Sent);
            }
            DeliveryOutcome::TransientFailure(error) => (error, false),
            DeliveryOutcome::PermanentFailure(error) => (error, true),
        };

        let Some(failed) = self
            .mail_log
            .fail(entry.id, owner, &error, permanent, now)
            .await?
        else {
            warn!(
                mail_log_id = %entry.id,
                owner,
                error = %error,
                "Send failed after lease was lost, outcome not recorded"
            );
            return Ok(DispatchReport::LeaseLost);
        };

        match failed.state {
            MailLogState::Error => {
                let reason = failed.last_error.as_deref().unwrap_or(error.as_str());
                self.results
                    .mark_error(failed.campaign_id, failed.target_id, reason, now)
                    .await?;
                error!(
                    mail_log_id = %failed.id,
                    campaign_id = %failed.campaign_id,
                    permanent,
                    retry_count = failed.retry_count,
                    error = %reason,
                    "Message failed"
                );
                Ok(DispatchReport::Failed)
            }
            _ => {
                debug!(
                    mail_log_id = %failed.id,
                    retry_count = failed.retry_count,
                    send_at = %failed.send_at,
                    error = %error,
                    "Send failed, retry scheduled"
                );
                Ok(DispatchReport::Retried)
            }
        }
    }
}

/// A lookup that failed because of the store is worth another attempt
fn load_failure(err: Error) -> DeliveryOutcome {
    DeliveryOutcome::TransientFailure(format!("Failed to load send inputs: {}", err))
}
