//! Shared fixtures: an engine over `MemoryStore` with a manual clock and a
//! transport that replays scripted outcomes.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hookline_core::{
    Clock, Engine, EngineOptions, MailTransport, ManualClock, MiniJinjaRenderer, NewCampaign,
    OutboundMessage, RetryPolicy, SchedulerOptions, TransportError,
};
use hookline_storage::{
    Campaign, CampaignRepository, MemoryStore, MessageTemplate, RecipientFields, SendingProfile,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};
use uuid::Uuid;

pub fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Replays queued outcomes, then delivers everything
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<(), TransportError>>>,
    delivered: Mutex<Vec<OutboundMessage>>,
}

impl ScriptedTransport {
    pub fn push(&self, outcome: Result<(), TransportError>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn delivered(&self) -> Vec<OutboundMessage> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for ScriptedTransport {
    async fn send(
        &self,
        _profile: &SendingProfile,
        message: &OutboundMessage,
    ) -> Result<(), TransportError> {
        let next = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
        if next.is_ok() {
            self.delivered.lock().unwrap().push(message.clone());
        }
        next
    }
}

/// Holds every send to an address starting with `slow@` until released
pub struct GatedTransport {
    gate: Semaphore,
    pub held: Notify,
    delivered: Mutex<Vec<String>>,
}

impl Default for GatedTransport {
    fn default() -> Self {
        Self {
            gate: Semaphore::new(0),
            held: Notify::new(),
            delivered: Mutex::new(Vec::new()),
        }
    }
}

impl GatedTransport {
    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for GatedTransport {
    async fn send(
        &self,
        _profile: &SendingProfile,
        message: &OutboundMessage,
    ) -> Result<(), TransportError> {
        if message.to.starts_with("slow@") {
            self.held.notify_one();
            self.gate.acquire().await.unwrap().forget();
        }
        self.delivered.lock().unwrap().push(message.to.clone());
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub transport: Arc<ScriptedTransport>,
    pub engine: Engine,
    pub owner_id: Uuid,
    pub template_id: Uuid,
    pub sending_profile_id: Uuid,
}

pub fn options() -> EngineOptions {
    EngineOptions {
        scheduler: SchedulerOptions {
            instance_name: "test".to_string(),
            batch_size: 100,
            concurrency: 4,
            ..Default::default()
        },
        retry: RetryPolicy::new(5, Duration::seconds(60), Duration::hours(1)),
        lease: Duration::minutes(2),
        max_per_minute: None,
        tracking_base_url: "https://track.example.com/t".to_string(),
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(options())
    }

    pub fn with_options(options: EngineOptions) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let transport = Arc::new(ScriptedTransport::default());
        let owner_id = Uuid::new_v4();

        let template = MessageTemplate {
            id: Uuid::new_v4(),
            owner_id,
            name: "Password expiry".to_string(),
            subject: "{{ first_name }}, your password expires today".to_string(),
            text: Some("Reset it here: {{ url }}".to_string()),
            html: Some("<a href=\"{{ url }}\">Reset</a>{{ tracker }}".to_string()),
        };
        let profile = SendingProfile {
            id: Uuid::new_v4(),
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
        let template_id = template.id;
        let sending_profile_id = profile.id;
        store.insert_template(template).unwrap();
        store.insert_sending_profile(profile).unwrap();

        let engine = Self::engine_over(&store, &clock, &transport, options);

        Self {
            store,
            clock,
            transport,
            engine,
            owner_id,
            template_id,
            sending_profile_id,
        }
    }

    /// A second engine over the same store, as another instance would be
    pub fn engine_over(
        store: &Arc<MemoryStore>,
        clock: &Arc<ManualClock>,
        transport: &Arc<ScriptedTransport>,
        options: EngineOptions,
    ) -> Engine {
        Engine::new(
            options,
            hookline_core::Repositories::memory(Arc::clone(store)),
            Arc::new(MiniJinjaRenderer::new()),
            transport.clone(),
            clock.clone(),
        )
    }

    /// An engine over this harness's store and clock with another transport
    pub fn engine_with(&self, transport: Arc<dyn MailTransport>, options: EngineOptions) -> Engine {
        Engine::new(
            options,
            hookline_core::Repositories::memory(Arc::clone(&self.store)),
            Arc::new(MiniJinjaRenderer::new()),
            transport,
            self.clock.clone(),
        )
    }

    pub fn request(&self, emails: &[&str]) -> NewCampaign {
        NewCampaign {
            name: "Password expiry".to_string(),
            template_id: self.template_id,
            page_id: None,
            sending_profile_id: self.sending_profile_id,
            url: "https://landing.example.com".to_string(),
            launch_date: None,
            send_by_date: None,
            targets: emails
                .iter()
                .map(|email| RecipientFields {
                    email: email.to_string(),
                    first_name: "Pat".to_string(),
                    last_name: "Doe".to_string(),
                    position: "Analyst".to_string(),
                })
                .collect(),
        }
    }

    pub async fn launch(&self, emails: &[&str]) -> Campaign {
        self.engine
            .campaigns
            .launch(self.owner_id, self.request(emails))
            .await
            .unwrap()
    }

    pub async fn campaign(&self, id: Uuid) -> Campaign {
        self.engine.repos.campaigns.get(id).await.unwrap().unwrap()
    }

    pub async fn tick(&self) -> hookline_core::TickReport {
        self.engine.scheduler.run_tick(self.clock.now()).await.unwrap()
    }
}

pub fn emails(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("user{}@example.com", i)).collect()
}
