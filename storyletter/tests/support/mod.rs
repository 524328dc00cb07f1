#![allow(dead_code)]

use std::sync::Mutex;

use common::{
    init_db_pool, AdminConfig, Config, DatabaseConfig, DistributionConfig, SchedulerConfig,
};
use sqlx::SqlitePool;
use storyletter::email::{Mailer, OutboundEmail};
use storyletter::llm::{LlmProvider, LlmRequest, LlmResponse, StoryDraft};
use storyletter::server;

/// Fresh file-backed test database with the schema applied.
pub async fn setup_test_db() -> SqlitePool {
    let db_path = std::env::temp_dir().join(format!("storyletter_test_{}.sqlite", uuid::Uuid::new_v4()));
    let pool = init_db_pool(&db_path.to_string_lossy()).await.expect("init pool");
    server::ensure_schema(&pool).await.expect("ensure schema");
    pool
}

/// Minimal config for exercising the pipeline without a network.
pub fn test_config() -> Config {
    Config {
        database: DatabaseConfig {
            path: "unused".into(),
        },
        server: None,
        scheduler: SchedulerConfig {
            generate_at: "20:00".into(),
            distribute_at: "06:00".into(),
        },
        llm: None,
        smtp: None,
        admin: AdminConfig {
            email: "operator@example.com".into(),
            secret_env: None,
            app_url: "http://localhost:8000".into(),
        },
        distribution: Some(DistributionConfig { delay_ms: Some(0) }),
        generator: None,
    }
}

/// Recording mailer. Successful sends are captured; addresses listed in
/// `fail_to` simulate a transport rejection.
pub struct MockMailer {
    pub sent: Mutex<Vec<OutboundEmail>>,
    pub fail_to: Vec<String>,
}

impl MockMailer {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_to: Vec::new(),
        }
    }

    pub fn failing_for(addresses: &[&str]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_to: addresses.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent_to(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|e| e.to.clone()).collect()
    }
}

#[async_trait::async_trait]
impl Mailer for MockMailer {
    async fn send(&self, email: &OutboundEmail) -> anyhow::Result<()> {
        if self.fail_to.contains(&email.to) {
            anyhow::bail!("simulated transport failure for {}", email.to);
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

/// Writer stub returning a fixed draft.
pub struct ScriptedLlm {
    pub draft: StoryDraft,
}

impl ScriptedLlm {
    pub fn with_draft(title: &str, bullets: &[&str], content: &str) -> Self {
        Self {
            draft: StoryDraft {
                title: title.into(),
                summary_bullets: bullets.iter().map(|s| s.to_string()).collect(),
                content: content.into(),
            },
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate(&self, _request: LlmRequest) -> anyhow::Result<LlmResponse> {
        anyhow::bail!("raw generation is not scripted in tests")
    }

    async fn write_story(&self, _themes: &[String]) -> anyhow::Result<StoryDraft> {
        Ok(self.draft.clone())
    }
}
