use chrono::{DateTime, NaiveDate, Timelike, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use sqlx::SqlitePool;
use tracing::info;

use crate::email::{templates, EmailKind, Mailer, OutboundEmail};
use crate::error::{Error, Result};
use crate::llm::{LlmProvider, StoryDraft};
use crate::storage::{self, Story, StoryStatus};

/// Fallback thematic category pool, used when `[generator] categories` is not
/// set in the config. Selection is always a random sample without replacement.
pub const DEFAULT_CATEGORIES: &[&str] = &[
    "Forests", "Mountains", "Animals", "Space", "Oceans", "Beach", "Vacations", "Kids",
    "Weather", "Dinosaurs", "Magic", "Dragons", "Unicorns", "Mermaids", "Castles",
    "Knights", "Princess", "Fairies", "Gnomes", "Lilliputs", "Giants", "Superpowers",
    "Vehicles", "Inventions", "Time Travel", "Expeditions", "Family & Home", "Playgrounds",
    "Classrooms", "Sports", "Firefighters", "Doctors", "Helpful Neighbors", "Toys",
    "Bizarre Physics", "Arts", "Colors", "Dreams", "Nighttime", "Garden", "Treehouses",
    "Fortresses", "Secret Hideouts", "Exploration",
];

/// Outcome of one generation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerateOutcome {
    /// A new DRAFT was created and the operator was notified.
    Created { story_id: i64, title: String },
    /// A DRAFT already exists for the target date; the review notification
    /// was re-sent instead of regenerating.
    DraftPending { story_id: i64, title: String },
    /// An APPROVED/SENT story already exists; nothing to do.
    AlreadyPublished { story_id: i64 },
}

/// Compute the calendar date a generation run targets.
///
/// The nominal run happens late in one UTC day and writes tomorrow's story;
/// a delayed run that crosses midnight must still resolve to the same date.
/// UTC hour >= 12 therefore targets tomorrow, earlier hours target today.
pub fn target_date(now: DateTime<Utc>) -> NaiveDate {
    if now.hour() >= 12 {
        now.date_naive() + chrono::Duration::days(1)
    } else {
        now.date_naive()
    }
}

/// URL-safe slug derived from a title: lower-case, whitespace to hyphens,
/// non-word characters stripped, hyphen runs collapsed, edge hyphens trimmed.
pub fn slugify(title: &str) -> String {
    let lowered = title.trim().to_lowercase();
    let mut raw = String::with_capacity(lowered.len());
    for c in lowered.chars() {
        if c.is_whitespace() {
            raw.push('-');
        } else if c.is_alphanumeric() || c == '_' || c == '-' {
            raw.push(c);
        }
    }

    let mut slug = String::with_capacity(raw.len());
    let mut prev_hyphen = true; // leading hyphens are dropped
    for c in raw.chars() {
        if c == '-' {
            if !prev_hyphen {
                slug.push('-');
            }
            prev_hyphen = true;
        } else {
            slug.push(c);
            prev_hyphen = false;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Sample 2-3 themes without replacement from the category pool.
pub fn pick_categories<R: Rng + ?Sized>(pool: &[String], rng: &mut R) -> Vec<String> {
    let count = rng.gen_range(2..=3usize).min(pool.len());
    pool.choose_multiple(rng, count).cloned().collect()
}

/// Reject writer output that does not match the expected shape.
/// Nothing is persisted for a draft that fails here.
fn validate_draft(draft: &StoryDraft) -> Result<()> {
    if draft.title.trim().is_empty() {
        return Err(Error::Validation("writer returned an empty title".into()));
    }
    if draft.summary_bullets.len() != 3 {
        return Err(Error::Validation(format!(
            "writer returned {} summary bullets, expected exactly 3",
            draft.summary_bullets.len()
        )));
    }
    if draft.content.trim().is_empty() {
        return Err(Error::Validation("writer returned empty content".into()));
    }
    Ok(())
}

fn category_pool(config: &common::Config) -> Vec<String> {
    let configured = config
        .generator
        .as_ref()
        .map(|g| g.categories.clone())
        .unwrap_or_default();
    if configured.is_empty() {
        DEFAULT_CATEGORIES.iter().map(|s| s.to_string()).collect()
    } else {
        configured
    }
}

/// Produce exactly one new story for the computed target date, or recover
/// gracefully if one already exists (idempotent generation).
pub async fn run_generate<R: Rng + ?Sized>(
    pool: &SqlitePool,
    llm: &dyn LlmProvider,
    mailer: &dyn Mailer,
    config: &common::Config,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Result<GenerateOutcome> {
    let date = target_date(now);

    if let Some(existing) = storage::find_story_by_date(pool, date).await? {
        return match existing.status {
            StoryStatus::Draft => {
                info!("Story for {} exists but is in DRAFT, resending review email", date);
                send_review_email(mailer, config, &existing, true).await?;
                Ok(GenerateOutcome::DraftPending {
                    story_id: existing.id,
                    title: existing.title,
                })
            }
            _ => Ok(GenerateOutcome::AlreadyPublished {
                story_id: existing.id,
            }),
        };
    }

    let categories = category_pool(config);
    let themes = pick_categories(&categories, rng);
    info!("Generating story for {} with themes: {}", date, themes.join(", "));

    let draft = llm.write_story(&themes).await.map_err(Error::transport)?;
    validate_draft(&draft)?;

    let slug = slugify(&draft.title);
    let story = storage::insert_story(
        pool,
        date,
        &draft.title,
        &draft.summary_bullets,
        &draft.content,
        &themes,
        &slug,
    )
    .await?;

    send_review_email(mailer, config, &story, false).await?;

    Ok(GenerateOutcome::Created {
        story_id: story.id,
        title: story.title,
    })
}

/// Notify the operator that a story awaits review.
pub async fn send_review_email(
    mailer: &dyn Mailer,
    config: &common::Config,
    story: &Story,
    is_draft: bool,
) -> Result<()> {
    let review_url = review_url(config, story.id);
    let date_str = story.date.to_string();

    mailer
        .send(&OutboundEmail {
            to: config.admin.email.clone(),
            subject: format!("📖 Review Tomorrow's Story: {}", story.title),
            html: templates::admin_review_html(&story.title, &review_url, &date_str, is_draft),
            kind: EmailKind::AdminApproval,
        })
        .await
        .map_err(Error::transport)
}

/// Review link for the operator UI; the shared secret rides along as a query
/// parameter so the link works from a mail client.
pub fn review_url(config: &common::Config, story_id: i64) -> String {
    format!(
        "{}/admin/review/{}?secret_key={}",
        config.admin.app_url.trim_end_matches('/'),
        story_id,
        config.admin_secret().unwrap_or_default()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn target_date_before_noon_is_today() {
        let now = Utc.with_ymd_and_hms(2026, 1, 12, 11, 0, 0).unwrap();
        assert_eq!(target_date(now), NaiveDate::from_ymd_opt(2026, 1, 12).unwrap());
    }

    #[test]
    fn target_date_after_noon_is_tomorrow() {
        let now = Utc.with_ymd_and_hms(2026, 1, 12, 13, 0, 0).unwrap();
        assert_eq!(target_date(now), NaiveDate::from_ymd_opt(2026, 1, 13).unwrap());
    }

    #[test]
    fn target_date_crosses_month_boundary() {
        let now = Utc.with_ymd_and_hms(2026, 1, 31, 20, 0, 0).unwrap();
        assert_eq!(target_date(now), NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());
    }

    #[test]
    fn slugify_strips_punctuation_and_collapses_hyphens() {
        assert_eq!(
            slugify("Luna & the Starlight Garden!"),
            "luna-the-starlight-garden"
        );
    }

    #[test]
    fn slugify_trims_edge_hyphens() {
        assert_eq!(slugify("  --Hello,  World--  "), "hello-world");
    }

    #[test]
    fn slugify_lowercases() {
        assert_eq!(slugify("The GREAT Escape"), "the-great-escape");
    }

    #[test]
    fn pick_categories_samples_without_replacement() {
        let pool: Vec<String> = DEFAULT_CATEGORIES.iter().map(|s| s.to_string()).collect();
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..50 {
            let picked = pick_categories(&pool, &mut rng);
            assert!(picked.len() == 2 || picked.len() == 3);
            let mut dedup = picked.clone();
            dedup.sort();
            dedup.dedup();
            assert_eq!(dedup.len(), picked.len(), "duplicate theme in {:?}", picked);
        }
    }

    #[test]
    fn pick_categories_is_reproducible_from_seed() {
        let pool: Vec<String> = DEFAULT_CATEGORIES.iter().map(|s| s.to_string()).collect();
        let a = pick_categories(&pool, &mut StdRng::seed_from_u64(7));
        let b = pick_categories(&pool, &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }

    #[test]
    fn validate_draft_rejects_wrong_bullet_count() {
        let draft = StoryDraft {
            title: "A Title".into(),
            summary_bullets: vec!["one".into(), "two".into()],
            content: "<p>body</p>".into(),
        };
        assert!(matches!(validate_draft(&draft), Err(Error::Validation(_))));
    }

    #[test]
    fn validate_draft_accepts_well_formed_output() {
        let draft = StoryDraft {
            title: "A Title".into(),
            summary_bullets: vec!["one".into(), "two".into(), "three".into()],
            content: "<p>body</p>".into(),
        };
        assert!(validate_draft(&draft).is_ok());
    }
}
