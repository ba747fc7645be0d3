use std::env;

use anyhow::{bail, Context, Result};
use chrono::{Duration, NaiveDateTime, Utc};
use diesel::prelude::*;
use tracing_subscriber::EnvFilter;

use officebridge::{
    config::AppConfig, db, models::UserDocumentVersion, schema::user_document_versions,
};

const DEFAULT_STALE_DRAFT_DAYS: i64 = 30;
const USAGE: &str = "Usage: maintenance stale-drafts [days]";

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("stale-drafts") => {
            let days = match args.next() {
                Some(raw) => parse_days(&raw)?,
                None => DEFAULT_STALE_DRAFT_DAYS,
            };
            report_stale_drafts(days)
        }
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }
}

fn parse_days(raw: &str) -> Result<i64> {
    let days: i64 = raw
        .trim()
        .parse()
        .with_context(|| format!("days must be a whole number, got {raw:?}"))?;
    if days < 0 {
        bail!("days must not be negative");
    }
    Ok(days)
}

fn stale_cutoff(now: NaiveDateTime, days: i64) -> Result<NaiveDateTime> {
    Duration::try_days(days)
        .and_then(|age| now.checked_sub_signed(age))
        .with_context(|| format!("{days} days reaches before the earliest representable date"))
}

/// Lists drafts nobody finished. Nothing is deleted.
fn report_stale_drafts(days: i64) -> Result<()> {
    let cutoff = stale_cutoff(Utc::now().naive_utc(), days)?;
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        days,
        "scanning for stale drafts"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let drafts: Vec<UserDocumentVersion> = user_document_versions::table
        .filter(user_document_versions::is_draft.eq(true))
        .filter(user_document_versions::created_at.lt(cutoff))
        .order(user_document_versions::created_at.asc())
        .load(&mut conn)
        .context("failed to load draft versions")?;

    if drafts.is_empty() {
        println!("No drafts older than {days} days.");
        return Ok(());
    }

    println!("{} drafts older than {days} days:", drafts.len());
    for draft in &drafts {
        println!(
            "{}\tdocument={}\tuser={}\tv{}\tcreated={}\tbridge_file={}",
            draft.id,
            draft.document_id,
            draft.user_id,
            draft.version_number,
            draft.created_at.format("%Y-%m-%d %H:%M:%S"),
            draft.bridge_file_id.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_day_counts() {
        assert_eq!(parse_days(" 7 ").unwrap(), 7);
        assert!(parse_days("-1").is_err());
        assert!(parse_days("soon").is_err());
    }

    #[test]
    fn cutoff_counts_back_whole_days() {
        let now = NaiveDateTime::parse_from_str("2024-03-31 12:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let cutoff = stale_cutoff(now, 30).unwrap();
        assert_eq!(cutoff.to_string(), "2024-03-01 12:00:00");
    }

    #[test]
    fn huge_day_counts_are_errors() {
        let now = Utc::now().naive_utc();
        assert!(stale_cutoff(now, 999_999_999_999).is_err());
        assert!(stale_cutoff(now, 99_999_999).is_err());
    }
}
