//! `packsync status`: what is currently in the pack cache.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use packsync_sync::inventory::{list_cached_packs, CachedPack};

use super::GlobalArgs;

/// Arguments for `packsync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct StatusJson {
    cache_root: String,
    packs: Vec<PackStatusJson>,
}

#[derive(Serialize)]
struct PackStatusJson {
    #[serde(flatten)]
    pack: CachedPack,
    synced_at: Option<String>,
    synced_age: String,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "pack")]
    pack: String,
    #[tabled(rename = "units")]
    units: usize,
    #[tabled(rename = "dependencies")]
    dependencies: usize,
    #[tabled(rename = "last sync")]
    last_sync: String,
    #[tabled(rename = "detail")]
    detail: String,
}

impl StatusArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let session = global.session()?;
        let cache_root = session.cache_root();
        let packs = list_cached_packs(&cache_root)
            .with_context(|| format!("failed to list packs in {}", cache_root.display()))?;

        if self.json {
            let payload = StatusJson {
                cache_root: cache_root.display().to_string(),
                packs: packs
                    .into_iter()
                    .map(|pack| PackStatusJson {
                        synced_at: synced_at(&pack).map(|t| t.to_rfc3339()),
                        synced_age: synced_age(&pack),
                        pack,
                    })
                    .collect(),
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
            );
            return Ok(());
        }

        println!(
            "packsync v{} | {} packs | {}",
            env!("CARGO_PKG_VERSION"),
            packs.len(),
            cache_root.display()
        );
        if packs.is_empty() {
            println!("No packs cached. Run 'packsync sync' to populate the cache.");
            return Ok(());
        }

        let broken = packs.iter().filter(|p| p.error.is_some()).count();
        let rows: Vec<StatusTableRow> = packs
            .iter()
            .map(|pack| StatusTableRow {
                pack: pack.name.clone(),
                units: pack.units,
                dependencies: pack.dependencies,
                last_sync: synced_age(pack),
                detail: match &pack.error {
                    Some(err) => format!("{} {err}", "■".red().bold()),
                    None => format!("{} ok", "■".green().bold()),
                },
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");

        if broken > 0 {
            println!("Run 'packsync sync' to rebuild {broken} broken pack(s).");
        }
        Ok(())
    }
}

fn synced_at(pack: &CachedPack) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(pack.modified_unix?).ok()?;
    DateTime::from_timestamp(secs, 0)
}

fn synced_age(pack: &CachedPack) -> String {
    match synced_at(pack) {
        Some(at) => {
            let age = Utc::now().signed_duration_since(at).num_seconds().max(0) as u64;
            format!("{} ago", format_seconds(age))
        }
        None => "never".to_string(),
    }
}

fn format_seconds(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s");
    }
    if seconds < 60 * 60 {
        return format!("{}m", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h", seconds / (60 * 60));
    }
    format!("{}d", seconds / (60 * 60 * 24))
}
