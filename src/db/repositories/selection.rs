use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::db::{connection::Database, helpers::format_datetime};
use crate::enforcement::EnforcementSelection;

impl Database {
    pub async fn upsert_selection(&self, selection: &EnforcementSelection) -> Result<()> {
        let applications_json = serde_json::to_string(&selection.applications)?;
        let categories_json = serde_json::to_string(&selection.categories)?;
        let now = format_datetime(&Utc::now());
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO enforcement_selection
                     (id, applications_json, categories_json, updated_at)
                 VALUES (1, ?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                     applications_json = excluded.applications_json,
                     categories_json = excluded.categories_json,
                     updated_at = excluded.updated_at",
                params![applications_json, categories_json, now],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_selection(&self) -> Result<Option<EnforcementSelection>> {
        self.execute(|conn| {
            let row: Option<(String, String)> = conn
                .query_row(
                    "SELECT applications_json, categories_json
                     FROM enforcement_selection WHERE id = 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let Some((applications_json, categories_json)) = row else {
                return Ok(None);
            };

            let applications: BTreeSet<String> = serde_json::from_str(&applications_json)
                .context("failed to parse applications_json")?;
            let categories: BTreeSet<String> = serde_json::from_str(&categories_json)
                .context("failed to parse categories_json")?;

            Ok(Some(EnforcementSelection {
                applications,
                categories,
            }))
        })
        .await
    }
}
