use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::db::{
    connection::Database,
    helpers::{format_datetime, parse_datetime},
};
use crate::store::RecoveryFlag;

impl Database {
    pub async fn set_recovery_flag(&self, flag: RecoveryFlag, value: bool) -> Result<()> {
        let key = flag.key();
        let now = format_datetime(&Utc::now());
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO recovery_flags (key, value, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                     value = excluded.value,
                     updated_at = excluded.updated_at",
                params![key, i64::from(value), now],
            )?;
            Ok(())
        })
        .await
    }

    /// Value and last write time, if the flag was ever written.
    pub async fn get_recovery_flag(
        &self,
        flag: RecoveryFlag,
    ) -> Result<Option<(bool, DateTime<Utc>)>> {
        let key = flag.key();
        self.execute(move |conn| {
            let row: Option<(i64, String)> = conn
                .query_row(
                    "SELECT value, updated_at FROM recovery_flags WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match row {
                Some((value, updated_at)) => Ok(Some((
                    value != 0,
                    parse_datetime(&updated_at, "recovery_flags.updated_at")?,
                ))),
                None => Ok(None),
            }
        })
        .await
    }
}
