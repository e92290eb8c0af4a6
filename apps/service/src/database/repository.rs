use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};

use super::models::{Monitor, NotificationConfig};
use crate::monitoring::types::{Heartbeat, MonitorStatus};
use crate::pool::{LibsqlManager, LibsqlPool};

/// Database trait for abstracting store operations
#[async_trait]
pub trait Database: Send + Sync {
    /// Get all monitors flagged active
    async fn get_active_monitors(&self) -> Result<Vec<Monitor>>;

    /// Get a monitor by id
    async fn get_monitor(&self, id: i64) -> Result<Option<Monitor>>;

    /// Get the active monitor owning a push token
    async fn get_monitor_by_push_token(&self, token: &str) -> Result<Option<Monitor>>;

    /// Insert (id 0) or update a monitor, returns its id
    async fn save_monitor(&self, monitor: &Monitor) -> Result<i64>;

    /// Direct children of a group monitor
    async fn find_children(&self, parent_id: i64) -> Result<Vec<Monitor>>;

    /// Most recent heartbeat of a monitor
    async fn find_last_heartbeat(&self, monitor_id: i64) -> Result<Option<Heartbeat>>;

    /// Heartbeat the next beat is compared against
    async fn find_previous_heartbeat(&self, monitor_id: i64) -> Result<Option<Heartbeat>> {
        self.find_last_heartbeat(monitor_id).await
    }

    /// Append a heartbeat, returns its id
    async fn append_heartbeat(&self, heartbeat: &Heartbeat) -> Result<i64>;

    /// Heartbeats at or after `since`, oldest first
    async fn heartbeats_since(&self, monitor_id: i64, since: DateTime<Utc>) -> Result<Vec<Heartbeat>>;

    /// Delete heartbeats older than `cutoff`, returns the number removed
    async fn delete_heartbeats_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;

    /// Insert (id 0) or update a notification config, returns its id
    async fn save_notification(&self, notification: &NotificationConfig) -> Result<i64>;

    async fn link_notification(&self, monitor_id: i64, notification_id: i64) -> Result<()>;

    /// Notification configs linked to a monitor
    async fn notifications_for_monitor(&self, monitor_id: i64) -> Result<Vec<NotificationConfig>>;
}

const MONITOR_COLUMNS: &str = "id, user_id, name, monitor_type, url, hostname, port, keyword, \
     invert_keyword, json_path, json_path_operator, expected_value, method, headers, body, \
     http_body_encoding, basic_auth_user, basic_auth_pass, accepted_status_codes, max_redirects, \
     ignore_tls, dns_resolve_type, dns_resolve_server, smtp_security, push_token, parent, \
     interval_seconds, retry_interval_seconds, max_retries, resend_interval, timeout_seconds, \
     upside_down, active, created_at, updated_at";

const HEARTBEAT_COLUMNS: &str =
    "id, monitor_id, time, status, msg, ping, duration, important, retries, down_count";

/// LibSQL database implementation
pub struct DatabaseImpl {
    pool: LibsqlPool,
}

impl DatabaseImpl {
    /// Create a new database instance from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        Ok(self.pool.get().await?)
    }

    async fn query_monitors(&self, filter: &str, params: Vec<libsql::Value>) -> Result<Vec<Monitor>> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT {MONITOR_COLUMNS} FROM monitors {filter}");
        let mut rows = conn.query(&sql, params).await?;

        let mut monitors = Vec::new();
        while let Some(row) = rows.next().await? {
            monitors.push(monitor_from_row(&row)?);
        }
        Ok(monitors)
    }
}

pub(crate) fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn flag(value: bool) -> i64 {
    if value { 1 } else { 0 }
}

fn monitor_from_row(row: &Row) -> Result<Monitor> {
    let accepted: String = row.get(18)?;

    Ok(Monitor {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        monitor_type: row.get(3)?,
        url: row.get(4)?,
        hostname: row.get(5)?,
        port: row.get::<Option<i64>>(6)?.and_then(|port| u16::try_from(port).ok()),
        keyword: row.get(7)?,
        invert_keyword: row.get::<i64>(8)? != 0,
        json_path: row.get(9)?,
        json_path_operator: row.get(10)?,
        expected_value: row.get(11)?,
        method: row.get(12)?,
        headers: row.get(13)?,
        body: row.get(14)?,
        http_body_encoding: row.get(15)?,
        basic_auth_user: row.get(16)?,
        basic_auth_pass: row.get(17)?,
        accepted_status_codes: serde_json::from_str(&accepted)
            .context("monitor has malformed accepted_status_codes")?,
        max_redirects: u32::try_from(row.get::<i64>(19)?).unwrap_or(0),
        ignore_tls: row.get::<i64>(20)? != 0,
        dns_resolve_type: row.get(21)?,
        dns_resolve_server: row.get(22)?,
        smtp_security: row.get(23)?,
        push_token: row.get(24)?,
        parent: row.get(25)?,
        interval: u64::try_from(row.get::<i64>(26)?).unwrap_or(0),
        retry_interval: u64::try_from(row.get::<i64>(27)?).unwrap_or(0),
        max_retries: u32::try_from(row.get::<i64>(28)?).unwrap_or(0),
        resend_interval: u32::try_from(row.get::<i64>(29)?).unwrap_or(0),
        timeout: row.get::<f64>(30)?,
        upside_down: row.get::<i64>(31)? != 0,
        active: row.get::<i64>(32)? != 0,
        created_at: from_millis(row.get(33)?),
        updated_at: from_millis(row.get(34)?),
    })
}

fn heartbeat_from_row(row: &Row) -> Result<Heartbeat> {
    Ok(Heartbeat {
        id: Some(row.get(0)?),
        monitor_id: row.get(1)?,
        time: from_millis(row.get(2)?),
        status: MonitorStatus::from_code(row.get(3)?)?,
        msg: row.get(4)?,
        ping: row.get::<Option<i64>>(5)?.and_then(|ping| u64::try_from(ping).ok()),
        duration: u64::try_from(row.get::<i64>(6)?).unwrap_or(0),
        important: row.get::<i64>(7)? != 0,
        retries: u32::try_from(row.get::<i64>(8)?).unwrap_or(0),
        down_count: u32::try_from(row.get::<i64>(9)?).unwrap_or(0),
    })
}

fn notification_from_row(row: &Row) -> Result<NotificationConfig> {
    let config: String = row.get(3)?;
    Ok(NotificationConfig {
        id: row.get(0)?,
        name: row.get(1)?,
        provider: row.get(2)?,
        config: serde_json::from_str(&config).context("notification has malformed config")?,
        active: row.get::<i64>(4)? != 0,
    })
}

#[async_trait]
impl Database for DatabaseImpl {
    async fn get_active_monitors(&self) -> Result<Vec<Monitor>> {
        self.query_monitors("WHERE active = 1 ORDER BY id", Vec::new()).await
    }

    async fn get_monitor(&self, id: i64) -> Result<Option<Monitor>> {
        let mut monitors = self.query_monitors("WHERE id = ?", vec![id.into()]).await?;
        Ok(monitors.pop())
    }

    async fn get_monitor_by_push_token(&self, token: &str) -> Result<Option<Monitor>> {
        let mut monitors = self
            .query_monitors("WHERE push_token = ? AND active = 1", vec![token.to_string().into()])
            .await?;
        Ok(monitors.pop())
    }

    async fn save_monitor(&self, monitor: &Monitor) -> Result<i64> {
        let conn = self.get_conn().await?;
        let accepted = serde_json::to_string(&monitor.accepted_status_codes)?;

        if monitor.id == 0 {
            conn.execute(
                "INSERT INTO monitors (user_id, name, monitor_type, url, hostname, port, keyword,
                    invert_keyword, json_path, json_path_operator, expected_value, method, headers,
                    body, http_body_encoding, basic_auth_user, basic_auth_pass,
                    accepted_status_codes, max_redirects, ignore_tls, dns_resolve_type,
                    dns_resolve_server, smtp_security, push_token, parent, interval_seconds,
                    retry_interval_seconds, max_retries, resend_interval, timeout_seconds,
                    upside_down, active, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                    ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    monitor.user_id,
                    monitor.name.clone(),
                    monitor.monitor_type.clone(),
                    monitor.url.clone(),
                    monitor.hostname.clone(),
                    monitor.port.map(i64::from),
                    monitor.keyword.clone(),
                    flag(monitor.invert_keyword),
                    monitor.json_path.clone(),
                    monitor.json_path_operator.clone(),
                    monitor.expected_value.clone(),
                    monitor.method.clone(),
                    monitor.headers.clone(),
                    monitor.body.clone(),
                    monitor.http_body_encoding.clone(),
                    monitor.basic_auth_user.clone(),
                    monitor.basic_auth_pass.clone(),
                    accepted,
                    i64::from(monitor.max_redirects),
                    flag(monitor.ignore_tls),
                    monitor.dns_resolve_type.clone(),
                    monitor.dns_resolve_server.clone(),
                    monitor.smtp_security.clone(),
                    monitor.push_token.clone(),
                    monitor.parent,
                    monitor.interval as i64,
                    monitor.retry_interval as i64,
                    i64::from(monitor.max_retries),
                    i64::from(monitor.resend_interval),
                    monitor.timeout,
                    flag(monitor.upside_down),
                    flag(monitor.active),
                    to_millis(monitor.created_at),
                    to_millis(monitor.updated_at),
                ],
            )
            .await?;

            Ok(conn.last_insert_rowid())
        } else {
            conn.execute(
                "UPDATE monitors SET user_id = ?, name = ?, monitor_type = ?, url = ?, hostname = ?,
                    port = ?, keyword = ?, invert_keyword = ?, json_path = ?,
                    json_path_operator = ?, expected_value = ?, method = ?, headers = ?, body = ?,
                    http_body_encoding = ?, basic_auth_user = ?, basic_auth_pass = ?,
                    accepted_status_codes = ?, max_redirects = ?, ignore_tls = ?,
                    dns_resolve_type = ?, dns_resolve_server = ?, smtp_security = ?,
                    push_token = ?, parent = ?, interval_seconds = ?, retry_interval_seconds = ?,
                    max_retries = ?, resend_interval = ?, timeout_seconds = ?, upside_down = ?,
                    active = ?, updated_at = ?
                 WHERE id = ?",
                params![
                    monitor.user_id,
                    monitor.name.clone(),
                    monitor.monitor_type.clone(),
                    monitor.url.clone(),
                    monitor.hostname.clone(),
                    monitor.port.map(i64::from),
                    monitor.keyword.clone(),
                    flag(monitor.invert_keyword),
                    monitor.json_path.clone(),
                    monitor.json_path_operator.clone(),
                    monitor.expected_value.clone(),
                    monitor.method.clone(),
                    monitor.headers.clone(),
                    monitor.body.clone(),
                    monitor.http_body_encoding.clone(),
                    monitor.basic_auth_user.clone(),
                    monitor.basic_auth_pass.clone(),
                    accepted,
                    i64::from(monitor.max_redirects),
                    flag(monitor.ignore_tls),
                    monitor.dns_resolve_type.clone(),
                    monitor.dns_resolve_server.clone(),
                    monitor.smtp_security.clone(),
                    monitor.push_token.clone(),
                    monitor.parent,
                    monitor.interval as i64,
                    monitor.retry_interval as i64,
                    i64::from(monitor.max_retries),
                    i64::from(monitor.resend_interval),
                    monitor.timeout,
                    flag(monitor.upside_down),
                    flag(monitor.active),
                    to_millis(Utc::now()),
                    monitor.id,
                ],
            )
            .await?;

            Ok(monitor.id)
        }
    }

    async fn find_children(&self, parent_id: i64) -> Result<Vec<Monitor>> {
        self.query_monitors("WHERE parent = ? ORDER BY id", vec![parent_id.into()]).await
    }

    async fn find_last_heartbeat(&self, monitor_id: i64) -> Result<Option<Heartbeat>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {HEARTBEAT_COLUMNS} FROM heartbeats WHERE monitor_id = ?
                 ORDER BY time DESC, id DESC LIMIT 1"
            ))
            .await?;

        let mut rows = stmt.query(params![monitor_id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(heartbeat_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn append_heartbeat(&self, heartbeat: &Heartbeat) -> Result<i64> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO heartbeats (monitor_id, time, status, msg, ping, duration, important,
                retries, down_count)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                heartbeat.monitor_id,
                to_millis(heartbeat.time),
                i64::from(heartbeat.status.code()),
                heartbeat.msg.clone(),
                heartbeat.ping.map(|ping| ping as i64),
                heartbeat.duration as i64,
                flag(heartbeat.important),
                i64::from(heartbeat.retries),
                i64::from(heartbeat.down_count),
            ],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn heartbeats_since(&self, monitor_id: i64, since: DateTime<Utc>) -> Result<Vec<Heartbeat>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {HEARTBEAT_COLUMNS} FROM heartbeats WHERE monitor_id = ? AND time >= ?
                 ORDER BY time ASC, id ASC"
            ))
            .await?;

        let mut rows = stmt.query(params![monitor_id, to_millis(since)]).await?;
        let mut heartbeats = Vec::new();
        while let Some(row) = rows.next().await? {
            heartbeats.push(heartbeat_from_row(&row)?);
        }
        Ok(heartbeats)
    }

    async fn delete_heartbeats_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let conn = self.get_conn().await?;
        let deleted = conn
            .execute("DELETE FROM heartbeats WHERE time < ?", params![to_millis(cutoff)])
            .await?;
        Ok(deleted)
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query("SELECT value FROM settings WHERE key = ?", params![key.to_string()])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key.to_string(), value.to_string(), Utc::now().timestamp()],
        )
        .await?;
        Ok(())
    }

    async fn save_notification(&self, notification: &NotificationConfig) -> Result<i64> {
        let conn = self.get_conn().await?;
        let config = serde_json::to_string(&notification.config)?;

        if notification.id == 0 {
            conn.execute(
                "INSERT INTO notifications (name, provider, config, active, created_at)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    notification.name.clone(),
                    notification.provider.clone(),
                    config,
                    flag(notification.active),
                    Utc::now().timestamp(),
                ],
            )
            .await?;
            Ok(conn.last_insert_rowid())
        } else {
            conn.execute(
                "UPDATE notifications SET name = ?, provider = ?, config = ?, active = ? WHERE id = ?",
                params![
                    notification.name.clone(),
                    notification.provider.clone(),
                    config,
                    flag(notification.active),
                    notification.id,
                ],
            )
            .await?;
            Ok(notification.id)
        }
    }

    async fn link_notification(&self, monitor_id: i64, notification_id: i64) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT OR IGNORE INTO monitor_notifications (monitor_id, notification_id) VALUES (?, ?)",
            params![monitor_id, notification_id],
        )
        .await?;
        Ok(())
    }

    async fn notifications_for_monitor(&self, monitor_id: i64) -> Result<Vec<NotificationConfig>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT n.id, n.name, n.provider, n.config, n.active
                 FROM notifications n
                 JOIN monitor_notifications mn ON mn.notification_id = n.id
                 WHERE mn.monitor_id = ?
                 ORDER BY n.id",
                params![monitor_id],
            )
            .await?;

        let mut notifications = Vec::new();
        while let Some(row) = rows.next().await? {
            notifications.push(notification_from_row(&row)?);
        }
        Ok(notifications)
    }
}
