//! Site and device registry
//!
//! Sites and devices are administered elsewhere. This module holds the
//! lookups the counting pipeline needs plus an idempotent seeding path fed by
//! a TOML registry file, e.g.:
//!
//! ```toml
//! [[sites]]
//! id = 71
//! company_id = 1
//! name = "71-1"
//! capacity = 40
//!
//! [[devices]]
//! serial = "CAM-0001"
//! kind = "camera"
//! site_id = 71
//! ```

use serde::Deserialize;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::info;

use super::models::{Device, DeviceKind, Site};
use crate::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct SiteSeed {
    pub id: i64,
    pub company_id: i64,
    pub name: String,
    #[serde(default)]
    pub capacity: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSeed {
    pub serial: String,
    pub kind: DeviceKind,
    #[serde(default)]
    pub site_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryFile {
    #[serde(default)]
    pub sites: Vec<SiteSeed>,
    #[serde(default)]
    pub devices: Vec<DeviceSeed>,
}

impl RegistryFile {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid registry file: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    /// Upsert every site, then every device
    pub async fn apply(&self, pool: &SqlitePool) -> Result<()> {
        for site in &self.sites {
            upsert_site(pool, site).await?;
        }
        for device in &self.devices {
            upsert_device(pool, device).await?;
        }
        info!(
            sites = self.sites.len(),
            devices = self.devices.len(),
            "Registry seeded"
        );
        Ok(())
    }
}

pub async fn upsert_site(pool: &SqlitePool, site: &SiteSeed) -> Result<()> {
    if site.capacity < 0 {
        return Err(Error::InvalidInput(format!(
            "site {} has negative capacity {}",
            site.id, site.capacity
        )));
    }

    sqlx::query(
        r#"
        INSERT INTO sites (id, company_id, name, capacity)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            company_id = excluded.company_id,
            name = excluded.name,
            capacity = excluded.capacity,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(site.id)
    .bind(site.company_id)
    .bind(&site.name)
    .bind(site.capacity)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn upsert_device(pool: &SqlitePool, device: &DeviceSeed) -> Result<()> {
    let serial = device.serial.trim();
    if serial.is_empty() {
        return Err(Error::InvalidInput("device serial is empty".to_string()));
    }

    sqlx::query(
        r#"
        INSERT INTO devices (serial, kind, site_id)
        VALUES (?, ?, ?)
        ON CONFLICT(serial) DO UPDATE SET
            kind = excluded.kind,
            site_id = excluded.site_id
        "#,
    )
    .bind(serial)
    .bind(device.kind.as_str())
    .bind(device.site_id)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn find_device(pool: &SqlitePool, serial: &str) -> Result<Option<Device>> {
    let device = sqlx::query_as::<_, Device>(
        "SELECT id, serial, kind, site_id, last_seen FROM devices WHERE serial = ?",
    )
    .bind(serial)
    .fetch_optional(pool)
    .await?;

    Ok(device)
}

/// Record that a device was heard from
pub async fn touch_device(pool: &SqlitePool, device_id: i64, seen_at: i64) -> Result<()> {
    sqlx::query("UPDATE devices SET last_seen = MAX(COALESCE(last_seen, 0), ?) WHERE id = ?")
        .bind(seen_at)
        .bind(device_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn find_site(pool: &SqlitePool, site_id: i64) -> Result<Option<Site>> {
    let site = sqlx::query_as::<_, Site>(
        "SELECT id, company_id, name, capacity FROM sites WHERE id = ?",
    )
    .bind(site_id)
    .fetch_optional(pool)
    .await?;

    Ok(site)
}

/// All sites of one tenant, ordered by id
pub async fn sites_for_company(pool: &SqlitePool, company_id: i64) -> Result<Vec<Site>> {
    let sites = sqlx::query_as::<_, Site>(
        "SELECT id, company_id, name, capacity FROM sites WHERE company_id = ? ORDER BY id",
    )
    .bind(company_id)
    .fetch_all(pool)
    .await?;

    Ok(sites)
}

/// Device kinds bound to a site (for sensor availability flags)
pub async fn device_kinds_for_site(pool: &SqlitePool, site_id: i64) -> Result<Vec<DeviceKind>> {
    let kinds: Vec<String> =
        sqlx::query_scalar("SELECT DISTINCT kind FROM devices WHERE site_id = ? ORDER BY kind")
            .bind(site_id)
            .fetch_all(pool)
            .await?;

    kinds.iter().map(|k| k.parse()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_memory_database;

    const REGISTRY: &str = r#"
        [[sites]]
        id = 71
        company_id = 1
        name = "71-1"
        capacity = 40

        [[sites]]
        id = 72
        company_id = 2
        name = "72-1"

        [[devices]]
        serial = "CAM-71"
        kind = "camera"
        site_id = 71

        [[devices]]
        serial = "RFID-71"
        kind = "rfid"
        site_id = 71

        [[devices]]
        serial = "SPARE"
        kind = "people_counter"
    "#;

    #[tokio::test]
    async fn test_registry_seeds_sites_and_devices() {
        let pool = init_memory_database().await.unwrap();
        RegistryFile::parse(REGISTRY).unwrap().apply(&pool).await.unwrap();

        let site = find_site(&pool, 71).await.unwrap().unwrap();
        assert_eq!(site.name, "71-1");
        assert_eq!(site.capacity, 40);

        let camera = find_device(&pool, "CAM-71").await.unwrap().unwrap();
        assert_eq!(camera.kind().unwrap(), DeviceKind::Camera);
        assert_eq!(camera.site_id, Some(71));

        let spare = find_device(&pool, "SPARE").await.unwrap().unwrap();
        assert_eq!(spare.site_id, None);

        assert!(find_device(&pool, "NOPE").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_registry_apply_is_idempotent_and_updates() {
        let pool = init_memory_database().await.unwrap();
        let registry = RegistryFile::parse(REGISTRY).unwrap();
        registry.apply(&pool).await.unwrap();
        registry.apply(&pool).await.unwrap();

        upsert_site(
            &pool,
            &SiteSeed { id: 71, company_id: 1, name: "71-1".to_string(), capacity: 55 },
        )
        .await
        .unwrap();

        assert_eq!(sites_for_company(&pool, 1).await.unwrap().len(), 1);
        assert_eq!(find_site(&pool, 71).await.unwrap().unwrap().capacity, 55);

        let kinds = device_kinds_for_site(&pool, 71).await.unwrap();
        assert_eq!(kinds, vec![DeviceKind::Camera, DeviceKind::Rfid]);
    }

    #[tokio::test]
    async fn test_touch_device_never_moves_backwards() {
        let pool = init_memory_database().await.unwrap();
        RegistryFile::parse(REGISTRY).unwrap().apply(&pool).await.unwrap();
        let camera = find_device(&pool, "CAM-71").await.unwrap().unwrap();

        touch_device(&pool, camera.id, 2_000).await.unwrap();
        touch_device(&pool, camera.id, 1_000).await.unwrap();

        let camera = find_device(&pool, "CAM-71").await.unwrap().unwrap();
        assert_eq!(camera.last_seen, Some(2_000));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let bad = "[[devices]]\nserial = \"X\"\nkind = \"toaster\"\n";
        assert!(RegistryFile::parse(bad).is_err());
    }
}
