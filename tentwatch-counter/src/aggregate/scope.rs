//! Tenant site scoping
//!
//! Callers see the sites of their company, optionally narrowed to an
//! assigned subset. Explicitly naming a site outside that set is refused
//! rather than silently dropped.

use sqlx::SqlitePool;
use tentwatch_common::db::{find_site, sites_for_company, Site};
use tentwatch_common::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantScope {
    pub company_id: i64,
    /// `None` for company admins
    pub assigned_sites: Option<Vec<i64>>,
}

impl TenantScope {
    pub fn admin(company_id: i64) -> Self {
        Self {
            company_id,
            assigned_sites: None,
        }
    }

    fn allows(&self, site: &Site) -> bool {
        site.company_id == self.company_id
            && self
                .assigned_sites
                .as_ref()
                .map_or(true, |assigned| assigned.contains(&site.id))
    }
}

/// Sites a request operates on.
///
/// With no explicit ids every visible site is returned (ordered by id).
/// Explicit ids keep request order; an unknown id is NotFound and a site
/// outside the scope is Forbidden.
pub async fn resolve_sites(
    db: &SqlitePool,
    scope: &TenantScope,
    requested: &[i64],
) -> Result<Vec<Site>> {
    if requested.is_empty() {
        let sites = sites_for_company(db, scope.company_id).await?;
        return Ok(sites.into_iter().filter(|s| scope.allows(s)).collect());
    }

    let mut sites = Vec::with_capacity(requested.len());
    for id in requested {
        let site = find_site(db, *id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("site {}", id)))?;
        if !scope.allows(&site) {
            return Err(Error::Forbidden(format!("site {} is outside your scope", id)));
        }
        sites.push(site);
    }
    Ok(sites)
}
