//! Tenant context extraction
//!
//! Authentication happens at the gateway, which forwards the caller's company
//! in `x-company-id` and, for non-admin users, the sites they are assigned to
//! in `x-assigned-sites` (comma-separated ids).

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tentwatch_common::api::parse_id_list;

use crate::aggregate::TenantScope;
use crate::error::ApiError;

pub const COMPANY_HEADER: &str = "x-company-id";
pub const ASSIGNED_SITES_HEADER: &str = "x-assigned-sites";

fn header<'a>(parts: &'a Parts, name: &str) -> Result<Option<&'a str>, ApiError> {
    parts
        .headers
        .get(name)
        .map(|v| {
            v.to_str()
                .map(str::trim)
                .map_err(|_| ApiError::Validation(format!("{} is not valid text", name)))
        })
        .transpose()
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantScope
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let company = header(parts, COMPANY_HEADER)?
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::Forbidden("Missing tenant context".to_string()))?;
        let company_id = company
            .parse::<i64>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| ApiError::Validation(format!("Invalid {}: {}", COMPANY_HEADER, company)))?;

        let assigned_sites = header(parts, ASSIGNED_SITES_HEADER)?
            .map(parse_id_list)
            .transpose()?;

        Ok(TenantScope {
            company_id,
            assigned_sites,
        })
    }
}
